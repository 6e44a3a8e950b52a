use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Display width of a string in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Makes backend-supplied text safe to print on one terminal line.
///
/// Titles come from arbitrary feeds, so they may carry ANSI escape sequences
/// (CSI `ESC [ ... final`, OSC `ESC ] ... BEL|ESC \`), other C0 controls, or
/// embedded newlines. Escapes and controls are dropped; any run of whitespace
/// (including `\n`, `\r`, `\t`) collapses to a single space; the result is
/// trimmed.
///
/// Returns `Cow::Borrowed` when nothing needed changing.
pub fn sanitize_line(s: &str) -> Cow<'_, str> {
    let clean = !s.chars().any(|c| c.is_control())
        && !s.contains("  ")
        && s.trim().len() == s.len();
    if clean {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameter and intermediate bytes run until a final byte in @..~
                    for n in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&n) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(n) = chars.next() {
                        if n == '\x07' {
                            break;
                        }
                        if n == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if c.is_whitespace() => pending_space = !out.is_empty(),
            c if c.is_control() => {}
            c => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
            }
        }
    }

    Cow::Owned(out)
}

/// Truncates to at most `max_width` columns, ending in "..." when cut.
///
/// Widths of 3 or less have no room for the ellipsis, so the string is simply
/// cut at the last character that fits.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let budget = if max_width > ELLIPSIS_WIDTH {
        max_width - ELLIPSIS_WIDTH
    } else {
        max_width
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }

    if max_width > ELLIPSIS_WIDTH {
        Cow::Owned(format!("{}{}", &s[..end], ELLIPSIS))
    } else {
        Cow::Owned(s[..end].to_owned())
    }
}

/// Sanitizes then truncates, for one-line listings.
pub fn display_line(s: &str, max_width: usize) -> String {
    truncate_to_width(&sanitize_line(s), max_width).into_owned()
}
