//! Utility functions shared by the client and the command-line front end.
//!
//! - **URL validation**: http(s) checks for the API base URL and feed URLs
//! - **Text processing**: terminal-safe, width-aware one-line rendering
//!
//! # Examples
//!
//! ```
//! use kantent::util::{display_line, validate_feed_url};
//!
//! let url = validate_feed_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! assert_eq!(display_line("Hello\nWorld", 20), "Hello World");
//! ```

mod text;
mod url_validator;

pub use text::{display_line, display_width, sanitize_line, truncate_to_width};
pub use url_validator::{validate_feed_url, validate_http_url, UrlValidationError};
