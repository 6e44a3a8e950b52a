use thiserror::Error;
use url::Url;

/// Errors from validating a user- or config-supplied URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL embeds `user:password@` credentials.
    #[error("URL must not contain credentials")]
    EmbeddedCredentials,
}

/// Parses an http(s) URL with a host.
///
/// Used for the API base URL, which is normally `localhost`, so loopback and
/// private addresses are allowed here.
pub fn validate_http_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlValidationError::MissingHost),
    }

    Ok(url)
}

/// Validates a feed URL before it is sent for subscription.
///
/// Same rules as [`validate_http_url`], and additionally rejects embedded
/// credentials: the URL is stored server-side and shown in feed listings.
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = validate_http_url(url_str)?;
    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }
    Ok(url)
}
