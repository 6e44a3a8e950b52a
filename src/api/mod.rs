//! Backend collaborator: HTTP client and wire types.
//!
//! The backend owns feed polling, parsing and storage. This module only
//! speaks its JSON contract:
//!
//! - [`client`] - [`ApiClient`], one method per endpoint, single retry for reads
//! - [`types`] - Articles, feeds, stats, discovery candidates and request bodies
//!
//! Any non-2xx response becomes [`ApiError::Server`]; a 204 (or an empty 2xx
//! body) is an absent result.

mod client;
mod types;

pub use client::{ApiClient, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_REQUEST_TIMEOUT};
pub use types::{
    Article, ArticleFlag, ArticleId, CandidateKind, DiscoveredFeedCandidate, Feed, FeedId,
    FeedKind, FilterContext, NewFeed, Stats, YoutubeResolution, PLACEHOLDER_TITLE,
};

use thiserror::Error;

/// Errors from a round trip to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never completed (DNS, connection, TLS, body read)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// The request exceeded the configured client timeout
    #[error("Request timed out")]
    Timeout,
    /// The backend answered with a non-2xx status
    #[error("API error: {status} {status_text}")]
    Server { status: u16, status_text: String },
    /// A 2xx body was not the JSON we expected
    #[error("Invalid JSON body: {0}")]
    Json(String),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ApiError {
    /// Transient failures worth one more attempt on a read query.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout => true,
            ApiError::Server { status, .. } => *status >= 500,
            ApiError::Json(_) | ApiError::ResponseTooLarge(_) | ApiError::InvalidBaseUrl(_) => {
                false
            }
        }
    }

    /// HTTP status for server errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let server = |status| ApiError::Server {
            status,
            status_text: String::new(),
        };
        assert!(ApiError::Timeout.is_retryable());
        assert!(server(500).is_retryable());
        assert!(server(503).is_retryable());
        assert!(!server(404).is_retryable());
        assert!(!server(400).is_retryable());
        assert!(!ApiError::Json("eof".into()).is_retryable());
        assert!(!ApiError::ResponseTooLarge(10).is_retryable());
    }

    #[test]
    fn test_server_error_message_carries_status_text() {
        let err = ApiError::Server {
            status: 404,
            status_text: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "API error: 404 Not Found");
        assert_eq!(err.status(), Some(404));
        assert_eq!(ApiError::Timeout.status(), None);
    }
}
