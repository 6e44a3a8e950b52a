//! Configuration file parser for ~/.config/kantent/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are ignored by serde, though we log a
//! warning so typos do not go unnoticed. `KANTENT_API_URL` overrides
//! `api_url` from the file.
use crate::api::{DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_REQUEST_TIMEOUT};
use crate::sync::{DEFAULT_PAGE_SIZE, INGEST_SETTLE_DELAY};
use crate::util::validate_http_url;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that takes precedence over `api_url`.
pub const API_URL_ENV: &str = "KANTENT_API_URL";

/// Largest page the backend honours; above this it falls back to its default.
const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed fine but a value is out of range.
    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Client configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend (e.g. `http://localhost:8080`).
    pub api_url: String,

    /// Articles per page, 1..=100.
    pub page_size: u32,

    /// Wait after creating/refreshing a feed before article views go stale.
    /// 0 invalidates immediately.
    pub ingest_delay_ms: u64,

    pub request_timeout_secs: u64,

    /// Response bodies larger than this are rejected.
    pub max_response_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            ingest_delay_ms: INGEST_SETTLE_DELAY.as_millis() as u64,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "api_url",
        "page_size",
        "ingest_delay_ms",
        "request_timeout_secs",
        "max_response_bytes",
    ];

    /// `~/.config/kantent/config.toml`, or `None` when `HOME` is unset.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("kantent")
                .join("config.toml"),
        )
    }

    /// Reads `path`, or `None` when there is no file.
    ///
    /// Reads through a handle capped one byte past the limit, so an oversized
    /// file is detected without loading it and without a separate stat.
    fn read_capped(path: &Path) -> Result<Option<String>, ConfigError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut content = String::new();
        file.take(Self::MAX_FILE_SIZE + 1)
            .read_to_string(&mut content)?;
        if content.len() as u64 > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "{} exceeds {} bytes",
                path.display(),
                Self::MAX_FILE_SIZE
            )));
        }
        Ok(Some(content))
    }

    /// Loads the config at `path`.
    ///
    /// A missing or blank file gives the defaults. Bad TOML, wrong types and
    /// out-of-range values are errors; unknown keys only warn.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = Self::read_capped(path)? else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        };
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Blank config file, using defaults");
            return Ok(Self::default());
        }

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            api_url = %config.api_url,
            page_size = config.page_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parses and validates TOML content.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `KANTENT_API_URL` if set, then re-validates.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_api_url_override(std::env::var(API_URL_ENV).ok())
    }

    fn with_api_url_override(mut self, api_url: Option<String>) -> Result<Self, ConfigError> {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            tracing::debug!(api_url = %url, "API URL overridden from environment");
            self.api_url = url.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url(&self.api_url).map_err(|e| ConfigError::Invalid {
            key: "api_url",
            reason: e.to_string(),
        })?;

        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConfigError::Invalid {
                key: "page_size",
                reason: format!("{} is outside 1..={MAX_PAGE_SIZE}", self.page_size),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_response_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn ingest_delay(&self) -> Duration {
        Duration::from_millis(self.ingest_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kantent_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.ingest_delay(), Duration::from_millis(2000));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/kantent_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        cleanup(&path);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "page_size = 12\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 12);
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.ingest_delay_ms, 2000);
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
api_url = "https://reader.example.com"
page_size = 50
ingest_delay_ms = 0
request_timeout_secs = 5
max_response_bytes = 4096
"#,
        )
        .unwrap();
        assert_eq!(
            config,
            Config {
                api_url: "https://reader.example.com".into(),
                page_size: 50,
                ingest_delay_ms: 0,
                request_timeout_secs: 5,
                max_response_bytes: 4096,
            }
        );
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(matches!(
            Config::parse("page_size = \"twenty\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("page_size = 20\ntheme = \"dark\"\n").unwrap();
        assert_eq!(config.page_size, 20);
    }

    #[test]
    fn test_page_size_out_of_range() {
        for content in ["page_size = 0\n", "page_size = 101\n"] {
            let err = Config::parse(content).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: "page_size", .. }),
                "{content}: {err}"
            );
        }
        assert!(Config::parse("page_size = 100\n").is_ok());
    }

    #[test]
    fn test_bad_api_url_rejected() {
        let err = Config::parse("api_url = \"ftp://files.example\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "api_url", .. }));
    }

    #[test]
    fn test_api_url_override() {
        let config = Config::default()
            .with_api_url_override(Some(" http://10.0.0.2:9000 ".into()))
            .unwrap();
        assert_eq!(config.api_url, "http://10.0.0.2:9000");

        let unchanged = Config::default()
            .with_api_url_override(Some(String::new()))
            .unwrap();
        assert_eq!(unchanged.api_url, "http://localhost:8080");

        assert!(Config::default()
            .with_api_url_override(Some("not a url".into()))
            .is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        cleanup(&path);
    }

    #[test]
    fn test_file_at_size_limit_accepted() {
        let mut content = "page_size = 20\n".to_string();
        while content.len() < 1_048_576 - 20 {
            content.push_str("# padding comment\n");
        }
        content.truncate(1_048_576);
        let path = write_config("at_limit", &content);
        assert!(Config::load(&path).is_ok());
        cleanup(&path);
    }
}
