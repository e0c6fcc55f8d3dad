//! Client configuration.
//!
//! Loaded from a TOML file; every field has a default, so an empty file
//! (or no file) is a working configuration.
//!
//! ```toml
//! boundary_policy = "favor_document"
//!
//! [identity]
//! initials = "JD"
//! legal_name = "Jane Doe"
//! utc_offset_minutes = 60
//!
//! [timing]
//! debounce_ms = 250
//! ```

use std::path::Path;
use std::time::Duration;

use kiroku_doc::{BoundaryPolicy, FontScheme, ShadingPalette};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_LOCALE, MAX_RELOAD_POLL_ATTEMPTS, NOTIFICATION_DEBOUNCE, RELOAD_POLL_INTERVAL,
    RELOAD_SETTLE_DELAY,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Who the client acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub initials: String,
    pub legal_name: String,
    pub locale: String,
    pub utc_offset_minutes: i32,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            initials: String::new(),
            legal_name: String::new(),
            locale: DEFAULT_LOCALE.to_string(),
            utc_offset_minutes: 0,
        }
    }
}

/// Debounce and reload timing, in milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub debounce_ms: u64,
    pub reload_poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub settle_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            debounce_ms: NOTIFICATION_DEBOUNCE.as_millis() as u64,
            reload_poll_interval_ms: RELOAD_POLL_INTERVAL.as_millis() as u64,
            max_poll_attempts: MAX_RELOAD_POLL_ATTEMPTS,
            settle_delay_ms: RELOAD_SETTLE_DELAY.as_millis() as u64,
        }
    }
}

impl Timing {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reload_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reload_poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub identity: Identity,
    pub timing: Timing,
    pub fonts: FontScheme,
    pub palette: ShadingPalette,
    pub boundary_policy: BoundaryPolicy,
}

impl ClientConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.max_poll_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "timing.max_poll_attempts must be at least 1".into(),
            ));
        }
        if self.fonts.user.is_empty() || self.fonts.signature.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "fonts.user and fonts.signature need at least one font".into(),
            ));
        }
        if self.identity.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::ValidationFailed(format!(
                "identity.utc_offset_minutes {} is out of range",
                self.identity.utc_offset_minutes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.timing.debounce(), Duration::from_millis(250));
        assert_eq!(config.boundary_policy, BoundaryPolicy::Reject);
    }

    #[test]
    fn test_partial_config() {
        let config = ClientConfig::from_toml(
            r##"
            boundary_policy = "favor_document"

            [identity]
            initials = "JD"
            legal_name = "Jane Doe"

            [fonts]
            user = ["Courier New", "Courier"]

            [palette]
            empty = "#ffeeaa"
            "##,
        )
        .unwrap();
        assert_eq!(config.identity.initials, "JD");
        assert_eq!(config.identity.locale, DEFAULT_LOCALE);
        assert_eq!(config.fonts.user.len(), 2);
        assert_eq!(config.fonts.marker, "Consolas");
        assert_eq!(config.palette.empty, "#ffeeaa");
        assert_eq!(config.palette.filled, "FFFFFF");
        assert_eq!(config.boundary_policy, BoundaryPolicy::FavorDocument);
    }

    #[test]
    fn test_validation() {
        let err = ClientConfig::from_toml("[timing]\nmax_poll_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
        let err = ClientConfig::from_toml("[fonts]\nuser = []").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
        assert!(matches!(
            ClientConfig::from_toml("timing = 3").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[identity]\ninitials = \"AB\"\nutc_offset_minutes = -300").unwrap();
        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.identity.initials, "AB");
        assert_eq!(config.identity.utc_offset_minutes, -300);

        let missing = ClientConfig::load(file.path().with_extension("nope"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
