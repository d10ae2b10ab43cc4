//! Configuration for the call session layer
//!
//! All knobs have defaults matching the behaviour mobile platforms expect:
//! a 30 second registration retry, a 2 second answer cool-down, and
//! `"Unknown"` as the caller label when a push carries no metadata.
//!
//! # Examples
//!
//! ```rust
//! use voip_push_core::config::VoipConfig;
//! use std::time::Duration;
//!
//! let config = VoipConfig::new()
//!     .with_endpoint("https://push.example.com/api/register-voip-token")
//!     .with_retry_delay(Duration::from_secs(10))
//!     .with_bundle_id("com.example.app");
//!
//! assert_eq!(config.registration.retry_delay(), Duration::from_secs(10));
//! assert!(config.validate().is_ok());
//! ```
//!
//! Loading from TOML:
//!
//! ```rust
//! use voip_push_core::config::VoipConfig;
//!
//! let config = VoipConfig::from_toml_str(r#"
//!     [registration]
//!     endpoint = "https://push.example.com/api/register-voip-token"
//!     environment = "sandbox"
//!
//!     [calls]
//!     answer_cooldown_ms = 1500
//! "#).unwrap();
//!
//! assert_eq!(config.registration.environment, "sandbox");
//! assert_eq!(config.calls.answer_cooldown_ms, 1500);
//! assert_eq!(config.registration.retry_delay_ms, 30_000);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{VoipError, VoipResult};
use crate::logging::LoggingConfig;

/// Token registration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Backend endpoint that accepts token registrations
    pub endpoint: String,
    /// Per-request timeout in milliseconds; hitting it counts as a failed attempt
    pub request_timeout_ms: u64,
    /// Fixed delay in milliseconds before retrying a failed registration
    pub retry_delay_ms: u64,
    /// Platform name sent with every registration
    pub platform: String,
    /// Application bundle identifier
    pub bundle_id: String,
    /// Push environment, "production" or "sandbox"
    pub environment: String,
    /// Device model, e.g. "iPhone"
    pub device_model: String,
    /// OS version string
    pub system_version: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3004/api/register-voip-token".to_string(),
            request_timeout_ms: 60_000,
            retry_delay_ms: 30_000,
            platform: "ios".to_string(),
            bundle_id: String::new(),
            environment: "production".to_string(),
            device_model: String::new(),
            system_version: String::new(),
        }
    }
}

impl RegistrationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Call handling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long a duplicate answer is suppressed
    pub answer_cooldown_ms: u64,
    /// Caller label used when the push carries none
    pub placeholder_caller_label: String,
    /// Video flag used when the push doesn't say
    pub default_has_video: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            answer_cooldown_ms: 2000,
            placeholder_caller_label: "Unknown".to_string(),
            default_has_video: true,
        }
    }
}

impl CallConfig {
    pub fn answer_cooldown(&self) -> Duration {
        Duration::from_millis(self.answer_cooldown_ms)
    }
}

/// Saturating conversion for durations stored as milliseconds
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoipConfig {
    pub registration: RegistrationConfig,
    pub calls: CallConfig,
    pub logging: LoggingConfig,
}

impl VoipConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(contents: &str) -> VoipResult<Self> {
        let config: VoipConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> VoipResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.registration.endpoint = endpoint.into();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.registration.retry_delay_ms = millis(delay);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.registration.request_timeout_ms = millis(timeout);
        self
    }

    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.registration.bundle_id = bundle_id.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.registration.environment = environment.into();
        self
    }

    pub fn with_device(mut self, model: impl Into<String>, system_version: impl Into<String>) -> Self {
        self.registration.device_model = model.into();
        self.registration.system_version = system_version.into();
        self
    }

    pub fn with_answer_cooldown(mut self, cooldown: Duration) -> Self {
        self.calls.answer_cooldown_ms = millis(cooldown);
        self
    }

    pub fn with_placeholder_caller_label(mut self, label: impl Into<String>) -> Self {
        self.calls.placeholder_caller_label = label.into();
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Check the values that would otherwise fail late, at first use
    pub fn validate(&self) -> VoipResult<()> {
        let endpoint = Url::parse(&self.registration.endpoint).map_err(|e| {
            VoipError::invalid_configuration("registration.endpoint", e.to_string())
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(VoipError::invalid_configuration(
                "registration.endpoint",
                format!("unsupported scheme '{}'", endpoint.scheme()),
            ));
        }
        if self.registration.retry_delay_ms == 0 {
            return Err(VoipError::invalid_configuration(
                "registration.retry_delay_ms",
                "must be greater than zero",
            ));
        }
        if self.registration.request_timeout_ms == 0 {
            return Err(VoipError::invalid_configuration(
                "registration.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.calls.answer_cooldown_ms == 0 {
            return Err(VoipError::invalid_configuration(
                "calls.answer_cooldown_ms",
                "must be greater than zero",
            ));
        }
        crate::logging::parse_log_level(&self.logging.level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VoipConfig::default();
        assert_eq!(config.registration.retry_delay(), Duration::from_secs(30));
        assert_eq!(config.calls.answer_cooldown(), Duration::from_secs(2));
        assert_eq!(config.calls.placeholder_caller_label, "Unknown");
        assert!(config.calls.default_has_video);
        assert_eq!(config.registration.platform, "ios");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(VoipConfig::from_toml_str("").unwrap(), VoipConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = VoipConfig::from_toml_str(
            r#"
            [registration]
            endpoint = "https://api.example.com/voip"
            retry_delay_ms = 5000
            device_model = "iPhone"

            [calls]
            placeholder_caller_label = "Private number"
            default_has_video = false

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.registration.endpoint, "https://api.example.com/voip");
        assert_eq!(config.registration.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.registration.device_model, "iPhone");
        assert_eq!(config.registration.request_timeout_ms, 60_000);
        assert_eq!(config.calls.placeholder_caller_label, "Private number");
        assert!(!config.calls.default_has_video);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_validation_failures() {
        let bad_endpoint = VoipConfig::new().with_endpoint("not a url");
        assert!(matches!(
            bad_endpoint.validate(),
            Err(VoipError::InvalidConfiguration { ref field, .. }) if field == "registration.endpoint"
        ));

        let bad_scheme = VoipConfig::new().with_endpoint("ftp://example.com/register");
        assert!(bad_scheme.validate().is_err());

        let zero_retry = VoipConfig::new().with_retry_delay(Duration::ZERO);
        assert!(zero_retry.validate().is_err());

        let bad_toml = VoipConfig::from_toml_str("[calls]\nanswer_cooldown_ms = \"soon\"");
        assert!(matches!(bad_toml, Err(VoipError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_sub_second_durations_keep_millisecond_precision() {
        let config = VoipConfig::new()
            .with_retry_delay(Duration::from_millis(500))
            .with_request_timeout(Duration::from_millis(1500))
            .with_answer_cooldown(Duration::from_millis(250));

        assert_eq!(config.registration.retry_delay(), Duration::from_millis(500));
        assert_eq!(config.registration.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.calls.answer_cooldown(), Duration::from_millis(250));
        assert!(config.validate().is_ok());

        // Durations beyond u64 milliseconds saturate instead of wrapping
        let huge = VoipConfig::new().with_answer_cooldown(Duration::MAX);
        assert_eq!(huge.calls.answer_cooldown_ms, u64::MAX);
    }
}
