/// Configuration structures that can be tested independently
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

pub const MAX_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    /// Backend base URL, e.g. `https://api.orthotrack.com`
    pub api_endpoint: String,
    pub hardware: String,

    pub check_interval_secs: u64,
    pub check_on_start: bool,
    pub restart_grace_secs: u64,

    // Streaming
    pub buffer_size: usize,
    pub download_timeout_secs: u64,
    pub require_checksum: bool,

    pub worker_poll_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.orthotrack.com".to_string(),
            hardware: "ESP32-WROOM-32".to_string(),
            check_interval_secs: 3600,
            check_on_start: false,
            restart_grace_secs: 5,
            buffer_size: 1024,
            download_timeout_secs: 60,
            require_checksum: false,
            worker_poll_ms: 1000,
        }
    }
}

impl OtaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.api_endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint);
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Zero("check interval"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Zero("buffer size"));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::BufferTooLarge { max: MAX_BUFFER_SIZE });
        }
        if self.download_timeout_secs == 0 {
            return Err(ConfigError::Zero("download timeout"));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.restart_grace_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms.max(10))
    }

    /// Joins the endpoint and an API path without doubling the slash.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.api_endpoint.trim().trim_end_matches('/'), path)
    }
}

/// Who the device is, attached to every backend call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub api_key: String,
    pub current_version: String,
}

impl DeviceIdentity {
    pub fn new(
        device_id: impl Into<String>,
        api_key: impl Into<String>,
        current_version: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            api_key: api_key.into(),
            current_version: current_version.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_firmware_constants() {
        let config = OtaConfig::default();
        assert_eq!(config.check_interval(), Duration::from_secs(3600));
        assert_eq!(config.restart_grace(), Duration::from_secs(5));
        assert_eq!(config.buffer_size, 1024);
        assert!(!config.require_checksum);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = OtaConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: OtaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: OtaConfig =
            serde_json::from_str(r#"{"api_endpoint":"http://10.0.0.2:8080"}"#).unwrap();
        assert_eq!(config.api_endpoint, "http://10.0.0.2:8080");
        assert_eq!(config.check_interval_secs, 3600);
    }

    #[test]
    fn test_validate() {
        let mut config = OtaConfig::default();
        config.api_endpoint = "  ".into();
        assert_eq!(config.validate(), Err(ConfigError::EmptyEndpoint));

        config.api_endpoint = "ftp://host".into();
        assert_eq!(config.validate(), Err(ConfigError::InvalidEndpoint));

        config.api_endpoint = "http://host".into();
        config.check_interval_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("check interval")));

        config.check_interval_secs = 60;
        config.buffer_size = MAX_BUFFER_SIZE + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BufferTooLarge { .. })
        ));
    }

    #[test]
    fn test_url_for() {
        let mut config = OtaConfig::default();
        config.api_endpoint = "http://host:8080/".into();
        assert_eq!(
            config.url_for("/api/v1/firmware/check-update"),
            "http://host:8080/api/v1/firmware/check-update"
        );
    }
}
