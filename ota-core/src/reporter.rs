//! Fire-and-forget status reports to the backend.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::config::{DeviceIdentity, OtaConfig};
use crate::transport::{http_status, json_headers, HttpTransport, UPDATE_STATUS_PATH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    DeltaNotSupported,
    DownloadFailed,
    InstallFailed,
    Success,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatus::DeltaNotSupported => "delta_not_supported",
            UpdateStatus::DownloadFailed => "download_failed",
            UpdateStatus::InstallFailed => "install_failed",
            UpdateStatus::Success => "success",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /api/v1/firmware/update-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub device_id: String,
    pub current_version: String,
    pub status: UpdateStatus,
    pub message: String,
}

pub struct StatusReporter {
    url: String,
    identity: DeviceIdentity,
}

impl StatusReporter {
    pub fn new(config: &OtaConfig, identity: DeviceIdentity) -> Self {
        Self {
            url: config.url_for(UPDATE_STATUS_PATH),
            identity,
        }
    }

    pub fn event(&self, status: UpdateStatus, message: &str) -> StatusEvent {
        StatusEvent {
            device_id: self.identity.device_id.clone(),
            current_version: self.identity.current_version.clone(),
            status,
            message: message.to_string(),
        }
    }

    /// Posts one status event. Failures are logged and never retried.
    /// Returns whether the backend acknowledged it.
    pub fn report<T: HttpTransport + ?Sized>(
        &self,
        transport: &mut T,
        status: UpdateStatus,
        message: &str,
    ) -> bool {
        if !transport.is_connected() {
            log::warn!("Skipping OTA status '{}': network not connected", status);
            return false;
        }

        let payload = match serde_json::to_vec(&self.event(status, message)) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to encode OTA status '{}': {}", status, e);
                return false;
            }
        };

        match transport.post(&self.url, &json_headers(&self.identity.api_key), &payload) {
            Ok(response) if response.status == http_status::OK => {
                log::info!("OTA status '{}' sent to server", status);
                true
            }
            Ok(response) => {
                log::warn!("Failed to send OTA status '{}': HTTP {}", status, response.status);
                false
            }
            Err(e) => {
                log::warn!("Failed to send OTA status '{}': {}", status, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{HttpResponse, StreamingResponse, API_KEY_HEADER};

    struct Recorder {
        connected: bool,
        status: u16,
        posts: Vec<(String, Vec<(String, String)>, Vec<u8>)>,
    }

    impl HttpTransport for Recorder {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn post(
            &mut self,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
        ) -> Result<HttpResponse, TransportError> {
            let headers = headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.posts.push((url.to_string(), headers, body.to_vec()));
            Ok(HttpResponse {
                status: self.status,
                body: Vec::new(),
            })
        }

        fn get_stream(
            &mut self,
            _url: &str,
            _headers: &[(&str, &str)],
        ) -> Result<StreamingResponse<'_>, TransportError> {
            Err(TransportError::NotConnected)
        }
    }

    fn reporter() -> StatusReporter {
        let mut config = OtaConfig::default();
        config.api_endpoint = "http://backend".into();
        StatusReporter::new(&config, DeviceIdentity::new("ESP32-001", "key-1", "1.0.0"))
    }

    #[test]
    fn test_posts_status_payload() {
        let mut transport = Recorder {
            connected: true,
            status: 200,
            posts: Vec::new(),
        };
        assert!(reporter().report(&mut transport, UpdateStatus::Success, "Update installed: 1.1.0"));

        let (url, headers, body) = &transport.posts[0];
        assert_eq!(url, "http://backend/api/v1/firmware/update-status");
        assert!(headers.contains(&(API_KEY_HEADER.to_string(), "key-1".to_string())));
        assert!(headers.contains(&("Content-Type".to_string(), "application/json".to_string())));

        let event: StatusEvent = serde_json::from_slice(body).unwrap();
        assert_eq!(event.device_id, "ESP32-001");
        assert_eq!(event.current_version, "1.0.0");
        assert_eq!(event.status, UpdateStatus::Success);
        assert_eq!(event.message, "Update installed: 1.1.0");
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&UpdateStatus::DeltaNotSupported).unwrap();
        assert_eq!(json, "\"delta_not_supported\"");
        assert_eq!(UpdateStatus::InstallFailed.to_string(), "install_failed");
    }

    #[test]
    fn test_offline_skips_post() {
        let mut transport = Recorder {
            connected: false,
            status: 200,
            posts: Vec::new(),
        };
        assert!(!reporter().report(&mut transport, UpdateStatus::DownloadFailed, "x"));
        assert!(transport.posts.is_empty());
    }

    #[test]
    fn test_rejected_post_is_not_retried() {
        let mut transport = Recorder {
            connected: true,
            status: 500,
            posts: Vec::new(),
        };
        assert!(!reporter().report(&mut transport, UpdateStatus::InstallFailed, "Write error"));
        assert_eq!(transport.posts.len(), 1);
    }
}
