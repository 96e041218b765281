use serde::Serialize;

use crate::config::{DeviceIdentity, OtaConfig};
use crate::error::CheckError;
use crate::manifest::{self, UpdateManifest};
use crate::transport::{http_status, json_headers, HttpTransport, CHECK_UPDATE_PATH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    NoUpdate,
    UpdateAvailable(UpdateManifest),
}

/// Body of `POST /api/v1/firmware/check-update`.
#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    device_id: &'a str,
    current_version: &'a str,
    hardware: &'a str,
}

pub struct UpdateChecker {
    url: String,
    hardware: String,
    identity: DeviceIdentity,
}

impl UpdateChecker {
    pub fn new(config: &OtaConfig, identity: DeviceIdentity) -> Self {
        Self {
            url: config.url_for(CHECK_UPDATE_PATH),
            hardware: config.hardware.clone(),
            identity,
        }
    }

    pub fn check<T: HttpTransport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> Result<CheckOutcome, CheckError> {
        let request = CheckRequest {
            device_id: &self.identity.device_id,
            current_version: &self.identity.current_version,
            hardware: &self.hardware,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| {
            CheckError::Manifest(crate::error::ParseError::Json(e.to_string()))
        })?;

        log::info!("Checking for available updates...");
        let response = transport.post(&self.url, &json_headers(&self.identity.api_key), &payload)?;

        match response.status {
            http_status::OK => {
                log::debug!("Check response: {}", String::from_utf8_lossy(&response.body));
                match manifest::parse_check_response(&response.body)? {
                    Some(manifest) => {
                        log::info!(
                            "Update available: {} ({} bytes, {})",
                            manifest.version(),
                            manifest.size(),
                            if manifest.is_delta() { "delta patch" } else { "full image" }
                        );
                        Ok(CheckOutcome::UpdateAvailable(manifest))
                    }
                    None => {
                        log::info!("Firmware is up to date");
                        Ok(CheckOutcome::NoUpdate)
                    }
                }
            }
            http_status::NO_CONTENT => {
                log::info!("No update available");
                Ok(CheckOutcome::NoUpdate)
            }
            other => {
                log::error!(
                    "Update check failed: HTTP {} ({})",
                    other,
                    String::from_utf8_lossy(&response.body)
                );
                Err(CheckError::UnexpectedStatus(other))
            }
        }
    }
}
