//! Check-update response parsing.
//!
//! The backend answers a check with a flat JSON object:
//!
//! ```json
//! {"update_available":true,"version":"1.1.0","url":"http://host/fw.bin",
//!  "size":204800,"checksum":"…","is_delta":false}
//! ```
//!
//! Every manifest field is required. Nothing is defaulted: a missing or
//! malformed field is reported by name.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ParseError;

/// Description of an available firmware image. Immutable once built and
/// always carries a positive size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateManifest {
    version: String,
    url: String,
    size: u64,
    checksum: String,
    is_delta: bool,
}

impl UpdateManifest {
    pub fn new(
        version: impl Into<String>,
        url: impl Into<String>,
        size: u64,
        checksum: impl Into<String>,
        is_delta: bool,
    ) -> Result<Self, ParseError> {
        let manifest = Self {
            version: version.into(),
            url: url.into(),
            size,
            checksum: checksum.into(),
            is_delta,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Builds a manifest from a decoded JSON object.
    pub fn from_json(object: &Map<String, Value>) -> Result<Self, ParseError> {
        let version = required_str(object, "version")?;
        let url = required_str(object, "url")?;
        let size = required_size(object)?;
        let checksum = required_str(object, "checksum")?;
        let is_delta = required_bool(object, "is_delta")?;
        Self::new(version, url, size, checksum, is_delta)
    }

    fn validate(&self) -> Result<(), ParseError> {
        if self.version.trim().is_empty() {
            return Err(ParseError::Malformed {
                field: "version",
                reason: "must not be empty",
            });
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ParseError::Malformed {
                field: "url",
                reason: "must be an http(s) URL",
            });
        }
        if self.size == 0 {
            return Err(ParseError::Malformed {
                field: "size",
                reason: "must be a positive integer",
            });
        }
        if self.checksum.trim().is_empty() {
            return Err(ParseError::Malformed {
                field: "checksum",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn is_delta(&self) -> bool {
        self.is_delta
    }
}

/// Parses a 200 check-update body. `Ok(None)` means the backend said
/// `update_available: false`.
pub fn parse_check_response(body: &[u8]) -> Result<Option<UpdateManifest>, ParseError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ParseError::Json(e.to_string()))?;
    let object = value.as_object().ok_or(ParseError::NotAnObject)?;

    if !required_bool(object, "update_available")? {
        return Ok(None);
    }

    UpdateManifest::from_json(object).map(Some)
}

fn field<'a>(object: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, ParseError> {
    match object.get(name) {
        None | Some(Value::Null) => Err(ParseError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn required_str(object: &Map<String, Value>, name: &'static str) -> Result<String, ParseError> {
    field(object, name)?
        .as_str()
        .map(str::to_owned)
        .ok_or(ParseError::Malformed {
            field: name,
            reason: "expected a string",
        })
}

fn required_bool(object: &Map<String, Value>, name: &'static str) -> Result<bool, ParseError> {
    field(object, name)?.as_bool().ok_or(ParseError::Malformed {
        field: name,
        reason: "expected a boolean",
    })
}

fn required_size(object: &Map<String, Value>) -> Result<u64, ParseError> {
    let value = field(object, "size")?;
    match value.as_u64() {
        Some(0) | None if value.is_number() => Err(ParseError::Malformed {
            field: "size",
            reason: "must be a positive integer",
        }),
        Some(size) => Ok(size),
        None => Err(ParseError::Malformed {
            field: "size",
            reason: "expected a number",
        }),
    }
}
