use crate::error::UpdateError;
use crate::manifest::UpdateManifest;
use crate::transport::{http_status, ByteStream, HttpTransport, API_KEY_HEADER};

/// An open image download whose declared length matches the manifest.
pub struct ImageStream<'a> {
    pub content_length: usize,
    pub body: Box<dyn ByteStream + 'a>,
}

pub struct ImageFetcher;

impl ImageFetcher {
    /// Opens `manifest.url` with the device credential attached.
    ///
    /// Anything other than a 200 with `Content-Length == manifest.size` is a
    /// download error, raised before a single byte reaches flash.
    pub fn open<'t, T: HttpTransport + ?Sized>(
        transport: &'t mut T,
        manifest: &UpdateManifest,
        api_key: &str,
    ) -> Result<ImageStream<'t>, UpdateError> {
        log::info!("Downloading firmware from {}", manifest.url());

        let headers = [(API_KEY_HEADER, api_key)];
        let response = transport
            .get_stream(manifest.url(), &headers)
            .map_err(|e| UpdateError::Download(format!("Connection error: {e}")))?;

        if response.status != http_status::OK {
            log::error!("Firmware download failed: HTTP {}", response.status);
            return Err(UpdateError::Download(format!(
                "HTTP error: {}",
                response.status
            )));
        }

        let declared = match response.content_length {
            Some(length) if length > 0 => length,
            _ => {
                log::error!("Firmware download has no usable Content-Length");
                return Err(UpdateError::Download("Invalid content length".into()));
            }
        };

        if declared != manifest.size() {
            log::error!(
                "Firmware size mismatch: server declared {} bytes, manifest says {}",
                declared,
                manifest.size()
            );
            return Err(UpdateError::Download(format!(
                "Size mismatch: server declared {} bytes, manifest expects {}",
                declared,
                manifest.size()
            )));
        }

        let content_length = usize::try_from(declared).map_err(|_| {
            UpdateError::Download(format!("Image of {declared} bytes is too large"))
        })?;

        log::info!("Firmware download started: {} bytes", content_length);
        Ok(ImageStream {
            content_length,
            body: response.body,
        })
    }
}
