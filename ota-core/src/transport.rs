//! HTTP seam between the updater and the device network stack.

use crate::error::TransportError;

pub const API_KEY_HEADER: &str = "X-Device-API-Key";
pub const CHECK_UPDATE_PATH: &str = "/api/v1/firmware/check-update";
pub const UPDATE_STATUS_PATH: &str = "/api/v1/firmware/update-status";

pub mod http_status {
    pub const OK: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
}

/// A fully buffered response. Only used for small JSON bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Pull-based body reader.
pub trait ByteStream {
    /// Reads up to `buf.len()` bytes. `Ok(0)` means the body ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

pub struct StreamingResponse<'a> {
    pub status: u16,
    /// Value of the `Content-Length` header, if the server sent one
    pub content_length: Option<u64>,
    pub body: Box<dyn ByteStream + 'a>,
}

pub trait HttpTransport {
    /// Whether the link is up. Checked before every cycle and status report.
    fn is_connected(&self) -> bool;

    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError>;

    fn get_stream(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<StreamingResponse<'_>, TransportError>;
}

/// Headers for a JSON request carrying the device credential.
pub fn json_headers(api_key: &str) -> [(&str, &str); 2] {
    [("Content-Type", "application/json"), (API_KEY_HEADER, api_key)]
}

/// Buffers a whole body, failing once it grows past `limit` bytes.
pub fn read_body<S: ByteStream + ?Sized>(
    stream: &mut S,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(body);
        }
        if body.len() + n > limit {
            return Err(TransportError::Io(format!(
                "response body exceeds {limit} bytes"
            )));
        }
        body.extend_from_slice(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Chunks(Vec<Vec<u8>>);

    impl ByteStream for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn stream(len: usize) -> Chunks {
        let data = vec![b'x'; len];
        Chunks(data.chunks(300).map(<[u8]>::to_vec).collect())
    }

    #[test]
    fn test_read_body_up_to_limit() {
        assert_eq!(read_body(&mut stream(4096), 4096).unwrap().len(), 4096);
        assert!(read_body(&mut stream(0), 4096).unwrap().is_empty());
    }

    #[test]
    fn test_read_body_over_limit_is_named() {
        assert_eq!(
            read_body(&mut stream(4097), 4096),
            Err(TransportError::Io("response body exceeds 4096 bytes".into()))
        );
    }
}
