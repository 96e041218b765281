// HTTP client side of the updater, on top of the ESP-IDF client.
//
// One connection per request: the check and status calls are tiny and
// the firmware download keeps its connection for the whole stream.

use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::io::EspIOError;
use esp_idf_sys::{ESP_ERR_HTTP_EAGAIN, ESP_ERR_TIMEOUT};
use std::time::Duration;

use ota_core::transport::read_body;
use ota_core::{ByteStream, HttpResponse, HttpTransport, OtaConfig, StreamingResponse, TransportError};

// JSON replies from the backend are small
const MAX_RESPONSE_BODY: usize = 4096;

pub struct EspHttpTransport {
    buffer_size: usize,
    timeout: Duration,
}

impl EspHttpTransport {
    pub fn new(config: &OtaConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            timeout: config.download_timeout(),
        }
    }

    fn connect(&self) -> Result<EspHttpConnection, TransportError> {
        EspHttpConnection::new(&Configuration {
            buffer_size: Some(self.buffer_size),
            timeout: Some(self.timeout),
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|e| TransportError::Connection(format!("{:?}", e)))
    }
}

fn connection_error(e: EspIOError) -> TransportError {
    if is_timeout(&e) {
        TransportError::Timeout
    } else {
        TransportError::Connection(format!("{:?}", e))
    }
}

fn io_error(e: EspIOError) -> TransportError {
    if is_timeout(&e) {
        TransportError::Timeout
    } else {
        TransportError::Io(format!("{:?}", e))
    }
}

fn is_timeout(e: &EspIOError) -> bool {
    let code = e.0.code();
    code == ESP_ERR_HTTP_EAGAIN as i32 || code == ESP_ERR_TIMEOUT as i32
}

impl HttpTransport for EspHttpTransport {
    fn is_connected(&self) -> bool {
        super::station_has_ip()
    }

    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let mut conn = self.connect()?;

        let content_length = body.len().to_string();
        let mut request_headers = headers.to_vec();
        request_headers.push(("Content-Length", content_length.as_str()));

        log::debug!("POST {} ({} bytes)", url, body.len());
        conn.initiate_request(Method::Post, url, &request_headers)
            .map_err(connection_error)?;
        conn.write_all(body).map_err(connection_error)?;
        conn.initiate_response().map_err(connection_error)?;

        let status = conn.status();
        let body = read_body(&mut ConnectionStream(conn), MAX_RESPONSE_BODY)?;

        Ok(HttpResponse { status, body })
    }

    fn get_stream(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<StreamingResponse<'_>, TransportError> {
        let mut conn = self.connect()?;

        log::debug!("GET {}", url);
        conn.initiate_request(Method::Get, url, headers)
            .map_err(connection_error)?;
        conn.initiate_response().map_err(connection_error)?;

        let status = conn.status();
        let content_length = conn
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());

        Ok(StreamingResponse {
            status,
            content_length,
            body: Box::new(ConnectionStream(conn)),
        })
    }
}

struct ConnectionStream(EspHttpConnection);

impl ByteStream for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.0.read(buf).map_err(io_error)
    }
}
