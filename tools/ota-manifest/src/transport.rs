use std::io::Read;
use std::time::Duration;

use ota_core::{ByteStream, HttpResponse, HttpTransport, StreamingResponse, TransportError};
use reqwest::blocking::{Client, RequestBuilder, Response};

/// Desktop stand-in for the device's HTTP client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn send(
        &self,
        request: RequestBuilder,
        headers: &[(&str, &str)],
    ) -> Result<Response, TransportError> {
        headers
            .iter()
            .fold(request, |request, (name, value)| request.header(*name, *value))
            .send()
            .map_err(request_error)
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    fn is_connected(&self) -> bool {
        true
    }

    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let response = self.send(self.client.post(url).body(body.to_vec()), headers)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(request_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }

    fn get_stream(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<StreamingResponse<'_>, TransportError> {
        let response = self.send(self.client.get(url), headers)?;
        Ok(StreamingResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(ResponseStream(response)),
        })
    }
}

struct ResponseStream(Response);

impl ByteStream for ResponseStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.0.read(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        })
    }
}
