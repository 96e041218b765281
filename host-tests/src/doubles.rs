//! Scripted stand-ins for everything the updater touches on the device:
//! the backend, the inactive flash partition and the reset line.

use std::time::{Duration, Instant};

use ota_core::transport::{CHECK_UPDATE_PATH, UPDATE_STATUS_PATH};
use ota_core::{
    ByteStream, FirmwareSlot, FlashError, HttpResponse, HttpTransport, OtaConfig, OtaEvent,
    OtaState, StatusEvent, StreamingResponse, SystemControl, TransportError, UpdateStateMachine,
    UpdateStatus, WriteSession,
};

pub const DEVICE_ID: &str = "ESP32-001";
pub const API_KEY: &str = "test-key";
pub const CURRENT_VERSION: &str = "1.0.0";
pub const IMAGE_URL: &str = "http://host/fw.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Get,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Vec<u8>,
}

/// How the backend answers `check-update`.
#[derive(Debug, Clone)]
pub enum CheckReply {
    Respond(u16, String),
    Fail(TransportError),
}

/// The firmware download as served by the backend.
#[derive(Debug, Clone)]
pub struct Image {
    pub status: u16,
    pub content_length: Option<u64>,
    pub data: Vec<u8>,
    /// Read sizes handed out in rotation, capped by the caller's buffer
    pub chunks: Vec<usize>,
    /// Body ends cleanly after this many bytes
    pub truncate_at: Option<usize>,
    /// Reads fail with a timeout once this offset is reached
    pub stall_at: Option<usize>,
}

impl Image {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_length: Some(data.len() as u64),
            data,
            chunks: vec![1000, 1, 4096, 333, 517],
            truncate_at: None,
            stall_at: None,
        }
    }

    pub fn pattern(size: usize) -> Self {
        Self::new((0..size).map(|i| (i % 251) as u8).collect())
    }
}

pub struct ScriptedBackend {
    pub connected: bool,
    pub check: CheckReply,
    pub status_reply: u16,
    pub image: Image,
    pub requests: Vec<Request>,
}

impl ScriptedBackend {
    pub fn offering(manifest: serde_json::Value, image: Image) -> Self {
        Self {
            connected: true,
            check: CheckReply::Respond(200, manifest.to_string()),
            status_reply: 200,
            image,
            requests: Vec::new(),
        }
    }

    pub fn up_to_date() -> Self {
        Self {
            connected: true,
            check: CheckReply::Respond(204, String::new()),
            status_reply: 200,
            image: Image::new(Vec::new()),
            requests: Vec::new(),
        }
    }

    /// Status events the device posted, in order.
    pub fn status_reports(&self) -> Vec<StatusEvent> {
        self.requests
            .iter()
            .filter(|r| r.method == Method::Post && r.url.ends_with(UPDATE_STATUS_PATH))
            .map(|r| serde_json::from_slice(&r.body).expect("status body is a StatusEvent"))
            .collect()
    }

    pub fn reported_statuses(&self) -> Vec<UpdateStatus> {
        self.status_reports().iter().map(|e| e.status).collect()
    }

    pub fn image_requests(&self) -> usize {
        self.requests.iter().filter(|r| r.method == Method::Get).count()
    }

    /// Position of a request in the log, for ordering checks.
    pub fn position(&self, pred: impl Fn(&Request) -> bool) -> Option<usize> {
        self.requests.iter().position(pred)
    }
}

impl HttpTransport for ScriptedBackend {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn post(
        &mut self,
        url: &str,
        _headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        self.requests.push(Request {
            method: Method::Post,
            url: url.to_string(),
            body: body.to_vec(),
        });

        if url.ends_with(CHECK_UPDATE_PATH) {
            match &self.check {
                CheckReply::Respond(status, body) => Ok(HttpResponse {
                    status: *status,
                    body: body.as_bytes().to_vec(),
                }),
                CheckReply::Fail(e) => Err(e.clone()),
            }
        } else {
            Ok(HttpResponse {
                status: self.status_reply,
                body: Vec::new(),
            })
        }
    }

    fn get_stream(
        &mut self,
        url: &str,
        _headers: &[(&str, &str)],
    ) -> Result<StreamingResponse<'_>, TransportError> {
        self.requests.push(Request {
            method: Method::Get,
            url: url.to_string(),
            body: Vec::new(),
        });

        let end = self
            .image
            .truncate_at
            .unwrap_or(self.image.data.len())
            .min(self.image.data.len());

        Ok(StreamingResponse {
            status: self.image.status,
            content_length: self.image.content_length,
            body: Box::new(ImageBody {
                data: self.image.data[..end].to_vec(),
                pos: 0,
                chunks: self.image.chunks.clone(),
                next: 0,
                stall_at: self.image.stall_at,
            }),
        })
    }
}

struct ImageBody {
    data: Vec<u8>,
    pos: usize,
    chunks: Vec<usize>,
    next: usize,
    stall_at: Option<usize>,
}

impl ByteStream for ImageBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut limit = self.data.len();
        if let Some(stall) = self.stall_at {
            if self.pos >= stall {
                return Err(TransportError::Timeout);
            }
            limit = limit.min(stall);
        }
        if self.pos >= limit || buf.is_empty() {
            return Ok(0);
        }

        let chunk = if self.chunks.is_empty() {
            buf.len()
        } else {
            self.chunks[self.next % self.chunks.len()].max(1)
        };
        self.next += 1;

        let n = chunk.min(buf.len()).min(limit - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// In-memory inactive partition.
#[derive(Debug)]
pub struct MemorySlot {
    pub capacity: usize,
    pub data: Vec<u8>,
    pub write_calls: usize,
    /// 1-based write call that only accepts half of its chunk
    pub short_write_on: Option<usize>,
    pub fail_finalize: bool,
    pub sessions_begun: usize,
    pub finalized: bool,
    pub aborted: bool,
}

impl Default for MemorySlot {
    fn default() -> Self {
        Self {
            capacity: 4 * 1024 * 1024,
            data: Vec::new(),
            write_calls: 0,
            short_write_on: None,
            fail_finalize: false,
            sessions_begun: 0,
            finalized: false,
            aborted: false,
        }
    }
}

impl FirmwareSlot for MemorySlot {
    fn begin(&mut self, image_size: usize) -> Result<Box<dyn WriteSession + '_>, FlashError> {
        if image_size > self.capacity {
            return Err(FlashError::InsufficientSpace {
                required: image_size,
                available: self.capacity,
            });
        }
        self.sessions_begun += 1;
        self.data.clear();
        Ok(Box::new(MemorySession { slot: self }))
    }
}

struct MemorySession<'a> {
    slot: &'a mut MemorySlot,
}

impl WriteSession for MemorySession<'_> {
    fn write(&mut self, chunk: &[u8]) -> Result<usize, FlashError> {
        self.slot.write_calls += 1;
        let accepted = if self.slot.short_write_on == Some(self.slot.write_calls) {
            chunk.len() / 2
        } else {
            chunk.len()
        };
        self.slot.data.extend_from_slice(&chunk[..accepted]);
        Ok(accepted)
    }

    fn finalize(self: Box<Self>) -> Result<(), FlashError> {
        if self.slot.fail_finalize {
            return Err(FlashError::Finalize("image validation failed".into()));
        }
        self.slot.finalized = true;
        Ok(())
    }

    fn abort(self: Box<Self>) {
        self.slot.aborted = true;
    }
}

#[derive(Debug, Default)]
pub struct RecordingRestart {
    pub scheduled: Vec<Duration>,
}

impl SystemControl for RecordingRestart {
    fn schedule_restart(&mut self, delay: Duration) {
        self.scheduled.push(delay);
    }
}

pub type TestMachine =
    UpdateStateMachine<ScriptedBackend, MemorySlot, RecordingRestart, Vec<OtaEvent>>;

pub fn test_config() -> OtaConfig {
    OtaConfig {
        api_endpoint: "http://backend.test".into(),
        check_on_start: true,
        ..OtaConfig::default()
    }
}

pub fn machine(backend: ScriptedBackend, slot: MemorySlot) -> TestMachine {
    machine_with(test_config(), backend, slot, Instant::now())
}

pub fn machine_with(
    config: OtaConfig,
    backend: ScriptedBackend,
    slot: MemorySlot,
    now: Instant,
) -> TestMachine {
    UpdateStateMachine::new(
        config,
        ota_core::DeviceIdentity::new(DEVICE_ID, API_KEY, CURRENT_VERSION),
        backend,
        slot,
        RecordingRestart::default(),
        Vec::new(),
        now,
    )
}

pub fn manifest_json(version: &str, size: usize, checksum: &str, is_delta: bool) -> serde_json::Value {
    serde_json::json!({
        "update_available": true,
        "version": version,
        "url": IMAGE_URL,
        "size": size,
        "checksum": checksum,
        "is_delta": is_delta,
    })
}

/// Progress percentages in emission order.
pub fn progress(events: &[OtaEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            OtaEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

/// Every state entered, in order.
pub fn states(events: &[OtaEvent]) -> Vec<OtaState> {
    events
        .iter()
        .filter_map(|e| match e {
            OtaEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}
