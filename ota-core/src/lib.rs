//! OTA Core - Hardware-independent firmware update agent
//!
//! This crate contains the update state machine and streaming installer.
//! Everything that touches the network, flash or the reset line sits behind
//! the traits in [`transport`], [`installer`], [`system`] and [`events`], so
//! the whole check -> fetch -> write -> finalize -> report cycle can be
//! exercised on the host platform without ESP32 hardware.

pub mod checker;
pub mod checksum;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod installer;
pub mod manifest;
pub mod patch;
pub mod progress;
pub mod reporter;
pub mod state;
pub mod state_machine;
pub mod system;
pub mod transport;
pub mod worker;

pub use checker::{CheckOutcome, UpdateChecker};
pub use checksum::{ChecksumVerifier, Verification};
pub use config::{DeviceIdentity, OtaConfig};
pub use error::{
    CheckError, ChecksumError, ConfigError, FlashError, ParseError, SessionActive,
    TransportError, UpdateError,
};
pub use events::{EventSink, NullSink, OtaEvent};
pub use fetcher::{ImageFetcher, ImageStream};
pub use installer::{FirmwareSlot, InstallWriter, WriteSession};
pub use manifest::UpdateManifest;
pub use patch::{FullImageFallback, PatchApplier, PatchSupport};
pub use progress::ProgressTracker;
pub use reporter::{StatusEvent, StatusReporter, UpdateStatus};
pub use state::OtaState;
pub use state_machine::{CycleOutcome, UpdateSession, UpdateStateMachine};
pub use system::SystemControl;
pub use transport::{ByteStream, HttpResponse, HttpTransport, StreamingResponse};
pub use worker::{ForceCheckError, OtaCommand, OtaHandle, OtaWorker, WorkerSink};
