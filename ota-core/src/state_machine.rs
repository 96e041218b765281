//! The updater itself: owns the single update session and sequences
//! checker -> fetcher -> writer -> reporter.
//!
//! Cycle overview:
//! 1. IDLE -> CHECKING when the check interval elapsed or a check is forced
//! 2. CHECKING -> DOWNLOADING once a manifest is accepted
//! 3. DOWNLOADING -> INSTALLING when the image stream is open and the
//!    write session has begun
//! 4. INSTALLING -> SUCCESS after every byte is written, the checksum
//!    passes and the image is finalized; the device restarts after the
//!    grace delay and the updater stays in SUCCESS until then
//! 5. Any failure -> ERROR, which settles back to IDLE on the next tick

use std::time::Instant;

use crate::checker::{CheckOutcome, UpdateChecker};
use crate::checksum::{ChecksumVerifier, Verification};
use crate::config::{DeviceIdentity, OtaConfig};
use crate::error::{CheckError, FlashError, SessionActive, UpdateError};
use crate::events::{EventSink, OtaEvent};
use crate::fetcher::ImageFetcher;
use crate::installer::{FirmwareSlot, InstallWriter};
use crate::manifest::UpdateManifest;
use crate::patch::{FullImageFallback, PatchApplier, PatchSupport};
use crate::progress::ProgressTracker;
use crate::reporter::{StatusReporter, UpdateStatus};
use crate::state::OtaState;
use crate::system::SystemControl;
use crate::transport::HttpTransport;

/// The bounded lifetime of one accepted update, from manifest to terminal
/// state.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    manifest: UpdateManifest,
    bytes_written: usize,
    started_at: Instant,
}

impl UpdateSession {
    pub fn manifest(&self) -> &UpdateManifest {
        &self.manifest
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    fn record_progress(&mut self, bytes_written: usize) {
        debug_assert!(bytes_written >= self.bytes_written);
        self.bytes_written = bytes_written.max(self.bytes_written);
    }
}

/// Result of one check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No network; nothing was attempted
    Offline,
    UpToDate,
    CheckFailed(CheckError),
    UpdateFailed(UpdateError),
    Installed { version: String },
}

/// State and event output live together so transitions can be made while
/// other fields are borrowed by an open download.
struct Lifecycle<E> {
    state: OtaState,
    events: E,
}

impl<E: EventSink> Lifecycle<E> {
    fn advance(&mut self, next: OtaState) {
        let from = self.state;
        if !from.can_transition_to(next) {
            log::error!("Refusing OTA transition {} -> {}", from, next);
            return;
        }
        log::info!("OTA state: {} -> {}", from, next);
        self.state = next;
        self.events.emit(OtaEvent::StateChanged { from, to: next });
    }

    fn emit(&mut self, event: OtaEvent) {
        self.events.emit(event);
    }
}

pub struct UpdateStateMachine<T, F, S, E> {
    config: OtaConfig,
    identity: DeviceIdentity,
    checker: UpdateChecker,
    reporter: StatusReporter,
    transport: T,
    slot: F,
    system: S,
    patcher: Box<dyn PatchApplier>,
    lifecycle: Lifecycle<E>,
    session: Option<UpdateSession>,
    last_check: Option<Instant>,
    started_at: Instant,
    restart_pending: bool,
}

impl<T, F, S, E> UpdateStateMachine<T, F, S, E>
where
    T: HttpTransport,
    F: FirmwareSlot,
    S: SystemControl,
    E: EventSink,
{
    pub fn new(
        config: OtaConfig,
        identity: DeviceIdentity,
        transport: T,
        slot: F,
        system: S,
        events: E,
        now: Instant,
    ) -> Self {
        log::info!(
            "OTA updater initialized: firmware {} on {}, device {}",
            identity.current_version,
            config.hardware,
            identity.device_id
        );

        Self {
            checker: UpdateChecker::new(&config, identity.clone()),
            reporter: StatusReporter::new(&config, identity.clone()),
            config,
            identity,
            transport,
            slot,
            system,
            patcher: Box::new(FullImageFallback),
            lifecycle: Lifecycle {
                state: OtaState::Idle,
                events,
            },
            session: None,
            last_check: None,
            started_at: now,
            restart_pending: false,
        }
    }

    pub fn with_patch_applier(mut self, patcher: Box<dyn PatchApplier>) -> Self {
        log::info!("Delta patch applier: {}", patcher.name());
        self.patcher = patcher;
        self
    }

    pub fn state(&self) -> OtaState {
        self.lifecycle.state
    }

    pub fn session(&self) -> Option<&UpdateSession> {
        self.session.as_ref()
    }

    pub fn current_version(&self) -> &str {
        &self.identity.current_version
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn events(&self) -> &E {
        &self.lifecycle.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.lifecycle.events
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn slot(&self) -> &F {
        &self.slot
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    /// Set once a new image is installed and the restart is scheduled.
    /// No further cycle runs after that.
    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub fn is_check_due(&self, now: Instant) -> bool {
        match self.last_check {
            Some(last) => now.saturating_duration_since(last) >= self.config.check_interval(),
            None if self.config.check_on_start => true,
            None => now.saturating_duration_since(self.started_at) >= self.config.check_interval(),
        }
    }

    /// Periodic entry point. Settles a finished cycle back to IDLE, then
    /// runs a new cycle if one is due. Returns the outcome of the cycle
    /// if one ran.
    pub fn tick(&mut self, now: Instant) -> Option<CycleOutcome> {
        self.settle();

        if !self.lifecycle.state.is_idle() || !self.is_check_due(now) {
            return None;
        }

        Some(self.run_cycle(now))
    }

    /// Operator entry point. Bypasses the timer but never a running session.
    pub fn force_check(&mut self, now: Instant) -> Result<CycleOutcome, SessionActive> {
        let state = self.lifecycle.state;
        if self.restart_pending || !state.is_idle() || self.session.is_some() {
            log::warn!("Manual update check rejected: updater is {}", state);
            return Err(SessionActive { state });
        }

        log::info!("Manual update check requested");
        Ok(self.run_cycle(now))
    }

    fn settle(&mut self) {
        if self.restart_pending {
            return;
        }
        if self.lifecycle.state.is_terminal() {
            log::info!("Update cycle finished ({}), back to idle", self.lifecycle.state);
            self.lifecycle.advance(OtaState::Idle);
            self.session = None;
        }
    }

    fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        self.last_check = Some(now);

        if !self.transport.is_connected() {
            log::warn!("Network not connected, skipping update check");
            return CycleOutcome::Offline;
        }

        self.lifecycle.advance(OtaState::Checking);

        let manifest = match self.checker.check(&mut self.transport) {
            Ok(CheckOutcome::UpdateAvailable(manifest)) => manifest,
            Ok(CheckOutcome::NoUpdate) => {
                self.lifecycle.advance(OtaState::Idle);
                return CycleOutcome::UpToDate;
            }
            Err(e) if e.is_connectivity() => {
                log::warn!("Update check skipped: {}", e);
                self.lifecycle.advance(OtaState::Idle);
                return CycleOutcome::CheckFailed(e);
            }
            Err(e) => {
                log::error!("Update check failed: {}", e);
                self.lifecycle.advance(OtaState::Error);
                self.report(UpdateStatus::DownloadFailed, &format!("Update check failed: {e}"));
                return CycleOutcome::CheckFailed(e);
            }
        };

        if let Err(e) = self.begin_session(manifest, now) {
            log::error!("Cannot start update session: {}", e);
            self.lifecycle.advance(OtaState::Error);
            return CycleOutcome::UpdateFailed(UpdateError::Install(e.to_string()));
        }
        self.lifecycle.advance(OtaState::Downloading);

        match self.download_and_install() {
            Ok(version) => self.complete(version),
            Err(e) => {
                log::error!("Update failed: {}", e);
                self.lifecycle.advance(OtaState::Error);
                self.report(e.status(), e.message());
                CycleOutcome::UpdateFailed(e)
            }
        }
    }

    fn begin_session(&mut self, manifest: UpdateManifest, now: Instant) -> Result<(), SessionActive> {
        if self.session.is_some() {
            return Err(SessionActive {
                state: self.lifecycle.state,
            });
        }
        log::info!(
            "Starting update session: {} -> {}",
            self.identity.current_version,
            manifest.version()
        );
        self.session = Some(UpdateSession {
            manifest,
            bytes_written: 0,
            started_at: now,
        });
        Ok(())
    }

    fn download_and_install(&mut self) -> Result<String, UpdateError> {
        let manifest = self
            .session
            .as_ref()
            .map(|session| session.manifest.clone())
            .ok_or_else(|| UpdateError::Download("no active update session".into()))?;

        let native_patch = manifest.is_delta() && self.negotiate_delta(&manifest);
        if !native_patch {
            log::info!("Installing full firmware image");
        }

        // From here on the transport is borrowed by the open stream, so only
        // disjoint fields are touched until the stream is dropped.
        let mut image = ImageFetcher::open(&mut self.transport, &manifest, &self.identity.api_key)?;
        let expected = image.content_length;

        let session = self.slot.begin(expected).map_err(|e| match e {
            FlashError::InsufficientSpace { .. } => {
                log::error!("Not enough space for OTA image: {}", e);
                UpdateError::Install(format!("Not enough space: {e}"))
            }
            other => UpdateError::Install(format!("Could not begin update: {other}")),
        })?;
        let session = if native_patch {
            self.patcher.wrap(session)
        } else {
            session
        };

        self.lifecycle.advance(OtaState::Installing);

        let mut writer = InstallWriter::new(session, expected, self.config.buffer_size);
        let mut verifier = ChecksumVerifier::new(manifest.checksum(), self.config.require_checksum);
        let mut progress = ProgressTracker::new(expected);

        let lifecycle = &mut self.lifecycle;
        let update_session = &mut self.session;

        for percent in progress.advance(0) {
            lifecycle.emit(OtaEvent::Progress {
                percent,
                bytes_written: 0,
                total: expected,
            });
        }

        writer.pump(image.body.as_mut(), |chunk, bytes_written| {
            verifier.update(chunk);
            if let Some(session) = update_session.as_mut() {
                session.record_progress(bytes_written);
            }
            for percent in progress.advance(bytes_written) {
                log::info!("OTA progress: {}% ({}/{})", percent, bytes_written, expected);
                lifecycle.emit(OtaEvent::Progress {
                    percent,
                    bytes_written,
                    total: expected,
                });
            }
        })?;
        drop(image);

        match verifier.finish() {
            Ok(Verification::Verified) => log::info!("Firmware checksum verified"),
            Ok(Verification::Unverified { reason }) => {
                log::warn!("Installing unverified image: {}", reason)
            }
            Err(e) => {
                log::error!("Firmware checksum verification failed: {}", e);
                writer.abort();
                return Err(UpdateError::Install(format!("Checksum error: {e}")));
            }
        }

        writer.finalize()?;
        Ok(manifest.version().to_string())
    }

    /// Asks the patch applier about a delta manifest. Reports the fallback
    /// before any image byte is requested.
    fn negotiate_delta(&mut self, manifest: &UpdateManifest) -> bool {
        match self.patcher.support(manifest) {
            PatchSupport::Native => {
                log::info!("Applying delta update with {}", self.patcher.name());
                true
            }
            PatchSupport::FallbackToFull { reason } => {
                log::warn!("Delta OTA not supported, falling back to full update");
                self.report(UpdateStatus::DeltaNotSupported, &reason);
                false
            }
        }
    }

    fn complete(&mut self, version: String) -> CycleOutcome {
        log::info!("Update installed successfully: {}", version);
        self.lifecycle.advance(OtaState::Success);
        self.report(UpdateStatus::Success, &format!("Update installed: {version}"));

        let delay = self.config.restart_grace();
        log::info!("Restarting in {} seconds...", delay.as_secs());
        self.lifecycle.emit(OtaEvent::RestartScheduled { delay });
        self.system.schedule_restart(delay);
        self.restart_pending = true;

        CycleOutcome::Installed { version }
    }

    fn report(&mut self, status: UpdateStatus, message: &str) {
        let delivered = self.reporter.report(&mut self.transport, status, message);
        self.lifecycle.emit(OtaEvent::StatusReported { status, delivered });
    }
}
