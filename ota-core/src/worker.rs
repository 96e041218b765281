// Dedicated OTA thread - keeps long downloads off the main control loop.
// The main loop talks to it through channels: commands go in, events come
// back out, and the current state is mirrored in an atomic for cheap reads.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::events::{EventSink, OtaEvent};
use crate::installer::FirmwareSlot;
use crate::state::OtaState;
use crate::state_machine::UpdateStateMachine;
use crate::system::SystemControl;
use crate::transport::HttpTransport;

pub const DEFAULT_STACK_SIZE: usize = 12 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaCommand {
    ForceCheck,
    Shutdown,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceCheckError {
    #[error("update already in progress (state: {0})")]
    Busy(OtaState),

    #[error("OTA worker is not running")]
    WorkerGone,
}

/// Event sink used inside the worker: mirrors state changes into the shared
/// atomic and forwards every event to the main loop.
pub struct WorkerSink {
    events: Sender<OtaEvent>,
    state: Arc<AtomicU8>,
}

impl EventSink for WorkerSink {
    fn emit(&mut self, event: OtaEvent) {
        if let OtaEvent::StateChanged { to, .. } = event {
            self.state.store(to.as_u8(), Ordering::Release);
        }
        let _ = self.events.send(event);
    }
}

/// Main-loop side of the worker.
pub struct OtaHandle {
    commands: Sender<OtaCommand>,
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl OtaHandle {
    pub fn state(&self) -> OtaState {
        OtaState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(OtaState::Error)
    }

    /// Queues a manual check. Rejected straight away unless the updater is
    /// idle.
    pub fn force_check(&self) -> Result<(), ForceCheckError> {
        let state = self.state();
        if !state.is_idle() {
            log::warn!("Force check rejected: updater is {}", state);
            return Err(ForceCheckError::Busy(state));
        }
        self.commands
            .send(OtaCommand::ForceCheck)
            .map_err(|_| ForceCheckError::WorkerGone)
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Stops the worker after its current cycle and waits for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(OtaCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("OTA worker panicked");
            }
        }
    }
}

impl Drop for OtaHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct OtaWorker;

impl OtaWorker {
    /// Spawns the worker thread. The state machine is built on the worker
    /// thread itself, so platform handles never have to cross threads.
    pub fn spawn<T, F, S, B, Er>(
        poll_interval: Duration,
        stack_size: usize,
        build: B,
    ) -> std::io::Result<(OtaHandle, Receiver<OtaEvent>)>
    where
        T: HttpTransport + 'static,
        F: FirmwareSlot + 'static,
        S: SystemControl + 'static,
        B: FnOnce(WorkerSink) -> Result<UpdateStateMachine<T, F, S, WorkerSink>, Er> + Send + 'static,
        Er: std::fmt::Display,
    {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let state = Arc::new(AtomicU8::new(OtaState::Idle.as_u8()));

        let sink = WorkerSink {
            events: event_tx,
            state: state.clone(),
        };

        let thread = thread::Builder::new()
            .name("ota".into())
            .stack_size(stack_size)
            .spawn(move || match build(sink) {
                Ok(machine) => run(machine, command_rx, poll_interval),
                Err(e) => log::error!("OTA worker failed to start: {}", e),
            })?;

        log::info!("OTA worker started (poll every {:?})", poll_interval);

        Ok((
            OtaHandle {
                commands: command_tx,
                state,
                thread: Some(thread),
            },
            event_rx,
        ))
    }
}

fn run<T, F, S>(
    mut machine: UpdateStateMachine<T, F, S, WorkerSink>,
    commands: Receiver<OtaCommand>,
    poll_interval: Duration,
) where
    T: HttpTransport,
    F: FirmwareSlot,
    S: SystemControl,
{
    loop {
        let cycle_ran = match commands.recv_timeout(poll_interval) {
            Ok(OtaCommand::ForceCheck) => match machine.force_check(Instant::now()) {
                Ok(outcome) => {
                    log::info!("Manual update check finished: {:?}", outcome);
                    true
                }
                Err(e) => {
                    log::warn!("{}", e);
                    false
                }
            },
            Ok(OtaCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => machine.tick(Instant::now()).is_some(),
        };

        // Checks requested while a cycle was running are dropped, not
        // replayed as a second session.
        if cycle_ran {
            while let Ok(command) = commands.try_recv() {
                match command {
                    OtaCommand::ForceCheck => {
                        log::info!("Discarding force check queued during update cycle")
                    }
                    OtaCommand::Shutdown => {
                        log::info!("OTA worker stopped");
                        return;
                    }
                }
            }
        }
    }

    log::info!("OTA worker stopped");
}
