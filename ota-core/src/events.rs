use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::reporter::UpdateStatus;
use crate::state::OtaState;

/// Notifications emitted by the state machine while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    StateChanged { from: OtaState, to: OtaState },
    /// A ten-percent milestone was reached
    Progress {
        percent: u8,
        bytes_written: usize,
        total: usize,
    },
    StatusReported {
        status: UpdateStatus,
        delivered: bool,
    },
    RestartScheduled { delay: Duration },
}

pub trait EventSink {
    fn emit(&mut self, event: OtaEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: OtaEvent) {}
}

impl EventSink for Vec<OtaEvent> {
    fn emit(&mut self, event: OtaEvent) {
        self.push(event);
    }
}

impl EventSink for Sender<OtaEvent> {
    fn emit(&mut self, event: OtaEvent) {
        // Receiver gone means nobody is listening; the update carries on.
        let _ = self.send(event);
    }
}
