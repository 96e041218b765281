use core::fmt;
use serde::{Deserialize, Serialize};

/// Updater lifecycle. This is the only place that says whether an update is
/// in progress.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtaState {
    Idle = 0,
    Checking = 1,
    Downloading = 2,
    Installing = 3,
    Success = 4,
    Error = 5,
}

impl OtaState {
    /// Allowed edges. Anything not listed here is refused.
    pub fn can_transition_to(self, next: OtaState) -> bool {
        use OtaState::*;
        matches!(
            (self, next),
            (Idle, Checking)
                | (Checking, Idle)
                | (Checking, Error)
                | (Checking, Downloading)
                | (Downloading, Installing)
                | (Downloading, Error)
                | (Installing, Success)
                | (Installing, Error)
                | (Success, Idle)
                | (Error, Idle)
        )
    }

    pub fn is_idle(self) -> bool {
        self == OtaState::Idle
    }

    /// SUCCESS and ERROR only last until the cycle settles back to IDLE.
    pub fn is_terminal(self) -> bool {
        matches!(self, OtaState::Success | OtaState::Error)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(OtaState::Idle),
            1 => Some(OtaState::Checking),
            2 => Some(OtaState::Downloading),
            3 => Some(OtaState::Installing),
            4 => Some(OtaState::Success),
            5 => Some(OtaState::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OtaState::Idle => "IDLE",
            OtaState::Checking => "CHECKING",
            OtaState::Downloading => "DOWNLOADING",
            OtaState::Installing => "INSTALLING",
            OtaState::Success => "SUCCESS",
            OtaState::Error => "ERROR",
        }
    }
}

impl Default for OtaState {
    fn default() -> Self {
        OtaState::Idle
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
