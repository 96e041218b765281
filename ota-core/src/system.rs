use std::time::Duration;

/// Device-level actions the updater needs from the platform.
pub trait SystemControl {
    /// Restarts the device once `delay` has passed so pending I/O can
    /// flush. May return before the restart happens.
    fn schedule_restart(&mut self, delay: Duration);
}
