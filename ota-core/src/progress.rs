/// Ten-percent progress milestones.
///
/// Every boundary in `0, 10, ..., 100` is reported exactly once and in order,
/// whatever the chunk sizes are. A chunk that jumps across several
/// boundaries reports each one it crossed.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    last_reported: Option<u8>,
}

pub const STEP: u8 = 10;

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            last_reported: None,
        }
    }

    pub fn percent(&self, bytes_written: usize) -> u8 {
        percent_of(bytes_written, self.total)
    }

    pub fn last_reported(&self) -> Option<u8> {
        self.last_reported
    }

    /// Returns the milestones newly reached at `bytes_written`.
    pub fn advance(&mut self, bytes_written: usize) -> Vec<u8> {
        let reached = self.percent(bytes_written) / STEP * STEP;
        let mut next = match self.last_reported {
            None => 0,
            Some(last) => last + STEP,
        };

        let mut crossed = Vec::new();
        while next <= reached {
            crossed.push(next);
            self.last_reported = Some(next);
            next += STEP;
        }
        crossed
    }
}

fn percent_of(bytes_written: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (bytes_written as u128 * 100) / total as u128;
    percent.min(100) as u8
}
