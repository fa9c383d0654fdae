use crate::domain::models::{PairingReport, PairingStatus};

/// Initial capacity of the paired-name list in a report.
const REPORT_NAME_CAPACITY: usize = 10;

/// Bookkeeping for one `run()` invocation. The paired count and the name
/// list move together; reports are built from both so they can never
/// disagree.
pub struct PairingSession {
    remove_mode: bool,
    stop_at: usize,
    names: Vec<String>,
}

impl PairingSession {
    /// `stop_at == 0` means no pairing target: the session runs until
    /// cancelled or, in remove mode, until the pass is exhausted.
    pub fn new(remove_mode: bool, stop_at: usize) -> Self {
        Self {
            remove_mode,
            stop_at,
            names: Vec::with_capacity(REPORT_NAME_CAPACITY),
        }
    }

    pub fn remove_mode(&self) -> bool {
        self.remove_mode
    }

    pub fn paired(&self) -> usize {
        self.names.len()
    }

    /// Count one fully paired (or, in remove mode, removed) device.
    pub fn record(&mut self, name: &str) {
        self.names.push(name.to_string());
    }

    pub fn target_reached(&self) -> bool {
        self.stop_at > 0 && self.names.len() >= self.stop_at
    }

    /// How many more devices may be counted before the target is hit.
    pub fn remaining(&self) -> usize {
        if self.stop_at == 0 {
            usize::MAX
        } else {
            self.stop_at.saturating_sub(self.names.len())
        }
    }

    pub fn report(&self, status: PairingStatus) -> PairingReport {
        PairingReport {
            status,
            paired_count: self.names.len(),
            remove_mode: self.remove_mode,
            paired_names: self.names.clone(),
        }
    }
}
