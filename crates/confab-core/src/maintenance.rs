use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide maintenance switch.
///
/// The only writable process-wide value in the system. Reads are lock-free
/// and happen at request admission; only root principals may flip it, which
/// the policy module enforces at the handler.
#[derive(Debug)]
pub struct MaintenanceFlag {
    enabled: AtomicBool,
}

impl MaintenanceFlag {
    pub fn new(initial: bool) -> Self {
        Self {
            enabled: AtomicBool::new(initial),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Default for MaintenanceFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_round_trip() {
        let flag = MaintenanceFlag::new(false);
        assert!(!flag.is_enabled());
        flag.set(true);
        assert!(flag.is_enabled());
        flag.set(false);
        assert!(!flag.is_enabled());
    }
}
