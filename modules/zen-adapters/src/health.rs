use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    Ok,
    Degraded(String),
}

/// Shared, lock-cheap health cell an adapter updates from its run loop and
/// the `/readyz` handler reads from concurrently.
pub struct AdapterHealth {
    degraded: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl AdapterHealth {
    pub fn new() -> Self {
        Self {
            degraded: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    pub fn mark_ok(&self) {
        self.degraded.store(false, Ordering::Relaxed);
        *self.reason.lock().expect("health mutex poisoned") = None;
    }

    pub fn mark_degraded(&self, reason: impl Into<String>) {
        self.degraded.store(true, Ordering::Relaxed);
        *self.reason.lock().expect("health mutex poisoned") = Some(reason.into());
    }

    pub fn state(&self) -> HealthState {
        if self.degraded.load(Ordering::Relaxed) {
            let reason = self
                .reason
                .lock()
                .expect("health mutex poisoned")
                .clone()
                .unwrap_or_else(|| "degraded".to_string());
            HealthState::Degraded(reason)
        } else {
            HealthState::Ok
        }
    }
}

impl Default for AdapterHealth {
    fn default() -> Self {
        Self::new()
    }
}
