use crate::debounce::{Debouncer, TimerFired, TimerHandle, TimerKey};
use std::time::Duration;

/// Debounced autosave. Every mutation calls `start()`; the binder is saved
/// once the mutations stop for a full window.
#[derive(Debug)]
pub struct SaveCoordinator {
    debouncer: Debouncer,
    enabled: bool,
    requests: u64,
    fires: u64,
}

impl SaveCoordinator {
    pub fn new(enabled: bool, window: Duration, timers: TimerHandle) -> Self {
        Self {
            debouncer: Debouncer::new(TimerKey::Save, window, timers),
            enabled,
            requests: 0,
            fires: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.debouncer.stop();
        }
    }

    pub fn window(&self) -> Duration {
        self.debouncer.window()
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn fires(&self) -> u64 {
        self.fires
    }

    pub fn start(&mut self) {
        self.requests += 1;
        if self.enabled {
            self.debouncer.start();
        }
    }

    pub fn stop(&mut self) {
        self.debouncer.stop();
    }

    /// True when `fired` is the live save timer; the caller then saves.
    pub fn accept(&mut self, fired: &TimerFired) -> bool {
        let accepted = self.debouncer.accept(fired);
        if accepted {
            self.fires += 1;
        }
        accepted
    }

    pub fn take_pending(&mut self) -> bool {
        self.debouncer.take_pending()
    }
}
