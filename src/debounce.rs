use crate::events::EntityKey;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Save,
    PageExtent(EntityKey),
    ImageResize(EntityKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub generation: u64,
}

/// Where timer firings are delivered. Timer tasks never touch the document
/// tree; they only post a `TimerFired` back to the application loop.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    sender: Option<mpsc::UnboundedSender<TimerFired>>,
}

impl TimerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn detached() -> Self {
        Self::default()
    }

    fn arm(&self, fired: TimerFired, window: Duration) -> Option<JoinHandle<()>> {
        let sender = self.sender.clone()?;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::trace!(key = ?fired.key, "no timer runtime; debounce stays pending until flushed");
            return None;
        };
        Some(runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if sender.send(fired).is_err() {
                tracing::trace!(key = ?fired.key, "timer fired after application loop shut down");
            }
        }))
    }
}

/// Trailing-edge debounce: only the last `start()` inside the window fires.
#[derive(Debug)]
pub struct Debouncer {
    key: TimerKey,
    window: Duration,
    timers: TimerHandle,
    generation: u64,
    armed: Option<u64>,
    task: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(key: TimerKey, window: Duration, timers: TimerHandle) -> Self {
        Self {
            key,
            window,
            timers,
            generation: 0,
            armed: None,
            task: None,
        }
    }

    pub fn key(&self) -> TimerKey {
        self.key
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn is_pending(&self) -> bool {
        self.armed.is_some()
    }

    pub fn start(&mut self) {
        self.cancel_task();
        self.generation = self.generation.wrapping_add(1);
        self.armed = Some(self.generation);
        self.task = self.timers.arm(
            TimerFired {
                key: self.key,
                generation: self.generation,
            },
            self.window,
        );
    }

    pub fn stop(&mut self) {
        self.cancel_task();
        self.armed = None;
    }

    /// Returns true when `fired` is the firing of the currently armed timer.
    /// Stale firings from replaced or stopped timers are rejected.
    pub fn accept(&mut self, fired: &TimerFired) -> bool {
        if fired.key != self.key || self.armed != Some(fired.generation) {
            return false;
        }
        self.armed = None;
        self.task = None;
        true
    }

    /// Disarms and reports whether a fire was pending, so the owner can run
    /// the action right away (shutdown, explicit flush).
    pub fn take_pending(&mut self) -> bool {
        let pending = self.is_pending();
        self.stop();
        pending
    }

    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_task();
    }
}
