//! Signal objects with Win32 event semantics
//!
//! An auto-reset event wakes one waiter and clears itself when consumed. A
//! manual-reset event stays set until [`Event::reset`] is called. Neither
//! counts: setting an already-set event is a no-op.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Auto,
    Manual,
}

#[derive(Debug)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
    mode: ResetMode,
}

impl Event {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
            mode,
        }
    }

    pub fn auto_reset() -> Self {
        Self::new(ResetMode::Auto)
    }

    pub fn manual_reset() -> Self {
        Self::new(ResetMode::Manual)
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        match self.mode {
            ResetMode::Auto => {
                self.cond.notify_one();
            }
            ResetMode::Manual => {
                self.cond.notify_all();
            }
        }
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Wait until the event is set or `timeout` elapses
    ///
    /// Returns true if the event was observed set. An auto-reset event is
    /// cleared by the waiter that observes it. A timeout too large to
    /// represent as a deadline waits until the event is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut signaled),
            }
        }

        let fired = *signaled;
        if fired && self.mode == ResetMode::Auto {
            *signaled = false;
        }
        fired
    }
}
