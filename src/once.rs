use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::error::QueueError;

/// Selects how [`AtomicOnceInit::need`] behaves under contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceMode {
    /// `need()` blocks competing callers until the elected caller calls
    /// `done()` or `retry()`; this is the fair, default mode.
    Synchronized,
    /// `need()` never blocks. Exactly one caller races to claim the slot;
    /// everyone else sees `false` immediately, even while the winner is
    /// still running its initialization.
    RunOnce,
}

struct State {
    initialized: bool,
    /// `true` between a `Synchronized` caller observing `need() == true`
    /// and that same caller calling `done()`/`retry()`.
    owned: bool,
}

/// One-shot initialization barrier with fair-wait and retry, used by the
/// broader utility layer for lazy service location (see
/// [`crate::metrics::QueueMetrics`] for the one user inside this crate).
pub struct AtomicOnceInit {
    mode: OnceMode,
    /// Non-blocking race flag for `RunOnce` mode only.
    claimed: AtomicBool,
    state: Mutex<State>,
    cond: Condvar,
}

impl AtomicOnceInit {
    pub fn new(mode: OnceMode) -> Self {
        Self {
            mode,
            claimed: AtomicBool::new(false),
            state: Mutex::new(State {
                initialized: false,
                owned: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Non-synchronizing observer of initialization state.
    pub fn initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    /// Returns `true` exactly to the caller that must perform
    /// initialization. In `Synchronized` mode that caller then owns the
    /// lock and must call `done()` or `retry()` — failing to do so
    /// deadlocks every later `need()` call.
    pub fn need(&self) -> bool {
        match self.mode {
            OnceMode::Synchronized => {
                let mut g = self.state.lock().unwrap();
                loop {
                    if g.initialized {
                        return false;
                    }
                    if !g.owned {
                        g.owned = true;
                        return true;
                    }
                    g = self.cond.wait(g).unwrap();
                }
            }
            OnceMode::RunOnce => {
                if self.state.lock().unwrap().initialized {
                    return false;
                }
                if self
                    .claimed
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.state.lock().unwrap().initialized = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Marks initialized and releases the lock. Only valid for the caller
    /// that most recently observed `need() == true` in `Synchronized` mode.
    pub fn done(&self) -> Result<(), QueueError> {
        let mut g = self.state.lock().unwrap();
        if !g.owned {
            return Err(QueueError::IllegalState(
                "done() called without owning the initialization lock".to_string(),
            ));
        }
        g.initialized = true;
        g.owned = false;
        drop(g);
        self.cond.notify_all();
        Ok(())
    }

    /// Marks not-initialized and releases the lock, letting the next
    /// `need()` caller retry initialization. Same ownership rule as `done`.
    pub fn retry(&self) -> Result<(), QueueError> {
        let mut g = self.state.lock().unwrap();
        if !g.owned {
            return Err(QueueError::IllegalState(
                "retry() called without owning the initialization lock".to_string(),
            ));
        }
        g.initialized = false;
        g.owned = false;
        drop(g);
        self.cond.notify_all();
        Ok(())
    }

    /// Resets to the uninitialized state, releasing any current owner.
    pub fn clear(&self) {
        let mut g = self.state.lock().unwrap();
        g.initialized = false;
        g.owned = false;
        drop(g);
        self.claimed.store(false, Ordering::SeqCst);
        self.cond.notify_all();
    }
}

impl Default for AtomicOnceInit {
    fn default() -> Self {
        Self::new(OnceMode::Synchronized)
    }
}
