use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::QueueError;
use crate::invariants::debug_assert_ticket_monotonic;

/// A cooperative cancellation flag shared between a waiter and whoever
/// wants to interrupt it.
///
/// The queue's blocking operations park an OS thread on a [`Condvar`], not
/// a future, so waking a waiter is the condvar's job; this flag only
/// decides whether a woken waiter should give up instead of re-checking
/// its wait condition.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation of whatever this token is attached to.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Inner {
    available: u32,
    next_ticket: u64,
    /// Tickets of waiters currently blocked, in arrival order. The
    /// minimum entry is the only waiter allowed to take permits; this is
    /// the fairness mechanism.
    pending: BTreeSet<u64>,
}

/// A fair counting semaphore: acquires are granted strictly in arrival
/// order among blocked waiters (a ticket-queue discipline), used for both
/// the producer (`blocks`) and consumer (`slots`) permits of
/// [`crate::queue::PersistentQueue`].
pub struct FairSemaphore {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl FairSemaphore {
    pub fn new(permits: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                available: permits,
                next_ticket: 0,
                pending: BTreeSet::new(),
            }),
            cond: Condvar::new(),
        }
    }

    pub fn available_permits(&self) -> u32 {
        self.inner.lock().unwrap().available
    }

    /// Non-blocking acquire. Succeeds only if no waiter is already queued
    /// and enough permits are free; a queued waiter is never jumped.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut g = self.inner.lock().unwrap();
        if g.pending.is_empty() && g.available >= n {
            g.available -= n;
            true
        } else {
            false
        }
    }

    /// Blocks indefinitely until `n` permits are free and this caller is
    /// at the front of the wait line. Returns `Err(Interrupted)` if
    /// `cancel` is signalled first; no permits are held on that path.
    pub fn acquire(&self, n: u32, cancel: &CancelToken) -> Result<(), QueueError> {
        let acquired = self.acquire_until(n, None, cancel)?;
        debug_assert!(acquired, "unbounded acquire must not time out");
        Ok(())
    }

    /// Bounded wait. Returns `Ok(true)` if acquired before `timeout`
    /// elapses, `Ok(false)` on timeout, `Err(Interrupted)` on
    /// cancellation.
    pub fn acquire_timeout(
        &self,
        n: u32,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, QueueError> {
        self.acquire_until(n, Some(Instant::now() + timeout), cancel)
    }

    fn acquire_until(
        &self,
        n: u32,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<bool, QueueError> {
        let mut g = self.inner.lock().unwrap();
        let ticket = g.next_ticket;
        let next = ticket + 1;
        debug_assert_ticket_monotonic!(ticket, next);
        g.next_ticket = next;
        g.pending.insert(ticket);

        let result = loop {
            if cancel.is_cancelled() {
                break Err(QueueError::Interrupted);
            }
            let is_front = g.pending.iter().next() == Some(&ticket);
            if is_front && g.available >= n {
                g.available -= n;
                break Ok(true);
            }
            match deadline {
                None => {
                    g = self
                        .cond
                        .wait_timeout(g, Duration::from_millis(50))
                        .unwrap()
                        .0;
                }
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        break Ok(false);
                    }
                    let wait_for = (dl - now).min(Duration::from_millis(50));
                    g = self.cond.wait_timeout(g, wait_for).unwrap().0;
                }
            }
        };
        g.pending.remove(&ticket);
        drop(g);
        self.cond.notify_all();
        result
    }

    /// Returns `n` permits to the pool and wakes the front waiter, if any.
    pub fn release(&self, n: u32) {
        if n == 0 {
            return;
        }
        let mut g = self.inner.lock().unwrap();
        g.available += n;
        drop(g);
        self.cond.notify_all();
    }

    /// Takes `n` permits immediately, bypassing the fairness queue.
    ///
    /// Used only by [`crate::queue::PersistentQueue::drain_to`], which
    /// already holds the exclusive header write lock and is documented as
    /// requiring external synchronization with concurrent producers and
    /// consumers; a normal `try_acquire` would spuriously decline when
    /// another thread is already parked waiting its turn.
    pub(crate) fn force_acquire(&self, n: u32) -> bool {
        let mut g = self.inner.lock().unwrap();
        if g.available >= n {
            g.available -= n;
            true
        } else {
            false
        }
    }

    /// Hard-sets the available permit count, discarding any queued
    /// waiters' position bookkeeping. Used only by
    /// [`crate::queue::PersistentQueue::clear`], which the caller must
    /// externally synchronize with concurrent producers/consumers.
    pub(crate) fn reset(&self, permits: u32) {
        let mut g = self.inner.lock().unwrap();
        g.available = permits;
        g.pending.clear();
        drop(g);
        self.cond.notify_all();
    }
}
