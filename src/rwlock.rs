use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

/// Waiter kind recorded in the pending ticket map, used to decide whether
/// a ticket may proceed (see [`State`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Reader,
    Writer,
}

struct State {
    next_ticket: u64,
    /// Waiters not yet granted access, in arrival order.
    pending: BTreeMap<u64, Kind>,
    active_readers: u32,
    writer_active: bool,
}

/// A fair read/write lock guarding [`crate::queue::PersistentQueue`]'s
/// header/cursor state (`count`, `head`, `tail`).
///
/// Ticket-queue discipline, same foundation as [`crate::semaphore::FairSemaphore`]:
/// a reader may proceed once no writer ticket smaller than its own is still
/// pending (so a run of readers that all arrived before any writer can run
/// concurrently); a writer may proceed only once it is the single smallest
/// pending ticket and no reader is active. This prevents writer starvation
/// under a steady stream of readers while still letting readers overlap.
pub struct FairRwLock<T> {
    data: UnsafeCell<T>,
    state: Mutex<State>,
    cond: Condvar,
}

unsafe impl<T: Send> Send for FairRwLock<T> {}
unsafe impl<T: Send> Sync for FairRwLock<T> {}

impl<T> FairRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            data: UnsafeCell::new(value),
            state: Mutex::new(State {
                next_ticket: 0,
                pending: BTreeMap::new(),
                active_readers: 0,
                writer_active: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Acquires a shared read guard, blocking until any pending writer
    /// that arrived before this call has finished.
    pub fn read(&self) -> FairRwLockReadGuard<'_, T> {
        let mut g = self.state.lock().unwrap();
        let ticket = g.next_ticket;
        g.next_ticket += 1;
        g.pending.insert(ticket, Kind::Reader);

        loop {
            let blocked_by_writer = g.writer_active
                || g.pending
                    .range(..ticket)
                    .any(|(_, k)| *k == Kind::Writer);
            if !blocked_by_writer {
                g.pending.remove(&ticket);
                g.active_readers += 1;
                break;
            }
            g = self.cond.wait(g).unwrap();
        }
        drop(g);
        FairRwLockReadGuard { lock: self }
    }

    /// Acquires the exclusive write guard, blocking until it is the
    /// oldest outstanding waiter and no reader is currently active.
    pub fn write(&self) -> FairRwLockWriteGuard<'_, T> {
        let mut g = self.state.lock().unwrap();
        let ticket = g.next_ticket;
        g.next_ticket += 1;
        g.pending.insert(ticket, Kind::Writer);

        loop {
            let is_front = g.pending.keys().next() == Some(&ticket);
            if is_front && !g.writer_active && g.active_readers == 0 {
                g.pending.remove(&ticket);
                g.writer_active = true;
                break;
            }
            g = self.cond.wait(g).unwrap();
        }
        drop(g);
        FairRwLockWriteGuard { lock: self }
    }

    fn release_read(&self) {
        let mut g = self.state.lock().unwrap();
        debug_assert!(g.active_readers > 0);
        g.active_readers -= 1;
        drop(g);
        self.cond.notify_all();
    }

    fn release_write(&self) {
        let mut g = self.state.lock().unwrap();
        debug_assert!(g.writer_active);
        g.writer_active = false;
        drop(g);
        self.cond.notify_all();
    }
}

pub struct FairRwLockReadGuard<'a, T> {
    lock: &'a FairRwLock<T>,
}

impl<T> Deref for FairRwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holder of this guard is registered as an active reader;
        // no writer can be active concurrently.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for FairRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct FairRwLockWriteGuard<'a, T> {
    lock: &'a FairRwLock<T>,
}

impl<T> Deref for FairRwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: exclusive access guaranteed by writer_active/active_readers.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for FairRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for FairRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
