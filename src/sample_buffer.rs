use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::error::QueueError;

/// Fixed-capacity lock-free ring for write-heavy sampling.
///
/// Specialized to `u64` samples (nanosecond durations, timestamps, counts —
/// the kinds of values a queue's own metrics layer produces). Writers never
/// block or wait on each other; readers produce a best-effort, possibly
/// shorter-than-capacity snapshot rather than contend with writers.
pub struct CircularSampleBuffer {
    capacity: usize,
    buf: Box<[AtomicU64]>,
    /// Monotonic insertion counter. Wraps at `u32::MAX`, same as the slot
    /// index it's reduced modulo `capacity` to produce.
    cursor: AtomicU32,
}

impl CircularSampleBuffer {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::IllegalArgument(
                "CircularSampleBuffer capacity must be > 0".to_string(),
            ));
        }
        let buf = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            capacity,
            buf,
            cursor: AtomicU32::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait-free for producers: one fetch-add, one store.
    pub fn add(&self, x: u64) {
        let c = self.cursor.fetch_add(1, Ordering::AcqRel);
        let slot = (c as usize) % self.capacity;
        self.buf[slot].store(x, Ordering::Release);
    }

    /// Returns a contiguous, oldest-to-newest copy of samples guaranteed to
    /// have been present throughout the read. May be shorter than
    /// `capacity` under concurrent writes; never contains a slot that was
    /// only partially written during the copy.
    pub fn snapshot(&self) -> Vec<u64> {
        let before = self.cursor.load(Ordering::Acquire);
        if before == 0 {
            return Vec::new();
        }
        let copy: Vec<u64> = self.buf.iter().map(|a| a.load(Ordering::Acquire)).collect();
        let after = self.cursor.load(Ordering::Acquire);
        let overwritten = after.wrapping_sub(before) as i64;

        let before_usize = before as usize;
        let cap = self.capacity;
        let stable_len = ((cap.min(before_usize)) as i64 - overwritten).clamp(0, cap as i64);

        if stable_len <= 0 {
            // Writers outran the reader faster than the copy could complete.
            // Best-effort: return a full window ending at `before - 1`,
            // accepting that some of it may since have been overwritten.
            return Self::extract_window(&copy, cap, before_usize, cap);
        }
        Self::extract_window(&copy, cap, before_usize, stable_len as usize)
    }

    /// Retries `snapshot()` until a full-capacity snapshot is obtained.
    pub fn complete_snapshot(&self) -> Vec<u64> {
        let mut backoff = Backoff::new();
        loop {
            let snap = self.snapshot();
            if snap.len() == self.capacity {
                return snap;
            }
            backoff.snooze();
        }
    }

    /// Extracts the logical window `[before - len, before)` (absolute
    /// insertion indices) from a flat copy of the backing array, handling
    /// wrap-around at the physical boundary.
    fn extract_window(copy: &[u64], capacity: usize, before: usize, len: usize) -> Vec<u64> {
        if len == 0 {
            return Vec::new();
        }
        let len = len.min(before);
        let start = before - len;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(copy[(start + i) % capacity]);
        }
        out
    }
}
