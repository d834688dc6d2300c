use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use memmap2::MmapMut;

use crate::codec::{BincodeCodec, Codec};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::header::{
    advance_wrapping, block_align_up, read_bytes_wrapping, wrap_position, write_bytes_wrapping,
    FileHeader,
};
use crate::invariants::{
    debug_assert_count_cursor_agreement, debug_assert_cursor_in_range, debug_assert_permit_sum,
};
use crate::iterator::QueueIter;
use crate::metrics::QueueMetrics;
use crate::rwlock::FairRwLock;
use crate::semaphore::{CancelToken, FairSemaphore};

/// Everything guarded by [`PersistentQueue::inner`]'s fair lock: the
/// header fields and the shared bytes they describe. Bundled into one
/// lock so that a write never straddles two different critical sections.
pub(crate) struct Inner {
    pub(crate) header: FileHeader,
    pub(crate) mmap: MmapMut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Clearing,
    Closed,
}

/// A bounded blocking FIFO queue over a fixed-size memory-mapped file.
///
/// Producers serialize an element, reserve the blocks it needs from the
/// `blocks` semaphore, append it at `tail` under the header write lock,
/// then release one `slots` permit. Consumers acquire a `slots` permit,
/// advance `head` under the write lock, then deserialize the payload
/// under a (separate, shorter) read-lock hold, and finally return the
/// blocks the record occupied. See the module-level wrap/align helpers in
/// [`crate::header`] for the byte-level mechanics shared with
/// [`crate::iterator::QueueIter`].
pub struct PersistentQueue<T, C = BincodeCodec<T>> {
    pub(crate) cfg: QueueConfig,
    pub(crate) inner: FairRwLock<Inner>,
    blocks: FairSemaphore,
    slots: FairSemaphore,
    lifecycle: Mutex<Lifecycle>,
    pub(crate) codec: C,
    metrics: QueueMetrics,
    _marker: PhantomData<fn() -> T>,
}

/// Default size of the latency sample ring each queue instance keeps.
const DEFAULT_LATENCY_SAMPLES: usize = 256;

impl<T, C: Codec<T> + Default> PersistentQueue<T, C> {
    /// Opens (creating if absent) a queue file at `path` with the given
    /// block/file size, using `C`'s default instance as the codec.
    pub fn open(path: impl AsRef<Path>, block_size: u32, file_size: u32) -> Result<Self, QueueError> {
        Self::open_with_codec(path, block_size, file_size, C::default())
    }
}

impl<T, C: Codec<T>> PersistentQueue<T, C> {
    pub fn open_with_codec(
        path: impl AsRef<Path>,
        block_size: u32,
        file_size: u32,
        codec: C,
    ) -> Result<Self, QueueError> {
        let cfg = QueueConfig::new(block_size, file_size)?;
        let path = path.as_ref();

        let existed_nonempty = path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(u64::from(cfg.file_size()))?;
        // SAFETY: the file is exclusively owned by this process for the
        // lifetime of the mapping; no other mapping of it is created here.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        advise_will_need(&mmap);

        let header = if existed_nonempty {
            let h = FileHeader::read(&mmap)?;
            h.validate_against(&cfg)?;
            h
        } else {
            let h = FileHeader::fresh(&cfg);
            h.write(&mut mmap);
            mmap.flush()?;
            h
        };

        let occupied_blocks = header.occupied_bytes(&cfg) / cfg.block_size();
        let blocks_permits = cfg.usable_blocks() - occupied_blocks;
        let slots_permits = header.count;
        debug_assert_permit_sum!(blocks_permits, occupied_blocks, cfg.usable_blocks());

        Ok(Self {
            cfg,
            inner: FairRwLock::new(Inner { header, mmap }),
            blocks: FairSemaphore::new(blocks_permits),
            slots: FairSemaphore::new(slots_permits),
            lifecycle: Mutex::new(Lifecycle::Open),
            codec,
            metrics: QueueMetrics::new(DEFAULT_LATENCY_SAMPLES)?,
            _marker: PhantomData,
        })
    }

    fn check_open(&self) -> Result<(), QueueError> {
        match *self.lifecycle.lock().unwrap() {
            Lifecycle::Open => Ok(()),
            Lifecycle::Clearing => {
                Err(QueueError::IllegalState("queue is clearing".to_string()))
            }
            Lifecycle::Closed => Err(QueueError::IllegalState("queue is closed".to_string())),
        }
    }

    /// Writes the length-prefixed record at `tail` and advances it.
    /// Assumes `blocks_for_payload(payload.len())` producer permits have
    /// already been acquired by the caller.
    fn enqueue_locked(&self, payload: &[u8]) {
        let mut g = self.inner.write();
        let cursor = g.header.tail;
        let n = payload.len() as u32;

        let payload_start = wrap_position(cursor, 4, &self.cfg);
        write_bytes_wrapping(&mut g.mmap, cursor, &n.to_be_bytes(), &self.cfg);
        write_bytes_wrapping(&mut g.mmap, payload_start, payload, &self.cfg);

        let raw_end = wrap_position(cursor, 4 + n, &self.cfg);
        let aligned = block_align_up(raw_end, self.cfg.block_size());
        let new_tail = advance_wrapping(aligned, &self.cfg);

        debug_assert_cursor_in_range!(
            new_tail,
            self.cfg.first_usable_block(),
            self.cfg.file_size(),
            self.cfg.block_size()
        );

        g.header.tail = new_tail;
        g.header.count += 1;
        g.header.write(&mut g.mmap);
    }

    /// Advances `head` past one record and returns where its payload
    /// lives so the caller can read it after releasing the write lock.
    /// Returns `(payload_start, payload_len, blocks_to_free)`.
    fn dequeue_locked(&self) -> (u32, u32, u32) {
        let mut g = self.inner.write();
        let cursor = g.header.head;
        let len_bytes = read_bytes_wrapping(&g.mmap, cursor, 4, &self.cfg);
        let n = u32::from_be_bytes(len_bytes.try_into().unwrap());
        let payload_start = wrap_position(cursor, 4, &self.cfg);

        let raw_end = wrap_position(cursor, 4 + n, &self.cfg);
        let aligned = block_align_up(raw_end, self.cfg.block_size());
        let next_head = advance_wrapping(aligned, &self.cfg);

        debug_assert_cursor_in_range!(
            next_head,
            self.cfg.first_usable_block(),
            self.cfg.file_size(),
            self.cfg.block_size()
        );

        g.header.head = next_head;
        g.header.count -= 1;
        debug_assert_count_cursor_agreement!(g.header.count, g.header.head, g.header.tail);
        g.header.write(&mut g.mmap);

        (payload_start, n, self.cfg.blocks_for_payload(n))
    }

    fn read_payload(&self, payload_start: u32, len: u32) -> Vec<u8> {
        let g = self.inner.read();
        read_bytes_wrapping(&g.mmap, payload_start, len, &self.cfg)
    }

    /// Completes a dequeue once the `slots` permit has already been
    /// acquired: advances `head`, reads the payload, and returns the
    /// freed blocks to producers regardless of whether decoding succeeds.
    fn finish_dequeue(&self) -> Result<T, QueueError> {
        let timer = self.metrics.start_timer();
        let (payload_start, len, blocks_to_free) = self.dequeue_locked();
        let bytes = self.read_payload(payload_start, len);
        let decoded = self.codec.decode(&bytes);
        self.blocks.release(blocks_to_free);
        timer.stop();
        self.metrics.record_dequeue();
        decoded
    }

    /// Non-blocking enqueue. `false` iff there is not enough free space.
    pub fn offer(&self, value: &T) -> Result<bool, QueueError> {
        self.check_open()?;
        let bytes = self.codec.encode(value)?;
        let r = self.cfg.blocks_for_payload(bytes.len() as u32);
        if !self.blocks.try_acquire(r) {
            return Ok(false);
        }
        let timer = self.metrics.start_timer();
        self.enqueue_locked(&bytes);
        self.slots.release(1);
        timer.stop();
        self.metrics.record_enqueue();
        Ok(true)
    }

    /// Bounded-wait enqueue.
    pub fn offer_timeout(&self, value: &T, timeout: Duration) -> Result<bool, QueueError> {
        self.check_open()?;
        let bytes = self.codec.encode(value)?;
        let r = self.cfg.blocks_for_payload(bytes.len() as u32);
        let cancel = CancelToken::new();
        if !self.blocks.acquire_timeout(r, timeout, &cancel)? {
            return Ok(false);
        }
        let timer = self.metrics.start_timer();
        self.enqueue_locked(&bytes);
        self.slots.release(1);
        timer.stop();
        self.metrics.record_enqueue();
        Ok(true)
    }

    /// Blocking enqueue; cancellable via `cancel`.
    pub fn put(&self, value: &T, cancel: &CancelToken) -> Result<(), QueueError> {
        self.check_open()?;
        let bytes = self.codec.encode(value)?;
        let r = self.cfg.blocks_for_payload(bytes.len() as u32);
        self.blocks.acquire(r, cancel)?;
        let timer = self.metrics.start_timer();
        self.enqueue_locked(&bytes);
        self.slots.release(1);
        timer.stop();
        self.metrics.record_enqueue();
        Ok(())
    }

    /// Like `offer`, but fails with `Capacity` instead of returning `false`.
    pub fn add(&self, value: &T) -> Result<(), QueueError> {
        if self.offer(value)? {
            Ok(())
        } else {
            Err(QueueError::Capacity)
        }
    }

    /// Non-blocking dequeue.
    pub fn poll(&self) -> Result<Option<T>, QueueError> {
        self.check_open()?;
        if !self.slots.try_acquire(1) {
            return Ok(None);
        }
        self.finish_dequeue().map(Some)
    }

    /// Bounded-wait dequeue.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        self.check_open()?;
        let cancel = CancelToken::new();
        if !self.slots.acquire_timeout(1, timeout, &cancel)? {
            return Ok(None);
        }
        self.finish_dequeue().map(Some)
    }

    /// Blocking dequeue; cancellable via `cancel`.
    pub fn take(&self, cancel: &CancelToken) -> Result<T, QueueError> {
        self.check_open()?;
        self.slots.acquire(1, cancel)?;
        self.finish_dequeue()
    }

    /// Returns a copy of the head record without consuming it. Reads
    /// `slots.available_permits()` without synchronization first, then
    /// re-checks `count` under the read lock — under heavy concurrent
    /// dequeue pressure the re-check is load-bearing, so this
    /// double-checked shape is intentional, not a shortcut.
    pub fn peek(&self) -> Result<Option<T>, QueueError> {
        self.check_open()?;
        if self.slots.available_permits() == 0 {
            return Ok(None);
        }
        let g = self.inner.read();
        if g.header.count == 0 {
            return Ok(None);
        }
        let cursor = g.header.head;
        let len_bytes = read_bytes_wrapping(&g.mmap, cursor, 4, &self.cfg);
        let n = u32::from_be_bytes(len_bytes.try_into().unwrap());
        let payload_start = wrap_position(cursor, 4, &self.cfg);
        let bytes = read_bytes_wrapping(&g.mmap, payload_start, n, &self.cfg);
        drop(g);
        self.codec.decode(&bytes).map(Some)
    }

    /// As `peek`, but fails with `NoSuchElement` on an empty queue.
    pub fn element(&self) -> Result<T, QueueError> {
        self.peek()?.ok_or(QueueError::NoSuchElement)
    }

    /// As `poll`, but fails with `NoSuchElement` on an empty queue.
    pub fn remove_head(&self) -> Result<T, QueueError> {
        self.poll()?.ok_or(QueueError::NoSuchElement)
    }

    /// Number of currently enqueued records. Equal to the consumer
    /// semaphore's available permits; not guarded by the header lock, so
    /// only approximate under concurrent mutation. Like every other
    /// operation, fails with `IllegalState` once the queue is closed.
    pub fn size(&self) -> Result<u32, QueueError> {
        self.check_open()?;
        Ok(self.slots.available_permits())
    }

    /// `count == 0`, read the same unsynchronized way as `size`.
    pub fn is_empty(&self) -> Result<bool, QueueError> {
        self.check_open()?;
        Ok(self.slots.available_permits() == 0)
    }

    /// Drains both semaphores, resets cursors and count, and re-issues
    /// producer permits. Must be externally synchronized with concurrent
    /// producers/consumers; behavior is undefined if it isn't.
    pub fn clear(&self) -> Result<(), QueueError> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Open {
                return Err(QueueError::IllegalState("queue is not open".to_string()));
            }
            *lifecycle = Lifecycle::Clearing;
        }

        let fub = self.cfg.first_usable_block();
        {
            let mut g = self.inner.write();
            g.header.count = 0;
            g.header.head = fub;
            g.header.tail = fub;
            g.header.write(&mut g.mmap);
        }
        self.blocks.reset(self.cfg.usable_blocks());
        self.slots.reset(0);

        *self.lifecycle.lock().unwrap() = Lifecycle::Open;
        Ok(())
    }

    /// Atomically dequeues up to `min(size(), max)` elements into `sink`,
    /// in FIFO order, under a single write-lock hold. Returns the count
    /// drained.
    pub fn drain_to(&self, sink: &mut Vec<T>, max: u32) -> Result<u32, QueueError> {
        self.check_open()?;
        let timer = self.metrics.start_timer();
        let mut g = self.inner.write();
        let n = g.header.count.min(max);
        let acquired = self.slots.force_acquire(n);
        debug_assert!(acquired, "drain_to count desynced with slots permits");

        let mut blocks_freed = 0u32;
        let mut decode_errors = Vec::new();
        for _ in 0..n {
            let cursor = g.header.head;
            let len_bytes = read_bytes_wrapping(&g.mmap, cursor, 4, &self.cfg);
            let len = u32::from_be_bytes(len_bytes.try_into().unwrap());
            let payload_start = wrap_position(cursor, 4, &self.cfg);
            let bytes = read_bytes_wrapping(&g.mmap, payload_start, len, &self.cfg);

            let raw_end = wrap_position(cursor, 4 + len, &self.cfg);
            let aligned = block_align_up(raw_end, self.cfg.block_size());
            let next_head = advance_wrapping(aligned, &self.cfg);

            g.header.head = next_head;
            g.header.count -= 1;
            blocks_freed += self.cfg.blocks_for_payload(len);

            match self.codec.decode(&bytes) {
                Ok(value) => sink.push(value),
                Err(e) => decode_errors.push(e),
            }
        }
        g.header.write(&mut g.mmap);
        drop(g);

        self.blocks.release(blocks_freed);
        timer.stop();
        for _ in 0..n {
            self.metrics.record_dequeue();
        }

        if let Some(e) = decode_errors.into_iter().next() {
            return Err(e);
        }
        Ok(n)
    }

    /// A snapshot-coupled, fail-fast iterator over the records present at
    /// construction time. Never consumes from the queue.
    pub fn iter(&self) -> Result<QueueIter<'_, T, C>, QueueError> {
        self.check_open()?;
        Ok(QueueIter::new(self))
    }

    /// Requests the OS flush dirty pages of the mapping. No durability
    /// barrier is promised; mapping errors are swallowed.
    pub fn flush(&self) -> Result<(), QueueError> {
        self.check_open()?;
        let g = self.inner.read();
        let _ = g.mmap.flush();
        Ok(())
    }

    /// This queue is byte-bounded, not element-bounded.
    pub fn remaining_capacity(&self) -> u32 {
        u32::MAX
    }

    /// Always `false`: membership by value is not supported.
    pub fn contains(&self, _value: &T) -> bool {
        false
    }

    pub fn remove_value(&self, _value: &T) -> Result<bool, QueueError> {
        Err(QueueError::Unsupported("remove(object)"))
    }

    pub fn retain_all(&self, _values: &[T]) -> Result<bool, QueueError> {
        Err(QueueError::Unsupported("retainAll"))
    }

    pub fn remove_all(&self, _values: &[T]) -> Result<bool, QueueError> {
        Err(QueueError::Unsupported("removeAll"))
    }

    pub fn contains_all(&self, _values: &[T]) -> Result<bool, QueueError> {
        Err(QueueError::Unsupported("containsAll"))
    }

    pub fn to_vec(&self) -> Result<Vec<T>, QueueError> {
        Err(QueueError::Unsupported("toArray"))
    }

    /// Flushes and transitions to `CLOSED`; every operation after this
    /// fails with `IllegalState`.
    pub fn close(&self) -> Result<(), QueueError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if *lifecycle == Lifecycle::Closed {
            return Ok(());
        }
        let g = self.inner.read();
        let _ = g.mmap.flush();
        drop(g);
        *lifecycle = Lifecycle::Closed;
        Ok(())
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }
}

/// Hints to the OS that the whole ring is about to be accessed, since a
/// freshly opened queue is typically drained or replayed end to end right
/// after recovery. Best-effort: a failed `madvise` is not a queue error,
/// matching the "OS mapping errors are swallowed" contract `flush` has.
#[cfg(unix)]
fn advise_will_need(mmap: &MmapMut) {
    // SAFETY: `mmap` outlives this call and the pointer/length describe
    // exactly its backing region; `madvise` only advises the kernel and
    // never mutates the mapping.
    unsafe {
        libc::madvise(
            mmap.as_ptr() as *mut libc::c_void,
            mmap.len(),
            libc::MADV_WILLNEED,
        );
    }
}

#[cfg(not(unix))]
fn advise_will_need(_mmap: &MmapMut) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> std::path::PathBuf {
        NamedTempFile::new().unwrap().path().to_path_buf()
    }

    #[test]
    fn basic_fifo() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        for i in 0..10 {
            q.put(&i, &CancelToken::new()).unwrap();
        }
        for i in 0..10 {
            assert_eq!(q.poll().unwrap(), Some(i));
        }
        assert_eq!(q.size().unwrap(), 0);
    }

    #[test]
    fn offer_fails_when_full() {
        let path = temp_path();
        // block_size=4, file_size=40 -> 5 usable blocks, exactly one
        // codec-encoded i32 record's worth (4-byte length prefix + 16-byte
        // codec envelope around a 4-byte i32, block-aligned up to 20).
        let q = PersistentQueue::<i32>::open(&path, 4, 40).unwrap();
        assert!(q.offer(&1).unwrap());
        assert!(!q.offer(&2).unwrap());
        assert_eq!(q.poll().unwrap(), Some(1));
        assert!(q.offer(&2).unwrap());
    }

    #[test]
    fn add_signals_capacity_error() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 40).unwrap();
        q.add(&1).unwrap();
        assert!(matches!(q.add(&2), Err(QueueError::Capacity)));
    }

    #[test]
    fn peek_is_idempotent() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        q.offer(&42).unwrap();
        assert_eq!(q.peek().unwrap(), Some(42));
        assert_eq!(q.peek().unwrap(), Some(42));
        assert_eq!(q.size().unwrap(), 1);
    }

    #[test]
    fn element_and_remove_fail_on_empty() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        assert!(matches!(q.element(), Err(QueueError::NoSuchElement)));
        assert!(matches!(q.remove_head(), Err(QueueError::NoSuchElement)));
    }

    #[test]
    fn wrap_around_correctness() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 10, 110).unwrap();
        for i in 0..20 {
            q.put(&i, &CancelToken::new()).unwrap();
            assert_eq!(q.take(&CancelToken::new()).unwrap(), i);
        }
    }

    #[test]
    fn restart_recoverability() {
        let path = temp_path();
        {
            let q = PersistentQueue::<String>::open(&path, 4, 8192).unwrap();
            for _ in 0..10 {
                q.offer(&"0123456789".to_string()).unwrap();
            }
            q.flush().unwrap();
        }
        let q = PersistentQueue::<String>::open(&path, 4, 8192).unwrap();
        assert_eq!(q.peek().unwrap(), Some("0123456789".to_string()));
        for _ in 0..10 {
            assert_eq!(q.poll().unwrap(), Some("0123456789".to_string()));
        }
        assert_eq!(q.size().unwrap(), 0);
    }

    #[test]
    fn clear_resets_state() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        for i in 0..5 {
            q.offer(&i).unwrap();
        }
        q.clear().unwrap();
        assert_eq!(q.size().unwrap(), 0);
        assert!(q.is_empty().unwrap());
        assert!(q.offer(&99).unwrap());
    }

    #[test]
    fn drain_to_is_fifo_and_bounded() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        for i in 0..5 {
            q.offer(&i).unwrap();
        }
        let mut sink = Vec::new();
        let n = q.drain_to(&mut sink, 3).unwrap();
        assert_eq!(n, 3);
        assert_eq!(sink, vec![0, 1, 2]);
        assert_eq!(q.size().unwrap(), 2);
    }

    #[test]
    fn operations_record_latency_samples() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        assert!(q.metrics().latency_snapshot().is_empty());
        q.put(&1, &CancelToken::new()).unwrap();
        q.take(&CancelToken::new()).unwrap();
        let snap = q.metrics().latency_snapshot();
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn closed_queue_rejects_operations() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        q.close().unwrap();
        assert!(matches!(q.offer(&1), Err(QueueError::IllegalState(_))));
        assert!(matches!(q.size(), Err(QueueError::IllegalState(_))));
        assert!(matches!(q.is_empty(), Err(QueueError::IllegalState(_))));
    }

    #[test]
    fn unsupported_operations_signal_unsupported() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        assert!(!q.contains(&1));
        assert!(matches!(q.remove_value(&1), Err(QueueError::Unsupported(_))));
        assert!(matches!(q.to_vec(), Err(QueueError::Unsupported(_))));
    }

    #[test]
    fn reopen_rejects_mismatched_parameters() {
        let path = temp_path();
        {
            let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
            q.offer(&1).unwrap();
            q.flush().unwrap();
        }
        let result = PersistentQueue::<i32>::open(&path, 8, 4096);
        assert!(matches!(result, Err(QueueError::IllegalState(_))));
    }
}
