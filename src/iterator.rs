use crate::codec::Codec;
use crate::error::QueueError;
use crate::header::{advance_wrapping, block_align_up, read_bytes_wrapping, wrap_position};
use crate::queue::PersistentQueue;

/// A snapshot-coupled, fail-fast iterator over a [`PersistentQueue`].
///
/// Captures `head`/`tail` under the read lock at construction. `next()`
/// re-checks those captured values against the live header on every call;
/// if either moved since construction, it fails with
/// `ConcurrentModification` rather than returning a possibly-inconsistent
/// record. Never consumes from the underlying queue, and `remove()` is
/// unsupported.
pub struct QueueIter<'q, T, C> {
    queue: &'q PersistentQueue<T, C>,
    captured_head: u32,
    captured_tail: u32,
    cursor: u32,
}

impl<'q, T, C: Codec<T>> QueueIter<'q, T, C> {
    pub(crate) fn new(queue: &'q PersistentQueue<T, C>) -> Self {
        let g = queue.inner.read();
        let head = g.header.head;
        let tail = g.header.tail;
        drop(g);
        Self {
            queue,
            captured_head: head,
            captured_tail: tail,
            cursor: head,
        }
    }

    /// `true` iff the iterator's cursor has not yet reached the captured
    /// `tail`.
    pub fn has_next(&self) -> bool {
        self.cursor != self.captured_tail
    }

    /// Reads and deserializes the record at the current cursor, advancing
    /// it. Fails with `ConcurrentModification` if `head`/`tail` have moved
    /// since construction (or since the last `next()`).
    pub fn next(&mut self) -> Result<Option<T>, QueueError> {
        if !self.has_next() {
            return Ok(None);
        }
        let g = self.queue.inner.read();
        if g.header.head != self.captured_head || g.header.tail != self.captured_tail {
            return Err(QueueError::ConcurrentModification);
        }

        let cfg = &self.queue.cfg;
        let cursor = self.cursor;
        let len_bytes = read_bytes_wrapping(&g.mmap, cursor, 4, cfg);
        let n = u32::from_be_bytes(len_bytes.try_into().unwrap());
        let payload_start = wrap_position(cursor, 4, cfg);
        let bytes = read_bytes_wrapping(&g.mmap, payload_start, n, cfg);
        drop(g);

        let raw_end = wrap_position(cursor, 4 + n, cfg);
        let aligned = block_align_up(raw_end, cfg.block_size());
        self.cursor = advance_wrapping(aligned, cfg);

        self.queue.codec.decode(&bytes).map(Some)
    }

    /// Unsupported: this iterator never mutates the queue it walks.
    pub fn remove(&mut self) -> Result<(), QueueError> {
        Err(QueueError::Unsupported("QueueIter::remove"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semaphore::CancelToken;
    use tempfile::NamedTempFile;

    fn temp_path() -> std::path::PathBuf {
        NamedTempFile::new().unwrap().path().to_path_buf()
    }

    #[test]
    fn iterates_in_fifo_order_without_consuming() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        for i in 0..20 {
            q.offer(&i).unwrap();
        }
        let mut it = q.iter().unwrap();
        let mut seen = Vec::new();
        while it.has_next() {
            seen.push(it.next().unwrap().unwrap());
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert_eq!(q.size().unwrap(), 20); // nothing consumed
    }

    #[test]
    fn detects_concurrent_modification() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        for i in 0..20 {
            q.offer(&i).unwrap();
        }
        let mut it = q.iter().unwrap();
        it.next().unwrap();
        q.put(&999, &CancelToken::new()).unwrap();
        assert!(matches!(it.next(), Err(QueueError::ConcurrentModification)));
    }

    #[test]
    fn remove_is_unsupported() {
        let path = temp_path();
        let q = PersistentQueue::<i32>::open(&path, 4, 4096).unwrap();
        q.offer(&1).unwrap();
        let mut it = q.iter().unwrap();
        assert!(matches!(it.remove(), Err(QueueError::Unsupported(_))));
    }
}
