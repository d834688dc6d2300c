//! A persistent, blocking FIFO queue backed by a fixed-size memory-mapped
//! file, plus the two concurrency primitives it's built from.
//!
//! # Components
//!
//! - [`PersistentQueue`]: a bounded blocking FIFO over a memory-mapped
//!   file, block-aligned, with producer/consumer semaphores and a
//!   header-protecting fair read/write lock. The main attraction.
//! - [`CircularSampleBuffer`]: the fixed-capacity lock-free ring
//!   [`QueueMetrics`] samples operation latencies into.
//! - [`AtomicOnceInit`]: a one-shot initialization barrier with fair-wait
//!   and retry, for lazy service location elsewhere in a larger system.
//!
//! # Example
//!
//! ```no_run
//! use ringqueue_rs::{CancelToken, PersistentQueue};
//!
//! # fn main() -> Result<(), ringqueue_rs::QueueError> {
//! let queue = PersistentQueue::<u64>::open("queue.dat", 4096, 1 << 20)?;
//! queue.put(&42, &CancelToken::new())?;
//! assert_eq!(queue.take(&CancelToken::new())?, 42);
//! # Ok(())
//! # }
//! ```

mod backoff;
mod codec;
mod config;
mod error;
mod header;
mod invariants;
mod iterator;
mod metrics;
mod once;
mod queue;
mod rwlock;
mod sample_buffer;
mod semaphore;

pub use backoff::Backoff;
pub use codec::{BincodeCodec, Codec};
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use iterator::QueueIter;
pub use metrics::{MetricsSnapshot, QueueMetrics, Timer};
pub use once::{AtomicOnceInit, OnceMode};
pub use queue::PersistentQueue;
pub use rwlock::{FairRwLock, FairRwLockReadGuard, FairRwLockWriteGuard};
pub use sample_buffer::CircularSampleBuffer;
pub use semaphore::{CancelToken, FairSemaphore};
