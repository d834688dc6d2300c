use thiserror::Error;

/// Errors surfaced by every fallible operation in this crate.
///
/// Variants map directly onto the error kinds a caller needs to
/// distinguish: bad arguments at construction time, on-disk corruption,
/// operations this queue deliberately does not support, empty-queue
/// probes, iterator staleness, cancellation, and I/O failures at open
/// time.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed construction parameters or bad method arguments.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// File corruption, a deserialization failure, a header that
    /// disagrees with the constructor parameters, or a `done`/`retry`
    /// call from a caller that does not hold the initialization lock.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An operation this queue explicitly does not implement.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// `element()` / `remove()` called on an empty queue.
    #[error("no such element")]
    NoSuchElement,

    /// The iterator observed `head` or `tail` move since it was created.
    #[error("concurrent modification detected")]
    ConcurrentModification,

    /// A blocking or timed wait was cancelled before it completed.
    #[error("operation interrupted")]
    Interrupted,

    /// The underlying file or mapping failed at open time.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `add` was called and the equivalent `offer` would have returned
    /// `false`.
    #[error("queue capacity exhausted")]
    Capacity,
}

pub type Result<T> = std::result::Result<T, QueueError>;
