//! Minimal runnable walkthrough of the public API: open a file-backed
//! queue, enqueue a few values, observe a fail-fast iterator, and take
//! them back off in FIFO order.

use ringqueue_rs::{CancelToken, PersistentQueue};
use tempfile::NamedTempFile;

fn main() -> Result<(), ringqueue_rs::QueueError> {
    let path = NamedTempFile::new().expect("create temp file").into_temp_path();

    let queue = PersistentQueue::<String>::open(&path, 64, 1 << 16)?;

    for word in ["alpha", "beta", "gamma"] {
        queue.put(&word.to_string(), &CancelToken::new())?;
    }
    println!("enqueued {} records", queue.size()?);

    {
        let mut it = queue.iter()?;
        while it.has_next() {
            println!("observed (not consumed): {:?}", it.next()?);
        }
    }

    while let Some(value) = queue.poll()? {
        println!("took: {value}");
    }
    assert!(queue.is_empty()?);

    queue.flush()?;
    queue.close()?;
    Ok(())
}
