use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::QueueError;
use crate::sample_buffer::CircularSampleBuffer;

/// Per-queue counters and latency sampling.
///
/// Latency recording is exposed as an explicit capability
/// (`start_timer()` / `Timer::stop()`) rather than through a
/// reflectively-generated proxy: the monitor owns the sample buffer, and a
/// `Timer` carries only a borrowed reference back to it, valid for the
/// timer's own lifetime.
pub struct QueueMetrics {
    latencies_ns: CircularSampleBuffer,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl QueueMetrics {
    pub fn new(sample_capacity: usize) -> Result<Self, QueueError> {
        Ok(Self {
            latencies_ns: CircularSampleBuffer::new(sample_capacity)?,
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        })
    }

    pub fn record_enqueue(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dequeue(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Starts timing an operation; call `.stop()` on the returned handle
    /// when it completes to record a latency sample.
    pub fn start_timer(&self) -> Timer<'_> {
        Timer {
            monitor: self,
            start: Instant::now(),
        }
    }

    /// Best-effort, possibly-short snapshot of recent operation latencies.
    pub fn latency_snapshot(&self) -> Vec<Duration> {
        self.latencies_ns
            .snapshot()
            .into_iter()
            .map(Duration::from_nanos)
            .collect()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

/// An in-flight latency measurement borrowed from its owning
/// [`QueueMetrics`]. Dropping it without calling `stop()` discards the
/// measurement.
pub struct Timer<'a> {
    monitor: &'a QueueMetrics,
    start: Instant,
}

impl Timer<'_> {
    pub fn stop(self) {
        let elapsed = self.start.elapsed();
        self.monitor.latencies_ns.add(elapsed.as_nanos() as u64);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn counters_increment() {
        let m = QueueMetrics::new(4).unwrap();
        m.record_enqueue();
        m.record_enqueue();
        m.record_dequeue();
        let snap = m.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.messages_received, 1);
    }

    #[test]
    fn timer_records_a_sample() {
        let m = QueueMetrics::new(4).unwrap();
        let timer = m.start_timer();
        thread::sleep(Duration::from_millis(1));
        timer.stop();
        assert_eq!(m.latency_snapshot().len(), 1);
    }
}
