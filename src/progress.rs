//! Live transfer progress.
//!
//! A [`ProgressSink`] receives byte-count increments from every running
//! transfer. Sinks are invoked concurrently from many tasks, so any
//! bookkeeping they do must be internally synchronized.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives byte-count increments as transfers read or write data.
pub trait ProgressSink: Send + Sync {
    /// Record `bytes` more bytes transferred.
    fn update(&self, bytes: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn update(&self, bytes: u64) {
        self(bytes)
    }
}

/// A shared, monotonically increasing byte total.
///
/// Clones share the same underlying counter.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `bytes` to the total.
    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current total.
    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Reset the total to zero, returning the previous value.
    pub fn reset(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

impl ProgressSink for ByteCounter {
    fn update(&self, bytes: u64) {
        self.add(bytes);
    }
}

/// Feeds a phase's aggregate counter and forwards to the caller's sink, if any.
pub(crate) struct Tee {
    counter: ByteCounter,
    downstream: Option<Arc<dyn ProgressSink>>,
}

impl Tee {
    pub(crate) fn new(counter: ByteCounter, downstream: Option<Arc<dyn ProgressSink>>) -> Self {
        Tee {
            counter,
            downstream,
        }
    }
}

impl ProgressSink for Tee {
    fn update(&self, bytes: u64) {
        self.counter.add(bytes);
        if let Some(sink) = &self.downstream {
            sink.update(bytes);
        }
    }
}
