use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct InternalMetrics {
    pub(crate) queue_overflow: Counter,
    pub(crate) queue_batch_processed: Counter,
    pub(crate) queue_batch_failed: Counter,
    pub(crate) queue_batch_panicked: Counter,
}

#[derive(Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Counter(AtomicU64::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl InternalMetrics {
    pub fn sample(&self, queue_length: usize) -> ChannelMetrics {
        ChannelMetrics {
            queue_overflow: self.queue_overflow.sample(),
            queue_batch_processed: self.queue_batch_processed.sample(),
            queue_batch_failed: self.queue_batch_failed.sample(),
            queue_batch_panicked: self.queue_batch_panicked.sample(),
            queue_length,
        }
    }
}

/**
A point-in-time view of a channel's own activity.

These aren't the adapter's event metrics; they describe the health of
the queue itself.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelMetrics {
    /**
    The pending buffer hit its capacity limit and was cleared.
    */
    pub queue_overflow: u64,
    /**
    A batch was handed to the worker callback and processed.
    */
    pub queue_batch_processed: u64,
    /**
    A batch was handed to the worker callback and it reported failure.
    */
    pub queue_batch_failed: u64,
    /**
    The worker callback panicked while processing a batch.
    */
    pub queue_batch_panicked: u64,
    /**
    Items pending in the buffer when this sample was taken.
    */
    pub queue_length: usize,
}
