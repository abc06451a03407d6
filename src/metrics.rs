use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/**
A point-in-time view of the sink's activity.

Taken with [`crate::Sink::metrics`]; every field is read from a lock-free
counter, so a snapshot is cheap enough to poll.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub events_sent: u64,
    pub events_dropped: u64,
    pub events_failed: u64,
    pub events_retried: u64,

    pub breadcrumbs_added: u64,
    pub breadcrumbs_evicted: u64,

    pub batches_sent: u64,
    pub average_batch_size: f64,

    pub last_flush_duration: Duration,
    pub total_flush_time: Duration,

    pub retry_count: u64,
    pub network_errors: u64,
}

#[derive(Default)]
pub(crate) struct MetricsCollector {
    pub(crate) events_sent: Counter,
    pub(crate) events_dropped: Counter,
    pub(crate) events_failed: Counter,
    pub(crate) events_retried: Counter,
    pub(crate) breadcrumbs_added: Counter,
    pub(crate) breadcrumbs_evicted: Counter,
    pub(crate) batches_sent: Counter,
    pub(crate) total_batch_size: Counter,
    pub(crate) last_flush_duration: Counter,
    pub(crate) total_flush_time: Counter,
    pub(crate) retry_count: Counter,
    pub(crate) network_errors: Counter,
}

impl MetricsCollector {
    pub fn snapshot(&self) -> Metrics {
        let batches_sent = self.batches_sent.sample();
        let total_batch_size = self.total_batch_size.sample();

        Metrics {
            events_sent: self.events_sent.sample(),
            events_dropped: self.events_dropped.sample(),
            events_failed: self.events_failed.sample(),
            events_retried: self.events_retried.sample(),
            breadcrumbs_added: self.breadcrumbs_added.sample(),
            breadcrumbs_evicted: self.breadcrumbs_evicted.sample(),
            batches_sent,
            average_batch_size: total_batch_size as f64 / batches_sent.max(1) as f64,
            last_flush_duration: Duration::from_nanos(self.last_flush_duration.sample()),
            total_flush_time: Duration::from_nanos(self.total_flush_time.sample()),
            retry_count: self.retry_count.sample(),
            network_errors: self.network_errors.sample(),
        }
    }
}

#[derive(Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, by: u64) {
        self.0.fetch_add(by, Ordering::Relaxed);
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn sample(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
