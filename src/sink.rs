use std::{
    cmp,
    collections::BTreeMap,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use faultline_batcher::Backoff;
use faultline_core::{LogEvent, Value};

use crate::{
    breadcrumbs::BreadcrumbRing,
    cache::StacktraceCache,
    client::Client,
    event::{
        Breadcrumb, Exception, OutboundEvent, OutboundLevel, User, TAG_MESSAGE_TEMPLATE,
    },
    metrics::{Metrics, MetricsCollector},
    options::{BeforeSend, Builder, Fingerprinter, MetricsCallback},
    sampling::Sampler,
    scope::Scope,
    stacktrace::Stacktrace,
    Error,
};

// Pending-event ceiling between flushes; past it the oldest buffer is
// cleared rather than grown
const MAX_PENDING_EVENTS: usize = 10_000;

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

const ERROR_KEYS: [&str; 3] = ["error", "err", "Error"];
const USER_KEYS: [&str; 2] = ["user", "User"];

type EventBatch = Vec<OutboundEvent>;

/**
The adapter: ingests [`LogEvent`]s, routes them to breadcrumbs or the
tracked-event path, and drives a background worker that batches,
enriches, and submits them through a [`Client`].

Ingest never blocks on the network and never reports failure to the
caller; runtime problems are retried, self-logged, or counted in
[`Sink::metrics`].

Dropping a sink closes the channel and lets the worker drain in the
background; call [`Sink::close`] instead to wait for the drain and give
the transport a bounded final flush.
*/
pub struct Sink<C: Client> {
    client: Arc<C>,
    shared: Arc<SinkShared>,
    sender: faultline_batcher::Sender<EventBatch>,
    worker: thread::JoinHandle<()>,
    observer: Option<MetricsObserver>,
}

struct SinkShared {
    min_level: faultline_core::Level,
    breadcrumb_level: faultline_core::Level,
    breadcrumbs: BreadcrumbRing,
    cache: StacktraceCache,
    sampler: Option<Sampler>,
    metrics: MetricsCollector,
    enable_metrics: bool,
    fingerprinter: Option<Fingerprinter>,
    before_send: Option<BeforeSend>,
    backoff: Backoff,
    max_retries: u32,
}

impl<C: Client> Sink<C> {
    pub(crate) fn start(builder: Builder, client: C) -> Result<Self, Error> {
        let before_send = effective_before_send(builder.before_send, builder.ignore_errors);

        let shared = Arc::new(SinkShared {
            min_level: builder.min_level,
            breadcrumb_level: builder.breadcrumb_level,
            breadcrumbs: BreadcrumbRing::with_clock(
                builder.max_breadcrumbs,
                builder.clock.clone(),
            ),
            cache: StacktraceCache::new(builder.stack_trace_cache_size),
            sampler: builder
                .sampling
                .map(|config| Sampler::with_clock(config, builder.clock.clone())),
            metrics: MetricsCollector::default(),
            enable_metrics: builder.enable_metrics,
            fingerprinter: builder.fingerprinter,
            before_send,
            backoff: Backoff::new(builder.retry_backoff, builder.retry_jitter),
            max_retries: builder.max_retries,
        });

        let (sender, receiver) = faultline_batcher::bounded(
            cmp::max(MAX_PENDING_EVENTS, builder.batch_size * 2),
            builder.batch_size,
            builder.batch_timeout,
        );

        let client = Arc::new(client);

        let worker = thread::spawn({
            let mut worker = Worker {
                client: client.clone(),
                shared: shared.clone(),
            };

            move || receiver.blocking_exec(move |batch| worker.on_batch(batch))
        });

        let observer = builder
            .metrics_observer
            .map(|(interval, callback)| MetricsObserver::spawn(interval, callback, shared.clone()));

        Ok(Sink {
            client,
            shared,
            sender,
            worker,
            observer,
        })
    }

    /**
    Ingest one log event.

    Events below the breadcrumb level are ignored; events between the
    breadcrumb and minimum levels are recorded as breadcrumbs; events at
    or above the minimum level run the sampling gate and, if admitted,
    are converted and queued for the worker.
    */
    pub fn emit(&self, event: &LogEvent) {
        let shared = &self.shared;

        // The band between the two thresholds becomes context, not traffic
        if event.level() < shared.min_level && event.level() >= shared.breadcrumb_level {
            shared.add_breadcrumb(event);
            return;
        }

        if event.level() < shared.min_level {
            return;
        }

        if let Some(sampler) = &shared.sampler {
            if !sampler.should_sample(event) {
                if shared.enable_metrics {
                    shared.metrics.events_dropped.increment();
                }
                return;
            }
        }

        let Some(outbound) = shared.convert(event) else {
            return;
        };

        self.sender.send(outbound);
    }

    /**
    A snapshot of the sink's counters.
    */
    pub fn metrics(&self) -> Metrics {
        self.shared.metrics.snapshot()
    }

    /**
    The sampler's internal state, when sampling is configured.
    */
    pub fn sampler_stats(&self) -> Option<crate::sampling::SamplerStats> {
        self.shared.sampler.as_ref().map(Sampler::stats)
    }

    /**
    Wait for everything queued at the point of this call to be
    submitted. Returns `false` if `timeout` elapsed first.
    */
    pub fn flush(&self, timeout: Duration) -> bool {
        faultline_batcher::sync::blocking_flush(&self.sender, timeout)
    }

    /**
    Close the sink: stop accepting events, drain pending batches, then
    give the transport a bounded final flush.

    Events still in the transport when that flush times out are lost;
    the timeout is reported through the self-diagnostic log rather than
    as an error.
    */
    pub fn close(self) -> Result<(), Error> {
        let Sink {
            client,
            shared: _shared,
            sender,
            worker,
            observer,
        } = self;

        drop(observer);
        drop(sender);

        worker
            .join()
            .map_err(|_| Error::msg("the flush worker panicked"))?;

        if !client.flush(SHUTDOWN_FLUSH_TIMEOUT) {
            tracing::warn!(
                timeout_ms = SHUTDOWN_FLUSH_TIMEOUT.as_millis() as u64,
                "transport flush timed out during close; undelivered events were lost"
            );
        }

        Ok(())
    }
}

impl SinkShared {
    fn add_breadcrumb(&self, event: &LogEvent) {
        let level = OutboundLevel::from_level(event.level());

        let data = event
            .properties()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<BTreeMap<_, _>>();

        let crumb = Breadcrumb {
            category: level.as_str().to_owned(),
            level,
            message: event.msg(),
            data,
            timestamp: event.timestamp(),
        };

        let evicted = self.breadcrumbs.add(crumb);

        if self.enable_metrics {
            self.metrics.breadcrumbs_added.increment();
            if evicted {
                self.metrics.breadcrumbs_evicted.increment();
            }
        }
    }

    fn convert(&self, event: &LogEvent) -> Option<OutboundEvent> {
        let mut tags = BTreeMap::new();
        tags.insert(
            TAG_MESSAGE_TEMPLATE.to_owned(),
            event.template().to_owned(),
        );

        let mut outbound = OutboundEvent {
            message: event.msg(),
            level: OutboundLevel::from_level(event.level()),
            timestamp: event.timestamp(),
            tags,
            extra: BTreeMap::new(),
            exceptions: Vec::new(),
            user: None,
            fingerprint: Vec::new(),
            breadcrumbs: Vec::new(),
            contexts: BTreeMap::new(),
            transaction: None,
            scope: Scope::capture(),
        };

        for (key, value) in event.properties() {
            if ERROR_KEYS.contains(&key.as_str()) {
                if let Some(err) = value.as_error() {
                    outbound.exceptions = self.extract_exception(err);
                }
            } else if USER_KEYS.contains(&key.as_str()) {
                if let Some(map) = value.as_map() {
                    outbound.user = Some(User::from_map(map));
                }
            } else {
                outbound.extra.insert(key.clone(), value.clone());
            }
        }

        outbound.fingerprint = match &self.fingerprinter {
            Some(fingerprinter) => fingerprinter(event),
            None => {
                let mut fingerprint = vec![event.template().to_owned()];

                if let Some(exception) = outbound.exceptions.first() {
                    fingerprint.push(exception.kind.clone());
                }

                fingerprint
            }
        };

        // Group quotas apply only once the fingerprint is known
        if let Some(sampler) = &self.sampler {
            if sampler.config().group_sampling
                && !sampler.group_sample(&group_key(&outbound.fingerprint))
            {
                if self.enable_metrics {
                    self.metrics.events_dropped.increment();
                }
                return None;
            }
        }

        Some(outbound)
    }

    fn extract_exception(&self, err: &faultline_core::ErrorValue) -> Vec<Exception> {
        let cache_key = err.cache_key();

        if let Some(cached) = self.cache.get(&cache_key) {
            return vec![Exception {
                kind: err.kind().to_owned(),
                message: err.message().to_owned(),
                stacktrace: Some(cached),
            }];
        }

        let stacktrace = Stacktrace::capture().map(Arc::new);

        if let Some(stacktrace) = &stacktrace {
            self.cache.set(&cache_key, stacktrace.clone());
        }

        vec![Exception {
            kind: err.kind().to_owned(),
            message: err.message().to_owned(),
            stacktrace,
        }]
    }
}

struct Worker<C: Client> {
    client: Arc<C>,
    shared: Arc<SinkShared>,
}

impl<C: Client> Worker<C> {
    fn on_batch(
        &mut self,
        batch: EventBatch,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let start = Instant::now();
        let batch_size = batch.len();

        for mut event in batch {
            // Breadcrumbs reflect the state of the ring at flush time,
            // not at ingest time
            event.breadcrumbs = self.shared.breadcrumbs.snapshot();

            enrich_from_scope(&mut event);

            let event = match &self.shared.before_send {
                Some(before_send) => match before_send(event) {
                    Some(event) => event,
                    None => {
                        if self.shared.enable_metrics {
                            self.shared.metrics.events_dropped.increment();
                        }
                        continue;
                    }
                },
                None => event,
            };

            self.send_with_retry(&event);
        }

        if self.shared.enable_metrics {
            let elapsed = start.elapsed();
            let metrics = &self.shared.metrics;

            metrics.last_flush_duration.set(elapsed.as_nanos() as u64);
            metrics.total_flush_time.increment_by(elapsed.as_nanos() as u64);
            metrics.batches_sent.increment();
            metrics.total_batch_size.increment_by(batch_size as u64);
        }

        Ok(())
    }

    fn send_with_retry(&self, event: &OutboundEvent) {
        let shared = &self.shared;

        for attempt in 0..=shared.max_retries {
            if self.client.capture(event).is_some() {
                if shared.enable_metrics {
                    shared.metrics.events_sent.increment();
                    if attempt > 0 {
                        shared.metrics.events_retried.increment();
                    }
                }
                return;
            }

            if attempt < shared.max_retries {
                let delay = shared.backoff.delay(attempt);

                if shared.enable_metrics {
                    shared.metrics.retry_count.increment();
                }

                tracing::debug!(
                    attempt = attempt + 1,
                    max_retries = shared.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying failed capture"
                );

                thread::sleep(delay);
            }
        }

        if shared.enable_metrics {
            shared.metrics.events_failed.increment();
            shared.metrics.network_errors.increment();
        }

        tracing::warn!(
            attempts = shared.max_retries + 1,
            message = %event.message,
            "failed to capture event; abandoning it"
        );
    }
}

fn enrich_from_scope(event: &mut OutboundEvent) {
    let Some(scope) = event.scope.take() else {
        return;
    };

    if event.user.is_none() {
        event.user = scope.user;
    }

    // Scope tags win over event tags
    for (key, value) in scope.tags {
        event.tags.insert(key, value);
    }

    for (key, context) in scope.contexts {
        event.contexts.entry(key).or_default().extend(context);
    }

    if let Some(trace) = scope.trace {
        if event.transaction.is_none() {
            event.transaction = trace.transaction.clone();
        }

        let mut context = BTreeMap::new();
        context.insert(
            "trace_id".to_owned(),
            Value::from(trace.trace_id.to_string()),
        );
        context.insert("span_id".to_owned(), Value::from(trace.span_id.to_string()));
        if let Some(parent) = trace.parent_span_id {
            context.insert(
                "parent_span_id".to_owned(),
                Value::from(parent.to_string()),
            );
        }
        if let Some(op) = &trace.op {
            context.insert("op".to_owned(), Value::from(op.clone()));
        }

        event.contexts.insert("trace".to_owned(), context);
    }
}

fn effective_before_send(
    before_send: Option<BeforeSend>,
    ignore_errors: Vec<String>,
) -> Option<BeforeSend> {
    if ignore_errors.is_empty() {
        return before_send;
    }

    Some(Arc::new(move |event: OutboundEvent| {
        let ignored = event.exceptions.iter().any(|exception| {
            ignore_errors
                .iter()
                .any(|entry| entry == &exception.message || entry == &exception.kind)
        });

        if ignored {
            return None;
        }

        match &before_send {
            Some(before_send) => before_send(event),
            None => Some(event),
        }
    }))
}

fn group_key(fingerprint: &[String]) -> String {
    fingerprint.join("\u{1f}")
}

struct MetricsObserver {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MetricsObserver {
    fn spawn(interval: Duration, callback: MetricsCallback, shared: Arc<SinkShared>) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));

        let handle = thread::spawn({
            let stop = stop.clone();

            move || {
                let (lock, wake) = &*stop;

                loop {
                    let stopped = lock.lock().unwrap();
                    if *stopped {
                        return;
                    }

                    let (stopped, timeout) = wake.wait_timeout(stopped, interval).unwrap();
                    if *stopped {
                        return;
                    }
                    drop(stopped);

                    if timeout.timed_out() {
                        callback(shared.metrics.snapshot());
                    }
                }
            }
        });

        MetricsObserver {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for MetricsObserver {
    fn drop(&mut self) {
        *self.stop.0.lock().unwrap() = true;
        self.stop.1.notify_all();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_key_is_unambiguous() {
        let a = group_key(&["ab".to_owned(), "c".to_owned()]);
        let b = group_key(&["a".to_owned(), "bc".to_owned()]);

        assert_ne!(a, b);
    }

    #[test]
    fn ignore_errors_compose_with_before_send() {
        let before_send = effective_before_send(
            Some(Arc::new(|mut event: OutboundEvent| {
                event.tags.insert("seen".to_owned(), "yes".to_owned());
                Some(event)
            })),
            vec!["connection reset".to_owned()],
        )
        .unwrap();

        let mut ignored = empty_event();
        ignored.exceptions.push(Exception {
            kind: "io::Error".to_owned(),
            message: "connection reset".to_owned(),
            stacktrace: None,
        });

        assert!(before_send(ignored).is_none());

        let passed = before_send(empty_event()).unwrap();
        assert_eq!("yes", passed.tags["seen"]);
    }

    fn empty_event() -> OutboundEvent {
        OutboundEvent {
            message: String::new(),
            level: OutboundLevel::Error,
            timestamp: faultline_core::Timestamp::new(Duration::from_secs(0)),
            tags: BTreeMap::new(),
            extra: BTreeMap::new(),
            exceptions: Vec::new(),
            user: None,
            fingerprint: Vec::new(),
            breadcrumbs: Vec::new(),
            contexts: BTreeMap::new(),
            transaction: None,
            scope: None,
        }
    }
}
