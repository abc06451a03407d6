use std::{sync::Arc, time::Duration};

use faultline_core::{Clock, Level, LogEvent, SystemClock};

use crate::{
    client::{resolve_dsn, Client, ClientOptions},
    event::OutboundEvent,
    metrics::Metrics,
    sampling::{SamplingConfig, SamplingProfile},
    sink::Sink,
    Error,
};

/**
Produces the fingerprint the remote service groups an event under.
*/
pub type Fingerprinter = Arc<dyn Fn(&LogEvent) -> Vec<String> + Send + Sync>;

/**
Inspect (and possibly drop) an event just before it is handed to the
transport. Return `None` to drop it.
*/
pub type BeforeSend = Arc<dyn Fn(OutboundEvent) -> Option<OutboundEvent> + Send + Sync>;

/**
Observes periodic [`Metrics`] snapshots.
*/
pub type MetricsCallback = Arc<dyn Fn(Metrics) + Send + Sync>;

pub(crate) const DEFAULT_MIN_LEVEL: Level = Level::Error;
pub(crate) const DEFAULT_BREADCRUMB_LEVEL: Level = Level::Debug;
pub(crate) const DEFAULT_SAMPLE_RATE: f64 = 1.0;
pub(crate) const DEFAULT_MAX_BREADCRUMBS: usize = 100;
pub(crate) const DEFAULT_BATCH_SIZE: usize = 100;
pub(crate) const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_STACK_TRACE_CACHE_SIZE: usize = 1_000;
pub(crate) const MIN_BATCH_TIMEOUT: Duration = Duration::from_secs(1);

/**
Configuration for a [`Sink`].

Start one with [`crate::new`], chain the options you need, then call
[`Builder::spawn`] with your transport:

```no_run
# fn build_client(_: &faultline::ClientOptions) -> Result<MyClient, faultline::Error> { unimplemented!() }
# struct MyClient;
# impl faultline::Client for MyClient {
#     fn capture(&self, _: &faultline::OutboundEvent) -> Option<faultline::EventId> { None }
#     fn flush(&self, _: std::time::Duration) -> bool { true }
# }
# fn main() -> Result<(), faultline::Error> {
let builder = faultline::new("https://key@ingest.example/1")
    .environment("production")
    .release("my-app@1.4.2")
    .max_retries(3)
    .retry_backoff(std::time::Duration::from_millis(100));

let client = build_client(&builder.client_options()?)?;
let sink = builder.spawn(client)?;
# let _ = sink;
# Ok(())
# }
```
*/
pub struct Builder {
    pub(crate) dsn: String,
    pub(crate) min_level: Level,
    pub(crate) breadcrumb_level: Level,
    pub(crate) sample_rate: f64,
    pub(crate) environment: Option<String>,
    pub(crate) release: Option<String>,
    pub(crate) server_name: Option<String>,
    pub(crate) max_breadcrumbs: usize,
    pub(crate) batch_size: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) fingerprinter: Option<Fingerprinter>,
    pub(crate) before_send: Option<BeforeSend>,
    pub(crate) ignore_errors: Vec<String>,
    pub(crate) max_retries: u32,
    pub(crate) retry_backoff: Duration,
    pub(crate) retry_jitter: f64,
    pub(crate) stack_trace_cache_size: usize,
    pub(crate) sampling: Option<SamplingConfig>,
    pub(crate) enable_metrics: bool,
    pub(crate) metrics_observer: Option<(Duration, MetricsCallback)>,
    pub(crate) attach_stacktrace: bool,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Builder {
    pub(crate) fn new(dsn: impl Into<String>) -> Self {
        Builder {
            dsn: dsn.into(),
            min_level: DEFAULT_MIN_LEVEL,
            breadcrumb_level: DEFAULT_BREADCRUMB_LEVEL,
            sample_rate: DEFAULT_SAMPLE_RATE,
            environment: None,
            release: None,
            server_name: None,
            max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            fingerprinter: None,
            before_send: None,
            ignore_errors: Vec::new(),
            max_retries: 0,
            retry_backoff: Duration::ZERO,
            retry_jitter: 0.0,
            stack_trace_cache_size: DEFAULT_STACK_TRACE_CACHE_SIZE,
            sampling: None,
            enable_metrics: true,
            metrics_observer: None,
            attach_stacktrace: true,
            clock: Arc::new(SystemClock),
        }
    }

    /**
    The environment events are reported under (e.g. `"production"`).
    */
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /**
    The release version events are reported under.
    */
    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /**
    The minimum level for tracked events. Events below it may still be
    collected as breadcrumbs.
    */
    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /**
    The minimum level for breadcrumb collection. Events at or above it
    but below the minimum event level become breadcrumbs.
    */
    pub fn breadcrumb_level(mut self, level: Level) -> Self {
        self.breadcrumb_level = level;
        self
    }

    /**
    The client-level sample rate handed to the transport. Must be
    within `0.0..=1.0`.
    */
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn max_breadcrumbs(mut self, max: usize) -> Self {
        self.max_breadcrumbs = max;
        self
    }

    /**
    How many events trigger an early flush. Clamped to at least 1.
    */
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /**
    How long the worker waits before flushing a partial batch. Clamped
    to at least one second.
    */
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout.max(MIN_BATCH_TIMEOUT);
        self
    }

    /**
    Group events under a custom fingerprint instead of the default
    template-plus-exception-type.
    */
    pub fn fingerprinter(
        mut self,
        fingerprinter: impl Fn(&LogEvent) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.fingerprinter = Some(Arc::new(fingerprinter));
        self
    }

    /**
    Inspect or drop events just before submission. Returning `None`
    drops the event.
    */
    pub fn before_send(
        mut self,
        before_send: impl Fn(OutboundEvent) -> Option<OutboundEvent> + Send + Sync + 'static,
    ) -> Self {
        self.before_send = Some(Arc::new(before_send));
        self
    }

    /**
    Drop events whose exception matches one of these error messages or
    type paths. Sugar over [`Builder::before_send`].
    */
    pub fn ignore_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_errors
            .extend(errors.into_iter().map(Into::into));
        self
    }

    /**
    How many times a failed submission is retried before the event is
    abandoned. Zero (the default) disables retry.
    */
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /**
    The base delay for the first retry; subsequent retries double it.
    */
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /**
    The jitter factor spread over retry delays. Must be within
    `0.0..=1.0`; zero gives pure exponential backoff.
    */
    pub fn retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /**
    Capacity of the stack-trace cache. Zero disables caching.
    */
    pub fn stack_trace_cache_size(mut self, size: usize) -> Self {
        self.stack_trace_cache_size = size;
        self
    }

    /**
    Volume-control configuration for the event path.
    */
    pub fn sampling(mut self, config: SamplingConfig) -> Self {
        self.sampling = Some(config);
        self
    }

    /**
    Apply a predefined sampling profile.
    */
    pub fn sampling_profile(self, profile: SamplingProfile) -> Self {
        self.sampling(profile.config())
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /**
    Invoke `callback` with a metrics snapshot every `interval` until the
    sink closes.
    */
    pub fn metrics_callback(
        mut self,
        interval: Duration,
        callback: impl Fn(Metrics) + Send + Sync + 'static,
    ) -> Self {
        self.metrics_observer = Some((interval, Arc::new(callback)));
        self
    }

    /**
    Whether the transport should attach stack traces to captured
    events that don't already carry one.
    */
    pub fn attach_stacktrace(mut self, attach: bool) -> Self {
        self.attach_stacktrace = attach;
        self
    }

    /**
    Read time through `clock` instead of the system clock. Intended for
    tests driving age- and window-based behaviour deterministically.
    */
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /**
    The transport options derived from this configuration.

    Fails if no DSN was provided and the `FAULTLINE_DSN` environment
    variable is unset.
    */
    pub fn client_options(&self) -> Result<ClientOptions, Error> {
        Ok(ClientOptions {
            dsn: resolve_dsn(&self.dsn)?,
            environment: self.environment.clone(),
            release: self.release.clone(),
            server_name: self.server_name.clone(),
            sample_rate: self.sample_rate,
            attach_stacktrace: self.attach_stacktrace,
        })
    }

    /**
    Validate the configuration and start the sink over `client`.
    */
    pub fn spawn<C: Client>(self, client: C) -> Result<Sink<C>, Error> {
        self.validate()?;

        Sink::start(self, client)
    }

    fn validate(&self) -> Result<(), Error> {
        resolve_dsn(&self.dsn)?;

        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(Error::msg(format!(
                "sample rate {} is outside 0.0..=1.0",
                self.sample_rate
            )));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(Error::msg(format!(
                "retry jitter {} is outside 0.0..=1.0",
                self.retry_jitter
            )));
        }

        if self.max_retries > 0 && self.retry_backoff.is_zero() {
            return Err(Error::msg(
                "retries are enabled but the retry backoff is zero",
            ));
        }

        if let Some(sampling) = &self.sampling {
            for (name, rate) in [
                ("rate", sampling.rate),
                ("error rate", sampling.error_rate),
                ("fatal rate", sampling.fatal_rate),
            ] {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(Error::msg(format!(
                        "sampling {} {} is outside 0.0..=1.0",
                        name, rate
                    )));
                }
            }
        }

        Ok(())
    }
}

/**
Group events by message template alone: every instance of the same log
statement lands in one group regardless of rendered values.
*/
pub fn by_template() -> Fingerprinter {
    Arc::new(|event: &LogEvent| vec![event.template().to_owned()])
}

/**
Group events by template and error type, so different error types split
into separate groups even under the same log statement.
*/
pub fn by_error_type() -> Fingerprinter {
    Arc::new(|event: &LogEvent| {
        let mut fingerprint = vec![event.template().to_owned()];

        for key in ["Error", "error", "err", "Exception"] {
            if let Some(err) = event.properties().get(key).and_then(|v| v.as_error()) {
                fingerprint.push(err.kind().to_owned());
                break;
            }
        }

        fingerprint
    })
}

/**
Group events by template and one property's value — useful for
splitting groups by tenant, endpoint, or similar dimensions.
*/
pub fn by_property(name: impl Into<String>) -> Fingerprinter {
    let name = name.into();

    Arc::new(move |event: &LogEvent| {
        let mut fingerprint = vec![event.template().to_owned()];

        if let Some(value) = event.properties().get(&name) {
            fingerprint.push(value.to_string());
        }

        fingerprint
    })
}

/**
Group events by template and several property values.
*/
pub fn by_properties<I, S>(names: I) -> Fingerprinter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names = names.into_iter().map(Into::into).collect::<Vec<_>>();

    Arc::new(move |event: &LogEvent| {
        let mut fingerprint = vec![event.template().to_owned()];

        for name in &names {
            if let Some(value) = event.properties().get(name) {
                fingerprint.push(value.to_string());
            }
        }

        fingerprint
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::{Timestamp, Value};

    fn test_event() -> LogEvent {
        LogEvent::new(
            Timestamp::new(Duration::from_secs(0)),
            Level::Error,
            "query {Table} failed",
        )
        .with("Table", "orders")
    }

    #[test]
    fn by_template_uses_the_raw_template() {
        let fingerprint = by_template()(&test_event());

        assert_eq!(vec!["query {Table} failed".to_owned()], fingerprint);
    }

    #[test]
    fn by_error_type_appends_the_error_kind() {
        let err = "x".parse::<i32>().unwrap_err();
        let event = test_event().with("error", Value::capture_error(&err));

        let fingerprint = by_error_type()(&event);

        assert_eq!(
            vec![
                "query {Table} failed".to_owned(),
                "core::num::error::ParseIntError".to_owned(),
            ],
            fingerprint
        );
    }

    #[test]
    fn by_property_appends_the_value() {
        let fingerprint = by_property("Table")(&test_event());

        assert_eq!(
            vec!["query {Table} failed".to_owned(), "orders".to_owned()],
            fingerprint
        );
    }

    #[test]
    fn builder_rejects_invalid_rates() {
        assert!(crate::new("dsn").sample_rate(1.5).spawn(NullClient).is_err());
        assert!(crate::new("dsn").retry_jitter(-0.1).spawn(NullClient).is_err());
        assert!(crate::new("dsn")
            .max_retries(3)
            .spawn(NullClient)
            .is_err());
    }

    #[test]
    fn builder_clamps_batch_parameters() {
        let builder = crate::new("dsn")
            .batch_size(0)
            .batch_timeout(Duration::from_millis(1));

        assert_eq!(1, builder.batch_size);
        assert_eq!(MIN_BATCH_TIMEOUT, builder.batch_timeout);
    }

    struct NullClient;

    impl Client for NullClient {
        fn capture(&self, _: &OutboundEvent) -> Option<crate::EventId> {
            None
        }

        fn flush(&self, _: Duration) -> bool {
            true
        }
    }
}
