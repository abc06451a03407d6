/*!
Batched, sampled delivery of structured log events to an error-tracking
service.

`faultline` sits between a structured-logging pipeline and a remote
error tracker. Log events at or above a severity threshold become
tracked events — sampled, converted, batched, and submitted with retry —
while lower-severity events are retained as breadcrumbs and attached to
later events as the context that led up to them.

# Getting started

Add `faultline` to your `Cargo.toml`:

```toml
[dependencies.faultline]
version = "0.4.1"
```

Configure a sink over your transport and feed it events:

```no_run
# fn build_client(_: &faultline::ClientOptions) -> Result<MyClient, faultline::Error> { unimplemented!() }
# struct MyClient;
# impl faultline::Client for MyClient {
#     fn capture(&self, _: &faultline::OutboundEvent) -> Option<faultline::EventId> { None }
#     fn flush(&self, _: std::time::Duration) -> bool { true }
# }
use faultline::{Level, LogEvent, SystemClock, Clock as _};

fn main() -> Result<(), faultline::Error> {
    let builder = faultline::new("https://key@ingest.example/1")
        .environment("production")
        .sampling_profile(faultline::SamplingProfile::Production);

    let client = build_client(&builder.client_options()?)?;
    let sink = builder.spawn(client)?;

    sink.emit(
        &LogEvent::new(SystemClock.now(), Level::Error, "payment {OrderId} failed")
            .with("OrderId", "o-42"),
    );

    sink.close()
}
```

The DSN may be omitted from [`new`] if the `FAULTLINE_DSN` environment
variable is set; construction fails when neither is present.

# Volume control

High-rate services rarely want every event delivered. The
[`SamplingConfig`] strategies thin the stream before it reaches the
batch queue: fixed thinning, an adaptive controller chasing a target
events-per-second, priority boosts for events carrying errors or user
context, burst clamping, per-fingerprint group quotas, or a custom
predicate. See [`SamplingProfile`] for ready-made combinations.

# What the worker does

A single background thread drains the batch queue whenever the batch
fills or the batch timeout elapses. At flush time each event picks up a
snapshot of the breadcrumb ring and the ambient [`Scope`] enrichment,
runs the `before_send` hook, and is submitted through the [`Client`]
with exponential-backoff retry if configured. Submission failures never
reach the logging caller; they are retried, counted, and self-logged.
*/

use core::fmt;

mod breadcrumbs;
mod cache;
mod client;
mod event;
mod metrics;
mod options;
mod sampling;
mod scope;
mod sink;
mod stacktrace;
mod trace;

pub use self::{
    breadcrumbs::BreadcrumbRing,
    cache::StacktraceCache,
    client::{Client, ClientOptions, EventId, DSN_ENV},
    event::{
        Breadcrumb, Exception, OutboundEvent, OutboundLevel, User, TAG_MESSAGE_TEMPLATE,
    },
    metrics::Metrics,
    options::{
        by_error_type, by_properties, by_property, by_template, BeforeSend, Builder,
        Fingerprinter, MetricsCallback,
    },
    sampling::{
        CustomSampler, Sampler, SamplerStats, SamplingConfig, SamplingProfile, SamplingStrategy,
    },
    scope::{Scope, ScopeGuard},
    sink::Sink,
    stacktrace::{Frame, Stacktrace},
    trace::{start_span, start_transaction, SpanId, TraceContext, TraceId},
};

pub use faultline_core::{
    Clock, ErrorValue, Level, LogEvent, ManualClock, Properties, SystemClock, Timestamp, Value,
};

/**
An error configuring or closing a [`Sink`].

Runtime submission failures never surface here; they are retried,
counted, and self-logged instead.
*/
pub struct Error(Box<dyn std::error::Error + Send + Sync>);

impl Error {
    pub(crate) fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error(err.into())
    }

    pub(crate) fn msg(msg: impl Into<String>) -> Self {
        Error::new(msg.into())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/**
Create a builder for a [`Sink`].

`dsn` identifies the remote project to report into; pass an empty
string to fall back to the `FAULTLINE_DSN` environment variable. The
builder carries every configuration option with production defaults;
call [`Builder::spawn`] with a transport to start the sink.
*/
pub fn new(dsn: impl Into<String>) -> Builder {
    Builder::new(dsn)
}
