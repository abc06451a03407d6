use core::fmt;
use std::{env, time::Duration};

use rand::Rng as _;

use crate::{event::OutboundEvent, Error};

/**
The environment variable consulted for a DSN when none is passed to
[`crate::new`].
*/
pub const DSN_ENV: &str = "FAULTLINE_DSN";

/**
The id the remote service assigned to a captured event.
*/
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u128);

impl EventId {
    pub fn new(id: u128) -> Self {
        EventId(id)
    }

    pub fn random() -> Self {
        EventId(rand::thread_rng().gen())
    }

    pub fn to_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/**
The transport that actually talks to the remote service.

The sink is transport-agnostic: it hands over fully-assembled
[`OutboundEvent`]s one at a time and interprets a `None` capture id as a
failed submission (retried per the sink's retry configuration). The
worker thread is the only caller of [`Client::capture`].
*/
pub trait Client: Send + Sync + 'static {
    /**
    Submit one event. `None` means the submission failed.
    */
    fn capture(&self, event: &OutboundEvent) -> Option<EventId>;

    /**
    Block until buffered submissions are delivered, or `timeout` elapses.

    Returns `false` if the timeout elapsed first.
    */
    fn flush(&self, timeout: Duration) -> bool;
}

/**
What a transport needs to connect, derived from the
[`crate::Builder`]'s configuration by [`crate::Builder::client_options`].
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub dsn: String,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub server_name: Option<String>,
    pub sample_rate: f64,
    pub attach_stacktrace: bool,
}

pub(crate) fn resolve_dsn(dsn: &str) -> Result<String, Error> {
    if !dsn.is_empty() {
        return Ok(dsn.to_owned());
    }

    match env::var(DSN_ENV) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::msg(format!(
            "no DSN provided and {} is not set",
            DSN_ENV
        ))),
    }
}
