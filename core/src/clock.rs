use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::timestamp::Timestamp;

/**
A source of the current time.

Everything time-driven in the adapter (breadcrumb age eviction, sampling
windows, adaptive adjustment) reads through this trait so tests can run
against a [`ManualClock`] instead of sleeping.
*/
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

impl<'a, T: Clock + ?Sized> Clock for &'a T {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/**
The system wall clock.
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(
            std::time::SystemTime::UNIX_EPOCH
                .elapsed()
                .unwrap_or_default(),
        )
    }
}

/**
A clock that only moves when told to. For tests.
*/
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            nanos: AtomicU64::new(start.as_unix_time().as_nanos() as u64),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Timestamp) {
        self.nanos
            .store(to.as_unix_time().as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(Duration::from_nanos(self.nanos.load(Ordering::SeqCst)))
    }
}
