/*!
Batch processing infrastructure for `faultline`.

A [`bounded`] channel buffers items on the caller's thread and hands
them to a single worker in batches. The worker wakes when the pending
count reaches the batch size, when the batch timeout elapses, or when
the channel closes; whichever fires, it swaps the pending batch for an
empty one under the lock and processes it outside the lock.

[`Backoff`] computes the retry delays used when a processed item has to
be resubmitted: exponential in the attempt number, spread by a jitter
factor, and capped at [`MAX_DELAY`].
*/

use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use rand::Rng as _;

use crate::internal_metrics::InternalMetrics;

mod internal_metrics;

pub mod sync;

pub use internal_metrics::ChannelMetrics;

type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/**
A buffer of items the channel batches into.
*/
pub trait Channel {
    type Item;

    fn new() -> Self;

    fn with_capacity(capacity: usize) -> Self
    where
        Self: Sized,
    {
        let _ = capacity;

        Self::new()
    }

    fn push(&mut self, item: Self::Item);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

impl<T> Channel for Vec<T> {
    type Item = T;

    fn new() -> Self {
        Vec::new()
    }

    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    fn push(&mut self, item: Self::Item) {
        self.push(item);
    }

    fn len(&self) -> usize {
        self.len()
    }

    fn is_empty(&self) -> bool {
        self.is_empty()
    }

    fn clear(&mut self) {
        self.clear()
    }
}

/**
Create a channel for a worker to process batches of items through.

`batch_size` is the pending count that triggers an early flush;
`batch_timeout` is how long the worker waits before flushing whatever
is pending. `max_capacity` bounds the pending buffer between flushes:
past it the buffer is cleared rather than grown, which keeps a stalled
destination from taking the process down with it.
*/
pub fn bounded<T: Channel>(
    max_capacity: usize,
    batch_size: usize,
    batch_timeout: Duration,
) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        metrics: Default::default(),
        state: Mutex::new(State {
            next_batch: Batch::new(),
            is_open: true,
            is_in_batch: false,
            flush_requested: false,
        }),
        wake: Condvar::new(),
    });

    (
        Sender {
            max_capacity,
            batch_size,
            shared: shared.clone(),
        },
        Receiver {
            batch_size,
            batch_timeout,
            shared,
        },
    )
}

/**
The producer half of the channel. Cheap to call from any thread.
*/
pub struct Sender<T> {
    max_capacity: usize,
    batch_size: usize,
    shared: Arc<Shared<T>>,
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().is_open = false;
        self.shared.wake.notify_all();
    }
}

impl<T: Channel> Sender<T> {
    /**
    Push an item onto the pending batch.

    If the pending count reaches the batch size the worker is signalled
    to flush without waiting for its timeout.
    */
    pub fn send(&self, msg: T::Item) {
        let mut state = self.shared.state.lock().unwrap();

        // If the channel is full then drop its contents; this prevents
        // OOMing when the destination is unavailable. The clearing is
        // opaque to outside observers so no watchers are notified
        if state.next_batch.channel.len() >= self.max_capacity {
            state.next_batch.channel.clear();
            self.shared.metrics.queue_overflow.increment();
        }

        // If the channel is closed then return without adding the message
        if !state.is_open {
            return;
        }

        state.next_batch.channel.push(msg);

        if state.next_batch.channel.len() >= self.batch_size && !state.flush_requested {
            state.flush_requested = true;
            self.shared.wake.notify_one();
        }
    }

    /**
    Run `watcher` once the batch that is currently pending (or in
    flight) has been processed.

    If there's nothing pending the watcher runs immediately.
    */
    pub fn on_next_flush(&self, watcher: impl FnOnce() + Send + 'static) {
        let watcher = Box::new(watcher);

        let mut state = self.shared.state.lock().unwrap();

        // If:
        // - We're not in a batch and
        //   - the next batch is empty (there's no data) or
        //   - the state is closed
        // Then:
        // - Call the watcher without scheduling it; there's nothing to wait for
        if !state.is_in_batch && (state.next_batch.channel.is_empty() || !state.is_open) {
            // Drop the lock before signalling the watcher
            drop(state);

            watcher();
        }
        // If there's active data to flush then schedule the watcher
        // and wake the worker so it doesn't sit out its timeout first
        else {
            state.next_batch.watchers.push(watcher);

            if !state.flush_requested {
                state.flush_requested = true;
                self.shared.wake.notify_one();
            }
        }
    }

    pub fn sample_metrics(&self) -> ChannelMetrics {
        self.shared.sample_metrics()
    }
}

/**
The worker half of the channel.
*/
pub struct Receiver<T> {
    batch_size: usize,
    batch_timeout: Duration,
    shared: Arc<Shared<T>>,
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().is_open = false;
        self.shared.wake.notify_all();
    }
}

impl<T: Channel> Receiver<T> {
    /**
    Run the worker loop on the calling thread until the channel closes.

    Each non-empty batch is handed to `on_batch` outside the channel
    lock. A flush triggered by the batch-size signal re-bases the idle
    timeout; one triggered by the timeout itself keeps the timer's
    cadence. After the channel closes any remaining items are drained
    through `on_batch` before this returns.
    */
    pub fn blocking_exec(self, mut on_batch: impl FnMut(T) -> Result<(), Error>) {
        // This variable holds the "next" batch
        // Under the lock all we do is push onto a pre-allocated buffer
        // and replace it with another pre-allocated one
        let mut next_batch = Batch::new();
        let mut deadline = Instant::now() + self.batch_timeout;

        loop {
            // Run inside the lock
            let (current_batch, is_open, was_signalled) = {
                let mut state = self.shared.state.lock().unwrap();

                loop {
                    if !state.is_open || state.flush_requested {
                        break;
                    }

                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }

                    let (next, _) = self
                        .shared
                        .wake
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = next;
                }

                let was_signalled = mem::replace(&mut state.flush_requested, false);

                // NOTE: We don't bail out when closed here because we want
                // a chance to emit any last batch

                // If there are events then mark that we're in a batch and replace it with an empty one
                // The sender will start filling this new batch
                if state.next_batch.channel.len() > 0 {
                    state.is_in_batch = true;

                    (
                        mem::replace(&mut state.next_batch, mem::take(&mut next_batch)),
                        state.is_open,
                        was_signalled,
                    )
                }
                // If there are no events to emit then mark that we're outside of a batch and take its watchers
                else {
                    state.is_in_batch = false;

                    let watchers = mem::take(&mut state.next_batch.watchers);

                    (
                        Batch {
                            channel: T::new(),
                            watchers,
                        },
                        state.is_open,
                        was_signalled,
                    )
                }
            };

            // A signalled flush re-bases the idle interval; a timer flush
            // stays on its cadence
            let now = Instant::now();
            if was_signalled {
                deadline = now + self.batch_timeout;
            } else if now >= deadline {
                deadline += self.batch_timeout;
                if deadline <= now {
                    deadline = now + self.batch_timeout;
                }
            }

            // Run outside of the lock
            let Batch { channel, watchers } = current_batch;

            if channel.len() > 0 {
                // Re-allocate our next buffer outside of the lock
                next_batch = Batch {
                    channel: T::with_capacity(self.batch_size),
                    watchers: Watchers::new(),
                };

                // Emit the batch, taking care not to panic
                match panic::catch_unwind(AssertUnwindSafe(|| on_batch(channel))) {
                    Ok(Ok(())) => {
                        self.shared.metrics.queue_batch_processed.increment();
                    }
                    Ok(Err(_)) => {
                        self.shared.metrics.queue_batch_failed.increment();
                    }
                    Err(_) => {
                        self.shared.metrics.queue_batch_panicked.increment();
                    }
                }

                // After the batch has been emitted, notify any watchers
                watchers.notify();
            }
            // If the batch was empty then notify any watchers (there was
            // nothing to flush) and exit if the channel has closed
            else {
                watchers.notify();

                if !is_open {
                    return;
                }
            }
        }
    }

    pub fn sample_metrics(&self) -> ChannelMetrics {
        self.shared.sample_metrics()
    }
}

/**
The ceiling on any computed retry delay.
*/
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/**
Exponential backoff with jitter for retried submissions.

The delay for attempt `n` is `base · 2^n`, spread by a uniform factor in
`[1 - jitter, 1 + jitter]`, and capped at [`MAX_DELAY`]. A jitter of `0`
gives pure exponential backoff.
*/
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, jitter: f64) -> Self {
        Backoff {
            base,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.base.as_secs_f64() * 2f64.powi(attempt.min(i32::MAX as u32) as i32);

        if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            delay *= 1.0 + spread;
        }

        if !delay.is_finite() || delay >= MAX_DELAY.as_secs_f64() {
            return MAX_DELAY;
        }

        Duration::from_secs_f64(delay.max(0.0))
    }
}

struct Shared<T> {
    metrics: InternalMetrics,
    state: Mutex<State<T>>,
    wake: Condvar,
}

impl<T: Channel> Shared<T> {
    fn sample_metrics(&self) -> ChannelMetrics {
        let queue_length = self.state.lock().unwrap().next_batch.channel.len();

        self.metrics.sample(queue_length)
    }
}

struct State<T> {
    next_batch: Batch<T>,
    is_open: bool,
    is_in_batch: bool,
    flush_requested: bool,
}

struct Batch<T> {
    channel: T,
    watchers: Watchers,
}

impl<T: Channel> Batch<T> {
    fn new() -> Self {
        Batch {
            channel: T::new(),
            watchers: Watchers::new(),
        }
    }
}

impl<T: Channel> Default for Batch<T> {
    fn default() -> Self {
        Batch::new()
    }
}

struct Watchers(Vec<Watcher>);

type Watcher = Box<dyn FnOnce() + Send>;

impl Default for Watchers {
    fn default() -> Self {
        Watchers::new()
    }
}

impl Watchers {
    fn new() -> Self {
        Watchers(Vec::new())
    }

    fn push(&mut self, watcher: Watcher) {
        self.0.push(watcher);
    }

    fn notify(self) {
        for watcher in self.0 {
            let _ = panic::catch_unwind(AssertUnwindSafe(watcher));
        }
    }
}
