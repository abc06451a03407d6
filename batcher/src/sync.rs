/*!
Blocking flush support for synchronous callers.
*/

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use crate::{Channel, Sender};

#[derive(Clone)]
struct Trigger(Arc<(Mutex<bool>, Condvar)>);

impl Trigger {
    pub fn new() -> Self {
        Trigger(Arc::new((Mutex::new(false), Condvar::new())))
    }

    pub fn trigger(self) {
        *(self.0).0.lock().unwrap() = true;
        (self.0).1.notify_all();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flushed = (self.0).0.lock().unwrap();
        while !*flushed {
            match (self.0).1.wait_timeout(flushed, timeout).unwrap() {
                (next_flushed, r) if !r.timed_out() => {
                    flushed = next_flushed;
                    continue;
                }
                _ => return false,
            }
        }

        true
    }
}

/**
Wait for the items pending at the point of this call to be processed.

Returns `true` if the flush completed within `timeout`, `false` if the
timeout elapsed first.
*/
pub fn blocking_flush<T: Channel>(sender: &Sender<T>, timeout: Duration) -> bool {
    let on_flush = Trigger::new();

    sender.on_next_flush({
        let on_flush = on_flush.clone();

        move || {
            on_flush.trigger();
        }
    });

    on_flush.wait_timeout(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn blocking_flush_waits_for_pending_items() {
        let (sender, receiver) = crate::bounded::<Vec<u32>>(1_000, 100, Duration::from_secs(60));

        let handle = thread::spawn(move || {
            receiver.blocking_exec(|_| Ok(()));
        });

        sender.send(1);
        sender.send(2);

        assert!(blocking_flush(&sender, Duration::from_secs(5)));
        assert_eq!(0, sender.sample_metrics().queue_length);

        drop(sender);
        handle.join().unwrap();
    }

    #[test]
    fn blocking_flush_returns_immediately_when_idle() {
        let (sender, receiver) = crate::bounded::<Vec<u32>>(1_000, 100, Duration::from_secs(60));

        assert!(blocking_flush(&sender, Duration::from_millis(10)));

        drop(receiver);
    }
}
