/*!
Admission control for the event path.

Every tracked event gets a boolean admission decision before it is
converted and batched. The strategies trade recall for volume in
different ways: fixed thins uniformly, adaptive chases a target
events-per-second, priority favours the events most likely to matter,
and burst clamps down hard when traffic spikes. Group
sampling is orthogonal: an independent per-fingerprint quota applied
after the strategy admits.

All counters are lock-free; the group map is a concurrent map with
insert-if-absent. The sampler never fails — a missing custom predicate
falls back to fixed sampling.
*/

use core::fmt;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use rand::Rng as _;

use faultline_core::{Clock, Level, LogEvent, SystemClock};

// Adaptive rates are stored as `rate * 10_000` in a u32
const RATE_SCALE: f32 = 10_000.0;

const ADAPTIVE_INTERVAL_SECS: i64 = 10;
const MIN_ADAPTIVE_RATE: f32 = 0.01;

const BURST_WINDOW_SECS: i64 = 1;
const BURST_BACKOFF_SECS: i64 = 10;
const BURST_SAMPLE_RATE: f32 = 0.05;
const BACKOFF_SAMPLE_RATE: f32 = 0.1;

/**
How the sampler decides which events to admit.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingStrategy {
    /**
    No sampling; every event is admitted.
    */
    Off,
    /**
    Admit every ⌊1/rate⌋-th event.
    */
    Fixed,
    /**
    Adjust the rate every ten seconds to chase a target events/sec.
    */
    Adaptive,
    /**
    Boost the rate for events carrying errors or user context; always
    admit fatals.
    */
    Priority,
    /**
    Throttle hard for ten seconds whenever traffic exceeds a
    per-second threshold.
    */
    Burst,
    /**
    Delegate to a user predicate.
    */
    Custom,
}

/**
A user predicate for [`SamplingStrategy::Custom`].
*/
pub type CustomSampler = Arc<dyn Fn(&LogEvent) -> bool + Send + Sync>;

/**
Configuration for the [`Sampler`].
*/
#[derive(Clone)]
pub struct SamplingConfig {
    pub strategy: SamplingStrategy,
    /**
    Base admission probability for ordinary events, `0.0` to `1.0`.
    */
    pub rate: f32,
    /**
    Admission probability for error-level events.
    */
    pub error_rate: f32,
    /**
    Admission probability for fatal-level events.
    */
    pub fatal_rate: f32,
    /**
    Target events/sec for [`SamplingStrategy::Adaptive`].
    */
    pub adaptive_target_eps: u64,
    /**
    Events/sec threshold that trips [`SamplingStrategy::Burst`] mode.
    */
    pub burst_threshold: u64,
    pub custom_sampler: Option<CustomSampler>,
    /**
    Apply an independent per-fingerprint quota after the strategy
    admits.
    */
    pub group_sampling: bool,
    /**
    Maximum admissions per fingerprint per window.
    */
    pub group_sample_rate: u64,
    /**
    Length of the per-fingerprint window.
    */
    pub group_window: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            strategy: SamplingStrategy::Off,
            rate: 1.0,
            error_rate: 1.0,
            fatal_rate: 1.0,
            adaptive_target_eps: 100,
            burst_threshold: 1_000,
            custom_sampler: None,
            group_sampling: false,
            group_sample_rate: 10,
            group_window: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for SamplingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingConfig")
            .field("strategy", &self.strategy)
            .field("rate", &self.rate)
            .field("error_rate", &self.error_rate)
            .field("fatal_rate", &self.fatal_rate)
            .field("adaptive_target_eps", &self.adaptive_target_eps)
            .field("burst_threshold", &self.burst_threshold)
            .field("custom_sampler", &self.custom_sampler.as_ref().map(|_| ".."))
            .field("group_sampling", &self.group_sampling)
            .field("group_sample_rate", &self.group_sample_rate)
            .field("group_window", &self.group_window)
            .finish()
    }
}

/**
Predefined sampling configurations for common deployments.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingProfile {
    /**
    Everything through; sampling off.
    */
    Development,
    /**
    Adaptive at 10% base toward 100 events/sec, all errors and fatals,
    10-per-group-per-minute quotas.
    */
    Production,
    /**
    Burst-guarded 1% base, 10% of errors, all fatals,
    5-per-group-per-minute quotas.
    */
    HighVolume,
    /**
    Priority at 0.1% base, 1% of errors, all fatals.
    */
    Critical,
}

impl SamplingProfile {
    pub fn config(self) -> SamplingConfig {
        match self {
            SamplingProfile::Development => SamplingConfig {
                strategy: SamplingStrategy::Off,
                ..Default::default()
            },
            SamplingProfile::Production => SamplingConfig {
                strategy: SamplingStrategy::Adaptive,
                rate: 0.1,
                adaptive_target_eps: 100,
                group_sampling: true,
                group_sample_rate: 10,
                group_window: Duration::from_secs(60),
                ..Default::default()
            },
            SamplingProfile::HighVolume => SamplingConfig {
                strategy: SamplingStrategy::Burst,
                rate: 0.01,
                error_rate: 0.1,
                burst_threshold: 1_000,
                group_sampling: true,
                group_sample_rate: 5,
                group_window: Duration::from_secs(60),
                ..Default::default()
            },
            SamplingProfile::Critical => SamplingConfig {
                strategy: SamplingStrategy::Priority,
                rate: 0.001,
                error_rate: 0.01,
                ..Default::default()
            },
        }
    }
}

/**
A point-in-time view of the sampler's internal state.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerStats {
    pub strategy: SamplingStrategy,
    pub event_count: u64,
    pub adaptive_rate: Option<f32>,
    pub in_burst: Option<bool>,
    pub active_groups: usize,
}

/**
The admission decision-maker for the event path.
*/
pub struct Sampler {
    config: SamplingConfig,
    event_count: AtomicU64,
    last_reset: AtomicI64,
    adaptive_rate: AtomicU32,
    groups: DashMap<String, GroupCounter>,
    burst: Option<BurstDetector>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct GroupCounter {
    count: AtomicU64,
    window_start: AtomicI64,
}

struct BurstDetector {
    threshold: u64,
    events: AtomicU64,
    window_start: AtomicI64,
    in_burst: AtomicBool,
    backoff_until: AtomicI64,
}

impl Sampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SamplingConfig, clock: Arc<dyn Clock>) -> Self {
        let now = unix_secs(&*clock);

        let adaptive_rate = if config.strategy == SamplingStrategy::Adaptive {
            (config.rate * RATE_SCALE) as u32
        } else {
            0
        };

        let burst = (config.strategy == SamplingStrategy::Burst).then(|| BurstDetector {
            threshold: config.burst_threshold,
            events: AtomicU64::new(0),
            window_start: AtomicI64::new(now),
            in_burst: AtomicBool::new(false),
            backoff_until: AtomicI64::new(0),
        });

        Sampler {
            config,
            event_count: AtomicU64::new(0),
            last_reset: AtomicI64::new(now),
            adaptive_rate: AtomicU32::new(adaptive_rate),
            groups: DashMap::new(),
            burst,
            clock,
        }
    }

    /**
    Decide whether `event` is admitted to the event path.
    */
    pub fn should_sample(&self, event: &LogEvent) -> bool {
        if self.config.strategy == SamplingStrategy::Off {
            return true;
        }

        let rate = self.level_rate(event.level());

        match self.config.strategy {
            SamplingStrategy::Off => true,
            SamplingStrategy::Fixed => self.fixed_sample(rate),
            SamplingStrategy::Adaptive => self.adaptive_sample(rate),
            SamplingStrategy::Priority => self.priority_sample(event, rate),
            SamplingStrategy::Burst => self.burst_sample(rate),
            SamplingStrategy::Custom => match &self.config.custom_sampler {
                Some(custom) => custom(event),
                None => self.fixed_sample(rate),
            },
        }
    }

    /**
    Apply the per-fingerprint quota. Called after the strategy admits
    and after the fingerprint is computed.
    */
    pub fn group_sample(&self, fingerprint: &str) -> bool {
        if !self.config.group_sampling {
            return true;
        }

        let now = unix_secs(&*self.clock);
        let window_floor = now - self.config.group_window.as_secs() as i64;

        let counter = self
            .groups
            .entry(fingerprint.to_owned())
            .or_default();

        // A counter whose window has fully elapsed starts a fresh one
        if counter.window_start.load(Ordering::Acquire) < window_floor {
            counter.count.store(0, Ordering::Release);
            counter.window_start.store(now, Ordering::Release);
        }

        let count = counter.count.fetch_add(1, Ordering::AcqRel) + 1;

        count <= self.config.group_sample_rate
    }

    /**
    Clear all counters, group windows, and burst state.
    */
    pub fn reset(&self) {
        let now = unix_secs(&*self.clock);

        self.event_count.store(0, Ordering::Relaxed);
        self.last_reset.store(now, Ordering::Relaxed);
        self.groups.clear();

        if let Some(burst) = &self.burst {
            burst.events.store(0, Ordering::Relaxed);
            burst.window_start.store(now, Ordering::Relaxed);
            burst.in_burst.store(false, Ordering::Relaxed);
            burst.backoff_until.store(0, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            strategy: self.config.strategy,
            event_count: self.event_count.load(Ordering::Relaxed),
            adaptive_rate: (self.config.strategy == SamplingStrategy::Adaptive)
                .then(|| self.adaptive_rate.load(Ordering::Relaxed) as f32 / RATE_SCALE),
            in_burst: self
                .burst
                .as_ref()
                .map(|burst| burst.in_burst.load(Ordering::Relaxed)),
            active_groups: self.groups.len(),
        }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    fn level_rate(&self, level: Level) -> f32 {
        match level {
            Level::Fatal => self.config.fatal_rate,
            Level::Error => self.config.error_rate,
            _ => self.config.rate,
        }
    }

    fn fixed_sample(&self, rate: f32) -> bool {
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }

        let count = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;
        let threshold = (1.0 / rate) as u64;

        count % threshold == 0
    }

    fn adaptive_sample(&self, base_rate: f32) -> bool {
        self.event_count.fetch_add(1, Ordering::Relaxed);

        let now = unix_secs(&*self.clock);
        let last_reset = self.last_reset.load(Ordering::Relaxed);

        if now > last_reset {
            let elapsed = now - last_reset;

            if elapsed >= ADAPTIVE_INTERVAL_SECS {
                let count = self.event_count.load(Ordering::Relaxed);
                let current_eps = count / elapsed as u64;

                if current_eps > self.config.adaptive_target_eps {
                    // Too hot: cut the rate toward the target, with a floor
                    let new_rate = (self.config.adaptive_target_eps as f32
                        / current_eps as f32)
                        .max(MIN_ADAPTIVE_RATE);
                    self.adaptive_rate
                        .store((new_rate * RATE_SCALE) as u32, Ordering::Relaxed);
                } else {
                    // Cool enough: recover toward the base rate by 10% of the gap
                    let current_rate =
                        self.adaptive_rate.load(Ordering::Relaxed) as f32 / RATE_SCALE;
                    let new_rate = current_rate + (base_rate - current_rate) * 0.1;
                    self.adaptive_rate
                        .store((new_rate * RATE_SCALE) as u32, Ordering::Relaxed);
                }

                self.last_reset.store(now, Ordering::Relaxed);
                self.event_count.store(0, Ordering::Relaxed);
            }
        }

        let adaptive_rate = self.adaptive_rate.load(Ordering::Relaxed) as f32 / RATE_SCALE;

        rand::thread_rng().gen::<f32>() < adaptive_rate
    }

    fn priority_sample(&self, event: &LogEvent, rate: f32) -> bool {
        if event.level() == Level::Fatal {
            return true;
        }

        let mut priority = rate;

        if has_exception(event) {
            priority = (priority * 3.0).min(1.0);
        }

        if event.properties().contains("Error") {
            priority = (priority * 2.0).min(1.0);
        }

        if has_user(event) {
            priority = (priority * 1.5).min(1.0);
        }

        self.fixed_sample(priority)
    }

    fn burst_sample(&self, rate: f32) -> bool {
        let Some(burst) = &self.burst else {
            return self.fixed_sample(rate);
        };

        let now = unix_secs(&*self.clock);

        if now < burst.backoff_until.load(Ordering::Relaxed) {
            return self.fixed_sample(BACKOFF_SAMPLE_RATE);
        }

        let window_start = burst.window_start.load(Ordering::Relaxed);
        if now > window_start {
            let elapsed = now - window_start;

            if elapsed >= BURST_WINDOW_SECS {
                // Swap in 1 so the current event starts the next window
                let count = burst.events.swap(1, Ordering::Relaxed);
                let events_per_sec = count / elapsed as u64;

                burst.window_start.store(now, Ordering::Relaxed);

                if events_per_sec > burst.threshold {
                    burst.in_burst.store(true, Ordering::Relaxed);
                    burst
                        .backoff_until
                        .store(now + BURST_BACKOFF_SECS, Ordering::Relaxed);

                    return self.fixed_sample(BURST_SAMPLE_RATE);
                }

                burst.in_burst.store(false, Ordering::Relaxed);
            }
        } else {
            burst.events.fetch_add(1, Ordering::Relaxed);
        }

        if burst.in_burst.load(Ordering::Relaxed) {
            return self.fixed_sample(rate * BACKOFF_SAMPLE_RATE);
        }

        self.fixed_sample(rate)
    }
}

fn unix_secs(clock: &dyn Clock) -> i64 {
    clock.now().as_unix_time().as_secs() as i64
}

fn has_exception(event: &LogEvent) -> bool {
    ["error", "err", "Error"].iter().any(|key| {
        event
            .properties()
            .get(key)
            .map(|value| value.as_error().is_some())
            .unwrap_or(false)
    })
}

fn has_user(event: &LogEvent) -> bool {
    ["UserId", "User", "user"]
        .iter()
        .any(|key| event.properties().contains(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::{ManualClock, Timestamp, Value};

    fn event(level: Level) -> LogEvent {
        LogEvent::new(Timestamp::new(Duration::from_secs(0)), level, "test event")
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Timestamp::new(Duration::from_secs(1_000))))
    }

    #[test]
    fn off_admits_everything() {
        let sampler = Sampler::new(SamplingConfig::default());

        for _ in 0..100 {
            assert!(sampler.should_sample(&event(Level::Info)));
        }
    }

    #[test]
    fn fixed_admits_every_nth() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Fixed,
            rate: 0.1,
            error_rate: 0.1,
            fatal_rate: 0.1,
            ..Default::default()
        });

        let admitted = (0..1_000)
            .filter(|_| sampler.should_sample(&event(Level::Info)))
            .count();

        assert!((80..=120).contains(&admitted), "{}", admitted);
    }

    #[test]
    fn fixed_edge_rates() {
        let all = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Fixed,
            rate: 1.0,
            ..Default::default()
        });
        let none = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Fixed,
            rate: 0.0,
            error_rate: 0.0,
            fatal_rate: 0.0,
            ..Default::default()
        });

        assert!((0..50).all(|_| all.should_sample(&event(Level::Info))));
        assert!((0..50).all(|_| !none.should_sample(&event(Level::Info))));
    }

    #[test]
    fn level_rates_apply_before_strategy() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Fixed,
            rate: 0.0,
            error_rate: 1.0,
            fatal_rate: 1.0,
            ..Default::default()
        });

        assert!(!sampler.should_sample(&event(Level::Info)));
        assert!(sampler.should_sample(&event(Level::Error)));
        assert!(sampler.should_sample(&event(Level::Fatal)));
    }

    #[test]
    fn priority_always_admits_fatal() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Priority,
            rate: 0.0,
            error_rate: 0.0,
            fatal_rate: 0.0,
            ..Default::default()
        });

        assert!((0..50).all(|_| sampler.should_sample(&event(Level::Fatal))));
    }

    #[test]
    fn priority_boosts_saturate_at_one() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Priority,
            rate: 0.4,
            ..Default::default()
        });

        // 0.4 * 3 caps at 1.0, which fixed sampling always admits
        let err = "x".parse::<i32>().unwrap_err();
        let with_error = event(Level::Info).with("error", Value::capture_error(&err));

        assert!((0..50).all(|_| sampler.should_sample(&with_error)));
    }

    #[test]
    fn custom_predicate_decides() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Custom,
            custom_sampler: Some(Arc::new(|event: &LogEvent| {
                event.properties().contains("keep")
            })),
            ..Default::default()
        });

        assert!(sampler.should_sample(&event(Level::Info).with("keep", true)));
        assert!(!sampler.should_sample(&event(Level::Info)));
    }

    #[test]
    fn custom_without_predicate_falls_back_to_fixed() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Custom,
            rate: 1.0,
            ..Default::default()
        });

        assert!(sampler.should_sample(&event(Level::Info)));
    }

    #[test]
    fn group_quota_holds_per_fingerprint() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Off,
            group_sampling: true,
            group_sample_rate: 5,
            group_window: Duration::from_secs(60),
            ..Default::default()
        });

        for fingerprint in ["fp-a", "fp-b", "fp-c"] {
            let admitted = (0..20).filter(|_| sampler.group_sample(fingerprint)).count();

            assert_eq!(5, admitted, "{}", fingerprint);
        }

        assert_eq!(3, sampler.stats().active_groups);
    }

    #[test]
    fn group_window_resets_after_elapsing() {
        let clock = manual_clock();
        let sampler = Sampler::with_clock(
            SamplingConfig {
                strategy: SamplingStrategy::Off,
                group_sampling: true,
                group_sample_rate: 2,
                group_window: Duration::from_secs(60),
                ..Default::default()
            },
            clock.clone(),
        );

        assert!(sampler.group_sample("fp"));
        assert!(sampler.group_sample("fp"));
        assert!(!sampler.group_sample("fp"));

        clock.advance(Duration::from_secs(61));

        assert!(sampler.group_sample("fp"));
        assert!(sampler.group_sample("fp"));
        assert!(!sampler.group_sample("fp"));
    }

    #[test]
    fn adaptive_rate_tracks_target_under_load() {
        let clock = manual_clock();
        let sampler = Sampler::with_clock(
            SamplingConfig {
                strategy: SamplingStrategy::Adaptive,
                rate: 1.0,
                error_rate: 1.0,
                fatal_rate: 1.0,
                adaptive_target_eps: 10,
                ..Default::default()
            },
            clock.clone(),
        );

        // Drive 100 events/sec for 11 seconds, then trip the adjustment
        for _ in 0..1_100 {
            sampler.should_sample(&event(Level::Info));
        }
        clock.advance(Duration::from_secs(11));
        sampler.should_sample(&event(Level::Info));

        let rate = sampler.stats().adaptive_rate.unwrap();

        // ~1101 events over 11s is ~100 EPS against a target of 10, so
        // the adjusted rate lands near 0.1
        assert!((0.05..=0.2).contains(&rate), "{}", rate);
    }

    #[test]
    fn adaptive_rate_recovers_toward_base() {
        let clock = manual_clock();
        let sampler = Sampler::with_clock(
            SamplingConfig {
                strategy: SamplingStrategy::Adaptive,
                rate: 1.0,
                adaptive_target_eps: 1_000,
                ..Default::default()
            },
            clock.clone(),
        );

        // Force the rate down first
        sampler.adaptive_rate.store(1_000, Ordering::Relaxed); // 0.1

        clock.advance(Duration::from_secs(11));
        sampler.should_sample(&event(Level::Info));

        let rate = sampler.stats().adaptive_rate.unwrap();

        // One recovery step of 10% of the gap: 0.1 + 0.9 * 0.1
        assert!((0.18..=0.2).contains(&rate), "{}", rate);
    }

    #[test]
    fn burst_mode_trips_and_backs_off() {
        let clock = manual_clock();
        let sampler = Sampler::with_clock(
            SamplingConfig {
                strategy: SamplingStrategy::Burst,
                rate: 1.0,
                error_rate: 1.0,
                fatal_rate: 1.0,
                burst_threshold: 50,
                ..Default::default()
            },
            clock.clone(),
        );

        // Fill one window well past the threshold
        for _ in 0..200 {
            sampler.should_sample(&event(Level::Info));
        }

        clock.advance(Duration::from_secs(1));
        sampler.should_sample(&event(Level::Info));

        assert_eq!(Some(true), sampler.stats().in_burst);

        // During the backoff period admissions run at 10%
        let admitted = (0..1_000)
            .filter(|_| sampler.should_sample(&event(Level::Info)))
            .count();
        assert!((80..=120).contains(&admitted), "{}", admitted);

        // After the backoff the detector resumes normal sampling
        clock.advance(Duration::from_secs(BURST_BACKOFF_SECS as u64 + 1));
        sampler.should_sample(&event(Level::Info));
        clock.advance(Duration::from_secs(2));
        sampler.should_sample(&event(Level::Info));

        assert_eq!(Some(false), sampler.stats().in_burst);
    }

    #[test]
    fn reset_clears_state() {
        let sampler = Sampler::new(SamplingConfig {
            strategy: SamplingStrategy::Fixed,
            rate: 0.5,
            group_sampling: true,
            ..Default::default()
        });

        sampler.should_sample(&event(Level::Info));
        sampler.group_sample("fp");
        sampler.reset();

        let stats = sampler.stats();
        assert_eq!(0, stats.event_count);
        assert_eq!(0, stats.active_groups);
    }
}
