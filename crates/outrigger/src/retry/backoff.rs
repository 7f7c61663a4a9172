//! Exponential backoff with jitter and elapsed-time bounds.

use std::time::{Duration, Instant};

use rand::Rng;

/// Configuration for exponential backoff between retry attempts.
///
/// # Interval Calculation
///
/// Each call to [`Backoff::next`] yields
/// `min(interval, max_interval) ± uniform(max_jitter)` (never negative) and
/// then advances `interval = min(interval * multiplier, max_interval)`.
///
/// With defaults (initial=100ms, multiplier=2.0, max=500ms):
/// - Attempt 1: ~100ms
/// - Attempt 2: ~200ms
/// - Attempt 3: ~400ms (then stop)
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use outrigger::retry::BackoffConfig;
///
/// let config = BackoffConfig::default();
/// assert_eq!(config.max_attempts, 3);
///
/// // Custom policy for a patient caller
/// let patient = BackoffConfig {
///     max_attempts: 10,
///     initial_interval: Duration::from_millis(250),
///     max_interval: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Interval before the first retry. Default: 100ms.
    pub initial_interval: Duration,

    /// Growth factor applied to the interval after each attempt.
    ///
    /// Default: 2.0.
    pub multiplier: f64,

    /// Upper bound on the un-jittered interval. Default: 500ms.
    pub max_interval: Duration,

    /// Maximum number of intervals handed out before stopping.
    ///
    /// Default: 3.
    pub max_attempts: u32,

    /// Wall-clock budget measured from the first [`Backoff::next`] call.
    ///
    /// Once exceeded, [`Backoff::next`] stops even if attempts remain.
    /// Default: 30 seconds.
    pub max_elapsed: Duration,

    /// Half-width of the uniform jitter window applied to each interval.
    ///
    /// Set to zero for deterministic intervals. Default: 30ms.
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            multiplier: 2.0,
            max_interval: Duration::from_millis(500),
            max_attempts: 3,
            max_elapsed: Duration::from_secs(30),
            max_jitter: Duration::from_millis(30),
        }
    }
}

impl BackoffConfig {
    /// A fixed-delay configuration: `attempts` intervals of exactly `delay`.
    ///
    /// No growth, no jitter, and an effectively unbounded elapsed budget;
    /// the attempt count alone decides when to stop.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            initial_interval: delay,
            multiplier: 1.0,
            max_interval: delay,
            max_attempts: attempts,
            max_elapsed: Duration::MAX,
            max_jitter: Duration::ZERO,
        }
    }
}

/// Backoff state for one retry loop.
///
/// Construct a fresh `Backoff` per loop; attempt counters and the elapsed
/// clock are owned by the value and never shared across invocations.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    interval: Duration,
    attempts: u32,
    started_at: Option<Instant>,
}

impl Backoff {
    /// Create backoff state from a configuration.
    pub fn new(config: BackoffConfig) -> Self {
        let interval = config.initial_interval;
        Self {
            config,
            interval,
            attempts: 0,
            started_at: None,
        }
    }

    /// Produce the next sleep interval, or `None` to stop retrying.
    ///
    /// Stops when the attempt count reaches `max_attempts` or when the
    /// wall-clock time since the first call exceeds `max_elapsed`.
    pub fn next(&mut self) -> Option<Duration> {
        let started_at = *self.started_at.get_or_insert_with(Instant::now);

        if self.attempts >= self.config.max_attempts {
            return None;
        }

        let interval = jittered(
            self.interval.min(self.config.max_interval),
            self.config.max_jitter,
        );

        self.attempts += 1;
        let grown = self.interval.as_secs_f64() * self.config.multiplier;
        self.interval = if grown.is_finite() {
            Duration::try_from_secs_f64(grown).unwrap_or(self.config.max_interval)
        } else {
            self.config.max_interval
        }
        .min(self.config.max_interval);

        if started_at.elapsed() > self.config.max_elapsed {
            return None;
        }

        Some(interval)
    }

    /// Number of intervals handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Apply uniform jitter in `[-max_jitter, +max_jitter]`, clamped at zero.
fn jittered(interval: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return interval;
    }

    let window = max_jitter.as_nanos() as i128;
    let offset = rand::rng().random_range(-window..=window);
    let nanos = interval.as_nanos() as i128 + offset;

    match u64::try_from(nanos) {
        Ok(nanos) => Duration::from_nanos(nanos),
        Err(_) if nanos <= 0 => Duration::ZERO,
        Err(_) => interval,
    }
}
