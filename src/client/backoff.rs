use std::time::Duration;

/// Exponential backoff for connection attempts.
///
/// The delay before attempt `k` (counting from 0) is
/// `min * factor^k`, plus, when `random` is set, a uniformly drawn share of
/// the gap up to `min * factor^(k+1)`. The result is capped at `max_delay`
/// and truncated to whole milliseconds. Because the jitter never exceeds the
/// gap to the next step, the schedule keeps increasing until it reaches the
/// cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    /// `None` retries forever.
    pub retries: Option<u32>,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub random: bool,
}

impl RetryOptions {
    /// Policy used until the first successful CONNACK.
    pub fn connect_defaults() -> Self {
        Self {
            retries: None,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            factor: 1.1,
            random: false,
        }
    }

    /// Policy used after the client has been connected at least once.
    pub fn reconnect_defaults() -> Self {
        Self {
            retries: None,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            factor: 1.1,
            random: true,
        }
    }

    /// Delay before `attempt`, or `None` once the retry limit is reached.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        self.delay_with(attempt, rand::random::<f64>())
    }

    /// Same as [`delay`](Self::delay) with the random draw supplied.
    /// `unit` must lie in `[0, 1)`.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Option<Duration> {
        if self.retries.is_some_and(|retries| attempt >= retries) {
            return None;
        }

        let min = self.min_delay.as_millis() as f64;
        let max = self.max_delay.as_millis() as f64;
        let this_delay = min * self.factor.powf(f64::from(attempt));
        let next_delay = min * self.factor.powf(f64::from(attempt) + 1.0);
        let jitter = if self.random {
            (next_delay - this_delay) * unit
        } else {
            0.0
        };

        let delay = (this_delay + jitter).min(max).floor();
        Some(Duration::from_millis(delay as u64))
    }
}
