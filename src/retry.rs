//! Fixed-delay retry policy shared by schema verification and table retries.

use std::{
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts including the first one; `0` behaves like `1`.
    pub max_attempts: u32,
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,
    /// Extra random delay as a fraction of `delay`, clamped to `0.0..=1.0`.
    #[serde(default)]
    pub jitter: f64,
}

impl BackoffPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            jitter: 0.0,
        }
    }

    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || self.delay.is_zero() {
            return self.delay;
        }
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()))
            .unwrap_or_default();
        let mixed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(u64::from(attempt).wrapping_mul(0x9E3779B97F4A7C15));
        let unit = (mixed % 1_000_000) as f64 / 1e6;
        self.delay + self.delay.mul_f64(jitter * unit)
    }

    /// Calls `op` with the 1-based attempt number until `done` accepts its
    /// output or the attempts run out. Returns the last output and the number
    /// of attempts made.
    pub fn retry_until<T>(
        &self,
        label: &str,
        mut op: impl FnMut(u32) -> T,
        mut done: impl FnMut(&T) -> bool,
    ) -> (T, u32) {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            let output = op(attempt);
            if attempt >= attempts || done(&output) {
                return (output, attempt);
            }
            let pause = self.delay_for(attempt);
            debug!("{label}: attempt {attempt}/{attempts} not done, retrying in {pause:?}");
            if !pause.is_zero() {
                thread::sleep(pause);
            }
            attempt += 1;
        }
    }

    pub fn retry<T, E>(&self, label: &str, op: impl FnMut(u32) -> Result<T, E>) -> Result<T, E> {
        self.retry_until(label, op, Result::is_ok).0
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2_000))
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
