use std::{env, ops::RangeInclusive, time::Duration};
use tracing::warn;

/// Timing used by the poll engine for one extension kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitParams {
    pub interval: Duration,
    pub severe_threshold: Duration,
    pub timeout: Duration,
}

impl WaitParams {
    pub fn new(interval: Duration, severe_threshold: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            severe_threshold,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for WaitParams {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            severe_threshold: Duration::from_secs(30),
            timeout: Duration::from_secs(3 * 60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub poll_interval: Duration,
    pub severe_threshold: Duration,
    pub default_timeout: Duration,
    pub infrastructure_timeout: Duration,
    pub controlplane_timeout: Duration,
    pub containerruntime_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: seconds_from_env("EXTENSION_POLL_INTERVAL_SECONDS", 5, 1..=MAX_SECONDS),
            severe_threshold: seconds_from_env("EXTENSION_SEVERE_THRESHOLD_SECONDS", 30, 0..=MAX_SECONDS),
            default_timeout: seconds_from_env("EXTENSION_DEFAULT_TIMEOUT_SECONDS", 180, 1..=MAX_SECONDS),
            infrastructure_timeout: seconds_from_env("INFRASTRUCTURE_TIMEOUT_SECONDS", 600, 1..=MAX_SECONDS),
            controlplane_timeout: seconds_from_env("CONTROLPLANE_TIMEOUT_SECONDS", 180, 1..=MAX_SECONDS),
            containerruntime_timeout: seconds_from_env("CONTAINERRUNTIME_TIMEOUT_SECONDS", 180, 1..=MAX_SECONDS),
        }
    }
}

impl Config {
    pub fn wait_params(&self) -> WaitParams {
        WaitParams::new(self.poll_interval, self.severe_threshold, self.default_timeout)
    }

    // Infrastructure provisioning is the slow one, everything else shares the short timeout
    pub fn infrastructure(&self) -> WaitParams {
        self.wait_params().with_timeout(self.infrastructure_timeout)
    }

    pub fn controlplane(&self) -> WaitParams {
        self.wait_params().with_timeout(self.controlplane_timeout)
    }

    pub fn containerruntime(&self) -> WaitParams {
        self.wait_params().with_timeout(self.containerruntime_timeout)
    }
}

// One week
const MAX_SECONDS: u64 = 7 * 24 * 60 * 60;

// Source the variable from the env - use default if not set or not a number, clamp to `range`
fn seconds_from_env(var: &str, default: u64, range: RangeInclusive<u64>) -> Duration {
    let seconds = match env::var(var) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} is set to {:?}, which is not a number of seconds, using {}", var, value, default);
            default
        }),
        Err(_) => default,
    };
    let clamped = seconds.clamp(*range.start(), *range.end());
    if clamped != seconds {
        warn!("{} is set to {}, which is outside {:?}, using {}", var, seconds, range, clamped);
    }
    Duration::from_secs(clamped)
}
