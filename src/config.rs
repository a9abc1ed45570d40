//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the nodevisor runtime.
//!
//! Config is consumed by [`RuntimeBuilder`](crate::RuntimeBuilder) and handed to
//! every loop it spawns (supervisor, delayed scheduler, status detector, router,
//! trigger monitors).
//!
//! ## Sources
//! - [`Config::default`] for embedded use and tests;
//! - [`Config::from_env`] reads `NODEVISOR_*` variables on top of the defaults.
//!
//! ## Sentinel values
//! - `grace = 0s` → do not wait for boot tasks on shutdown
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use tracing::warn;

/// Global configuration for the runtime.
///
/// ## Field semantics
/// - `tick`: period of the delayed-command scheduler and the status detector
/// - `retry_delay`: delay applied to `BootRequestedWithDelay` and connection-failure retries
/// - `grace`: maximum wait for boot tasks after shutdown is requested
/// - `bus_capacity`: ring buffer size of the ServiceEvent bus
/// - `workflow_tick`: period of the time-trigger monitor
/// - `trigger_poll`: idle poll period of the scheduled-trigger consumer
/// - `registry_capacity`: command queue capacity of the trigger registry actor
#[derive(Clone, Debug)]
pub struct Config {
    /// Tick period of the polling loops.
    pub tick: Duration,

    /// Standard restart delay.
    ///
    /// Used when a service body exits without the no-delay flag and when a boot
    /// connection fails.
    pub retry_delay: Duration,

    /// Maximum time to wait for boot tasks to exit after cancellation.
    pub grace: Duration,

    /// Capacity of the ServiceEvent broadcast channel.
    ///
    /// Subscribers lagging more than `bus_capacity` events skip the oldest ones.
    pub bus_capacity: usize,

    /// Period of the time-trigger monitor.
    pub workflow_tick: Duration,

    /// Idle poll period of the scheduled-trigger consumer.
    pub trigger_poll: Duration,

    /// Capacity of the trigger registry command queue.
    pub registry_capacity: usize,
}

impl Config {
    /// Builds a config from `NODEVISOR_*` environment variables.
    ///
    /// Durations are whole seconds. Missing variables keep their default;
    /// unparsable ones keep their default and log a warning.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `NODEVISOR_TICK_SECS` | `tick` |
    /// | `NODEVISOR_RETRY_DELAY_SECS` | `retry_delay` |
    /// | `NODEVISOR_GRACE_SECS` | `grace` |
    /// | `NODEVISOR_BUS_CAPACITY` | `bus_capacity` |
    /// | `NODEVISOR_WORKFLOW_TICK_SECS` | `workflow_tick` |
    /// | `NODEVISOR_TRIGGER_POLL_SECS` | `trigger_poll` |
    /// | `NODEVISOR_REGISTRY_CAPACITY` | `registry_capacity` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Config::default();
        let secs = |key: &str, fallback: Duration| {
            parse_or(&lookup, key, fallback.as_secs()).map_or(fallback, Duration::from_secs)
        };
        let count = |key: &str, fallback: usize| {
            parse_or(&lookup, key, fallback as u64).map_or(fallback, |v| v as usize)
        };
        Self {
            tick: secs("NODEVISOR_TICK_SECS", d.tick),
            retry_delay: secs("NODEVISOR_RETRY_DELAY_SECS", d.retry_delay),
            grace: secs("NODEVISOR_GRACE_SECS", d.grace),
            bus_capacity: count("NODEVISOR_BUS_CAPACITY", d.bus_capacity),
            workflow_tick: secs("NODEVISOR_WORKFLOW_TICK_SECS", d.workflow_tick),
            trigger_poll: secs("NODEVISOR_TRIGGER_POLL_SECS", d.trigger_poll),
            registry_capacity: count("NODEVISOR_REGISTRY_CAPACITY", d.registry_capacity),
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the registry queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn registry_capacity_clamped(&self) -> usize {
        self.registry_capacity.max(1)
    }

    /// Returns the retry delay in whole seconds, as carried by delayed commands.
    #[inline]
    pub fn retry_delay_secs(&self) -> u64 {
        self.retry_delay.as_secs()
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, fallback: u64) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, fallback, "ignoring invalid configuration value");
            None
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `tick = 1s`
    /// - `retry_delay = 60s`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - `workflow_tick = 10s`
    /// - `trigger_poll = 1s`
    /// - `registry_capacity = 256`
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            retry_delay: Duration::from_secs(60),
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            workflow_tick: Duration::from_secs(10),
            trigger_poll: Duration::from_secs(1),
            registry_capacity: 256,
        }
    }
}
