//! Dispatcher configuration.
//!
//! Environment overrides:
//! - `SLOTGATE_MAX_CONCURRENCY`: slot count, `1..=64`
//! - `SLOTGATE_FACILITY`: `pool` or `thread`

use std::num::NonZero;

use crate::error::{Error, Result};
use crate::executor::Facility;
use crate::signal::MAX_SIGNALS;

/// Upper bound on dispatcher capacity.
pub const MAX_CONCURRENCY: usize = MAX_SIGNALS;

pub const ENV_MAX_CONCURRENCY: &str = "SLOTGATE_MAX_CONCURRENCY";
pub const ENV_FACILITY: &str = "SLOTGATE_FACILITY";

/// Twice the logical core count, clamped into `1..=64`.
pub fn default_max_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(NonZero::get)
        .unwrap_or(1);
    cores.saturating_mul(2).clamp(1, MAX_CONCURRENCY)
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Slot count. `None` uses [`default_max_concurrency`].
    pub max_concurrency: Option<usize>,
    pub facility: Facility,
    /// Thread name prefix for [`Facility::DedicatedThread`].
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            facility: Facility::default(),
            thread_name: "slotgate-worker".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SLOTGATE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            let value = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| Error::config(ENV_MAX_CONCURRENCY, format!("'{raw}': {e}")))?;
            config.max_concurrency = Some(value);
        }

        if let Some(raw) = lookup(ENV_FACILITY) {
            config.facility = raw
                .parse::<Facility>()
                .map_err(|e| Error::config(ENV_FACILITY, e))?;
        }

        Ok(config)
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facility = facility;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// The slot count this config asks for, validated against `1..=64`.
    pub fn resolved_max_concurrency(&self) -> Result<usize> {
        match self.max_concurrency {
            Some(n) if (1..=MAX_CONCURRENCY).contains(&n) => Ok(n),
            Some(n) => Err(Error::Configuration { capacity: n }),
            None => Ok(default_max_concurrency()),
        }
    }
}
