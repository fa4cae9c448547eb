//! Runtime configuration for the dispatcher and saga tracker.
//!
//! Values come from environment variables with defaults. A variable that is
//! set but invalid is an error rather than silently falling back.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

pub const MAX_DEPTH_VAR: &str = "CASCADE_MAX_DEPTH";
pub const MAX_CONCURRENCY_VAR: &str = "CASCADE_MAX_CONCURRENCY";
pub const HANDLER_TIMEOUT_VAR: &str = "CASCADE_HANDLER_TIMEOUT_MS";
pub const SAGA_INACTIVITY_VAR: &str = "CASCADE_SAGA_INACTIVITY_SECS";
pub const SAGA_SWEEP_VAR: &str = "CASCADE_SAGA_SWEEP_SECS";
pub const SAGA_RETENTION_VAR: &str = "CASCADE_SAGA_RETENTION_SECS";
pub const SAGA_MAX_INSTANCES_VAR: &str = "CASCADE_SAGA_MAX_INSTANCES";

/// Invalid configuration value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Dispatcher limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Deepest invocation depth a cascade may reach. An event whose
    /// subscribers would run deeper is not delivered.
    pub max_depth: u32,
    /// Maximum number of handlers running at once, across all cascades.
    pub max_concurrency: usize,
    /// Execution budget for handlers without their own timeout.
    pub default_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_depth: 20,
            max_concurrency: 64,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatchConfig {
    /// Loads from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value is set but unusable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_depth = parse_positive(&lookup, MAX_DEPTH_VAR)?.unwrap_or(defaults.max_depth);
        let max_concurrency =
            parse_positive(&lookup, MAX_CONCURRENCY_VAR)?.unwrap_or(defaults.max_concurrency);
        let default_timeout = parse_positive(&lookup, HANDLER_TIMEOUT_VAR)?
            .map_or(defaults.default_timeout, Duration::from_millis);
        Ok(Self {
            max_depth,
            max_concurrency,
            default_timeout,
        })
    }
}

/// Saga tracker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Event names that close a workflow instance.
    pub terminal_events: HashSet<String>,
    /// Open instances idle for longer than this are closed by the sweeper.
    pub inactivity_timeout: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
    /// Closed instances are evicted by the sweeper once closed for longer
    /// than this.
    pub retention: Duration,
    /// Upper bound on tracked instances. When a sweep leaves more than this,
    /// the longest-closed instances are evicted first. Open instances are
    /// never evicted.
    pub max_instances: usize,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            terminal_events: HashSet::new(),
            inactivity_timeout: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
            retention: Duration::from_secs(60 * 60),
            max_instances: 10_000,
        }
    }
}

impl SagaConfig {
    /// Loads from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value is set but unusable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let inactivity_timeout = parse_positive(&lookup, SAGA_INACTIVITY_VAR)?
            .map_or(defaults.inactivity_timeout, Duration::from_secs);
        let sweep_interval = parse_positive(&lookup, SAGA_SWEEP_VAR)?
            .map_or(defaults.sweep_interval, Duration::from_secs);
        let retention = parse_positive(&lookup, SAGA_RETENTION_VAR)?
            .map_or(defaults.retention, Duration::from_secs);
        let max_instances =
            parse_positive(&lookup, SAGA_MAX_INSTANCES_VAR)?.unwrap_or(defaults.max_instances);
        Ok(Self {
            terminal_events: defaults.terminal_events,
            inactivity_timeout,
            sweep_interval,
            retention,
            max_instances,
        })
    }

    /// Adds event names that close a workflow instance.
    #[must_use]
    pub fn with_terminal_events<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminal_events.extend(names.into_iter().map(Into::into));
        self
    }
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key: key.to_owned(),
        value: raw.clone(),
        reason,
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| invalid(e.to_string()))?;
    if value <= T::default() {
        return Err(invalid("must be at least 1".to_owned()));
    }
    Ok(Some(value))
}
