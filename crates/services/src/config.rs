use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use exam_core::model::{VIOLATION_THRESHOLD, ViolationKind};

use crate::error::ConfigError;
use crate::sessions::{Backoff, ViolationPolicy};

/// Tunables for a live exam session.
///
/// The debounce and backoff values are reasonable defaults rather than
/// contractual numbers; deployments may override them through the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    pub save_debounce: Duration,
    pub max_batch_delay: Duration,
    pub retry: Backoff,
    pub request_timeout: Duration,
    pub submit_flush_grace: Duration,
    pub violation_threshold: u32,
    pub violation_debounce: Duration,
    pub violation_weights: BTreeMap<ViolationKind, u32>,
    pub low_time_warning: Duration,
    pub load_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            save_debounce: Duration::from_millis(1_500),
            max_batch_delay: Duration::from_secs(5),
            retry: Backoff::default(),
            request_timeout: Duration::from_secs(10),
            submit_flush_grace: Duration::from_secs(10),
            violation_threshold: VIOLATION_THRESHOLD,
            violation_debounce: Duration::from_secs(1),
            violation_weights: ViolationKind::ALL.into_iter().map(|k| (k, 1)).collect(),
            low_time_warning: Duration::from_secs(5 * 60),
            load_attempts: 3,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `EXAM_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Env` for unparsable values, or any validation error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_millis("EXAM_TICK_MS")? {
            config.tick_interval = v;
        }
        if let Some(v) = env_millis("EXAM_SAVE_DEBOUNCE_MS")? {
            config.save_debounce = v;
        }
        if let Some(v) = env_millis("EXAM_MAX_BATCH_DELAY_MS")? {
            config.max_batch_delay = v;
        }
        if let Some(v) = env_millis("EXAM_RETRY_INITIAL_MS")? {
            config.retry.initial_delay = v;
        }
        if let Some(v) = env_millis("EXAM_RETRY_MAX_MS")? {
            config.retry.max_delay = v;
        }
        if let Some(v) = env_millis("EXAM_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = v;
        }
        if let Some(v) = env_millis("EXAM_SUBMIT_FLUSH_GRACE_MS")? {
            config.submit_flush_grace = v;
        }
        if let Some(v) = env_millis("EXAM_VIOLATION_DEBOUNCE_MS")? {
            config.violation_debounce = v;
        }
        if let Some(secs) = env_u64("EXAM_LOW_TIME_WARNING_SECS")? {
            config.low_time_warning = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_u64("EXAM_LOAD_ATTEMPTS")? {
            config.load_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigError` for zero intervals or inconsistent retry bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("tick_interval", self.tick_interval),
            ("save_debounce", self.save_debounce),
            ("max_batch_delay", self.max_batch_delay),
            ("retry.initial_delay", self.retry.initial_delay),
            ("request_timeout", self.request_timeout),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.violation_threshold == 0 {
            return Err(ConfigError::Zero {
                field: "violation_threshold",
            });
        }
        if self.load_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "load_attempts",
            });
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Multiplier);
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(ConfigError::RetryBounds);
        }
        Ok(())
    }

    #[must_use]
    pub fn violation_policy(&self) -> ViolationPolicy {
        ViolationPolicy {
            weights: self.violation_weights.clone(),
            threshold: self.violation_threshold,
            debounce: self.violation_debounce,
        }
    }
}

fn env_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, raw }),
        Err(_) => Ok(None),
    }
}

fn env_millis(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_u64(var)?.map(Duration::from_millis))
}
