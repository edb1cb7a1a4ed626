//! Runtime Configuration
//!
//! Tunables for the scheduler. Configuration is per thread, matching the
//! per-thread reactive state, and can be loaded from JSON so hosts can keep
//! it next to the rest of their settings.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// Default number of times one job may run within a single flush.
pub const DEFAULT_RECURSION_LIMIT: u32 = 100;

/// Scheduler and error-handling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times a single job may execute within one flush before it is
    /// reported as runaway recursion and skipped.
    pub recursion_limit: u32,

    /// Catch panics raised by scheduled jobs and report them instead of
    /// unwinding out of the flush.
    pub catch_job_panics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            catch_job_panics: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| ReactiveError::Config(e.to_string()))
    }
}

thread_local! {
    static CONFIG: RefCell<RuntimeConfig> = RefCell::new(RuntimeConfig::default());
}

/// Install `config` for the current thread.
pub fn configure(config: RuntimeConfig) {
    tracing::debug!(?config, "reactive runtime configured");
    CONFIG.with(|slot| *slot.borrow_mut() = config);
}

/// The configuration active on the current thread.
pub fn current() -> RuntimeConfig {
    CONFIG.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.recursion_limit, 100);
        assert!(config.catch_job_panics);
        assert_eq!(current(), config);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json_str(r#"{ "recursion_limit": 5 }"#).unwrap();
        assert_eq!(config.recursion_limit, 5);
        assert!(config.catch_job_panics);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = RuntimeConfig::from_json_str("{ recursion_limit: }").unwrap_err();
        assert!(matches!(err, ReactiveError::Config(_)));
    }

    #[test]
    fn configure_is_per_thread() {
        configure(RuntimeConfig {
            recursion_limit: 7,
            catch_job_panics: false,
        });
        assert_eq!(current().recursion_limit, 7);

        let other = std::thread::spawn(|| current().recursion_limit)
            .join()
            .unwrap();
        assert_eq!(other, DEFAULT_RECURSION_LIMIT);
    }
}
