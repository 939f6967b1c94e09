//! Runtime configuration
//!
//! Settings can be built in code or read from the environment:
//!
//! | Variable                | Field            | Default   |
//! |-------------------------|------------------|-----------|
//! | `PLEDGE_MAX_SYNC_DEPTH` | `max_sync_depth` | 256       |
//! | `PLEDGE_TASK_BUDGET`    | `task_budget`    | unlimited |
//!
//! `PLEDGE_TASK_BUDGET` accepts a positive integer or `unlimited`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Environment variable for [`RuntimeConfig::max_sync_depth`]
pub const ENV_MAX_SYNC_DEPTH: &str = "PLEDGE_MAX_SYNC_DEPTH";

/// Environment variable for [`RuntimeConfig::task_budget`]
pub const ENV_TASK_BUDGET: &str = "PLEDGE_TASK_BUDGET";

/// Default bound on synchronous resolution recursion
pub const DEFAULT_MAX_SYNC_DEPTH: usize = 256;

/// Tunables shared by every deferred value created on one scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How deep the resolution procedure may recurse synchronously (a thenable
    /// whose `then` immediately resolves with another thenable, and so on)
    /// before the next step is moved onto the task queue
    pub max_sync_depth: usize,

    /// Maximum tasks a single `run_until_idle` call may run (None = unlimited)
    pub task_budget: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_sync_depth: DEFAULT_MAX_SYNC_DEPTH,
            task_budget: None,
        }
    }
}

impl RuntimeConfig {
    /// Tight limits for untrusted or adversarial inputs
    pub fn restricted() -> Self {
        Self {
            max_sync_depth: 32,
            task_budget: Some(10_000),
        }
    }

    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary key lookup
    ///
    /// Missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_SYNC_DEPTH) {
            let depth = parse_count(ENV_MAX_SYNC_DEPTH, &raw)?;
            if depth == 0 {
                return Err(ConfigError::OutOfRange {
                    key: ENV_MAX_SYNC_DEPTH,
                    min: 1,
                    actual: depth,
                });
            }
            config.max_sync_depth = depth;
        }

        if let Some(raw) = lookup(ENV_TASK_BUDGET) {
            config.task_budget = if raw.trim().eq_ignore_ascii_case("unlimited") {
                None
            } else {
                let budget = parse_count(ENV_TASK_BUDGET, &raw)?;
                if budget == 0 {
                    return Err(ConfigError::OutOfRange {
                        key: ENV_TASK_BUDGET,
                        min: 1,
                        actual: budget,
                    });
                }
                Some(budget)
            };
        }

        Ok(config)
    }
}

fn parse_count(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}
