//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration.
//!
//! ```toml
//! max_commit_attempts = 5
//! sweep_pass_limit = 64
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, ScheduleError};

/// Tunables for [`TaskService`](crate::scheduler::TaskService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a mutating operation is attempted when its commit
    /// loses an optimistic-lock race. Must be at least 1.
    pub max_commit_attempts: u32,
    /// Upper bound on bad-order detection passes per sweep.
    /// `None` = number of tasks in the schedule + 1.
    pub sweep_pass_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            sweep_pass_limit: None,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ScheduleError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScheduleError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Sets the commit attempt budget.
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    /// Sets the bad-order pass limit.
    pub fn with_sweep_pass_limit(mut self, limit: usize) -> Self {
        self.sweep_pass_limit = Some(limit);
        self
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_commit_attempts == 0 {
            return Err(ScheduleError::Config(
                "max_commit_attempts must be at least 1".into(),
            ));
        }
        if self.sweep_pass_limit == Some(0) {
            return Err(ScheduleError::Config(
                "sweep_pass_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Pass limit to use for a schedule holding `task_count` tasks.
    pub fn pass_limit_for(&self, task_count: usize) -> usize {
        self.sweep_pass_limit.unwrap_or(task_count + 1)
    }
}
