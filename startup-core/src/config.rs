//! Configuration
//!
//! Resolver settings. Everything has a default, so an empty JSON object
//! (or no configuration at all) gives sequential execution.
//!
//! ```json
//! { "execution": { "mode": "parallel", "workers": 4 } }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a pass executes its plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One step at a time, in plan order, on the calling thread.
    #[default]
    Sequential,
    /// Up to `workers` steps at once on scoped threads.
    Parallel { workers: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartupConfig {
    pub execution: ExecutionMode,
}

impl StartupConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|err| Error::InvalidConfig {
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn parallel(workers: usize) -> Self {
        Self {
            execution: ExecutionMode::Parallel { workers },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let ExecutionMode::Parallel { workers: 0 } = self.execution {
            return Err(Error::InvalidConfig {
                reason: "parallel execution needs at least one worker".to_owned(),
            });
        }
        Ok(())
    }
}
