use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::BofangError;

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => {
                Err(BofangError::config(format!("unknown logging.level '{}'", other)).into())
            }
        }
    }

    /// Directive string passed to the tracing env-filter
    pub fn env_filter(&self) -> String {
        format!("bofang={}", self.level)
    }
}
