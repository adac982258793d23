use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

use crate::core::errors::{ChainError, Result};

/// Run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock length of one duration unit, in milliseconds (default: 1000)
    pub time_unit_ms: u64,
    /// Log a warning at run start when tasks wait on each other in a cycle
    pub warn_on_cycles: bool,
    /// Maximum log level for `init_logging` (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_unit_ms: 1000,
            warn_on_cycles: true,
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }

    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        self.time_unit_ms = u64::try_from(unit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_warn_on_cycles(mut self, enabled: bool) -> Self {
        self.warn_on_cycles = enabled;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn level(&self) -> Result<Level> {
        self.log_level.parse::<Level>().map_err(|_| {
            ChainError::configuration_field(
                format!("unknown log level '{}'", self.log_level),
                "log_level",
            )
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.time_unit_ms == 0 {
            return Err(ChainError::configuration_field(
                "time_unit_ms must be greater than 0",
                "time_unit_ms",
            ));
        }
        self.level()?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChainError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&text)
    }
}
