//! Spooler configuration.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Configuration for a spooler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolerConfig {
    /// Worker thread name; defaults to `spooler-<id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Discard pending jobs when the spooler is stopped.
    pub clear_on_stop: bool,
    /// Stack size for the worker thread in bytes; the platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            name: None,
            clear_on_stop: true,
            stack_size: None,
        }
    }
}

impl SpoolerConfig {
    /// Set the worker thread name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set whether pending jobs are discarded on stop.
    pub fn with_clear_on_stop(mut self, clear_on_stop: bool) -> Self {
        self.clear_on_stop = clear_on_stop;
        self
    }

    /// Set the worker thread stack size.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `SPOOLER_NAME` (optional worker thread name)
    /// - `SPOOLER_CLEAR_ON_STOP` (`true`/`false`, `1`/`0`, `yes`/`no`; default: true)
    /// - `SPOOLER_STACK_SIZE` (bytes, must be positive)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self {
            name: lookup("SPOOLER_NAME").and_then(non_empty),
            ..Self::default()
        };

        if let Some(value) = lookup("SPOOLER_CLEAR_ON_STOP").and_then(non_empty) {
            cfg.clear_on_stop = parse_bool("SPOOLER_CLEAR_ON_STOP", &value)?;
        }

        if let Some(value) = lookup("SPOOLER_STACK_SIZE").and_then(non_empty) {
            let bytes = value.parse::<usize>().map_err(|e| ConfigError::Invalid {
                var: "SPOOLER_STACK_SIZE",
                value: value.clone(),
                reason: e.to_string(),
            })?;
            if bytes == 0 {
                return Err(ConfigError::Invalid {
                    var: "SPOOLER_STACK_SIZE",
                    value,
                    reason: "must be positive".to_string(),
                });
            }
            cfg.stack_size = Some(bytes);
        }

        Ok(cfg)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
