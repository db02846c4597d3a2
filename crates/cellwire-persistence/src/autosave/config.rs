//! Auto-save configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for auto-save behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    /// Whether changes are written while running. The final write on
    /// shutdown happens either way.
    pub enabled: bool,

    /// Quiet period after a change before writing, in milliseconds.
    ///
    /// Further changes restart the wait.
    pub debounce_ms: u64,

    /// Upper bound on how long a change may stay unwritten, in milliseconds,
    /// even while changes keep arriving.
    pub max_delay_ms: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl AutoSaveConfig {
    /// Create a disabled auto-save config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.debounce_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: AutoSaveConfig = from_json(r#"{"debounce_ms": 50}"#);
        assert!(config.enabled);
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert_eq!(config.max_delay(), Duration::from_secs(10));
    }

    #[test]
    fn max_delay_never_undercuts_debounce() {
        let config = AutoSaveConfig {
            enabled: true,
            debounce_ms: 2_000,
            max_delay_ms: 100,
        };
        assert_eq!(config.max_delay(), Duration::from_secs(2));
    }

    fn from_json(json: &str) -> AutoSaveConfig {
        serde_json::from_str(json).unwrap()
    }
}
