//! Retry and backoff settings for live invocations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_user_agent() -> String {
    concat!("toolgate/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff delay (milliseconds).
    pub max_backoff_ms: u64,
    pub user_agent: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            max_backoff_ms: 10_000,
            user_agent: default_user_agent(),
        }
    }
}

impl ExecutionConfig {
    /// Delay after failed attempt `attempt` (1-based):
    /// `backoff_base_ms * 2^(attempt-1)`, capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_config_default() {
        let cfg = ExecutionConfig::default();
        assert_eq!(cfg.backoff_base_ms, 500);
        assert_eq!(cfg.max_backoff_ms, 10_000);
        assert!(cfg.user_agent.starts_with("toolgate/"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = ExecutionConfig {
            backoff_base_ms: 100,
            max_backoff_ms: 500,
            ..Default::default()
        };
        assert_eq!(cfg.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(cfg.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(cfg.backoff_delay(200), Duration::from_millis(500));
    }
}
