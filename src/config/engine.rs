//! Engine runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens when a turn arrives for a thread that is already running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the running turn, up to `lock_wait_timeout`.
    #[default]
    Wait,
    /// Fail immediately with `ThreadBusy`.
    Reject,
}

/// Turn-level limits for the thread execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub busy_policy: BusyPolicy,
    #[serde(with = "humantime_serde")]
    pub lock_wait_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub turn_timeout: Duration,
    /// Used for tools that declare no `timeout` of their own.
    #[serde(with = "humantime_serde")]
    pub default_tool_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::Wait,
            lock_wait_timeout: Duration::from_secs(30),
            turn_timeout: Duration::from_secs(120),
            default_tool_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_default_tool_timeout(mut self, timeout: Duration) -> Self {
        self.default_tool_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_humantime_durations_with_defaults() {
        let config: EngineConfig =
            serde_yaml::from_str("busy_policy: reject\nturn_timeout: 2m\n").unwrap();
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
        assert_eq!(config.turn_timeout, Duration::from_secs(120));
        assert_eq!(config.lock_wait_timeout, Duration::from_secs(30));
    }
}
