//! Queue configuration

use std::time::Duration;

use crate::job::BackoffStrategy;
use crate::store::QueueError;

/// Engine policy knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    /// Attempts granted to jobs enqueued without an explicit ceiling
    pub default_max_attempts: u32,
    /// Delay policy between failed attempts
    pub backoff: BackoffStrategy,
    /// Per-attempt handler deadline. `None` lets a handler run forever.
    pub handler_timeout: Option<Duration>,
    /// Claims older than this are considered abandoned by a crashed invoker
    pub stale_after: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            backoff: BackoffStrategy::default(),
            handler_timeout: None,
            stale_after: None,
        }
    }
}

impl QueueConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_max_attempts = env_parse::<u32>("PRICEGRID_MAX_ATTEMPTS")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.default_max_attempts);

        Self {
            default_max_attempts,
            handler_timeout: env_parse::<u64>("PRICEGRID_HANDLER_TIMEOUT_SECS")
                .map(Duration::from_secs),
            stale_after: env_parse::<u64>("PRICEGRID_STALE_AFTER_SECS").map(Duration::from_secs),
            ..defaults
        }
    }

    /// Stale recovery is only safe when every live claim is bounded by a
    /// handler deadline shorter than the stale window.
    pub fn validate(&self) -> Result<(), QueueError> {
        let Some(stale_after) = self.stale_after else {
            return Ok(());
        };
        match self.handler_timeout {
            Some(timeout) if timeout < stale_after => Ok(()),
            Some(timeout) => Err(QueueError::InvalidConfig(format!(
                "handler_timeout ({}s) must be shorter than stale_after ({}s)",
                timeout.as_secs_f64(),
                stale_after.as_secs_f64()
            ))),
            None => Err(QueueError::InvalidConfig(
                "stale_after requires a handler_timeout".to_string(),
            )),
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.default_max_attempts, 3);
        assert_eq!(config.backoff.delay(1), Duration::from_secs(2));
        assert!(config.handler_timeout.is_none());
        assert!(config.stale_after.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stale_after_needs_shorter_timeout() {
        let stale = QueueConfig {
            stale_after: Some(Duration::from_secs(300)),
            ..QueueConfig::default()
        };
        assert!(matches!(stale.validate(), Err(QueueError::InvalidConfig(_))));

        let equal = QueueConfig {
            handler_timeout: Some(Duration::from_secs(300)),
            ..stale
        };
        assert!(matches!(equal.validate(), Err(QueueError::InvalidConfig(_))));

        let bounded = QueueConfig {
            handler_timeout: Some(Duration::from_secs(60)),
            ..stale
        };
        assert!(bounded.validate().is_ok());
    }
}
