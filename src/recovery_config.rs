use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a connection behaves once the link to the server is lost.
///
/// ```
/// let config: warren::RecoveryConfig =
///     serde_json::from_str(r#"{"auto_recover": true, "max_attempts": 5}"#).unwrap();
/// assert_eq!(config.initial_backoff_ms, 100);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Reconnect and replay the recorded topology in the background.
    pub auto_recover: bool,
    /// Give up after that many failed reconnections. Unlimited when `None`.
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recover: false,
            max_attempts: None,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

impl RecoveryConfig {
    #[must_use]
    pub fn auto_recover(mut self) -> Self {
        self.auto_recover = true;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Exponential back-off before the given (0-based) reconnection attempt.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }

    pub(crate) fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempts >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let config = RecoveryConfig::default()
            .with_backoff(Duration::from_millis(50), Duration::from_millis(300));
        assert_eq!(config.backoff(0), Duration::from_millis(50));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(300));
        assert_eq!(config.backoff(60), Duration::from_millis(300));
    }

    #[test]
    fn attempts() {
        let config = RecoveryConfig::default().with_max_attempts(2);
        assert!(!config.exhausted(1));
        assert!(config.exhausted(2));
        assert!(!RecoveryConfig::default().exhausted(u32::MAX));
    }
}
