//! Reconnection policy for the stream socket.

use std::time::Duration;

use nvrlink_ipc::ReconnectSettings;

use crate::{BASE_RECONNECT_DELAY_MS, MAX_RECONNECT_ATTEMPTS};

/// Reconnection policy configuration.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts.
    pub max_attempts: u32,

    /// Base delay between attempts (exponential backoff applied).
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RECONNECT_DELAY_MS),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl ReconnectPolicy {
    /// Calculate delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Check if more attempts are allowed after `attempt` tries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
