//! Bounded retry with exponential backoff for bus IO (CONTRACT.md §1.2).

use crate::bus::{BusError, MessageBus};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (1-based): base * 2^(n-1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Publish with bounded retries. The final error is returned to the caller;
/// a cycle stage decides whether that abandons the cycle.
pub async fn publish_with_backoff(
    bus: &dyn MessageBus,
    channel: &str,
    payload: serde_json::Value,
    policy: RetryPolicy,
) -> Result<u64, BusError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match bus.publish(channel, payload.clone()).await {
            Ok(id) => return Ok(id),
            Err(err) if attempt < policy.max_attempts => {
                warn!(channel, attempt, error = %err, "publish failed, retrying");
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
