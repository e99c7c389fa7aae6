//! Message bus contract (CONTRACT.md §4).
//!
//! At-least-once consumer-group delivery with per-channel producer order.
//! The bundled `InMemoryBus` implements the trait for tests and single
//! process deployments; a streams broker binding would implement the same
//! trait.

pub mod memory;
pub mod retry;

pub use memory::InMemoryBus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel names. Channels are created on first publish.
pub mod channels {
    pub const MARKET_SNAPSHOTS: &str = "market:snapshots";
    pub const MARKET_ALERTS: &str = "market:alerts";
    pub const TRADE_ORDERS: &str = "trade:orders";
    pub const TRADE_FILLS: &str = "trade:fills";
    pub const TRADE_POSITIONS: &str = "trade:positions";
    pub const TRADE_ACCOUNT: &str = "trade:account";
    pub const TRADE_CLOSES: &str = "trade:closes";
    pub const SIGNAL_RULES: &str = "signal:rules";
    pub const SIGNAL_RULES_ACKS: &str = "signal:rules:acks";
    pub const SYSTEM_ALERTS: &str = "system:alerts";
    pub const SYSTEM_METRICS: &str = "system:metrics";
    pub const SYSTEM_ADMIN: &str = "system:admin";
}

/// One delivered message. Ids are per-channel, monotonic in publish order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub channel: String,
    pub payload: serde_json::Value,
    pub published_ts_ms: u64,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus transport failure: {0}")]
    Transport(String),
    #[error("bus payload encode failure: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Append to a channel; returns the assigned message id.
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<u64, BusError>;

    /// Most recent message on a channel regardless of any group cursor.
    async fn read_latest(&self, channel: &str) -> Result<Option<Envelope>, BusError>;

    /// Next batch for a consumer group: pending (delivered, unacked)
    /// messages first, then new ones. Fetched messages stay pending until
    /// acked, so a handler crash redelivers them (CONTRACT.md §4.1).
    async fn fetch(
        &self,
        channel: &str,
        group: &str,
        max: usize,
    ) -> Result<Vec<Envelope>, BusError>;

    /// Acknowledge one handled message for a group.
    async fn ack(&self, channel: &str, group: &str, id: u64) -> Result<(), BusError>;
}

/// Serialize and publish in one step.
pub async fn publish_json<T: Serialize + Sync>(
    bus: &dyn MessageBus,
    channel: &str,
    value: &T,
) -> Result<u64, BusError> {
    let payload = serde_json::to_value(value)?;
    bus.publish(channel, payload).await
}
