//! Position lifecycle tracking (CONTRACT.md §6).
//!
//! The venue's position stream is a series of absolute states, not deltas.
//! The book derives exactly one close event per (instrument, side) when a
//! previously non-zero key reports size zero, with realized PnL taken from
//! the last non-zero update. Out-of-order, duplicate, or malformed updates
//! are absorbed, never panicked on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Current absolute state of one (instrument, side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub size: f64,
    pub avg_price: f64,
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub liquidation_price: Option<f64>,
    pub notional_usd: f64,
    pub updated_ts_ms: u64,
}

/// One message from the position channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub instrument: String,
    pub side: Side,
    /// Absolute size; zero means flat.
    pub size: f64,
    #[serde(default)]
    pub avg_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub liquidation_price: Option<f64>,
    #[serde(default)]
    pub notional_usd: f64,
    /// Populated by the venue on closing updates, when known.
    #[serde(default)]
    pub exit_reason: Option<String>,
    pub ts_ms: u64,
}

/// Emitted exactly once per close transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseEvent {
    pub instrument: String,
    pub side: Side,
    /// From the last non-zero update before the flat one.
    pub realized_pnl: f64,
    pub entry_price: f64,
    pub size: f64,
    pub duration_ms: u64,
    pub exit_reason: Option<String>,
    pub ts_ms: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    position: Position,
    opened_ts_ms: u64,
}

/// In-memory book of open positions keyed by (instrument, side).
#[derive(Debug, Default)]
pub struct PositionBook {
    open: HashMap<(String, Side), Entry>,
}

impl PositionBook {
    pub fn new() -> Self {
        PositionBook::default()
    }

    /// Apply one update. Returns the close event iff this update is the
    /// size→0 transition for a tracked key.
    pub fn apply(&mut self, update: &PositionUpdate) -> Option<CloseEvent> {
        if !update.size.is_finite() || update.size < 0.0 {
            debug!(
                instrument = %update.instrument,
                size = update.size,
                "ignoring malformed position update"
            );
            return None;
        }
        let key = (update.instrument.clone(), update.side);

        if update.size == 0.0 {
            // Flat with no prior entry is a no-op (duplicate close, or a
            // position opened before this process started tracking).
            let prior = self.open.remove(&key)?;
            return Some(CloseEvent {
                instrument: prior.position.instrument,
                side: prior.position.side,
                realized_pnl: prior.position.unrealized_pnl,
                entry_price: prior.position.avg_price,
                size: prior.position.size,
                duration_ms: update.ts_ms.saturating_sub(prior.opened_ts_ms),
                exit_reason: update.exit_reason.clone(),
                ts_ms: update.ts_ms,
            });
        }

        let opened_ts_ms = self
            .open
            .get(&key)
            .map(|e| e.opened_ts_ms)
            .unwrap_or(update.ts_ms);
        self.open.insert(
            key,
            Entry {
                position: Position {
                    instrument: update.instrument.clone(),
                    side: update.side,
                    size: update.size,
                    avg_price: update.avg_price,
                    unrealized_pnl: update.unrealized_pnl,
                    liquidation_price: update.liquidation_price,
                    notional_usd: update.notional_usd,
                    updated_ts_ms: update.ts_ms,
                },
                opened_ts_ms,
            },
        );
        None
    }

    pub fn has_open(&self, instrument: &str) -> bool {
        self.open.keys().any(|(i, _)| i == instrument)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.open.values().map(|e| e.position.clone()).collect()
    }

    pub fn position(&self, instrument: &str, side: Side) -> Option<&Position> {
        self.open
            .get(&(instrument.to_string(), side))
            .map(|e| &e.position)
    }
}
