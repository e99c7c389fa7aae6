//! Market snapshot model consumed by the signal gate and the cycle driver.
//!
//! Snapshots are produced upstream (indicator arithmetic and regime
//! classification are external) and are immutable for the duration of one
//! decision cycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named indicator value carried by a snapshot.
///
/// Rule conditions address snapshot fields by name; a field is either
/// numeric (RSI, ADX, volume ratio) or categorical (EMA alignment,
/// Bollinger position).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Num(f64),
    Text(String),
}

/// Point-in-time market view for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: String,
    /// Last traded price.
    pub price: f64,
    /// 1h price change as a fraction (0.03 = +3%).
    #[serde(default)]
    pub price_change_1h: f64,
    /// Current funding rate as a fraction.
    #[serde(default)]
    pub funding_rate: f64,
    /// 4h open-interest change as a fraction.
    #[serde(default)]
    pub oi_change_4h: f64,
    /// Regime tag assigned by the upstream classifier
    /// ("trending_up", "trending_down", "volatile", "ranging").
    pub market_regime: String,
    /// Set by the upstream anomaly detector; an anomalous snapshot
    /// bypasses screening (CONTRACT.md §1.3).
    #[serde(default)]
    pub anomaly: bool,
    /// Named indicator fields available for rule-condition matching.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Capture time (ms since epoch).
    pub timestamp_ms: u64,
}

impl MarketSnapshot {
    /// Look up a named field.
    ///
    /// The built-in numeric fields are addressable by name so rule
    /// conditions can reference them uniformly. Returns `None` for unknown
    /// names — a missing field never matches and never panics.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "price" => Some(FieldValue::Num(self.price)),
            "price_change_1h" => Some(FieldValue::Num(self.price_change_1h)),
            "funding_rate" => Some(FieldValue::Num(self.funding_rate)),
            "oi_change_4h" => Some(FieldValue::Num(self.oi_change_4h)),
            "market_regime" => Some(FieldValue::Text(self.market_regime.clone())),
            _ => self.fields.get(name).cloned(),
        }
    }
}
