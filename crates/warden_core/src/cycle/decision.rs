//! The decision contract between the analysis agent and the risk gate,
//! plus the correlation id that ties an order to its fills and journal
//! record (CONTRACT.md §4.3).
//!
//! The correlation hash covers the canonical decision fields and the cycle
//! sequence number, never wall-clock time, so a resubmitted identical
//! decision in the same cycle hashes identically and deduplicates.

use crate::lifecycle::Side;
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh64::Xxh64;

// ─── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    OpenLong,
    OpenShort,
    Close,
    Add,
    Reduce,
    Hold,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::OpenLong => "OPEN_LONG",
            DecisionAction::OpenShort => "OPEN_SHORT",
            DecisionAction::Close => "CLOSE",
            DecisionAction::Add => "ADD",
            DecisionAction::Reduce => "REDUCE",
            DecisionAction::Hold => "HOLD",
        }
    }

    /// Actions that create or grow exposure and need full risk vetting.
    pub fn is_entry(&self) -> bool {
        matches!(
            self,
            DecisionAction::OpenLong | DecisionAction::OpenShort | DecisionAction::Add
        )
    }

    /// Hold does not touch the venue at all.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, DecisionAction::Hold)
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            DecisionAction::OpenLong => Some(Side::Long),
            DecisionAction::OpenShort => Some(Side::Short),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: DecisionAction,
    pub instrument: String,
    /// Trade size as a fraction of account equity.
    #[serde(default)]
    pub size_pct: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    /// Agent's own confidence, informational only.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub reasoning: String,
}

fn default_leverage() -> f64 {
    1.0
}

impl TradeDecision {
    pub fn hold(instrument: &str, reasoning: &str) -> Self {
        TradeDecision {
            action: DecisionAction::Hold,
            instrument: instrument.to_string(),
            size_pct: 0.0,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            leverage: 1.0,
            confidence: 0.0,
            strategy: String::new(),
            reasoning: reasoning.to_string(),
        }
    }

    /// Structural validation, run before the risk gate sees the decision.
    /// A decision the agent malformed ends the cycle as Invalid; it is a
    /// logged taxonomy outcome, not an error to bubble.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.instrument.is_empty() {
            return Err(ValidationError::MissingInstrument);
        }
        if self.action.is_entry() {
            if !self.size_pct.is_finite() || self.size_pct <= 0.0 {
                return Err(ValidationError::NonPositiveSize {
                    size_pct: self.size_pct,
                });
            }
            for (field, value) in [
                ("entry_price", self.entry_price),
                ("stop_loss", self.stop_loss),
                ("take_profit", self.take_profit),
            ] {
                if let Some(v) = value {
                    if !v.is_finite() || v <= 0.0 {
                        return Err(ValidationError::BadPrice { field, value: v });
                    }
                }
            }
            if !self.leverage.is_finite() || self.leverage < 1.0 {
                return Err(ValidationError::BadLeverage {
                    leverage: self.leverage,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingInstrument,
    NonPositiveSize { size_pct: f64 },
    BadPrice { field: &'static str, value: f64 },
    BadLeverage { leverage: f64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingInstrument => write!(f, "decision without an instrument"),
            ValidationError::NonPositiveSize { size_pct } => {
                write!(f, "non-positive size_pct {size_pct}")
            }
            ValidationError::BadPrice { field, value } => {
                write!(f, "non-positive or non-finite {field} {value}")
            }
            ValidationError::BadLeverage { leverage } => {
                write!(f, "leverage {leverage} below 1x or non-finite")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

// ─── Correlation id ──────────────────────────────────────────────────────────

const HASH_SEED: u64 = 0;
const FIELD_SEP: [u8; 1] = [0xFF];

/// xxhash64 over the canonical decision fields plus the cycle sequence.
/// Prices hash as IEEE bit patterns; 0xFF separates fields so adjacent
/// values cannot alias.
pub fn compute_correlation_id(decision: &TradeDecision, cycle_seq: u64) -> u64 {
    let mut hasher = Xxh64::new(HASH_SEED);
    hasher.update(decision.instrument.as_bytes());
    hasher.update(&FIELD_SEP);
    hasher.update(decision.action.as_str().as_bytes());
    hasher.update(&FIELD_SEP);
    hasher.update(&decision.size_pct.to_bits().to_le_bytes());
    hasher.update(&FIELD_SEP);
    for price in [decision.entry_price, decision.stop_loss, decision.take_profit] {
        hasher.update(&price.unwrap_or(0.0).to_bits().to_le_bytes());
        hasher.update(&FIELD_SEP);
    }
    hasher.update(&decision.leverage.to_bits().to_le_bytes());
    hasher.update(&FIELD_SEP);
    hasher.update(&cycle_seq.to_le_bytes());
    hasher.digest()
}

/// Canonical wire form: 16 lowercase hex digits.
pub fn format_correlation_id(id: u64) -> String {
    format!("{id:016x}")
}
