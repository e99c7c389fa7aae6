//! Versioned signal-gate rule configuration.
//!
//! A `SignalRules` value is published whole on the rules channel and
//! hot-swapped whole (CONTRACT.md §5.2). Two pieces are deliberately NOT
//! part of the versioned value: the always-send thresholds and the fallback
//! clamp bounds are compiled in and survive any publisher (CONTRACT.md
//! §2.1, §2.2).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hard floor and ceiling for the fallback timer, seconds (CONTRACT.md §2.2).
pub const FALLBACK_INTERVAL_MIN_S: u64 = 900;
pub const FALLBACK_INTERVAL_MAX_S: u64 = 3600;

const DEFAULT_FALLBACK_INTERVAL_S: u64 = 1800;
const DEFAULT_BORDERLINE_THRESHOLD: f64 = 0.4;

/// Compiled-in unconditional pass thresholds (CONTRACT.md §2.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlwaysSendThresholds {
    /// |1h price change| at or above this fraction.
    pub price_change_1h_abs: f64,
    /// |funding rate| at or above this fraction.
    pub funding_rate_abs: f64,
    /// |4h open-interest change| at or above this fraction.
    pub oi_change_4h_abs: f64,
}

pub const ALWAYS_SEND: AlwaysSendThresholds = AlwaysSendThresholds {
    price_change_1h_abs: 0.03,
    funding_rate_abs: 0.0005,
    oi_change_4h_abs: 0.10,
};

/// A single check of one snapshot field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Numeric field within `[min, max]` inclusive.
    Range { min: f64, max: f64 },
    /// Numeric field at or above `min`; `abs` compares the absolute value.
    AtLeast {
        min: f64,
        #[serde(default)]
        abs: bool,
    },
    /// Numeric field at or below `max`; `abs` compares the absolute value.
    AtMost {
        max: f64,
        #[serde(default)]
        abs: bool,
    },
    /// Categorical field equal to one of `values`.
    OneOf { values: Vec<String> },
}

impl RuleCheck {
    /// Structural validity. A check with non-finite bounds, an inverted
    /// range, or an empty value list can never be trusted; the gate treats
    /// the whole containing rule set as malformed (CONTRACT.md §2.4).
    pub fn is_well_formed(&self) -> bool {
        match self {
            RuleCheck::Range { min, max } => min.is_finite() && max.is_finite() && min <= max,
            RuleCheck::AtLeast { min, .. } => min.is_finite(),
            RuleCheck::AtMost { max, .. } => max.is_finite(),
            RuleCheck::OneOf { values } => {
                !values.is_empty() && values.iter().all(|v| !v.is_empty())
            }
        }
    }
}

/// One configured condition for a regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Stable id reported in `matched_rules` and in alerts.
    pub id: String,
    /// Snapshot field the check reads.
    pub field: String,
    pub check: RuleCheck,
}

impl RuleCondition {
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && !self.field.is_empty() && self.check.is_well_formed()
    }
}

/// Versioned gate configuration. Monotonic `version`; the consumer ignores
/// versions at or below the one it already holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRules {
    pub version: u32,
    /// Regime tag → conditions counted toward the confidence ratio.
    pub regime_rules: BTreeMap<String, Vec<RuleCondition>>,
    /// Seconds of gate silence before a forced FALLBACK send. Clamped on
    /// load; publishers cannot escape the bounds.
    pub fallback_interval_s: u64,
    /// Confidence at or above this passes outright; below it (but above
    /// zero) is BORDERLINE. Clamped to (0, 1].
    pub borderline_threshold: f64,
    /// Provenance tag ("init", "reflection", "operator").
    pub updated_by: String,
}

impl SignalRules {
    /// Enforce the immutable bounds on an untrusted published value.
    ///
    /// Returns the sanitized value; the caller swaps it in whole. Malformed
    /// conditions are left in place — the gate scores them as never
    /// matching, so a bad publish degrades toward BLOCK, not PASS.
    pub fn sanitized(mut self) -> SignalRules {
        self.fallback_interval_s = self
            .fallback_interval_s
            .clamp(FALLBACK_INTERVAL_MIN_S, FALLBACK_INTERVAL_MAX_S);
        if !self.borderline_threshold.is_finite()
            || self.borderline_threshold <= 0.0
            || self.borderline_threshold > 1.0
        {
            self.borderline_threshold = DEFAULT_BORDERLINE_THRESHOLD;
        }
        self
    }

    /// The compiled-in v1 rule set used until a publisher supplies one.
    pub fn baseline() -> SignalRules {
        fn cond(id: &str, field: &str, check: RuleCheck) -> RuleCondition {
            RuleCondition {
                id: id.to_string(),
                field: field.to_string(),
                check,
            }
        }
        fn one_of(values: &[&str]) -> RuleCheck {
            RuleCheck::OneOf {
                values: values.iter().map(|v| v.to_string()).collect(),
            }
        }

        let mut regime_rules = BTreeMap::new();
        regime_rules.insert(
            "trending_up".to_string(),
            vec![
                cond("tu_ema", "ema_alignment", one_of(&["bullish"])),
                cond("tu_rsi", "rsi", RuleCheck::Range { min: 40.0, max: 70.0 }),
                cond("tu_adx", "adx", RuleCheck::AtLeast { min: 25.0, abs: false }),
                cond("tu_vol", "volume_ratio", RuleCheck::AtLeast { min: 1.0, abs: false }),
                cond("tu_macd", "macd_signal", one_of(&["bullish"])),
            ],
        );
        regime_rules.insert(
            "trending_down".to_string(),
            vec![
                cond("td_ema", "ema_alignment", one_of(&["bearish"])),
                cond("td_rsi", "rsi", RuleCheck::Range { min: 30.0, max: 60.0 }),
                cond("td_adx", "adx", RuleCheck::AtLeast { min: 25.0, abs: false }),
                cond("td_vol", "volume_ratio", RuleCheck::AtLeast { min: 1.0, abs: false }),
                cond("td_macd", "macd_signal", one_of(&["bearish"])),
            ],
        );
        regime_rules.insert(
            "volatile".to_string(),
            vec![
                cond("vo_vol", "volume_ratio", RuleCheck::AtLeast { min: 1.5, abs: false }),
                cond("vo_bb", "bb_position", one_of(&["upper", "lower"])),
                cond("vo_adx", "adx", RuleCheck::AtMost { max: 25.0, abs: false }),
            ],
        );
        regime_rules.insert(
            "ranging".to_string(),
            vec![
                cond("ra_rsi", "rsi", RuleCheck::AtMost { max: 35.0, abs: false }),
                cond("ra_adx", "adx", RuleCheck::AtMost { max: 25.0, abs: false }),
                cond("ra_bb", "bb_position", one_of(&["lower"])),
                cond("ra_vol", "volume_ratio", RuleCheck::AtLeast { min: 0.8, abs: false }),
            ],
        );

        SignalRules {
            version: 1,
            regime_rules,
            fallback_interval_s: DEFAULT_FALLBACK_INTERVAL_S,
            borderline_threshold: DEFAULT_BORDERLINE_THRESHOLD,
            updated_by: "init".to_string(),
        }
    }
}
