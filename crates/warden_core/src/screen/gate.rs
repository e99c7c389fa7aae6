//! Signal gate evaluator (CONTRACT.md §2).
//!
//! Pure and clock-free: the caller supplies elapsed time since the last
//! pass. Evaluation order is fixed — always-send, fallback timer, regime
//! ratio — so an unconditional condition can never be shadowed by a stale
//! timer or a thin rule set.
//!
//! Confidence is the unweighted matched/configured ratio. Per-condition
//! weights are a deliberate extension point: `RuleCondition` would grow a
//! weight field and `matched/total` would become a weighted sum, with the
//! classification bands unchanged.

use crate::screen::rules::{ALWAYS_SEND, SignalRules};
use crate::snapshot::{FieldValue, MarketSnapshot};
use serde::{Deserialize, Serialize};

// ─── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateAction {
    /// Proceed to analysis.
    Pass,
    /// Abandon the cycle.
    Block,
    /// Low-confidence pass; the analysis path owns the judgment call.
    Borderline,
    /// Forced send after prolonged gate silence.
    Fallback,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Pass => "PASS",
            GateAction::Block => "BLOCK",
            GateAction::Borderline => "BORDERLINE",
            GateAction::Fallback => "FALLBACK",
        }
    }

    /// BLOCK is the only action that ends the cycle.
    pub fn proceeds(&self) -> bool {
        !matches!(self, GateAction::Block)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub action: GateAction,
    /// In [0, 1]. 1.0 for always-send, 0.5 for fallback, matched/total
    /// otherwise.
    pub confidence: f64,
    /// Ids of the conditions that matched.
    pub matched_rules: Vec<String>,
    pub reason: String,
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Evaluate one snapshot against the current rules.
///
/// `since_last_pass_s` is seconds since the gate last let this instrument
/// through (counted from process start if it never has).
pub fn evaluate(
    snapshot: &MarketSnapshot,
    rules: &SignalRules,
    since_last_pass_s: u64,
) -> GateDecision {
    // §2.1 — unconditional thresholds, compiled in, checked first.
    let mut unconditional = Vec::new();
    if finite_abs_at_least(snapshot.price_change_1h, ALWAYS_SEND.price_change_1h_abs) {
        unconditional.push("always_send_price_change_1h".to_string());
    }
    if finite_abs_at_least(snapshot.funding_rate, ALWAYS_SEND.funding_rate_abs) {
        unconditional.push("always_send_funding_rate".to_string());
    }
    if finite_abs_at_least(snapshot.oi_change_4h, ALWAYS_SEND.oi_change_4h_abs) {
        unconditional.push("always_send_oi_change_4h".to_string());
    }
    if !unconditional.is_empty() {
        return GateDecision {
            action: GateAction::Pass,
            confidence: 1.0,
            reason: format!("unconditional threshold: {}", unconditional.join(", ")),
            matched_rules: unconditional,
        };
    }

    // §2.2 — fallback timer. The interval was clamped at load time, but the
    // clamp is re-applied here so a value that skipped `sanitized()` still
    // cannot widen the window.
    let interval = rules.fallback_interval_s.clamp(
        crate::screen::rules::FALLBACK_INTERVAL_MIN_S,
        crate::screen::rules::FALLBACK_INTERVAL_MAX_S,
    );
    if since_last_pass_s >= interval {
        return GateDecision {
            action: GateAction::Fallback,
            confidence: 0.5,
            matched_rules: Vec::new(),
            reason: format!("no pass for {since_last_pass_s}s (interval {interval}s)"),
        };
    }

    // §2.3 / §2.4 — regime ratio, fail-closed on anything malformed.
    let Some(conditions) = rules.regime_rules.get(&snapshot.market_regime) else {
        return blocked(format!("no rules for regime '{}'", snapshot.market_regime));
    };
    if conditions.is_empty() {
        return blocked(format!("empty rule set for regime '{}'", snapshot.market_regime));
    }
    if conditions.iter().any(|c| !c.is_well_formed()) {
        return blocked(format!(
            "malformed rule set for regime '{}'",
            snapshot.market_regime
        ));
    }

    let matched: Vec<String> = conditions
        .iter()
        .filter(|c| condition_matches(c, snapshot))
        .map(|c| c.id.clone())
        .collect();
    let confidence = matched.len() as f64 / conditions.len() as f64;

    let action = if confidence >= rules.borderline_threshold {
        GateAction::Pass
    } else if confidence > 0.0 {
        GateAction::Borderline
    } else {
        GateAction::Block
    };
    GateDecision {
        action,
        confidence,
        reason: format!(
            "{}/{} conditions for regime '{}'",
            matched.len(),
            conditions.len(),
            snapshot.market_regime
        ),
        matched_rules: matched,
    }
}

fn blocked(reason: String) -> GateDecision {
    GateDecision {
        action: GateAction::Block,
        confidence: 0.0,
        matched_rules: Vec::new(),
        reason,
    }
}

fn finite_abs_at_least(value: f64, threshold: f64) -> bool {
    value.is_finite() && value.abs() >= threshold
}

/// A condition matches only on a present field of the right type with a
/// finite value. Everything else is a non-match, never an error.
fn condition_matches(cond: &crate::screen::rules::RuleCondition, snapshot: &MarketSnapshot) -> bool {
    use crate::screen::rules::RuleCheck;
    match (&cond.check, snapshot.field(&cond.field)) {
        (RuleCheck::Range { min, max }, Some(FieldValue::Num(v))) => {
            v.is_finite() && v >= *min && v <= *max
        }
        (RuleCheck::AtLeast { min, abs }, Some(FieldValue::Num(v))) => {
            let v = if *abs { v.abs() } else { v };
            v.is_finite() && v >= *min
        }
        (RuleCheck::AtMost { max, abs }, Some(FieldValue::Num(v))) => {
            let v = if *abs { v.abs() } else { v };
            v.is_finite() && v <= *max
        }
        (RuleCheck::OneOf { values }, Some(FieldValue::Text(s))) => {
            values.iter().any(|x| x == &s)
        }
        _ => false,
    }
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// Rolling counters for the metrics flush; reset on snapshot.
#[derive(Debug, Default)]
pub struct ScreenMetrics {
    evaluations: u64,
    pass: u64,
    block: u64,
    borderline: u64,
    fallback: u64,
    confidence_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenMetricsSnapshot {
    pub evaluations: u64,
    pub pass: u64,
    pub block: u64,
    pub borderline: u64,
    pub fallback: u64,
    pub avg_confidence: f64,
}

impl ScreenMetrics {
    pub fn record(&mut self, decision: &GateDecision) {
        self.evaluations += 1;
        self.confidence_sum += decision.confidence;
        match decision.action {
            GateAction::Pass => self.pass += 1,
            GateAction::Block => self.block += 1,
            GateAction::Borderline => self.borderline += 1,
            GateAction::Fallback => self.fallback += 1,
        }
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn blocked(&self) -> u64 {
        self.block
    }

    pub fn snapshot_and_reset(&mut self) -> ScreenMetricsSnapshot {
        let avg = if self.evaluations > 0 {
            self.confidence_sum / self.evaluations as f64
        } else {
            0.0
        };
        let out = ScreenMetricsSnapshot {
            evaluations: self.evaluations,
            pass: self.pass,
            block: self.block,
            borderline: self.borderline,
            fallback: self.fallback,
            avg_confidence: avg,
        };
        *self = ScreenMetrics::default();
        out
    }
}
