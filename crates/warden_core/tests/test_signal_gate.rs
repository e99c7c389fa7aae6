//! Signal gate tests per CONTRACT.md §2.
//!
//! Evaluation order (always-send, fallback, regime ratio), fail-closed
//! handling of malformed rule sets, and the immutable clamp bounds.

use std::collections::BTreeMap;
use warden_core::screen::gate::{GateAction, evaluate};
use warden_core::screen::rules::{
    FALLBACK_INTERVAL_MAX_S, FALLBACK_INTERVAL_MIN_S, RuleCheck, RuleCondition, SignalRules,
};
use warden_core::snapshot::{FieldValue, MarketSnapshot};

/// Helper: quiet snapshot in a given regime with the given named fields.
fn snapshot(regime: &str, fields: &[(&str, FieldValue)]) -> MarketSnapshot {
    MarketSnapshot {
        instrument: "BTC-PERP".to_string(),
        price: 50_000.0,
        price_change_1h: 0.001,
        funding_rate: 0.0001,
        oi_change_4h: 0.01,
        market_regime: regime.to_string(),
        anomaly: false,
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        timestamp_ms: 1_000,
    }
}

fn num(v: f64) -> FieldValue {
    FieldValue::Num(v)
}

fn text(v: &str) -> FieldValue {
    FieldValue::Text(v.to_string())
}

/// Rules with one regime and the given conditions.
fn rules_with(regime: &str, conditions: Vec<RuleCondition>) -> SignalRules {
    let mut rules = SignalRules::baseline();
    rules.regime_rules = BTreeMap::from([(regime.to_string(), conditions)]);
    rules
}

fn cond(id: &str, field: &str, check: RuleCheck) -> RuleCondition {
    RuleCondition {
        id: id.to_string(),
        field: field.to_string(),
        check,
    }
}

// ─── Always-send (§2.1) ─────────────────────────────────────────────────

#[test]
fn test_funding_spike_passes_unconditionally() {
    let mut snap = snapshot("ranging", &[]);
    snap.funding_rate = -0.0006;
    let decision = evaluate(&snap, &SignalRules::baseline(), 0);
    assert_eq!(decision.action, GateAction::Pass);
    assert_eq!(decision.confidence, 1.0);
    assert!(
        decision
            .matched_rules
            .contains(&"always_send_funding_rate".to_string())
    );
}

#[test]
fn test_price_move_at_threshold_passes() {
    // Inclusive boundary.
    let mut snap = snapshot("unknown_regime", &[]);
    snap.price_change_1h = -0.03;
    let decision = evaluate(&snap, &SignalRules::baseline(), 0);
    assert_eq!(decision.action, GateAction::Pass);
    assert_eq!(decision.confidence, 1.0);
}

#[test]
fn test_oi_move_beats_missing_regime() {
    // Always-send wins even where the regime ratio would block.
    let mut snap = snapshot("no_such_regime", &[]);
    snap.oi_change_4h = 0.11;
    let decision = evaluate(&snap, &SignalRules::baseline(), 0);
    assert_eq!(decision.action, GateAction::Pass);
}

#[test]
fn test_non_finite_movement_does_not_trigger_always_send() {
    let mut snap = snapshot("ranging", &[]);
    snap.price_change_1h = f64::NAN;
    let decision = evaluate(&snap, &rules_with("other", vec![]), 0);
    assert_eq!(decision.action, GateAction::Block);
}

// ─── Fallback timer (§2.2) ──────────────────────────────────────────────

#[test]
fn test_fallback_after_interval() {
    let decision = evaluate(&snapshot("ranging", &[]), &SignalRules::baseline(), 1_800);
    assert_eq!(decision.action, GateAction::Fallback);
    assert_eq!(decision.confidence, 0.5);
    assert!(decision.matched_rules.is_empty());
}

#[test]
fn test_fallback_interval_clamped_low() {
    // A publisher cannot shrink the interval below the floor.
    let mut rules = SignalRules::baseline();
    rules.fallback_interval_s = 60;
    let rules = rules.sanitized();
    assert_eq!(rules.fallback_interval_s, FALLBACK_INTERVAL_MIN_S);

    let decision = evaluate(&snapshot("nowhere", &[]), &rules, 899);
    assert_ne!(decision.action, GateAction::Fallback);
    let decision = evaluate(&snapshot("nowhere", &[]), &rules, 900);
    assert_eq!(decision.action, GateAction::Fallback);
}

#[test]
fn test_fallback_interval_clamped_high() {
    let mut rules = SignalRules::baseline();
    rules.fallback_interval_s = 86_400;
    assert_eq!(rules.sanitized().fallback_interval_s, FALLBACK_INTERVAL_MAX_S);
}

#[test]
fn test_unsanitized_interval_still_clamped_at_evaluation() {
    // Belt and suspenders: a value that skipped `sanitized()` cannot
    // widen the window either.
    let mut rules = SignalRules::baseline();
    rules.fallback_interval_s = 10_000;
    let decision = evaluate(&snapshot("nowhere", &[]), &rules, 3_600);
    assert_eq!(decision.action, GateAction::Fallback);
}

// ─── Regime ratio + classification (§2.3) ───────────────────────────────

fn five_conditions() -> Vec<RuleCondition> {
    vec![
        cond("c1", "ema_alignment", RuleCheck::OneOf { values: vec!["bullish".to_string()] }),
        cond("c2", "rsi", RuleCheck::Range { min: 40.0, max: 70.0 }),
        cond("c3", "adx", RuleCheck::AtLeast { min: 25.0, abs: false }),
        cond("c4", "volume_ratio", RuleCheck::AtLeast { min: 1.0, abs: false }),
        cond("c5", "macd_signal", RuleCheck::OneOf { values: vec!["bullish".to_string()] }),
    ]
}

#[test]
fn test_three_of_five_passes() {
    let rules = rules_with("trending_up", five_conditions());
    let snap = snapshot(
        "trending_up",
        &[
            ("ema_alignment", text("bullish")),
            ("rsi", num(55.0)),
            ("adx", num(30.0)),
            ("volume_ratio", num(0.5)),
            ("macd_signal", text("bearish")),
        ],
    );
    let decision = evaluate(&snap, &rules, 0);
    assert_eq!(decision.action, GateAction::Pass);
    assert!((decision.confidence - 0.6).abs() < 1e-12);
    assert_eq!(decision.matched_rules, ["c1", "c2", "c3"]);
}

#[test]
fn test_one_of_five_is_borderline() {
    let rules = rules_with("trending_up", five_conditions());
    let snap = snapshot("trending_up", &[("rsi", num(55.0))]);
    let decision = evaluate(&snap, &rules, 0);
    assert_eq!(decision.action, GateAction::Borderline);
    assert!((decision.confidence - 0.2).abs() < 1e-12);
    // BORDERLINE proceeds like PASS; the cycle does not end here.
    assert!(decision.action.proceeds());
}

#[test]
fn test_zero_matches_blocks() {
    let rules = rules_with("trending_up", five_conditions());
    let decision = evaluate(&snapshot("trending_up", &[]), &rules, 0);
    assert_eq!(decision.action, GateAction::Block);
    assert_eq!(decision.confidence, 0.0);
    assert!(!decision.action.proceeds());
}

#[test]
fn test_missing_field_never_matches() {
    let rules = rules_with(
        "ranging",
        vec![cond("only", "nonexistent_field", RuleCheck::AtLeast { min: 0.0, abs: false })],
    );
    let decision = evaluate(&snapshot("ranging", &[]), &rules, 0);
    assert_eq!(decision.action, GateAction::Block);
}

#[test]
fn test_type_mismatch_never_matches() {
    // Categorical check against a numeric field: non-match, not a crash.
    let rules = rules_with(
        "ranging",
        vec![cond("c", "rsi", RuleCheck::OneOf { values: vec!["high".to_string()] })],
    );
    let snap = snapshot("ranging", &[("rsi", num(80.0))]);
    assert_eq!(evaluate(&snap, &rules, 0).action, GateAction::Block);
}

// ─── Fail-closed (§2.4) ─────────────────────────────────────────────────

#[test]
fn test_missing_regime_blocks() {
    let decision = evaluate(
        &snapshot("never_configured", &[]),
        &SignalRules::baseline(),
        0,
    );
    assert_eq!(decision.action, GateAction::Block);
    assert_eq!(decision.confidence, 0.0);
}

#[test]
fn test_empty_rule_set_blocks() {
    let rules = rules_with("ranging", vec![]);
    assert_eq!(evaluate(&snapshot("ranging", &[]), &rules, 0).action, GateAction::Block);
}

#[test]
fn test_malformed_condition_blocks_whole_set() {
    // One bad condition poisons the set: zero matches, even though the
    // well-formed condition would have matched.
    let rules = rules_with(
        "ranging",
        vec![
            cond("good", "rsi", RuleCheck::AtMost { max: 35.0, abs: false }),
            cond("bad", "adx", RuleCheck::Range { min: f64::NAN, max: 10.0 }),
        ],
    );
    let snap = snapshot("ranging", &[("rsi", num(20.0)), ("adx", num(5.0))]);
    let decision = evaluate(&snap, &rules, 0);
    assert_eq!(decision.action, GateAction::Block);
    assert_eq!(decision.confidence, 0.0);
}

#[test]
fn test_borderline_threshold_sanitized() {
    let mut rules = SignalRules::baseline();
    rules.borderline_threshold = f64::NAN;
    assert_eq!(rules.sanitized().borderline_threshold, 0.4);

    let mut rules = SignalRules::baseline();
    rules.borderline_threshold = 7.0;
    assert_eq!(rules.sanitized().borderline_threshold, 0.4);
}
