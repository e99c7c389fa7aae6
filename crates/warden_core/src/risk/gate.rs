//! Risk gate: deterministic circuit breakers between an approved analysis
//! decision and order submission (CONTRACT.md §3).
//!
//! All rules run on every call and every failure is reported
//! (CONTRACT.md §3.2). The gate owns the `SafetyState`; callers journal the
//! `SafetyEvent`s it hands back so the latch and counters survive restarts.

use crate::cycle::decision::{DecisionAction, TradeDecision};
use crate::lifecycle::Position;
use crate::risk::state::{HaltReason, SafetyEvent, SafetyLimits, SafetyState};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Account margin view from the account channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: f64,
    pub available_balance: f64,
}

pub struct RiskInput<'a> {
    pub decision: &'a TradeDecision,
    pub account: &'a AccountState,
    pub open_positions: &'a [Position],
    /// Mark price used when the decision carries no entry price.
    pub mark_price: f64,
    pub now_ms: u64,
}

// ─── Rules ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRule {
    DailyLoss,
    MaxDrawdown,
    PositionCount,
    TotalExposure,
    TradeSize,
    Leverage,
    StopLoss,
    SlDistance,
    RrRatio,
    Correlation,
    Cooldown,
    Malformed,
}

impl RiskRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRule::DailyLoss => "daily_loss",
            RiskRule::MaxDrawdown => "max_drawdown",
            RiskRule::PositionCount => "position_count",
            RiskRule::TotalExposure => "total_exposure",
            RiskRule::TradeSize => "trade_size",
            RiskRule::Leverage => "leverage",
            RiskRule::StopLoss => "stop_loss",
            RiskRule::SlDistance => "sl_distance",
            RiskRule::RrRatio => "rr_ratio",
            RiskRule::Correlation => "correlation",
            RiskRule::Cooldown => "cooldown",
            RiskRule::Malformed => "malformed",
        }
    }
}

/// One rule outcome, with the numeric values that drove it
/// (CONTRACT.md §7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub rule: RiskRule,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub approved: bool,
    pub failures: Vec<RiskCheck>,
    pub warnings: Vec<RiskCheck>,
    /// Newly latched halt, if this evaluation tripped one. The caller
    /// journals it and raises the alert; the latch itself is already set.
    pub halt: Option<HaltReason>,
}

impl RiskResult {
    fn approved() -> Self {
        RiskResult {
            approved: true,
            failures: Vec::new(),
            warnings: Vec::new(),
            halt: None,
        }
    }

    pub fn failed_rules(&self) -> Vec<&'static str> {
        self.failures.iter().map(|c| c.rule.as_str()).collect()
    }
}

// ─── Gate ────────────────────────────────────────────────────────────────────

pub struct RiskGate {
    limits: SafetyLimits,
    state: SafetyState,
}

impl RiskGate {
    pub fn new(limits: SafetyLimits, state: SafetyState) -> Self {
        RiskGate { limits, state }
    }

    /// Rebuild from a replayed journal (CONTRACT.md §5.1).
    pub fn from_history(
        limits: SafetyLimits,
        starting_equity: f64,
        day_id: i64,
        events: &[SafetyEvent],
    ) -> Self {
        let state = SafetyState::rebuild(starting_equity, day_id, events, &limits);
        RiskGate { limits, state }
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    pub fn halted_reason(&self) -> Option<&HaltReason> {
        self.state.halted.as_ref()
    }

    /// Run every breaker against a candidate decision.
    pub fn validate(&mut self, input: &RiskInput<'_>, metrics: &mut RiskMetrics) -> RiskResult {
        // Risk-reducing actions are never blocked by entry checks
        // (CONTRACT.md §3.2). Account-level halts are latched by the close
        // path, not here.
        if matches!(
            input.decision.action,
            DecisionAction::Hold | DecisionAction::Close
        ) {
            metrics.record_approved();
            return RiskResult::approved();
        }

        let equity = input.account.equity;
        if !equity.is_finite() || equity <= 0.0 {
            let result = RiskResult {
                approved: false,
                failures: vec![check(
                    RiskRule::Malformed,
                    format!("non-positive or non-finite equity {equity}"),
                )],
                warnings: Vec::new(),
                halt: None,
            };
            metrics.record_rejected(&result);
            return result;
        }

        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        // daily_loss — inclusive boundary, trips the halt latch (§3.3).
        let daily_pnl = equity - self.state.daily_start_equity;
        let daily_loss_pct = if self.state.daily_start_equity > 0.0 {
            -daily_pnl / self.state.daily_start_equity
        } else {
            0.0
        };
        if daily_loss_pct >= self.limits.max_daily_loss_pct {
            failures.push(check(
                RiskRule::DailyLoss,
                format!(
                    "daily loss {:.4} >= limit {:.4}",
                    daily_loss_pct, self.limits.max_daily_loss_pct
                ),
            ));
        }

        // max_drawdown — peak is marked up before the comparison.
        if equity > self.state.peak_equity {
            self.state.peak_equity = equity;
        }
        let drawdown = if self.state.peak_equity > 0.0 {
            (self.state.peak_equity - equity) / self.state.peak_equity
        } else {
            0.0
        };
        if drawdown >= self.limits.max_drawdown_pct {
            failures.push(check(
                RiskRule::MaxDrawdown,
                format!(
                    "drawdown {:.4} from peak {:.2} >= limit {:.4}",
                    drawdown, self.state.peak_equity, self.limits.max_drawdown_pct
                ),
            ));
        }

        // cooldown — expires lazily.
        if self.state.in_cooldown(input.now_ms) {
            let until = self.state.cooldown_until_ms.unwrap_or(input.now_ms);
            failures.push(check(
                RiskRule::Cooldown,
                format!(
                    "loss-streak cooldown active for {}s more",
                    until.saturating_sub(input.now_ms) / 1000
                ),
            ));
        } else if self.state.cooldown_until_ms.is_some() {
            self.state.cooldown_until_ms = None;
        }

        // position_count
        let open = input.open_positions.len();
        if open >= self.limits.max_positions {
            failures.push(check(
                RiskRule::PositionCount,
                format!("{open} open positions >= limit {}", self.limits.max_positions),
            ));
        }

        // trade_size
        let size_pct = input.decision.size_pct;
        if !size_pct.is_finite() || size_pct >= self.limits.max_single_trade_pct {
            failures.push(check(
                RiskRule::TradeSize,
                format!(
                    "size {:.4} of equity >= limit {:.4}",
                    size_pct, self.limits.max_single_trade_pct
                ),
            ));
        }

        // leverage
        let leverage = input.decision.leverage;
        if !leverage.is_finite() || leverage >= self.limits.max_leverage {
            failures.push(check(
                RiskRule::Leverage,
                format!(
                    "leverage {:.2}x >= limit {:.2}x",
                    leverage, self.limits.max_leverage
                ),
            ));
        }

        // total_exposure — existing position notional against equity. The
        // candidate's own notional is capped separately by trade_size.
        let existing: f64 = input.open_positions.iter().map(|p| p.notional_usd.abs()).sum();
        let exposure_pct = existing / equity;
        if exposure_pct >= self.limits.max_total_exposure_pct {
            failures.push(check(
                RiskRule::TotalExposure,
                format!(
                    "exposure {:.4} of equity >= limit {:.4}",
                    exposure_pct, self.limits.max_total_exposure_pct
                ),
            ));
        }

        // stop_loss / sl_distance / rr_ratio
        let entry = input
            .decision
            .entry_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(input.mark_price);
        match input.decision.stop_loss {
            None => {
                failures.push(check(RiskRule::StopLoss, "entry without a stop loss".into()));
            }
            Some(sl) if !sl.is_finite() || sl <= 0.0 => {
                failures.push(check(
                    RiskRule::StopLoss,
                    format!("non-positive or non-finite stop loss {sl}"),
                ));
            }
            Some(sl) => {
                if entry.is_finite() && entry > 0.0 {
                    let distance = (entry - sl).abs() / entry;
                    if distance >= self.limits.max_sl_distance_pct {
                        failures.push(check(
                            RiskRule::SlDistance,
                            format!(
                                "stop distance {:.4} from entry >= limit {:.4}",
                                distance, self.limits.max_sl_distance_pct
                            ),
                        ));
                    }
                    if let Some(tp) = input.decision.take_profit.filter(|p| p.is_finite()) {
                        let (risk, reward) = match input.decision.action {
                            DecisionAction::OpenShort => (sl - entry, entry - tp),
                            _ => (entry - sl, tp - entry),
                        };
                        if risk <= 0.0 {
                            failures.push(check(
                                RiskRule::RrRatio,
                                "stop loss on the wrong side of entry".into(),
                            ));
                        } else if reward / risk < self.limits.min_rr_ratio {
                            failures.push(check(
                                RiskRule::RrRatio,
                                format!(
                                    "reward:risk {:.2} < limit {:.2}",
                                    reward / risk,
                                    self.limits.min_rr_ratio
                                ),
                            ));
                        }
                    }
                } else {
                    failures.push(check(
                        RiskRule::SlDistance,
                        format!("no usable entry price (mark {})", input.mark_price),
                    ));
                }
            }
        }

        // correlation — same-symbol overlap is a warning, never a reject.
        if input
            .open_positions
            .iter()
            .any(|p| p.instrument == input.decision.instrument)
        {
            warnings.push(check(
                RiskRule::Correlation,
                format!("existing position on {}", input.decision.instrument),
            ));
        }

        // Latch a halt if an account-level breaker tripped (§3.3).
        let mut halt = None;
        for cause in [
            (RiskRule::DailyLoss, HaltReason::DailyLoss),
            (RiskRule::MaxDrawdown, HaltReason::MaxDrawdown),
        ] {
            if failures.iter().any(|f| f.rule == cause.0) && self.state.halted.is_none() {
                warn!(rule = cause.0.as_str(), "halt latched");
                self.state.halted = Some(cause.1.clone());
                halt = Some(cause.1);
                break;
            }
        }

        let result = RiskResult {
            approved: failures.is_empty(),
            failures,
            warnings,
            halt,
        };
        if result.approved {
            metrics.record_approved();
        } else {
            metrics.record_rejected(&result);
        }
        result
    }

    /// Fold a confirmed close into the loss streak and equity marks
    /// (CONTRACT.md §3.4). Returns the event for the journal.
    pub fn update_on_trade_close(&mut self, pnl: f64, equity_after: f64, ts_ms: u64) -> SafetyEvent {
        let event = SafetyEvent::TradeClosed {
            pnl,
            equity_after,
            ts_ms,
        };
        self.state.apply(&event, &self.limits);
        event
    }

    /// Daily reset, idempotent per UTC day (CONTRACT.md §3.5).
    pub fn reset_daily(&mut self, equity: f64, day_id: i64) -> Option<SafetyEvent> {
        if day_id == self.state.day_id {
            return None;
        }
        let event = SafetyEvent::DailyReset { equity, day_id };
        self.state.apply(&event, &self.limits);
        Some(event)
    }

    /// Administrative halt.
    pub fn halt_manual(&mut self, reason: String, ts_ms: u64) -> Option<SafetyEvent> {
        if self.state.halted.is_some() {
            return None;
        }
        let event = SafetyEvent::HaltSet {
            reason: HaltReason::Manual { reason },
            ts_ms,
        };
        self.state.apply(&event, &self.limits);
        Some(event)
    }

    /// Administrative resume; the only way a halt clears.
    pub fn resume(&mut self, ts_ms: u64) -> Option<SafetyEvent> {
        if self.state.halted.is_none() {
            return None;
        }
        let event = SafetyEvent::HaltCleared { ts_ms };
        self.state.apply(&event, &self.limits);
        Some(event)
    }
}

fn check(rule: RiskRule, reason: String) -> RiskCheck {
    RiskCheck { rule, reason }
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RiskMetrics {
    approved: u64,
    rejected: u64,
    halts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetricsSnapshot {
    pub approved: u64,
    pub rejected: u64,
    pub halts: u64,
}

impl RiskMetrics {
    fn record_approved(&mut self) {
        self.approved += 1;
    }

    fn record_rejected(&mut self, result: &RiskResult) {
        self.rejected += 1;
        if result.halt.is_some() {
            self.halts += 1;
        }
    }

    pub fn approved(&self) -> u64 {
        self.approved
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn snapshot_and_reset(&mut self) -> RiskMetricsSnapshot {
        let out = RiskMetricsSnapshot {
            approved: self.approved,
            rejected: self.rejected,
            halts: self.halts,
        };
        *self = RiskMetrics::default();
        out
    }
}
