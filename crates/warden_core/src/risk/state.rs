//! Safety state: loss counters, cooldowns, equity marks, and the halt
//! latch.
//!
//! Every mutation is expressible as a `SafetyEvent`, and the state is a
//! pure fold over those events. Live updates and journal replay go through
//! the same `apply`, so a restart reconstructs exactly the state a
//! continuous process would hold (CONTRACT.md §5.1).

use serde::{Deserialize, Serialize};

// ─── Limits ──────────────────────────────────────────────────────────────────

/// Operator-tunable breaker thresholds (CONTRACT.md §3.1 defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Daily loss fraction that trips a HALT (inclusive).
    pub max_daily_loss_pct: f64,
    /// Drawdown from peak equity that trips a HALT (inclusive).
    pub max_drawdown_pct: f64,
    /// Open position count at or above this rejects new entries.
    pub max_positions: usize,
    /// Total notional exposure as a fraction of equity (inclusive).
    pub max_total_exposure_pct: f64,
    /// Single trade size as a fraction of equity (inclusive).
    pub max_single_trade_pct: f64,
    /// Leverage at or above this rejects (inclusive).
    pub max_leverage: f64,
    /// Stop distance from entry as a fraction of entry (inclusive).
    pub max_sl_distance_pct: f64,
    /// Reward:risk below this rejects.
    pub min_rr_ratio: f64,
    /// Consecutive losing closes that trigger a cooldown.
    pub max_consecutive_losses: u32,
    /// Cooldown length after a loss streak, seconds.
    pub cooldown_duration_s: u64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        SafetyLimits {
            max_daily_loss_pct: 0.03,
            max_drawdown_pct: 0.10,
            max_positions: 3,
            max_total_exposure_pct: 0.15,
            max_single_trade_pct: 0.05,
            max_leverage: 3.0,
            max_sl_distance_pct: 0.03,
            min_rr_ratio: 1.5,
            max_consecutive_losses: 3,
            cooldown_duration_s: 1800,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Why submission is latched off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum HaltReason {
    DailyLoss,
    MaxDrawdown,
    Manual { reason: String },
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::DailyLoss => "daily_loss",
            HaltReason::MaxDrawdown => "max_drawdown",
            HaltReason::Manual { .. } => "manual",
        }
    }
}

/// Journalable safety-state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SafetyEvent {
    TradeClosed {
        pnl: f64,
        equity_after: f64,
        ts_ms: u64,
    },
    DailyReset {
        equity: f64,
        day_id: i64,
    },
    HaltSet {
        reason: HaltReason,
        ts_ms: u64,
    },
    HaltCleared {
        ts_ms: u64,
    },
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    pub consecutive_losses: u32,
    /// Entry submission blocked until this instant, if set.
    pub cooldown_until_ms: Option<u64>,
    /// High-water equity mark for the drawdown breaker.
    pub peak_equity: f64,
    /// Equity at the last daily reset.
    pub daily_start_equity: f64,
    /// UTC day (days since epoch) of the last reset; makes resets
    /// idempotent per day (CONTRACT.md §3.5).
    pub day_id: i64,
    /// Latched halt. Cleared only by administrative resume
    /// (CONTRACT.md §3.3).
    pub halted: Option<HaltReason>,
}

impl SafetyState {
    pub fn new(starting_equity: f64, day_id: i64) -> Self {
        SafetyState {
            consecutive_losses: 0,
            cooldown_until_ms: None,
            peak_equity: starting_equity,
            daily_start_equity: starting_equity,
            day_id,
            halted: None,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        matches!(self.cooldown_until_ms, Some(until) if now_ms < until)
    }

    /// Apply one event. Total over all inputs; replay never panics.
    pub fn apply(&mut self, event: &SafetyEvent, limits: &SafetyLimits) {
        match event {
            SafetyEvent::TradeClosed {
                pnl,
                equity_after,
                ts_ms,
            } => {
                if *pnl < 0.0 {
                    self.consecutive_losses += 1;
                    if self.consecutive_losses >= limits.max_consecutive_losses {
                        self.cooldown_until_ms =
                            Some(ts_ms + limits.cooldown_duration_s * 1000);
                    }
                } else {
                    self.consecutive_losses = 0;
                }
                if equity_after.is_finite() && *equity_after > self.peak_equity {
                    self.peak_equity = *equity_after;
                }
            }
            SafetyEvent::DailyReset { equity, day_id } => {
                if *day_id != self.day_id {
                    self.day_id = *day_id;
                    if equity.is_finite() && *equity > 0.0 {
                        self.daily_start_equity = *equity;
                    }
                    self.cooldown_until_ms = None;
                }
            }
            SafetyEvent::HaltSet { reason, .. } => {
                // First cause wins; a second trip while halted keeps it.
                if self.halted.is_none() {
                    self.halted = Some(reason.clone());
                }
            }
            SafetyEvent::HaltCleared { .. } => {
                self.halted = None;
            }
        }
    }

    /// Fold a journal's event stream into a fresh state.
    pub fn rebuild(
        starting_equity: f64,
        day_id: i64,
        events: &[SafetyEvent],
        limits: &SafetyLimits,
    ) -> Self {
        let mut state = SafetyState::new(starting_equity, day_id);
        for event in events {
            state.apply(event, limits);
        }
        state
    }
}
