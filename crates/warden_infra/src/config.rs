//! Runtime configuration (CONTRACT.md §3.1 defaults).
//!
//! Every numeric parameter has a compiled-in default and may be overridden
//! through `WARDEN_<NAME>` environment variables. Overrides are validated
//! fail-closed: a non-finite, negative, or unparseable value is an error,
//! never silently replaced by the default.

use std::path::PathBuf;
use thiserror::Error;
use warden_core::risk::state::SafetyLimits;

/// Tunable numeric parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigParam {
    // Cycle timing
    DecisionCycleS,
    AnalyzeTimeoutS,
    ResearchTimeoutS,
    ConfirmTimeoutS,
    MetricsFlushS,

    // Signal gate
    FallbackIntervalS,
    BorderlineThreshold,

    // Risk breakers
    MaxDailyLossPct,
    MaxDrawdownPct,
    MaxPositions,
    MaxTotalExposurePct,
    MaxSingleTradePct,
    MaxLeverage,
    MaxSlDistancePct,
    MinRrRatio,
    MaxConsecutiveLosses,
    CooldownDurationS,

    // Reflection
    ReflectionMinTrades,
    ReflectionMaxHours,

    // Events
    EventLeadMinutes,

    // Account
    DefaultEquity,
}

pub const ALL_PARAMS: &[ConfigParam] = &[
    ConfigParam::DecisionCycleS,
    ConfigParam::AnalyzeTimeoutS,
    ConfigParam::ResearchTimeoutS,
    ConfigParam::ConfirmTimeoutS,
    ConfigParam::MetricsFlushS,
    ConfigParam::FallbackIntervalS,
    ConfigParam::BorderlineThreshold,
    ConfigParam::MaxDailyLossPct,
    ConfigParam::MaxDrawdownPct,
    ConfigParam::MaxPositions,
    ConfigParam::MaxTotalExposurePct,
    ConfigParam::MaxSingleTradePct,
    ConfigParam::MaxLeverage,
    ConfigParam::MaxSlDistancePct,
    ConfigParam::MinRrRatio,
    ConfigParam::MaxConsecutiveLosses,
    ConfigParam::CooldownDurationS,
    ConfigParam::ReflectionMinTrades,
    ConfigParam::ReflectionMaxHours,
    ConfigParam::EventLeadMinutes,
    ConfigParam::DefaultEquity,
];

pub fn param_name(param: ConfigParam) -> &'static str {
    match param {
        ConfigParam::DecisionCycleS => "decision_cycle_s",
        ConfigParam::AnalyzeTimeoutS => "analyze_timeout_s",
        ConfigParam::ResearchTimeoutS => "research_timeout_s",
        ConfigParam::ConfirmTimeoutS => "confirm_timeout_s",
        ConfigParam::MetricsFlushS => "metrics_flush_s",
        ConfigParam::FallbackIntervalS => "fallback_interval_s",
        ConfigParam::BorderlineThreshold => "borderline_threshold",
        ConfigParam::MaxDailyLossPct => "max_daily_loss_pct",
        ConfigParam::MaxDrawdownPct => "max_drawdown_pct",
        ConfigParam::MaxPositions => "max_positions",
        ConfigParam::MaxTotalExposurePct => "max_total_exposure_pct",
        ConfigParam::MaxSingleTradePct => "max_single_trade_pct",
        ConfigParam::MaxLeverage => "max_leverage",
        ConfigParam::MaxSlDistancePct => "max_sl_distance_pct",
        ConfigParam::MinRrRatio => "min_rr_ratio",
        ConfigParam::MaxConsecutiveLosses => "max_consecutive_losses",
        ConfigParam::CooldownDurationS => "cooldown_duration_s",
        ConfigParam::ReflectionMinTrades => "reflection_min_trades",
        ConfigParam::ReflectionMaxHours => "reflection_max_hours",
        ConfigParam::EventLeadMinutes => "event_lead_minutes",
        ConfigParam::DefaultEquity => "default_equity",
    }
}

pub fn default_value(param: ConfigParam) -> f64 {
    match param {
        ConfigParam::DecisionCycleS => 300.0,
        ConfigParam::AnalyzeTimeoutS => 30.0,
        ConfigParam::ResearchTimeoutS => 15.0,
        ConfigParam::ConfirmTimeoutS => 30.0,
        ConfigParam::MetricsFlushS => 60.0,
        ConfigParam::FallbackIntervalS => 1800.0,
        ConfigParam::BorderlineThreshold => 0.4,
        ConfigParam::MaxDailyLossPct => 0.03,
        ConfigParam::MaxDrawdownPct => 0.10,
        ConfigParam::MaxPositions => 3.0,
        ConfigParam::MaxTotalExposurePct => 0.15,
        ConfigParam::MaxSingleTradePct => 0.05,
        ConfigParam::MaxLeverage => 3.0,
        ConfigParam::MaxSlDistancePct => 0.03,
        ConfigParam::MinRrRatio => 1.5,
        ConfigParam::MaxConsecutiveLosses => 3.0,
        ConfigParam::CooldownDurationS => 1800.0,
        ConfigParam::ReflectionMinTrades => 20.0,
        ConfigParam::ReflectionMaxHours => 6.0,
        ConfigParam::EventLeadMinutes => 30.0,
        ConfigParam::DefaultEquity => 10_000.0,
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("config {param}: {reason}")]
    Invalid {
        param: &'static str,
        reason: &'static str,
    },
    #[error("config {param}: cannot parse '{value}'")]
    Unparseable { param: &'static str, value: String },
}

/// Resolve one parameter against an optional override.
pub fn resolve_config_value(param: ConfigParam, value: Option<f64>) -> Result<f64, ConfigError> {
    match value {
        Some(v) if !v.is_finite() => Err(ConfigError::Invalid {
            param: param_name(param),
            reason: "non-finite; fail-closed",
        }),
        Some(v) if v < 0.0 => Err(ConfigError::Invalid {
            param: param_name(param),
            reason: "negative; all parameters are non-negative",
        }),
        Some(v) => Ok(v),
        None => Ok(default_value(param)),
    }
}

fn resolve_from_env(param: ConfigParam) -> Result<f64, ConfigError> {
    let var = format!("WARDEN_{}", param_name(param).to_uppercase());
    let raw = match std::env::var(&var) {
        Ok(raw) => raw,
        Err(_) => return resolve_config_value(param, None),
    };
    let parsed: f64 = raw.parse().map_err(|_| ConfigError::Unparseable {
        param: param_name(param),
        value: raw,
    })?;
    resolve_config_value(param, Some(parsed))
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Instruments, each with its own cycle driver.
    pub instruments: Vec<String>,
    pub decision_cycle_s: u64,
    pub analyze_timeout_s: u64,
    pub research_timeout_s: u64,
    pub confirm_timeout_s: u64,
    pub metrics_flush_s: u64,
    pub fallback_interval_s: u64,
    pub borderline_threshold: f64,
    pub limits: SafetyLimits,
    pub reflection_min_trades: u64,
    pub reflection_max_hours: u64,
    pub event_lead_minutes: i64,
    /// Equity assumed until the first account message arrives.
    pub default_equity: f64,
    /// JSONL safety journal; in-memory when unset.
    pub journal_path: Option<PathBuf>,
    /// JSONL rules version store; in-memory when unset.
    pub rules_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::build(default_value)
    }
}

impl Settings {
    /// Load from the environment, fail-closed on any bad override.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut resolved = std::collections::HashMap::new();
        for &param in ALL_PARAMS {
            resolved.insert(param_name(param), resolve_from_env(param)?);
        }
        let mut settings = Settings::build(|p| resolved[param_name(p)]);
        if let Ok(raw) = std::env::var("WARDEN_INSTRUMENTS") {
            let instruments: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !instruments.is_empty() {
                settings.instruments = instruments;
            }
        }
        settings.journal_path = std::env::var("WARDEN_JOURNAL_PATH").ok().map(PathBuf::from);
        settings.rules_path = std::env::var("WARDEN_RULES_PATH").ok().map(PathBuf::from);
        Ok(settings)
    }

    fn build(mut get: impl FnMut(ConfigParam) -> f64) -> Self {
        Settings {
            instruments: vec!["BTC-PERP".to_string()],
            decision_cycle_s: get(ConfigParam::DecisionCycleS) as u64,
            analyze_timeout_s: get(ConfigParam::AnalyzeTimeoutS) as u64,
            research_timeout_s: get(ConfigParam::ResearchTimeoutS) as u64,
            confirm_timeout_s: get(ConfigParam::ConfirmTimeoutS) as u64,
            metrics_flush_s: get(ConfigParam::MetricsFlushS) as u64,
            fallback_interval_s: get(ConfigParam::FallbackIntervalS) as u64,
            borderline_threshold: get(ConfigParam::BorderlineThreshold),
            limits: SafetyLimits {
                max_daily_loss_pct: get(ConfigParam::MaxDailyLossPct),
                max_drawdown_pct: get(ConfigParam::MaxDrawdownPct),
                max_positions: get(ConfigParam::MaxPositions) as usize,
                max_total_exposure_pct: get(ConfigParam::MaxTotalExposurePct),
                max_single_trade_pct: get(ConfigParam::MaxSingleTradePct),
                max_leverage: get(ConfigParam::MaxLeverage),
                max_sl_distance_pct: get(ConfigParam::MaxSlDistancePct),
                min_rr_ratio: get(ConfigParam::MinRrRatio),
                max_consecutive_losses: get(ConfigParam::MaxConsecutiveLosses) as u32,
                cooldown_duration_s: get(ConfigParam::CooldownDurationS) as u64,
            },
            reflection_min_trades: get(ConfigParam::ReflectionMinTrades) as u64,
            reflection_max_hours: get(ConfigParam::ReflectionMaxHours) as u64,
            event_lead_minutes: get(ConfigParam::EventLeadMinutes) as i64,
            default_equity: get(ConfigParam::DefaultEquity),
            journal_path: None,
            rules_path: None,
        }
    }
}
