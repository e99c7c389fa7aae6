//! Performance summary over closed trades.
//!
//! Feeds the reflection prompt and the metrics flush. The Sharpe figure is
//! the simplified per-trade version (mean/stddev of trade PnL), not an
//! annualized portfolio number.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// 0.0 when there are no trades.
    pub win_rate: f64,
    /// Gross profit / gross loss; infinity when there are profits but no
    /// losses.
    pub profit_factor: f64,
    pub sharpe: f64,
    pub total_pnl: f64,
    /// Largest peak-to-trough drop of the cumulative PnL curve.
    pub max_drawdown: f64,
}

/// Compute the summary from closed-trade PnLs in close order.
pub fn compute(pnls: &[f64]) -> PerformanceSummary {
    let total_trades = pnls.len();
    let wins = pnls.iter().filter(|p| **p > 0.0).count();
    let losses = pnls.iter().filter(|p| **p < 0.0).count();
    let win_rate = if total_trades > 0 {
        wins as f64 / total_trades as f64
    } else {
        0.0
    };

    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = -pnls.iter().filter(|p| **p < 0.0).sum::<f64>();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let total_pnl: f64 = pnls.iter().sum();

    let sharpe = if total_trades >= 2 {
        let mean = total_pnl / total_trades as f64;
        let variance = pnls.iter().map(|p| (p - mean).powi(2)).sum::<f64>()
            / (total_trades - 1) as f64;
        let stddev = variance.sqrt();
        if stddev > 0.0 { mean / stddev } else { 0.0 }
    } else {
        0.0
    };

    let mut peak = 0.0f64;
    let mut cumulative = 0.0f64;
    let mut max_drawdown = 0.0f64;
    for pnl in pnls {
        cumulative += pnl;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    PerformanceSummary {
        total_trades,
        wins,
        losses,
        win_rate,
        profit_factor,
        sharpe,
        total_pnl,
        max_drawdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_all_zero() {
        let summary = compute(&[]);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.profit_factor, 0.0);
        assert_eq!(summary.sharpe, 0.0);
    }

    #[test]
    fn mixed_history() {
        let summary = compute(&[100.0, -50.0, 200.0, -50.0]);
        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 2);
        assert_eq!(summary.win_rate, 0.5);
        assert_eq!(summary.profit_factor, 3.0);
        assert_eq!(summary.total_pnl, 200.0);
    }

    #[test]
    fn no_losses_means_infinite_profit_factor() {
        let summary = compute(&[10.0, 20.0]);
        assert!(summary.profit_factor.is_infinite());
    }

    #[test]
    fn drawdown_follows_the_cumulative_curve() {
        // Curve: 100, 40, 140, 60 -> worst drop 80 from the 140 peak.
        let summary = compute(&[100.0, -60.0, 100.0, -80.0]);
        assert_eq!(summary.max_drawdown, 80.0);
    }

    #[test]
    fn single_trade_has_no_sharpe() {
        assert_eq!(compute(&[42.0]).sharpe, 0.0);
    }
}
