//! Reflection engine: periodic rules revision from realized results.
//!
//! Triggered by trade count or elapsed time since the last completed
//! reflection. The agent proposes; the engine sanitizes, version-stamps,
//! persists, and publishes. A failed or malformed proposal keeps the
//! current version (CONTRACT.md §5.2) — reflection can only ever move the
//! tunable surface, never the hard rules.

use tracing::{info, warn};
use warden_core::screen::rules::SignalRules;

use crate::agents::reflect_bounded;
use crate::bus::channels;
use crate::performance;
use crate::runtime::{Orchestrator, now_ms};

impl Orchestrator {
    /// Run a reflection pass if either trigger is due; otherwise return
    /// immediately. Called at cycle end and after closes.
    pub async fn maybe_reflect(&self) {
        let now = now_ms();
        let (anchor_ts, closes_since) = {
            let Ok(journal) = self.journal.lock() else {
                return;
            };
            let anchor = journal
                .replay()
                .last_reflection
                .map(|(_, ts)| ts)
                .unwrap_or(self.boot_ms);
            (anchor, journal.closes_since(anchor).len() as u64)
        };

        let hours_elapsed = now.saturating_sub(anchor_ts) / 3_600_000;
        let due_by_trades = closes_since >= self.settings.reflection_min_trades;
        let due_by_time = hours_elapsed >= self.settings.reflection_max_hours && closes_since > 0;
        if !due_by_trades && !due_by_time {
            return;
        }
        info!(
            closes_since,
            hours_elapsed, "reflection due, revising rules from results"
        );
        self.reflect_now().await;
    }

    /// Unconditional reflection pass.
    pub async fn reflect_now(&self) {
        let pnls = self
            .journal
            .lock()
            .map(|j| j.replay().closed_pnls)
            .unwrap_or_default();
        let summary = performance::compute(&pnls);
        let closes = self
            .recent_closes
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();

        let current_version = self.current_rules().version;
        let proposal = reflect_bounded(
            self.decision_maker.as_ref(),
            &closes,
            &summary,
            self.settings.analyze_timeout_s,
        )
        .await;

        let adopted_version = match proposal {
            Some(proposal) => {
                let next = SignalRules {
                    version: current_version + 1,
                    regime_rules: proposal.regime_rules,
                    fallback_interval_s: proposal.fallback_interval_s,
                    borderline_threshold: proposal.borderline_threshold,
                    updated_by: "reflection".to_string(),
                }
                .sanitized();
                let version = next.version;
                match serde_json::to_value(&next) {
                    Ok(payload) => {
                        self.adopt_rules(next, "reflection").await;
                        if let Err(e) = self.bus.publish(channels::SIGNAL_RULES, payload).await {
                            warn!(error = %e, "rules publish failed");
                        }
                        version
                    }
                    Err(e) => {
                        warn!(error = %e, "rules encode failed, keeping current version");
                        current_version
                    }
                }
            }
            // Keep the current rules; still mark the reflection done so the
            // trigger does not fire on every subsequent cycle.
            None => current_version,
        };

        if let Ok(mut journal) = self.journal.lock() {
            if let Err(e) = journal.append_reflection(adopted_version, now_ms()) {
                warn!(error = %e, "reflection journal append failed");
            }
        }
        info!(
            version = adopted_version,
            trades = summary.total_trades,
            win_rate = summary.win_rate,
            "reflection completed"
        );
    }
}
