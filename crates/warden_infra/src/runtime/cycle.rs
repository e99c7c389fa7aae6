//! One decision cycle, stage by stage (CONTRACT.md §1.1).
//!
//! The driver owns a fresh `CycleStateMachine` per cycle and walks it
//! through the whitelisted phases. Every external wait is bounded
//! (CONTRACT.md §1.2); every early exit maps to a taxonomy outcome so the
//! cycle log reads unambiguously.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use warden_core::cycle::decision::{
    DecisionAction, TradeDecision, compute_correlation_id, format_correlation_id,
};
use warden_core::cycle::state::{CyclePhase, CycleStateMachine};
use warden_core::risk::gate::{RiskInput, RiskResult};
use warden_core::screen::gate::{self, GateAction, GateDecision};
use warden_core::screen::rules::ALWAYS_SEND;
use warden_core::snapshot::MarketSnapshot;

use crate::agents::{AnalysisContext, analyze_bounded, research_bounded};
use crate::bus::channels;
use crate::bus::retry::{RetryPolicy, publish_with_backoff};
use crate::runtime::{AlertSeverity, FillMessage, OrderMessage, Orchestrator, now_ms};
use crate::store::journal::{DecisionAppend, DecisionRecord, FillConfirmation};
use crate::store::{FillRecord, InsertResult};

/// Terminal classification of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CycleOutcome {
    /// The halt latch is set; nothing ran.
    Halted,
    /// Loss-streak cooldown active; nothing ran.
    CooldownActive,
    /// No usable snapshot in COLLECTING (CONTRACT.md §1.4).
    NoSnapshot,
    /// Signal gate blocked; the analysis path was never invoked.
    ScreenedOut,
    /// Agent decided Hold (or degraded to it).
    Held,
    /// Agent decision failed structural validation.
    Invalid,
    /// Risk gate rejected the decision.
    Rejected,
    /// Order submitted and fill confirmed.
    Executed { correlation_id: String },
    /// Order submitted, confirmation window expired. Never resubmitted
    /// (CONTRACT.md §1.2).
    Indeterminate { correlation_id: String },
}

impl Orchestrator {
    /// Drive one full cycle for `instrument`.
    pub async fn run_cycle(&self, instrument: &str) -> CycleOutcome {
        let mut sm = CycleStateMachine::new();
        let now = now_ms();

        if self.is_halted() {
            sm.advance(CyclePhase::Halted);
            return CycleOutcome::Halted;
        }
        if self.in_cooldown(now) {
            sm.advance(CyclePhase::Cooldown);
            info!(instrument, "cooldown active, skipping cycle");
            return CycleOutcome::CooldownActive;
        }

        // ─── COLLECTING ──────────────────────────────────────────────
        sm.advance(CyclePhase::Collecting);
        let Some(snapshot) = self.collect_snapshot(instrument).await else {
            sm.advance(CyclePhase::Idle);
            return CycleOutcome::NoSnapshot;
        };
        self.refresh_account().await;

        // ─── SCREENING ───────────────────────────────────────────────
        sm.advance(CyclePhase::Screening);
        let gate_decision = self.screen(&snapshot, now);
        if !gate_decision.action.proceeds() {
            info!(
                instrument,
                confidence = gate_decision.confidence,
                reason = %gate_decision.reason,
                "screened out"
            );
            sm.advance(CyclePhase::Idle);
            return CycleOutcome::ScreenedOut;
        }

        // ─── RESEARCHING (optional) ──────────────────────────────────
        let research = if self.should_research(&snapshot) && self.research.is_some() {
            sm.advance(CyclePhase::Researching);
            let provider = self.research.as_ref().map(Arc::clone);
            match provider {
                Some(provider) => {
                    let query = format!("{instrument} market-moving news");
                    research_bounded(
                        provider.as_ref(),
                        &query,
                        self.settings.research_timeout_s,
                    )
                    .await
                }
                None => None,
            }
        } else {
            None
        };

        // ─── ANALYZING ───────────────────────────────────────────────
        sm.advance(CyclePhase::Analyzing);
        let ctx = self.build_context(&snapshot, research);
        let decision =
            analyze_bounded(self.decision_maker.as_ref(), &ctx, self.settings.analyze_timeout_s)
                .await;

        if self.is_halted() {
            // A listener latched a halt while we were waiting on the agent.
            sm.advance(CyclePhase::Halted);
            return CycleOutcome::Halted;
        }
        if decision.action == DecisionAction::Hold {
            sm.advance(CyclePhase::Reflecting);
            self.maybe_reflect().await;
            sm.advance(CyclePhase::Idle);
            return CycleOutcome::Held;
        }
        if let Err(e) = decision.validate() {
            warn!(instrument, error = %e, "agent decision failed validation");
            sm.advance(CyclePhase::Reflecting);
            sm.advance(CyclePhase::Idle);
            return CycleOutcome::Invalid;
        }

        // ─── RISK_CHECK ──────────────────────────────────────────────
        sm.advance(CyclePhase::RiskCheck);
        let seq = self.next_cycle_seq();
        let correlation_id = format_correlation_id(compute_correlation_id(&decision, seq));
        let risk_result = self.risk_check(&decision, snapshot.price, now);

        if let Some(halt) = &risk_result.halt {
            self.journal_safety(warden_core::risk::state::SafetyEvent::HaltSet {
                reason: halt.clone(),
                ts_ms: now_ms(),
            });
            self.publish_alert(
                AlertSeverity::Critical,
                "halt",
                serde_json::json!({
                    "cause": halt.as_str(),
                    "rules": risk_result.failed_rules(),
                    "reasons": risk_result.failures.iter().map(|f| f.reason.clone()).collect::<Vec<_>>(),
                }),
            )
            .await;
            sm.advance(CyclePhase::Halted);
            return CycleOutcome::Halted;
        }
        if !risk_result.approved {
            self.record_rejection(&correlation_id, instrument, &risk_result)
                .await;
            sm.advance(CyclePhase::Idle);
            return CycleOutcome::Rejected;
        }
        for warning in &risk_result.warnings {
            warn!(
                instrument,
                rule = warning.rule.as_str(),
                reason = %warning.reason,
                "risk warning"
            );
        }

        // ─── EXECUTING ───────────────────────────────────────────────
        sm.advance(CyclePhase::Executing);
        let order = OrderMessage {
            correlation_id: correlation_id.clone(),
            decision: decision.clone(),
            ts_ms: now_ms(),
        };
        let payload = match serde_json::to_value(&order) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(instrument, error = %e, "order encode failed");
                sm.advance(CyclePhase::Idle);
                return CycleOutcome::Invalid;
            }
        };
        if let Err(e) = publish_with_backoff(
            self.bus.as_ref(),
            channels::TRADE_ORDERS,
            payload,
            RetryPolicy::default(),
        )
        .await
        {
            warn!(instrument, error = %e, "order publish failed, abandoning cycle");
            sm.advance(CyclePhase::Idle);
            return CycleOutcome::Rejected;
        }
        info!(instrument, correlation_id, action = decision.action.as_str(), "order submitted");

        // ─── CONFIRMING ──────────────────────────────────────────────
        sm.advance(CyclePhase::Confirming);
        let fill = self
            .wait_for_fill(instrument, &correlation_id, self.settings.confirm_timeout_s)
            .await;
        if fill.is_none() {
            warn!(
                instrument,
                correlation_id, "confirmation window expired; order fate indeterminate"
            );
        }

        // ─── JOURNALING ──────────────────────────────────────────────
        sm.advance(CyclePhase::Journaling);
        let record = DecisionRecord {
            correlation_id: correlation_id.clone(),
            instrument: instrument.to_string(),
            decision,
            gate_action: gate_decision.action,
            gate_confidence: gate_decision.confidence,
            risk_approved: true,
            fill: fill.clone(),
            ts_ms: now_ms(),
        };
        match self.journal.lock() {
            Ok(mut journal) => match journal.append_decision(record) {
                Ok(DecisionAppend::Journaled) => {}
                Ok(DecisionAppend::Duplicate) => {
                    info!(correlation_id, "decision already journaled, skipping")
                }
                Err(e) => warn!(correlation_id, error = %e, "decision journal append failed"),
            },
            Err(_) => warn!("journal mutex poisoned"),
        }

        // ─── REFLECTING ──────────────────────────────────────────────
        sm.advance(CyclePhase::Reflecting);
        self.maybe_reflect().await;
        sm.advance(CyclePhase::Idle);

        match fill {
            Some(_) => CycleOutcome::Executed { correlation_id },
            None => CycleOutcome::Indeterminate { correlation_id },
        }
    }

    fn is_halted(&self) -> bool {
        self.risk
            .lock()
            .map(|r| r.state().is_halted())
            .unwrap_or(true)
    }

    fn in_cooldown(&self, now: u64) -> bool {
        self.risk
            .lock()
            .map(|r| r.state().in_cooldown(now))
            .unwrap_or(false)
    }

    /// COLLECTING: latest snapshot for this instrument, or nothing.
    async fn collect_snapshot(&self, instrument: &str) -> Option<MarketSnapshot> {
        let envelope = match self.bus.read_latest(channels::MARKET_SNAPSHOTS).await {
            Ok(envelope) => envelope?,
            Err(e) => {
                warn!(instrument, error = %e, "snapshot read failed");
                return None;
            }
        };
        match serde_json::from_value::<MarketSnapshot>(envelope.payload) {
            Ok(snapshot) if snapshot.instrument == instrument => Some(snapshot),
            Ok(snapshot) => {
                info!(
                    instrument,
                    got = %snapshot.instrument,
                    "latest snapshot is for another instrument"
                );
                None
            }
            Err(e) => {
                warn!(instrument, error = %e, "unreadable snapshot");
                None
            }
        }
    }

    async fn refresh_account(&self) {
        let envelope = match self.bus.read_latest(channels::TRADE_ACCOUNT).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "account read failed");
                return;
            }
        };
        match serde_json::from_value(envelope.payload) {
            Ok(account) => {
                if let Ok(mut cached) = self.account.lock() {
                    *cached = account;
                }
            }
            Err(e) => warn!(error = %e, "unreadable account message"),
        }
    }

    /// SCREENING with the bypass conditions of CONTRACT.md §1.3. A bypass
    /// reports as a PASS with confidence 1.0 so the journal stays uniform.
    fn screen(&self, snapshot: &MarketSnapshot, now: u64) -> GateDecision {
        let bypass_reason = if snapshot.anomaly {
            Some("anomalous snapshot")
        } else if self
            .book
            .lock()
            .map(|b| b.has_open(&snapshot.instrument))
            .unwrap_or(false)
        {
            Some("open position")
        } else if self
            .calendar
            .is_event_window(chrono::Utc::now(), self.settings.event_lead_minutes)
        {
            Some("scheduled event window")
        } else {
            None
        };
        if let Some(reason) = bypass_reason {
            let decision = GateDecision {
                action: GateAction::Pass,
                confidence: 1.0,
                matched_rules: Vec::new(),
                reason: format!("screening bypassed: {reason}"),
            };
            self.note_gate_pass(&snapshot.instrument, now, &decision);
            return decision;
        }

        let rules = self.current_rules();
        let since_last_pass_s = {
            let last = self
                .last_pass_ms
                .lock()
                .ok()
                .and_then(|m| m.get(&snapshot.instrument).copied())
                .unwrap_or(self.boot_ms);
            now.saturating_sub(last) / 1000
        };
        let decision = gate::evaluate(snapshot, &rules, since_last_pass_s);
        self.note_gate_pass(&snapshot.instrument, now, &decision);
        decision
    }

    fn note_gate_pass(&self, instrument: &str, now: u64, decision: &GateDecision) {
        if let Ok(mut metrics) = self.screen_metrics.lock() {
            metrics.record(decision);
        }
        if decision.action.proceeds() {
            if let Ok(mut last) = self.last_pass_ms.lock() {
                last.insert(instrument.to_string(), now);
            }
        }
    }

    /// Research triggers: a scheduled-event window, the anomaly flag, or
    /// any always-send movement.
    fn should_research(&self, snapshot: &MarketSnapshot) -> bool {
        snapshot.anomaly
            || self
                .calendar
                .is_event_window(chrono::Utc::now(), self.settings.event_lead_minutes)
            || snapshot.price_change_1h.abs() >= ALWAYS_SEND.price_change_1h_abs
            || snapshot.funding_rate.abs() >= ALWAYS_SEND.funding_rate_abs
            || snapshot.oi_change_4h.abs() >= ALWAYS_SEND.oi_change_4h_abs
    }

    fn build_context(
        &self,
        snapshot: &MarketSnapshot,
        research: Option<crate::agents::ResearchSummary>,
    ) -> AnalysisContext {
        let positions = self.book.lock().map(|b| b.positions()).unwrap_or_default();
        let account = self
            .account
            .lock()
            .map(|a| *a)
            .unwrap_or(warden_core::risk::gate::AccountState {
                equity: self.settings.default_equity,
                available_balance: self.settings.default_equity,
            });
        let pnls: Vec<f64> = self
            .journal
            .lock()
            .map(|j| j.replay().closed_pnls)
            .unwrap_or_default();
        let performance = if pnls.is_empty() {
            None
        } else {
            Some(crate::performance::compute(&pnls))
        };
        AnalysisContext {
            snapshot: snapshot.clone(),
            positions,
            account,
            research,
            performance,
            rules_version: self.current_rules().version,
        }
    }

    fn risk_check(&self, decision: &TradeDecision, mark_price: f64, now: u64) -> RiskResult {
        let positions = self.book.lock().map(|b| b.positions()).unwrap_or_default();
        let account = self
            .account
            .lock()
            .map(|a| *a)
            .unwrap_or(warden_core::risk::gate::AccountState {
                equity: self.settings.default_equity,
                available_balance: self.settings.default_equity,
            });
        let input = RiskInput {
            decision,
            account: &account,
            open_positions: &positions,
            mark_price,
            now_ms: now,
        };
        match (self.risk.lock(), self.risk_metrics.lock()) {
            (Ok(mut risk), Ok(mut metrics)) => risk.validate(&input, &mut metrics),
            _ => RiskResult {
                approved: false,
                failures: vec![warden_core::risk::gate::RiskCheck {
                    rule: warden_core::risk::gate::RiskRule::Malformed,
                    reason: "risk gate unavailable".to_string(),
                }],
                warnings: Vec::new(),
                halt: None,
            },
        }
    }

    /// Journal and alert a rejection with the failing rule ids and values
    /// (CONTRACT.md §7).
    async fn record_rejection(
        &self,
        correlation_id: &str,
        instrument: &str,
        result: &RiskResult,
    ) {
        let rules: Vec<String> = result
            .failures
            .iter()
            .map(|f| f.rule.as_str().to_string())
            .collect();
        let reasons: Vec<String> = result.failures.iter().map(|f| f.reason.clone()).collect();
        warn!(instrument, correlation_id, ?rules, "risk gate rejected decision");
        if let Ok(mut journal) = self.journal.lock() {
            if let Err(e) = journal.append_risk_rejection(
                correlation_id.to_string(),
                instrument.to_string(),
                rules.clone(),
                reasons.clone(),
                now_ms(),
            ) {
                warn!(error = %e, "rejection journal append failed");
            }
        }
        self.publish_alert(
            AlertSeverity::Warning,
            "risk_rejection",
            serde_json::json!({
                "instrument": instrument,
                "correlation_id": correlation_id,
                "rules": rules,
                "reasons": reasons,
            }),
        )
        .await;
    }

    /// CONFIRMING: poll the fill channel for a matching correlation id
    /// until the window closes. Only the awaited fill is registered for
    /// dedupe; fills owned by other cycles pass through untouched so
    /// their own confirmation loops see them first-hand (CONTRACT.md §4.3).
    async fn wait_for_fill(
        &self,
        instrument: &str,
        correlation_id: &str,
        timeout_s: u64,
    ) -> Option<FillConfirmation> {
        let group = format!("warden:confirm:{instrument}");
        let wait = Duration::from_secs(timeout_s);
        let poll = async {
            loop {
                let batch = match self.bus.fetch(channels::TRADE_FILLS, &group, 16).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(error = %e, "fill fetch failed");
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        continue;
                    }
                };
                for envelope in batch {
                    let matched = self.register_fill(&envelope.payload, correlation_id);
                    if let Err(e) = self.bus.ack(channels::TRADE_FILLS, &group, envelope.id).await {
                        warn!(error = %e, "fill ack failed");
                    }
                    if let Some(confirmation) = matched {
                        return confirmation;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        };
        match tokio::time::timeout(wait, poll).await {
            // Inner None means the matching fill was a replay: the journal
            // record already exists from the first delivery.
            Ok(confirmation) => confirmation,
            Err(_) => None,
        }
    }

    /// Handle one fill payload. Returns `Some(Some(confirmation))` when it
    /// matches the awaited correlation id and was not a replay.
    fn register_fill(
        &self,
        payload: &serde_json::Value,
        awaited_correlation_id: &str,
    ) -> Option<Option<FillConfirmation>> {
        let fill = match serde_json::from_value::<FillMessage>(payload.clone()) {
            Ok(fill) => fill,
            Err(e) => {
                warn!(error = %e, "unreadable fill message");
                return None;
            }
        };
        if fill.correlation_id != awaited_correlation_id {
            // Another cycle's fill. Registering it here would make that
            // cycle's own lookup read as a replay.
            return None;
        }
        let record = FillRecord {
            correlation_id: fill.correlation_id.clone(),
            instrument: fill.instrument.clone(),
            fill_price: fill.fill_price,
            fill_size: fill.fill_size,
            ts_ms: fill.ts_ms,
        };
        let inserted = match self
            .fill_registry
            .insert_if_absent(record, &self.registry_metrics)
        {
            Ok(InsertResult::Inserted) => true,
            Ok(InsertResult::Duplicate) => false,
            Err(e) => {
                warn!(error = %e, "fill registry insert failed");
                false
            }
        };
        if inserted {
            return Some(Some(FillConfirmation {
                fill_price: fill.fill_price,
                fill_size: fill.fill_size,
                ts_ms: fill.ts_ms,
            }));
        }
        // Registered before. A replay only once the decision record exists;
        // otherwise this delivery still carries the confirmation.
        let journaled = self
            .journal
            .lock()
            .map(|j| j.has_decision(awaited_correlation_id))
            .unwrap_or(true);
        if journaled {
            Some(None)
        } else {
            Some(Some(FillConfirmation {
                fill_price: fill.fill_price,
                fill_size: fill.fill_size,
                ts_ms: fill.ts_ms,
            }))
        }
    }
}
