//! Agent seams: the analysis and research backends behind narrow traits.
//!
//! The orchestrator never talks to a model API directly; it sees a
//! `DecisionMaker` and an optional `ResearchProvider`, both wrapped in
//! bounded-wait helpers with conservative fallbacks (CONTRACT.md §1.2):
//! analysis degrades to Hold, research degrades to no context. Tests plug
//! in deterministic fakes through the same traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use warden_core::cycle::decision::TradeDecision;
use warden_core::lifecycle::{CloseEvent, Position};
use warden_core::risk::gate::AccountState;
use warden_core::screen::rules::RuleCondition;
use warden_core::snapshot::MarketSnapshot;

use crate::performance::PerformanceSummary;

// ─── Context ─────────────────────────────────────────────────────────────────

/// Everything the analysis backend sees for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContext {
    pub snapshot: MarketSnapshot,
    pub positions: Vec<Position>,
    pub account: AccountState,
    pub research: Option<ResearchSummary>,
    pub performance: Option<PerformanceSummary>,
    pub rules_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSummary {
    pub query: String,
    pub summary: String,
    /// "bullish", "bearish" or "neutral".
    pub sentiment: String,
    pub key_points: Vec<String>,
}

/// Reflection output: a candidate next rules version. Sanitized and
/// version-stamped by the reflection engine before publication; the agent
/// cannot pick version numbers or escape the clamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesProposal {
    pub regime_rules: std::collections::BTreeMap<String, Vec<RuleCondition>>,
    pub fallback_interval_s: u64,
    pub borderline_threshold: f64,
    pub summary: String,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent call timed out after {timeout_s}s")]
    Timeout { timeout_s: u64 },
    #[error("malformed agent response: {0}")]
    Malformed(String),
    #[error("agent transport failure: {0}")]
    Transport(String),
}

// ─── Traits ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn analyze(&self, ctx: &AnalysisContext) -> Result<TradeDecision, AgentError>;

    async fn reflect(
        &self,
        recent_closes: &[CloseEvent],
        performance: &PerformanceSummary,
    ) -> Result<RulesProposal, AgentError>;
}

#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, query: &str) -> Result<ResearchSummary, AgentError>;
}

// ─── Bounded wrappers ────────────────────────────────────────────────────────

/// Analysis with a hard deadline. Timeout or any error degrades to Hold;
/// the pipeline always gets a decision.
pub async fn analyze_bounded(
    agent: &dyn DecisionMaker,
    ctx: &AnalysisContext,
    timeout_s: u64,
) -> TradeDecision {
    let deadline = Duration::from_secs(timeout_s);
    match tokio::time::timeout(deadline, agent.analyze(ctx)).await {
        Ok(Ok(decision)) => decision,
        Ok(Err(err)) => {
            warn!(instrument = %ctx.snapshot.instrument, error = %err, "analysis failed, holding");
            TradeDecision::hold(&ctx.snapshot.instrument, "analysis failure")
        }
        Err(_) => {
            warn!(
                instrument = %ctx.snapshot.instrument,
                timeout_s,
                "analysis timed out, holding"
            );
            TradeDecision::hold(&ctx.snapshot.instrument, "analysis timeout")
        }
    }
}

/// Research with a hard deadline. Failure downgrades to no context.
pub async fn research_bounded(
    provider: &dyn ResearchProvider,
    query: &str,
    timeout_s: u64,
) -> Option<ResearchSummary> {
    let deadline = Duration::from_secs(timeout_s);
    match tokio::time::timeout(deadline, provider.research(query)).await {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(err)) => {
            warn!(query, error = %err, "research failed, proceeding without");
            None
        }
        Err(_) => {
            warn!(query, timeout_s, "research timed out, proceeding without");
            None
        }
    }
}

/// Reflection with a hard deadline; `None` keeps the current rules version.
pub async fn reflect_bounded(
    agent: &dyn DecisionMaker,
    recent_closes: &[CloseEvent],
    performance: &PerformanceSummary,
    timeout_s: u64,
) -> Option<RulesProposal> {
    let deadline = Duration::from_secs(timeout_s);
    match tokio::time::timeout(deadline, agent.reflect(recent_closes, performance)).await {
        Ok(Ok(proposal)) => Some(proposal),
        Ok(Err(err)) => {
            warn!(error = %err, "reflection failed, keeping current rules");
            None
        }
        Err(_) => {
            warn!(timeout_s, "reflection timed out, keeping current rules");
            None
        }
    }
}
