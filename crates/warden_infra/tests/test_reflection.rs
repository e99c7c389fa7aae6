//! Reflection engine and rules adoption tests (CONTRACT.md §5.2).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::json;

use warden_core::cycle::decision::TradeDecision;
use warden_core::lifecycle::{CloseEvent, Side};
use warden_core::screen::rules::SignalRules;

use warden_infra::agents::{AgentError, AnalysisContext, DecisionMaker, RulesProposal};
use warden_infra::bus::memory::InMemoryBus;
use warden_infra::bus::{MessageBus, channels};
use warden_infra::config::Settings;
use warden_infra::events::EventCalendar;
use warden_infra::performance::PerformanceSummary;
use warden_infra::runtime::Orchestrator;

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Agent that proposes a tightened rule set on every reflection, or fails
/// every time when `succeed` is false.
struct ReflectingAgent {
    reflect_calls: AtomicUsize,
    succeed: bool,
}

impl ReflectingAgent {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(ReflectingAgent {
            reflect_calls: AtomicUsize::new(0),
            succeed,
        })
    }

    fn calls(&self) -> usize {
        self.reflect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionMaker for ReflectingAgent {
    async fn analyze(&self, ctx: &AnalysisContext) -> Result<TradeDecision, AgentError> {
        Ok(TradeDecision::hold(&ctx.snapshot.instrument, "test agent"))
    }

    async fn reflect(
        &self,
        _recent_closes: &[CloseEvent],
        _performance: &PerformanceSummary,
    ) -> Result<RulesProposal, AgentError> {
        self.reflect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.succeed {
            return Err(AgentError::Transport("reflection backend down".to_string()));
        }
        Ok(RulesProposal {
            regime_rules: SignalRules::baseline().regime_rules,
            fallback_interval_s: 1_200,
            borderline_threshold: 0.5,
            summary: "tightened after review".to_string(),
        })
    }
}

fn build(settings: Settings, bus: &Arc<InMemoryBus>, succeed: bool) -> (Orchestrator, Arc<ReflectingAgent>) {
    let agent = ReflectingAgent::new(succeed);
    let orch = Orchestrator::new(
        settings,
        Arc::clone(bus) as Arc<dyn MessageBus>,
        Arc::clone(&agent) as Arc<dyn DecisionMaker>,
        None,
        EventCalendar::default(),
    )
    .unwrap();
    (orch, agent)
}

/// Publish one winning round trip on the position channel.
async fn publish_round_trip(bus: &InMemoryBus, ts_ms: u64) {
    bus.publish(
        channels::TRADE_POSITIONS,
        json!({
            "instrument": "BTC-PERP",
            "side": Side::Long,
            "size": 0.5,
            "avg_price": 50_000.0,
            "unrealized_pnl": 25.0,
            "notional_usd": 25_000.0,
            "ts_ms": ts_ms,
        }),
    )
    .await
    .unwrap();
    bus.publish(
        channels::TRADE_POSITIONS,
        json!({
            "instrument": "BTC-PERP",
            "side": Side::Long,
            "size": 0.0,
            "ts_ms": ts_ms + 5,
        }),
    )
    .await
    .unwrap();
}

fn temp_rules(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "warden_reflect_{}_{name}.jsonl",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

// ─── Trade-count trigger ────────────────────────────────────────────────

#[tokio::test]
async fn test_reflection_after_enough_closes() {
    let bus = Arc::new(InMemoryBus::new());
    let settings = Settings {
        reflection_min_trades: 3,
        ..Settings::default()
    };
    let (orch, agent) = build(settings, &bus, true);

    let start = wall_ms();
    for n in 0..3u64 {
        publish_round_trip(&bus, start + n).await;
    }
    orch.drain_positions().await;

    assert_eq!(agent.calls(), 1);
    let adopted = orch.current_rules();
    assert_eq!(adopted.version, 2);
    assert_eq!(adopted.fallback_interval_s, 1_200);
    assert_eq!(adopted.borderline_threshold, 0.5);
    assert_eq!(adopted.updated_by, "reflection");

    // The new version went out for other consumers, and was acked.
    let published = bus.fetch(channels::SIGNAL_RULES, "test", 8).await.unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload["version"], 2);
    let acks = bus.fetch(channels::SIGNAL_RULES_ACKS, "test", 8).await.unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload["version"], 2);
}

#[tokio::test]
async fn test_failed_reflection_keeps_rules_and_rearms() {
    let bus = Arc::new(InMemoryBus::new());
    let settings = Settings {
        reflection_min_trades: 3,
        ..Settings::default()
    };
    let (orch, agent) = build(settings, &bus, false);

    let start = wall_ms();
    for n in 0..3u64 {
        publish_round_trip(&bus, start + n).await;
    }
    // Keep the close timestamps strictly before the reflection anchor.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    orch.drain_positions().await;

    assert_eq!(agent.calls(), 1);
    assert_eq!(orch.current_rules().version, 1);
    assert!(bus.fetch(channels::SIGNAL_RULES, "test", 8).await.unwrap().is_empty());

    // The attempt still anchors the trigger: one more close does not
    // immediately re-fire.
    publish_round_trip(&bus, wall_ms() + 60_000).await;
    orch.drain_positions().await;
    assert_eq!(agent.calls(), 1);
}

// ─── External rules adoption ────────────────────────────────────────────

#[tokio::test]
async fn test_published_rules_adopted_and_acked() {
    let bus = Arc::new(InMemoryBus::new());
    let (orch, _) = build(Settings::default(), &bus, true);

    let mut incoming = SignalRules::baseline();
    incoming.version = 5;
    incoming.borderline_threshold = 42.0; // out of range, must be clamped
    incoming.updated_by = "ops".to_string();
    bus.publish(channels::SIGNAL_RULES, serde_json::to_value(&incoming).unwrap())
        .await
        .unwrap();
    orch.drain_rules().await;

    let adopted = orch.current_rules();
    assert_eq!(adopted.version, 5);
    assert_eq!(adopted.borderline_threshold, 0.4);

    let acks = bus.fetch(channels::SIGNAL_RULES_ACKS, "test", 8).await.unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload["version"], 5);
}

#[tokio::test]
async fn test_stale_rules_version_ignored() {
    let bus = Arc::new(InMemoryBus::new());
    let (orch, _) = build(Settings::default(), &bus, true);

    let stale = SignalRules::baseline(); // version 1, same as current
    bus.publish(channels::SIGNAL_RULES, serde_json::to_value(&stale).unwrap())
        .await
        .unwrap();
    orch.drain_rules().await;

    assert_eq!(orch.current_rules().version, 1);
    assert!(bus.fetch(channels::SIGNAL_RULES_ACKS, "test", 8).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_rules_payload_discarded() {
    let bus = Arc::new(InMemoryBus::new());
    let (orch, _) = build(Settings::default(), &bus, true);

    bus.publish(channels::SIGNAL_RULES, json!({ "version": "not a number" }))
        .await
        .unwrap();
    orch.drain_rules().await;

    assert_eq!(orch.current_rules().version, 1);
}

#[tokio::test]
async fn test_adopted_rules_persist_across_restart() {
    let rules_path = temp_rules("persist");
    let bus = Arc::new(InMemoryBus::new());
    let settings = Settings {
        rules_path: Some(rules_path.clone()),
        ..Settings::default()
    };

    {
        let (orch, _) = build(settings.clone(), &bus, true);
        let mut incoming = SignalRules::baseline();
        incoming.version = 3;
        incoming.updated_by = "ops".to_string();
        bus.publish(channels::SIGNAL_RULES, serde_json::to_value(&incoming).unwrap())
            .await
            .unwrap();
        orch.drain_rules().await;
        assert_eq!(orch.current_rules().version, 3);
    }

    let (orch, _) = build(settings, &bus, true);
    assert_eq!(orch.current_rules().version, 3);

    let _ = std::fs::remove_file(&rules_path);
}
