//! Orchestrator runtime: one cycle driver per instrument plus the
//! listener, admin, and housekeeping tasks around them (CONTRACT.md §1).

pub mod cycle;
pub mod listener;
pub mod reflection;

pub use cycle::CycleOutcome;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use warden_core::cycle::decision::TradeDecision;
use warden_core::lifecycle::{CloseEvent, PositionBook};
use warden_core::risk::gate::{AccountState, RiskGate, RiskMetrics};
use warden_core::screen::gate::ScreenMetrics;
use warden_core::screen::rules::SignalRules;

use crate::agents::{DecisionMaker, ResearchProvider};
use crate::bus::retry::{RetryPolicy, publish_with_backoff};
use crate::bus::{MessageBus, channels};
use crate::config::Settings;
use crate::events::EventCalendar;
use crate::store::{FillRegistry, RegistryMetrics, RulesStore, SafetyJournal};

// ─── Wire messages ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderMessage {
    pub correlation_id: String,
    pub decision: TradeDecision,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillMessage {
    pub correlation_id: String,
    pub instrument: String,
    pub fill_price: f64,
    pub fill_size: f64,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminCommand {
    Halt { reason: String },
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub severity: AlertSeverity,
    pub kind: String,
    pub detail: serde_json::Value,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesAck {
    pub version: u32,
    pub ts_ms: u64,
}

// ─── Clock helpers ───────────────────────────────────────────────────────────

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// UTC day index; keys the idempotent daily reset (CONTRACT.md §3.5).
pub(crate) fn day_id(ts_ms: u64) -> i64 {
    (ts_ms / 86_400_000) as i64
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

const RECENT_CLOSES_CAP: usize = 50;

pub struct Orchestrator {
    pub(crate) settings: Settings,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) decision_maker: Arc<dyn DecisionMaker>,
    pub(crate) research: Option<Arc<dyn ResearchProvider>>,
    pub(crate) calendar: EventCalendar,

    pub(crate) journal: Mutex<SafetyJournal>,
    pub(crate) rules_store: Mutex<RulesStore>,
    pub(crate) fill_registry: FillRegistry,
    pub(crate) registry_metrics: RegistryMetrics,

    pub(crate) risk: Mutex<RiskGate>,
    pub(crate) risk_metrics: Mutex<RiskMetrics>,
    pub(crate) screen_metrics: Mutex<ScreenMetrics>,
    pub(crate) rules: Mutex<Arc<SignalRules>>,
    pub(crate) book: Mutex<PositionBook>,
    pub(crate) account: Mutex<AccountState>,
    pub(crate) recent_closes: Mutex<Vec<CloseEvent>>,
    /// Per-instrument timestamp of the last gate pass, for the fallback
    /// timer. Seeded with boot time.
    pub(crate) last_pass_ms: Mutex<HashMap<String, u64>>,
    pub(crate) boot_ms: u64,
    pub(crate) cycle_seq: AtomicU64,

    shutdown_tx: watch::Sender<bool>,
}

impl Orchestrator {
    /// Wire the runtime: open the stores, replay the journal into the risk
    /// gate, and seed the rules from the store (CONTRACT.md §5).
    pub fn new(
        settings: Settings,
        bus: Arc<dyn MessageBus>,
        decision_maker: Arc<dyn DecisionMaker>,
        research: Option<Arc<dyn ResearchProvider>>,
        calendar: EventCalendar,
    ) -> io::Result<Self> {
        let journal = match &settings.journal_path {
            Some(path) => SafetyJournal::with_storage_path(path)?,
            None => SafetyJournal::in_memory(),
        };
        let mut rules_store = match &settings.rules_path {
            Some(path) => RulesStore::with_storage_path(path)?,
            None => RulesStore::in_memory(),
        };

        let boot_ms = now_ms();
        let replay = journal.replay();
        let risk = RiskGate::from_history(
            settings.limits.clone(),
            settings.default_equity,
            day_id(boot_ms),
            &replay.safety_events,
        );
        if risk.state().is_halted() {
            warn!("halt latch restored from journal; submission blocked until resume");
        }
        info!(
            safety_events = replay.safety_events.len(),
            decisions = replay.decisions_replayed,
            "journal replayed"
        );

        let rules = Arc::new(rules_store.latest_or_baseline().sanitized());
        let default_account = AccountState {
            equity: settings.default_equity,
            available_balance: settings.default_equity,
        };
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Orchestrator {
            settings,
            bus,
            decision_maker,
            research,
            calendar,
            journal: Mutex::new(journal),
            rules_store: Mutex::new(rules_store),
            fill_registry: FillRegistry::new(65_536),
            registry_metrics: RegistryMetrics::new(),
            risk: Mutex::new(risk),
            risk_metrics: Mutex::new(RiskMetrics::default()),
            screen_metrics: Mutex::new(ScreenMetrics::default()),
            rules: Mutex::new(rules),
            book: Mutex::new(PositionBook::new()),
            account: Mutex::new(default_account),
            recent_closes: Mutex::new(Vec::new()),
            last_pass_ms: Mutex::new(HashMap::new()),
            boot_ms,
            cycle_seq: AtomicU64::new(0),
            shutdown_tx,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn current_rules(&self) -> Arc<SignalRules> {
        self.rules
            .lock()
            .map(|r| Arc::clone(&r))
            .unwrap_or_else(|_| Arc::new(SignalRules::baseline()))
    }

    pub fn next_cycle_seq(&self) -> u64 {
        self.cycle_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Run all tasks until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut tasks = Vec::new();

        for instrument in self.settings.instruments.clone() {
            let this = Arc::clone(&self);
            tasks.push(tokio::spawn(async move {
                this.cycle_driver(&instrument).await;
            }));
        }

        let this = Arc::clone(&self);
        tasks.push(tokio::spawn(async move { this.position_listener().await }));
        let this = Arc::clone(&self);
        tasks.push(tokio::spawn(async move { this.admin_listener().await }));
        let this = Arc::clone(&self);
        tasks.push(tokio::spawn(async move { this.rules_listener().await }));
        let this = Arc::clone(&self);
        tasks.push(tokio::spawn(async move { this.housekeeping().await }));

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "runtime task aborted");
            }
        }
    }

    async fn cycle_driver(&self, instrument: &str) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = Duration::from_secs(self.settings.decision_cycle_s.max(1));
        loop {
            // One cycle at a time per instrument: the next tick waits for
            // this call to return (CONTRACT.md §1.1).
            let outcome = self.run_cycle(instrument).await;
            info!(instrument, outcome = ?outcome, "cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    pub(crate) async fn admin_listener(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            self.drain_admin().await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Consume pending admin commands; ack after handling.
    pub async fn drain_admin(&self) {
        let batch = match self.bus.fetch(channels::SYSTEM_ADMIN, "warden:admin", 8).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "admin fetch failed");
                return;
            }
        };
        for envelope in batch {
            match serde_json::from_value::<AdminCommand>(envelope.payload.clone()) {
                Ok(AdminCommand::Halt { reason }) => self.apply_manual_halt(reason).await,
                Ok(AdminCommand::Resume) => self.apply_resume().await,
                Err(e) => warn!(error = %e, "unreadable admin command"),
            }
            if let Err(e) = self
                .bus
                .ack(channels::SYSTEM_ADMIN, "warden:admin", envelope.id)
                .await
            {
                warn!(error = %e, "admin ack failed");
            }
        }
    }

    async fn apply_manual_halt(&self, reason: String) {
        let ts = now_ms();
        let event = match self.risk.lock() {
            Ok(mut risk) => risk.halt_manual(reason.clone(), ts),
            Err(_) => None,
        };
        if let Some(event) = event {
            self.journal_safety(event);
            self.publish_alert(
                AlertSeverity::Critical,
                "halt",
                serde_json::json!({ "cause": "manual", "reason": reason }),
            )
            .await;
            info!(reason, "manual halt latched");
        }
    }

    async fn apply_resume(&self) {
        let ts = now_ms();
        let event = match self.risk.lock() {
            Ok(mut risk) => risk.resume(ts),
            Err(_) => None,
        };
        if let Some(event) = event {
            self.journal_safety(event);
            self.publish_alert(
                AlertSeverity::Info,
                "resume",
                serde_json::json!({ "cause": "manual" }),
            )
            .await;
            info!("halt cleared by administrative resume");
        }
    }

    pub(crate) async fn rules_listener(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            self.drain_rules().await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Consume published rules versions. Whole-value swap; stale or corrupt
    /// versions are discarded (CONTRACT.md §5.2).
    pub async fn drain_rules(&self) {
        let batch = match self.bus.fetch(channels::SIGNAL_RULES, "warden:rules", 8).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "rules fetch failed");
                return;
            }
        };
        for envelope in batch {
            match serde_json::from_value::<SignalRules>(envelope.payload.clone()) {
                Ok(incoming) => self.adopt_rules(incoming.sanitized(), "publisher").await,
                Err(e) => warn!(error = %e, "discarding corrupt rules version"),
            }
            if let Err(e) = self
                .bus
                .ack(channels::SIGNAL_RULES, "warden:rules", envelope.id)
                .await
            {
                warn!(error = %e, "rules ack failed");
            }
        }
    }

    /// Swap in a sanitized rules version if it is newer than the current
    /// one, persist it, and acknowledge on the ack channel.
    pub(crate) async fn adopt_rules(&self, incoming: SignalRules, source: &str) {
        let current_version = self.current_rules().version;
        if incoming.version <= current_version {
            info!(
                version = incoming.version,
                current_version, "ignoring stale rules version"
            );
            return;
        }
        if let Ok(mut store) = self.rules_store.lock() {
            if store.latest().map(|r| r.version) < Some(incoming.version) {
                if let Err(e) = store.save(incoming.clone()) {
                    warn!(error = %e, "could not persist rules version");
                }
            }
        }
        let version = incoming.version;
        if let Ok(mut rules) = self.rules.lock() {
            *rules = Arc::new(incoming);
        }
        info!(version, source, "rules version adopted");
        let ack = RulesAck {
            version,
            ts_ms: now_ms(),
        };
        if let Ok(payload) = serde_json::to_value(&ack) {
            if let Err(e) = self.bus.publish(channels::SIGNAL_RULES_ACKS, payload).await {
                warn!(error = %e, "rules ack publish failed");
            }
        }
    }

    pub(crate) async fn housekeeping(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = Duration::from_secs(self.settings.metrics_flush_s.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => return,
            }
            self.flush_metrics().await;
            self.daily_reset_if_due().await;
        }
    }

    /// Publish rolling counters on the metrics channel and reset them.
    pub async fn flush_metrics(&self) {
        let screen = self
            .screen_metrics
            .lock()
            .map(|mut m| m.snapshot_and_reset())
            .ok();
        let risk = self
            .risk_metrics
            .lock()
            .map(|mut m| m.snapshot_and_reset())
            .ok();
        let payload = serde_json::json!({
            "screen": screen,
            "risk": risk,
            "fills_deduped": self.registry_metrics.duplicates_total(),
            "journal_appends": self.journal.lock().map(|j| j.metrics().appends_total()).unwrap_or(0),
            "ts_ms": now_ms(),
        });
        if let Err(e) = self.bus.publish(channels::SYSTEM_METRICS, payload).await {
            warn!(error = %e, "metrics publish failed");
        }
    }

    /// Reset `daily_start_equity` at the UTC day rollover; a repeat call in
    /// the same day is a no-op (CONTRACT.md §3.5).
    pub async fn daily_reset_if_due(&self) {
        let now = now_ms();
        let today = day_id(now);
        let equity = self.account.lock().map(|a| a.equity).unwrap_or(0.0);
        let event = match self.risk.lock() {
            Ok(mut risk) => risk.reset_daily(equity, today),
            Err(_) => None,
        };
        if let Some(event) = event {
            self.journal_safety(event);
            info!(day = today, equity, "daily equity mark reset");
        }
    }

    /// Append a safety event, surfacing journal failures loudly: the
    /// journal is the restart truth source.
    pub(crate) fn journal_safety(&self, event: warden_core::risk::state::SafetyEvent) {
        match self.journal.lock() {
            Ok(mut journal) => {
                if let Err(e) = journal.append_safety(event) {
                    error!(error = %e, "safety journal append failed");
                }
            }
            Err(_) => error!("safety journal mutex poisoned"),
        }
    }

    pub(crate) async fn publish_alert(
        &self,
        severity: AlertSeverity,
        kind: &str,
        detail: serde_json::Value,
    ) {
        let alert = AlertMessage {
            severity,
            kind: kind.to_string(),
            detail,
            ts_ms: now_ms(),
        };
        let payload = match serde_json::to_value(&alert) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "alert encode failed");
                return;
            }
        };
        if let Err(e) = publish_with_backoff(
            self.bus.as_ref(),
            channels::SYSTEM_ALERTS,
            payload,
            RetryPolicy::default(),
        )
        .await
        {
            warn!(error = %e, kind, "alert publish failed");
        }
    }

    pub(crate) fn remember_close(&self, close: CloseEvent) {
        if let Ok(mut closes) = self.recent_closes.lock() {
            closes.push(close);
            if closes.len() > RECENT_CLOSES_CAP {
                let drop = closes.len() - RECENT_CLOSES_CAP;
                closes.drain(..drop);
            }
        }
    }
}
