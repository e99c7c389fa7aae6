//! Append-only safety journal (CONTRACT.md §5.1).
//!
//! Every safety-state mutation and every journaled decision is one JSONL
//! line. On startup the event stream is replayed: safety events rebuild the
//! `SafetyState`, decision records seed the dedupe set so a redelivered
//! fill cannot journal twice (CONTRACT.md §4.3).
//!
//! Writes flush to the OS; production deployments put the file on durable
//! storage and would fsync here.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use warden_core::cycle::decision::TradeDecision;
use warden_core::risk::state::SafetyEvent;
use warden_core::screen::gate::GateAction;

// --- Records ------------------------------------------------------------

/// Fill confirmation attached to a journaled decision, when one arrived
/// inside the confirmation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillConfirmation {
    pub fill_price: f64,
    pub fill_size: f64,
    pub ts_ms: u64,
}

/// One completed decision cycle's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub correlation_id: String,
    pub instrument: String,
    pub decision: TradeDecision,
    pub gate_action: GateAction,
    pub gate_confidence: f64,
    pub risk_approved: bool,
    /// None when the confirmation window expired: the order's fate is
    /// indeterminate and is never resubmitted (CONTRACT.md §1.2).
    pub fill: Option<FillConfirmation>,
    pub ts_ms: u64,
}

/// Append-only journal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    Safety { event: SafetyEvent },
    DecisionJournaled { record: DecisionRecord },
    RiskRejected {
        correlation_id: String,
        instrument: String,
        rules: Vec<String>,
        reasons: Vec<String>,
        ts_ms: u64,
    },
    ReflectionCompleted { rules_version: u32, ts_ms: u64 },
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal write failed: {0}")]
    WriteFailed(String),
}

/// Replay result handed to startup wiring.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalReplay {
    /// Safety events in append order, ready for `SafetyState::rebuild`.
    pub safety_events: Vec<SafetyEvent>,
    pub journaled_correlation_ids: HashSet<String>,
    pub decisions_replayed: usize,
    /// (rules_version, ts_ms) of the most recent completed reflection.
    pub last_reflection: Option<(u32, u64)>,
    /// Closed-trade PnLs in order, for the performance summary.
    pub closed_pnls: Vec<f64>,
    /// Timestamps of closed trades, for the reflection trigger.
    pub close_ts_ms: Vec<u64>,
}

// --- Metrics ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct JournalMetrics {
    appends_total: u64,
    write_errors: u64,
    duplicate_decisions: u64,
}

impl JournalMetrics {
    pub fn appends_total(&self) -> u64 {
        self.appends_total
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    pub fn duplicate_decisions(&self) -> u64 {
        self.duplicate_decisions
    }
}

// --- Journal ------------------------------------------------------------

/// Dedupe outcome for decision appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAppend {
    Journaled,
    /// Correlation id already journaled; the append was a no-op.
    Duplicate,
}

#[derive(Debug)]
pub struct SafetyJournal {
    events: Vec<JournalEvent>,
    journaled_ids: HashSet<String>,
    storage_path: Option<PathBuf>,
    metrics: JournalMetrics,
}

impl SafetyJournal {
    /// Volatile journal for tests and dry runs.
    pub fn in_memory() -> Self {
        SafetyJournal {
            events: Vec::new(),
            journaled_ids: HashSet::new(),
            storage_path: None,
            metrics: JournalMetrics::default(),
        }
    }

    /// Open or create a JSONL-backed journal and load its history.
    /// A corrupt line is skipped with a warning; everything readable is
    /// kept. Losing a tail line makes the state conservative, not wrong.
    pub fn with_storage_path(storage_path: impl AsRef<Path>) -> io::Result<Self> {
        let path = storage_path.as_ref().to_path_buf();
        let events = read_events_from_path(&path)?;
        let journaled_ids = events
            .iter()
            .filter_map(|e| match e {
                JournalEvent::DecisionJournaled { record } => {
                    Some(record.correlation_id.clone())
                }
                _ => None,
            })
            .collect();
        Ok(SafetyJournal {
            events,
            journaled_ids,
            storage_path: Some(path),
            metrics: JournalMetrics::default(),
        })
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    pub fn metrics(&self) -> &JournalMetrics {
        &self.metrics
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn has_decision(&self, correlation_id: &str) -> bool {
        self.journaled_ids.contains(correlation_id)
    }

    /// Append a safety-state event.
    pub fn append_safety(&mut self, event: SafetyEvent) -> Result<(), JournalError> {
        self.persist_and_apply(JournalEvent::Safety { event })
    }

    /// Append a decision record, deduplicating by correlation id.
    pub fn append_decision(&mut self, record: DecisionRecord) -> Result<DecisionAppend, JournalError> {
        if self.journaled_ids.contains(&record.correlation_id) {
            self.metrics.duplicate_decisions += 1;
            return Ok(DecisionAppend::Duplicate);
        }
        let id = record.correlation_id.clone();
        self.persist_and_apply(JournalEvent::DecisionJournaled { record })?;
        self.journaled_ids.insert(id);
        Ok(DecisionAppend::Journaled)
    }

    pub fn append_risk_rejection(
        &mut self,
        correlation_id: String,
        instrument: String,
        rules: Vec<String>,
        reasons: Vec<String>,
        ts_ms: u64,
    ) -> Result<(), JournalError> {
        self.persist_and_apply(JournalEvent::RiskRejected {
            correlation_id,
            instrument,
            rules,
            reasons,
            ts_ms,
        })
    }

    pub fn append_reflection(&mut self, rules_version: u32, ts_ms: u64) -> Result<(), JournalError> {
        self.persist_and_apply(JournalEvent::ReflectionCompleted { rules_version, ts_ms })
    }

    /// Reduce the event stream for startup reconstruction.
    pub fn replay(&self) -> JournalReplay {
        let mut replay = JournalReplay {
            safety_events: Vec::new(),
            journaled_correlation_ids: HashSet::new(),
            decisions_replayed: 0,
            last_reflection: None,
            closed_pnls: Vec::new(),
            close_ts_ms: Vec::new(),
        };
        for event in &self.events {
            match event {
                JournalEvent::Safety { event } => {
                    if let SafetyEvent::TradeClosed { pnl, ts_ms, .. } = event {
                        replay.closed_pnls.push(*pnl);
                        replay.close_ts_ms.push(*ts_ms);
                    }
                    replay.safety_events.push(event.clone());
                }
                JournalEvent::DecisionJournaled { record } => {
                    replay
                        .journaled_correlation_ids
                        .insert(record.correlation_id.clone());
                    replay.decisions_replayed += 1;
                }
                JournalEvent::RiskRejected { .. } => {}
                JournalEvent::ReflectionCompleted { rules_version, ts_ms } => {
                    replay.last_reflection = Some((*rules_version, *ts_ms));
                }
            }
        }
        replay
    }

    /// Closed-trade PnLs and timestamps since a cutoff, for the reflection
    /// trigger and performance summary.
    pub fn closes_since(&self, cutoff_ts_ms: u64) -> Vec<(f64, u64)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                JournalEvent::Safety {
                    event: SafetyEvent::TradeClosed { pnl, ts_ms, .. },
                } if *ts_ms >= cutoff_ts_ms => Some((*pnl, *ts_ms)),
                _ => None,
            })
            .collect()
    }

    fn persist_and_apply(&mut self, event: JournalEvent) -> Result<(), JournalError> {
        if let Some(path) = &self.storage_path {
            write_event_to_path(path, &event).map_err(|reason| {
                self.metrics.write_errors += 1;
                JournalError::WriteFailed(reason)
            })?;
        }
        self.events.push(event);
        self.metrics.appends_total += 1;
        Ok(())
    }
}

fn write_event_to_path(path: &Path, event: &JournalEvent) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create journal directory {}: {e}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("failed to open journal {}: {e}", path.display()))?;
    let line = serde_json::to_string(event)
        .map_err(|e| format!("failed to encode journal event: {e}"))?;
    file.write_all(line.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.flush())
        .map_err(|e| format!("failed to write journal {}: {e}", path.display()))
}

fn read_events_from_path(path: &Path) -> io::Result<Vec<JournalEvent>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping corrupt journal line"
                );
            }
        }
    }
    Ok(events)
}
