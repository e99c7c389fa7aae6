//! Fill idempotency registry (CONTRACT.md §4.3).
//!
//! At-least-once delivery means the fill channel replays. Handler rule:
//! 1) if the correlation id is already registered -> NOOP;
//! 2) else register first, then apply position/journal updates.
//! Insert-if-absent is atomic under the registry mutex.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// --- Fill record --------------------------------------------------------

/// Persisted record for a processed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    /// Correlation id tying the fill to its order and journal entry.
    pub correlation_id: String,
    pub instrument: String,
    pub fill_price: f64,
    pub fill_size: f64,
    pub ts_ms: u64,
}

// --- Insert result ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// New id; caller applies updates.
    Inserted,
    /// Already recorded; caller must NOOP.
    Duplicate,
}

// --- Registry error -----------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("fill registry at capacity")]
    CapacityFull,
    #[error("fill registry append failed: {reason}")]
    WriteFailed { reason: String },
    #[error("fill registry mutex poisoned")]
    Poisoned,
}

// --- Metrics ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RegistryMetrics {
    duplicates_total: AtomicU64,
    inserts_total: AtomicU64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        RegistryMetrics::default()
    }

    pub fn record_duplicate(&self) {
        self.duplicates_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.inserts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicates_total(&self) -> u64 {
        self.duplicates_total.load(Ordering::Relaxed)
    }

    pub fn inserts_total(&self) -> u64 {
        self.inserts_total.load(Ordering::Relaxed)
    }
}

// --- Registry -----------------------------------------------------------

#[derive(Debug)]
struct RegistryState {
    records: HashMap<String, FillRecord>,
    storage_file: Option<File>,
}

/// Thread-safe fill dedupe registry with bounded capacity.
#[derive(Debug)]
pub struct FillRegistry {
    state: Mutex<RegistryState>,
    capacity: usize,
}

impl FillRegistry {
    /// In-memory registry.
    pub fn new(capacity: usize) -> Self {
        FillRegistry {
            state: Mutex::new(RegistryState {
                records: HashMap::new(),
                storage_file: None,
            }),
            capacity,
        }
    }

    /// JSONL-backed registry; loads prior records on open.
    pub fn with_storage_path(capacity: usize, path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let mut records = HashMap::new();
        let reader = BufReader::new(file.try_clone()?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<FillRecord>(&line) {
                records.insert(record.correlation_id.clone(), record);
            }
        }

        Ok(FillRegistry {
            state: Mutex::new(RegistryState {
                records,
                storage_file: Some(file),
            }),
            capacity,
        })
    }

    /// Atomic insert-if-absent.
    pub fn insert_if_absent(
        &self,
        record: FillRecord,
        metrics: &RegistryMetrics,
    ) -> Result<InsertResult, RegistryError> {
        let mut state = self.state.lock().map_err(|_| RegistryError::Poisoned)?;
        if state.records.contains_key(&record.correlation_id) {
            metrics.record_duplicate();
            return Ok(InsertResult::Duplicate);
        }
        if state.records.len() >= self.capacity {
            return Err(RegistryError::CapacityFull);
        }

        // Durable append before the in-memory insert: a crash between the
        // two replays as a duplicate, which is the safe direction.
        if let Some(file) = state.storage_file.as_mut() {
            let line = serde_json::to_string(&record).map_err(|e| RegistryError::WriteFailed {
                reason: e.to_string(),
            })?;
            file.write_all(line.as_bytes())
                .and_then(|_| file.write_all(b"\n"))
                .and_then(|_| file.flush())
                .map_err(|e| RegistryError::WriteFailed {
                    reason: e.to_string(),
                })?;
        }

        state.records.insert(record.correlation_id.clone(), record);
        metrics.record_insert();
        Ok(InsertResult::Inserted)
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.records.contains_key(correlation_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
