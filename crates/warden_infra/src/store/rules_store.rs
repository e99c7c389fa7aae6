//! Versioned `SignalRules` store (CONTRACT.md §5.2).
//!
//! Each published version is one JSONL line; the highest version wins on
//! load. A corrupt line is skipped, so a bad publish can never take the
//! prior good version down with it.

use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use warden_core::screen::rules::SignalRules;

#[derive(Debug, Error)]
pub enum RulesStoreError {
    #[error("rules store write failed: {0}")]
    WriteFailed(String),
}

#[derive(Debug)]
pub struct RulesStore {
    versions: Vec<SignalRules>,
    storage_path: Option<PathBuf>,
}

impl RulesStore {
    pub fn in_memory() -> Self {
        RulesStore {
            versions: Vec::new(),
            storage_path: None,
        }
    }

    /// Open or create a JSONL-backed store. Every readable version is
    /// sanitized on load; unreadable lines are skipped with a warning.
    pub fn with_storage_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let reader = BufReader::new(file);
        let mut versions = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SignalRules>(&line) {
                Ok(rules) => versions.push(rules.sanitized()),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping corrupt rules version"
                ),
            }
        }
        Ok(RulesStore {
            versions,
            storage_path: Some(path),
        })
    }

    /// Highest stored version.
    pub fn latest(&self) -> Option<&SignalRules> {
        self.versions.iter().max_by_key(|r| r.version)
    }

    /// Latest version, seeding the compiled-in baseline if the store is
    /// empty.
    pub fn latest_or_baseline(&mut self) -> SignalRules {
        if let Some(rules) = self.latest() {
            return rules.clone();
        }
        let baseline = SignalRules::baseline();
        if let Err(e) = self.save(baseline.clone()) {
            warn!(error = %e, "could not persist baseline rules");
        }
        baseline
    }

    /// Persist a new version. Versions at or below the latest are refused;
    /// the publisher must take the next number.
    pub fn save(&mut self, rules: SignalRules) -> Result<(), RulesStoreError> {
        if let Some(latest) = self.latest() {
            if rules.version <= latest.version {
                return Err(RulesStoreError::WriteFailed(format!(
                    "version {} is not above latest {}",
                    rules.version, latest.version
                )));
            }
        }
        let rules = rules.sanitized();
        if let Some(path) = &self.storage_path {
            write_version(path, &rules).map_err(RulesStoreError::WriteFailed)?;
        }
        self.versions.push(rules);
        Ok(())
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }
}

fn write_version(path: &Path, rules: &SignalRules) -> Result<(), String> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("failed to open rules store {}: {e}", path.display()))?;
    let line = serde_json::to_string(rules).map_err(|e| format!("failed to encode rules: {e}"))?;
    file.write_all(line.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.flush())
        .map_err(|e| format!("failed to write rules store {}: {e}", path.display()))
}
