//! Versioned rules store tests (CONTRACT.md §5.2).

use std::path::PathBuf;
use warden_core::screen::rules::{FALLBACK_INTERVAL_MAX_S, SignalRules};
use warden_infra::store::RulesStore;

fn temp_store(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "warden_rules_{}_{name}.jsonl",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

fn version(n: u32) -> SignalRules {
    SignalRules {
        version: n,
        updated_by: "reflection".to_string(),
        ..SignalRules::baseline()
    }
}

#[test]
fn test_latest_or_baseline_seeds_v1() {
    let mut store = RulesStore::in_memory();
    let rules = store.latest_or_baseline();
    assert_eq!(rules.version, 1);
    assert_eq!(store.version_count(), 1);
    // Second call returns the seeded version, no re-seed.
    store.latest_or_baseline();
    assert_eq!(store.version_count(), 1);
}

#[test]
fn test_versions_must_be_monotonic() {
    let mut store = RulesStore::in_memory();
    store.save(version(1)).unwrap();
    store.save(version(2)).unwrap();
    assert!(store.save(version(2)).is_err());
    assert!(store.save(version(1)).is_err());
    assert_eq!(store.latest().unwrap().version, 2);
}

#[test]
fn test_save_sanitizes() {
    let mut store = RulesStore::in_memory();
    let mut rules = version(1);
    rules.fallback_interval_s = 999_999;
    rules.borderline_threshold = -3.0;
    store.save(rules).unwrap();

    let latest = store.latest().unwrap();
    assert_eq!(latest.fallback_interval_s, FALLBACK_INTERVAL_MAX_S);
    assert_eq!(latest.borderline_threshold, 0.4);
}

#[test]
fn test_highest_version_wins_on_reload() {
    let path = temp_store("reload");
    {
        let mut store = RulesStore::with_storage_path(&path).unwrap();
        store.save(version(1)).unwrap();
        store.save(version(2)).unwrap();
        store.save(version(3)).unwrap();
    }
    let store = RulesStore::with_storage_path(&path).unwrap();
    assert_eq!(store.version_count(), 3);
    assert_eq!(store.latest().unwrap().version, 3);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_corrupt_line_keeps_prior_version() {
    let path = temp_store("corrupt");
    {
        let mut store = RulesStore::with_storage_path(&path).unwrap();
        store.save(version(1)).unwrap();
    }
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"version\":2,\"regime_rules\":{bad json\n").unwrap();
    drop(file);

    // The bad publish is skipped; v1 still serves.
    let store = RulesStore::with_storage_path(&path).unwrap();
    assert_eq!(store.latest().unwrap().version, 1);

    let _ = std::fs::remove_file(&path);
}
