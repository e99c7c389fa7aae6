//! Fill idempotency registry tests (CONTRACT.md §4.3).

use std::path::PathBuf;
use warden_infra::store::{FillRecord, FillRegistry, InsertResult, RegistryError, RegistryMetrics};

fn temp_registry(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "warden_fills_{}_{name}.jsonl",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

fn fill(correlation_id: &str) -> FillRecord {
    FillRecord {
        correlation_id: correlation_id.to_string(),
        instrument: "BTC-PERP".to_string(),
        fill_price: 50_000.0,
        fill_size: 0.5,
        ts_ms: 1_000,
    }
}

#[test]
fn test_insert_then_duplicate() {
    let registry = FillRegistry::new(16);
    let metrics = RegistryMetrics::new();

    assert_eq!(
        registry.insert_if_absent(fill("a1"), &metrics).unwrap(),
        InsertResult::Inserted
    );
    assert_eq!(
        registry.insert_if_absent(fill("a1"), &metrics).unwrap(),
        InsertResult::Duplicate
    );
    assert!(registry.contains("a1"));
    assert_eq!(registry.len(), 1);
    assert_eq!(metrics.inserts_total(), 1);
    assert_eq!(metrics.duplicates_total(), 1);
}

#[test]
fn test_capacity_rejects_new_ids_but_still_dedupes() {
    let registry = FillRegistry::new(1);
    let metrics = RegistryMetrics::new();

    registry.insert_if_absent(fill("a1"), &metrics).unwrap();
    assert_eq!(
        registry.insert_if_absent(fill("a2"), &metrics),
        Err(RegistryError::CapacityFull)
    );
    // A replay of a known id is still a clean duplicate at capacity.
    assert_eq!(
        registry.insert_if_absent(fill("a1"), &metrics).unwrap(),
        InsertResult::Duplicate
    );
}

#[test]
fn test_reload_dedupes_across_restart() {
    let path = temp_registry("reload");
    {
        let registry = FillRegistry::with_storage_path(64, &path).unwrap();
        let metrics = RegistryMetrics::new();
        registry.insert_if_absent(fill("b1"), &metrics).unwrap();
        registry.insert_if_absent(fill("b2"), &metrics).unwrap();
    }

    // The bus replays unacked fills after a crash; the reloaded registry
    // must recognize them.
    let registry = FillRegistry::with_storage_path(64, &path).unwrap();
    let metrics = RegistryMetrics::new();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.insert_if_absent(fill("b1"), &metrics).unwrap(),
        InsertResult::Duplicate
    );
    assert_eq!(
        registry.insert_if_absent(fill("b3"), &metrics).unwrap(),
        InsertResult::Inserted
    );

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_empty_registry() {
    let registry = FillRegistry::new(16);
    assert!(registry.is_empty());
    assert!(!registry.contains("missing"));
}
