//! Durable storage: safety journal, rules version store, fill dedupe
//! registry.

pub mod fill_registry;
pub mod journal;
pub mod rules_store;

pub use fill_registry::{FillRecord, FillRegistry, InsertResult, RegistryError, RegistryMetrics};
pub use journal::{
    DecisionAppend, DecisionRecord, FillConfirmation, JournalError, JournalEvent, JournalReplay,
    SafetyJournal,
};
pub use rules_store::RulesStore;
