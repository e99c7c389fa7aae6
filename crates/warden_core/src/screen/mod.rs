//! Signal gate: cheap deterministic pre-filter in front of the expensive
//! analysis path (CONTRACT.md §2).

pub mod gate;
pub mod rules;
