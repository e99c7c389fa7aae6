//! Decision-cycle state machine and the decision contract it carries
//! (CONTRACT.md §1).

pub mod decision;
pub mod state;
