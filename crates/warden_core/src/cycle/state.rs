//! Cycle phase machine (CONTRACT.md §1.1).
//!
//! Transitions are whitelisted; anything else is rejected and logged, never
//! panicked on. HALTED is reachable from every phase and leaves only via an
//! administrative resume. The machine tracks one instrument's cycle — the
//! one-active-cycle-per-instrument rule is enforced by giving each
//! instrument exactly one machine and one driver task.

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    Idle,
    Collecting,
    Screening,
    Researching,
    Analyzing,
    RiskCheck,
    Executing,
    Confirming,
    Journaling,
    Reflecting,
    Halted,
    Cooldown,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Idle => "IDLE",
            CyclePhase::Collecting => "COLLECTING",
            CyclePhase::Screening => "SCREENING",
            CyclePhase::Researching => "RESEARCHING",
            CyclePhase::Analyzing => "ANALYZING",
            CyclePhase::RiskCheck => "RISK_CHECK",
            CyclePhase::Executing => "EXECUTING",
            CyclePhase::Confirming => "CONFIRMING",
            CyclePhase::Journaling => "JOURNALING",
            CyclePhase::Reflecting => "REFLECTING",
            CyclePhase::Halted => "HALTED",
            CyclePhase::Cooldown => "COOLDOWN",
        }
    }
}

/// Whitelisted successors. HALTED is handled separately (always legal).
fn allowed(from: CyclePhase, to: CyclePhase) -> bool {
    use CyclePhase::*;
    matches!(
        (from, to),
        (Idle, Collecting)
            | (Idle, Cooldown)
            | (Collecting, Screening)
            | (Collecting, Idle)
            | (Screening, Researching)
            | (Screening, Analyzing)
            | (Screening, Idle)
            | (Researching, Analyzing)
            | (Analyzing, RiskCheck)
            | (Analyzing, Reflecting)
            | (RiskCheck, Executing)
            | (RiskCheck, Idle)
            | (Executing, Confirming)
            | (Executing, Idle)
            | (Confirming, Journaling)
            | (Journaling, Reflecting)
            | (Reflecting, Idle)
            | (Cooldown, Idle)
            | (Halted, Idle)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    Transitioned { from: CyclePhase, to: CyclePhase },
    Rejected { from: CyclePhase, to: CyclePhase },
}

#[derive(Debug)]
pub struct CycleStateMachine {
    phase: CyclePhase,
    transitions: u64,
    rejected: u64,
}

impl CycleStateMachine {
    pub fn new() -> Self {
        CycleStateMachine {
            phase: CyclePhase::Idle,
            transitions: 0,
            rejected: 0,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Attempt a transition. HALTED is accepted from any phase
    /// (CONTRACT.md §1.1); everything else must be whitelisted.
    pub fn advance(&mut self, to: CyclePhase) -> PhaseTransition {
        let from = self.phase;
        let legal = to == CyclePhase::Halted || allowed(from, to);
        if !legal {
            self.rejected += 1;
            warn!(from = from.as_str(), to = to.as_str(), "illegal phase transition rejected");
            return PhaseTransition::Rejected { from, to };
        }
        self.phase = to;
        self.transitions += 1;
        PhaseTransition::Transitioned { from, to }
    }
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        CycleStateMachine::new()
    }
}
