//! Cycle phase machine tests per CONTRACT.md §1.1.

use warden_core::cycle::state::{CyclePhase, CycleStateMachine, PhaseTransition};

fn advance_ok(sm: &mut CycleStateMachine, to: CyclePhase) {
    match sm.advance(to) {
        PhaseTransition::Transitioned { .. } => {}
        PhaseTransition::Rejected { from, to } => {
            panic!("expected legal transition {from:?} -> {to:?}")
        }
    }
}

#[test]
fn test_full_trade_path() {
    let mut sm = CycleStateMachine::new();
    for phase in [
        CyclePhase::Collecting,
        CyclePhase::Screening,
        CyclePhase::Researching,
        CyclePhase::Analyzing,
        CyclePhase::RiskCheck,
        CyclePhase::Executing,
        CyclePhase::Confirming,
        CyclePhase::Journaling,
        CyclePhase::Reflecting,
        CyclePhase::Idle,
    ] {
        advance_ok(&mut sm, phase);
    }
    assert_eq!(sm.phase(), CyclePhase::Idle);
    assert_eq!(sm.transitions(), 10);
    assert_eq!(sm.rejected(), 0);
}

#[test]
fn test_screening_may_skip_research() {
    let mut sm = CycleStateMachine::new();
    advance_ok(&mut sm, CyclePhase::Collecting);
    advance_ok(&mut sm, CyclePhase::Screening);
    advance_ok(&mut sm, CyclePhase::Analyzing);
}

#[test]
fn test_hold_path_skips_execution() {
    let mut sm = CycleStateMachine::new();
    advance_ok(&mut sm, CyclePhase::Collecting);
    advance_ok(&mut sm, CyclePhase::Screening);
    advance_ok(&mut sm, CyclePhase::Analyzing);
    advance_ok(&mut sm, CyclePhase::Reflecting);
    advance_ok(&mut sm, CyclePhase::Idle);
}

#[test]
fn test_illegal_jump_rejected_without_moving() {
    let mut sm = CycleStateMachine::new();
    let result = sm.advance(CyclePhase::Executing);
    assert_eq!(
        result,
        PhaseTransition::Rejected {
            from: CyclePhase::Idle,
            to: CyclePhase::Executing,
        }
    );
    assert_eq!(sm.phase(), CyclePhase::Idle);
    assert_eq!(sm.rejected(), 1);
}

#[test]
fn test_halted_reachable_from_every_phase() {
    for path in [
        vec![],
        vec![CyclePhase::Collecting],
        vec![CyclePhase::Collecting, CyclePhase::Screening],
        vec![
            CyclePhase::Collecting,
            CyclePhase::Screening,
            CyclePhase::Analyzing,
            CyclePhase::RiskCheck,
            CyclePhase::Executing,
            CyclePhase::Confirming,
        ],
    ] {
        let mut sm = CycleStateMachine::new();
        for phase in path {
            advance_ok(&mut sm, phase);
        }
        advance_ok(&mut sm, CyclePhase::Halted);
        assert_eq!(sm.phase(), CyclePhase::Halted);
    }
}

#[test]
fn test_halted_leaves_only_to_idle() {
    let mut sm = CycleStateMachine::new();
    advance_ok(&mut sm, CyclePhase::Halted);
    assert!(matches!(
        sm.advance(CyclePhase::Collecting),
        PhaseTransition::Rejected { .. }
    ));
    advance_ok(&mut sm, CyclePhase::Idle);
}

#[test]
fn test_cooldown_only_from_idle() {
    let mut sm = CycleStateMachine::new();
    advance_ok(&mut sm, CyclePhase::Cooldown);
    advance_ok(&mut sm, CyclePhase::Idle);

    let mut sm = CycleStateMachine::new();
    advance_ok(&mut sm, CyclePhase::Collecting);
    assert!(matches!(
        sm.advance(CyclePhase::Cooldown),
        PhaseTransition::Rejected { .. }
    ));
}

#[test]
fn test_out_of_order_never_panics() {
    // Walk every phase pair; illegal ones reject quietly.
    let phases = [
        CyclePhase::Idle,
        CyclePhase::Collecting,
        CyclePhase::Screening,
        CyclePhase::Researching,
        CyclePhase::Analyzing,
        CyclePhase::RiskCheck,
        CyclePhase::Executing,
        CyclePhase::Confirming,
        CyclePhase::Journaling,
        CyclePhase::Reflecting,
        CyclePhase::Halted,
        CyclePhase::Cooldown,
    ];
    let mut sm = CycleStateMachine::new();
    for to in phases {
        let _ = sm.advance(to);
    }
}
