//! Qualification funnel — stage progression driven by slot saturation.
//!
//! A stage advances as soon as its required slot is filled; several stages can
//! be crossed in one turn when a message fills several slots at once. The only
//! allowed backward move is SCHEDULED → SCHEDULING (reschedule).

use solis_core::config::FunnelConfig;
use solis_core::types::{QualificationStage, SolutionChoice};
use solis_store::types::Slots;

/// Advance `stage` as far as the filled slots allow.
///
/// `had_inbound` covers the INITIAL → IDENTIFYING step, which requires no
/// slot at all.
pub fn advance(
    stage: QualificationStage,
    slots: &Slots,
    cfg: &FunnelConfig,
    had_inbound: bool,
) -> QualificationStage {
    let mut current = stage;
    loop {
        let next = step(current, slots, cfg, had_inbound);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn step(
    stage: QualificationStage,
    slots: &Slots,
    cfg: &FunnelConfig,
    had_inbound: bool,
) -> QualificationStage {
    use QualificationStage::*;
    match stage {
        Initial if had_inbound => Identifying,
        Identifying if slots.name.is_some() => DiscoveringSolution,
        DiscoveringSolution => match slots.solution {
            // Investment leads skip the bill/competitor gates and go straight
            // to booking with a specialist.
            Some(SolutionChoice::Investment) => Scheduling,
            Some(s) if s.is_known() => CapturingBill,
            _ => stage,
        },
        CapturingBill => match slots.bill_amount {
            Some(amount) if amount >= cfg.min_bill_threshold => CheckingCompetitor,
            _ => stage,
        },
        CheckingCompetitor if slots.has_competitor.is_some() => Scheduling,
        Scheduling if slots.meeting_at.is_some() && !slots.emails.is_empty() => Scheduled,
        _ => stage,
    }
}

/// Is `from` → `to` a legal transition? Forward moves along the funnel are
/// allowed, plus the reschedule loop.
pub fn transition_allowed(from: QualificationStage, to: QualificationStage) -> bool {
    use QualificationStage::*;
    if from == to {
        return true;
    }
    // Reschedule loop.
    if from == Scheduled && to == Scheduling {
        return true;
    }
    // Terminal closures may happen from any live stage.
    if matches!(to, Abandoned | Won | Lost) {
        return !from.is_terminal() || from == Scheduled;
    }
    if from.is_terminal() {
        return false;
    }
    to.ordinal() > from.ordinal() && to.ordinal() <= Scheduled.ordinal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FunnelConfig {
        FunnelConfig::default()
    }

    #[test]
    fn first_inbound_starts_identifying() {
        let stage = advance(QualificationStage::Initial, &Slots::default(), &cfg(), true);
        assert_eq!(stage, QualificationStage::Identifying);
    }

    #[test]
    fn name_unlocks_solution_discovery() {
        let slots = Slots {
            name: Some("João".to_string()),
            ..Default::default()
        };
        let stage = advance(QualificationStage::Identifying, &slots, &cfg(), true);
        assert_eq!(stage, QualificationStage::DiscoveringSolution);
    }

    #[test]
    fn filled_slots_cross_multiple_stages_in_one_turn() {
        let slots = Slots {
            name: Some("João".to_string()),
            solution: Some(SolutionChoice::OwnPlant),
            bill_amount: Some(850.0),
            ..Default::default()
        };
        let stage = advance(QualificationStage::Initial, &slots, &cfg(), true);
        assert_eq!(stage, QualificationStage::CheckingCompetitor);
    }

    #[test]
    fn bill_exactly_at_threshold_advances() {
        let slots = Slots {
            bill_amount: Some(cfg().min_bill_threshold),
            ..Default::default()
        };
        let stage = advance(QualificationStage::CapturingBill, &slots, &cfg(), true);
        assert_eq!(stage, QualificationStage::CheckingCompetitor);
    }

    #[test]
    fn bill_below_threshold_stays() {
        let slots = Slots {
            bill_amount: Some(cfg().min_bill_threshold - 1.0),
            ..Default::default()
        };
        let stage = advance(QualificationStage::CapturingBill, &slots, &cfg(), true);
        assert_eq!(stage, QualificationStage::CapturingBill);
    }

    #[test]
    fn investment_jumps_to_scheduling() {
        let slots = Slots {
            solution: Some(SolutionChoice::Investment),
            ..Default::default()
        };
        let stage = advance(QualificationStage::DiscoveringSolution, &slots, &cfg(), true);
        assert_eq!(stage, QualificationStage::Scheduling);
    }

    #[test]
    fn competitor_answer_either_way_advances() {
        for has in [true, false] {
            let slots = Slots {
                has_competitor: Some(has),
                ..Default::default()
            };
            let stage = advance(QualificationStage::CheckingCompetitor, &slots, &cfg(), true);
            assert_eq!(stage, QualificationStage::Scheduling);
        }
    }

    #[test]
    fn scheduling_requires_datetime_and_email() {
        let mut slots = Slots {
            meeting_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        assert_eq!(
            advance(QualificationStage::Scheduling, &slots, &cfg(), true),
            QualificationStage::Scheduling
        );
        slots.emails.push("joao@exemplo.com".to_string());
        assert_eq!(
            advance(QualificationStage::Scheduling, &slots, &cfg(), true),
            QualificationStage::Scheduled
        );
    }

    #[test]
    fn no_backward_transitions_except_reschedule() {
        use QualificationStage::*;
        assert!(transition_allowed(Scheduled, Scheduling));
        assert!(!transition_allowed(CheckingCompetitor, CapturingBill));
        assert!(!transition_allowed(Scheduling, Identifying));
        assert!(transition_allowed(Identifying, CapturingBill));
        assert!(!transition_allowed(Lost, Scheduling));
        assert!(transition_allowed(CapturingBill, Abandoned));
    }
}
