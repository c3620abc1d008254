//! Funnel stage → external pipeline stage id.
//!
//! The single source of truth for the mapping; nothing else in the codebase
//! may translate stages into CRM ids.

use solis_core::types::QualificationStage;

pub fn pipeline_stage_id(stage: QualificationStage) -> &'static str {
    match stage {
        QualificationStage::Initial => "novo-lead",
        QualificationStage::Identifying => "em-qualificacao",
        QualificationStage::DiscoveringSolution => "em-qualificacao",
        QualificationStage::CapturingBill => "em-qualificacao",
        QualificationStage::CheckingCompetitor => "qualificado",
        QualificationStage::Scheduling => "reuniao-em-agendamento",
        QualificationStage::Scheduled => "reuniao-agendada",
        QualificationStage::Abandoned => "abandonado",
        QualificationStage::Won => "ganho",
        QualificationStage::Lost => "perdido",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_maps() {
        // The match is exhaustive; pin the ids the CRM pipeline expects.
        assert_eq!(pipeline_stage_id(QualificationStage::Initial), "novo-lead");
        assert_eq!(
            pipeline_stage_id(QualificationStage::Scheduled),
            "reuniao-agendada"
        );
        assert_eq!(pipeline_stage_id(QualificationStage::Won), "ganho");
    }
}
