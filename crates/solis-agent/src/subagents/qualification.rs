//! Qualification subagent — drives the funnel with deterministic questions.
//!
//! Slot extraction happens in the orchestrator before delegation; this agent
//! advances the stage from the merged slots, recomputes the score, and emits
//! the next question in the persona's voice.

use async_trait::async_trait;

use solis_core::config::FunnelConfig;
use solis_core::types::QualificationStage;

use crate::error::Result;
use crate::funnel;
use crate::score::{self, Engagement};

use super::{Subagent, SubagentOutcome, TurnContext};

pub struct QualificationAgent {
    cfg: FunnelConfig,
}

impl QualificationAgent {
    pub fn new(cfg: FunnelConfig) -> Self {
        Self { cfg }
    }

    /// The question that moves the funnel forward from `stage`.
    pub fn next_question(&self, stage: QualificationStage, slots_name: Option<&str>) -> String {
        let name = slots_name.unwrap_or("");
        let greeting = if name.is_empty() {
            String::new()
        } else {
            format!("{name}, ")
        };
        match stage {
            QualificationStage::Identifying => {
                "Que bom te ver por aqui! ☀️ Pra começar, como posso te chamar?".to_string()
            }
            QualificationStage::DiscoveringSolution => format!(
                "{greeting}temos 5 caminhos pra você economizar:\n\
                 1. Usina própria\n2. Aluguel de lote\n3. Desconto alto\n\
                 4. Desconto baixo\n5. Investimento\n\nQual faz mais sentido pra você?"
            ),
            QualificationStage::CapturingBill => format!(
                "{greeting}quanto vem, em média, sua conta de energia por mês? \
                 Pode mandar uma foto da conta se preferir."
            ),
            QualificationStage::CheckingCompetitor => format!(
                "{greeting}você já tem algum desconto na conta com outra empresa? \
                 Se sim, de quanto?"
            ),
            QualificationStage::Scheduling => format!(
                "{greeting}vamos marcar uma conversa com nosso consultor? \
                 Me diz o melhor dia e horário, e um e-mail pro convite."
            ),
            QualificationStage::Scheduled => {
                format!("{greeting}sua reunião está confirmada! Qualquer coisa me chama. 😊")
            }
            _ => format!("{greeting}como posso te ajudar com energia solar hoje?"),
        }
    }
}

#[async_trait]
impl Subagent for QualificationAgent {
    fn name(&self) -> &str {
        "qualification"
    }

    async fn handle(&self, ctx: &TurnContext<'_>) -> Result<SubagentOutcome> {
        let stage = funnel::advance(ctx.lead.stage, ctx.slots, &self.cfg, true);
        let engagement = Engagement::from_message_count(ctx.conversation.message_count);
        let new_score = score::compute(ctx.slots, engagement, &self.cfg);

        let reply = self.next_question(stage, ctx.slots.name.as_deref());

        let mut outcome = SubagentOutcome {
            reply,
            stage_hint: Some(stage),
            ..Default::default()
        };
        outcome.analytics.push((
            "qualification_turn".to_string(),
            serde_json::json!({ "stage": stage.to_string(), "score": new_score }),
        ));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifying_asks_for_name() {
        let agent = QualificationAgent::new(FunnelConfig::default());
        let q = agent.next_question(QualificationStage::Identifying, None);
        assert!(q.contains("chamar"));
    }

    #[test]
    fn discovering_lists_the_five_solutions() {
        let agent = QualificationAgent::new(FunnelConfig::default());
        let q = agent.next_question(QualificationStage::DiscoveringSolution, Some("João"));
        assert!(q.starts_with("João"));
        for n in 1..=5 {
            assert!(q.contains(&format!("{n}.")));
        }
    }
}
