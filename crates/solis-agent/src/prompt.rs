//! Persona prompt assembly and structured-reply parsing.
//!
//! The persona lives in an external markdown file loaded at startup; slot
//! values are templated in per turn. The model is asked for a JSON envelope
//! (reply, slot updates, stage hint, next action) and we parse defensively —
//! a model that answers in plain prose still produces a usable reply.

use serde::Deserialize;
use tracing::warn;

use solis_core::types::QualificationStage;
use solis_store::types::{Lead, Slots};

/// Fallback persona when the configured file is missing.
const BUILTIN_PERSONA: &str = "\
Você é a Helen, consultora de energia solar da Solis. Atende leads pelo \
WhatsApp com tom caloroso, direto e profissional. Objetivo: qualificar o \
lead (nome, solução desejada, valor da conta, concorrência) e agendar uma \
reunião com o consultor. Nunca peça documentos ou dados bancários. \
Responda sempre em português.";

/// Instruction appended to every system prompt asking for the JSON envelope.
const ENVELOPE_INSTRUCTION: &str = r#"
Responda SEMPRE com um JSON válido neste formato, sem texto fora do JSON:
{"reply": "<mensagem para o lead>",
 "slots": {"name": null, "bill_amount": null, "solution": null,
           "has_competitor": null, "competitor_name": null,
           "competitor_discount_pct": null, "emails": [], "meeting_at": null},
 "stage_hint": null,
 "next_action": null}
Preencha em "slots" apenas o que o lead informou nesta mensagem."#;

pub struct PersonaPrompt {
    template: String,
}

/// The envelope the model is asked to produce.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StructuredReply {
    pub reply: String,
    pub slots: Slots,
    pub stage_hint: Option<QualificationStage>,
    pub next_action: Option<String>,
}

impl PersonaPrompt {
    /// Load the persona file; fall back to the builtin when absent.
    pub fn load(path: &str) -> Self {
        let template = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path, error = %e, "persona file not found, using builtin persona");
                BUILTIN_PERSONA.to_string()
            }
        };
        Self { template }
    }

    pub fn builtin() -> Self {
        Self {
            template: BUILTIN_PERSONA.to_string(),
        }
    }

    /// Assemble the system prompt for a turn.
    pub fn build(&self, lead: &Lead, slots: &Slots, knowledge: &[String]) -> String {
        let mut prompt = self
            .template
            .replace("{{name}}", slots.name.as_deref().unwrap_or("desconhecido"))
            .replace("{{stage}}", &lead.stage.to_string())
            .replace("{{temperature}}", &lead.temperature.to_string());

        prompt.push_str("\n\n## Estado do lead\n");
        prompt.push_str(&format!("- Estágio: {}\n", lead.stage));
        if let Some(ref name) = slots.name {
            prompt.push_str(&format!("- Nome: {name}\n"));
        }
        if let Some(bill) = slots.bill_amount {
            prompt.push_str(&format!("- Conta mensal: R$ {bill:.2}\n"));
        }
        if let Some(solution) = slots.solution {
            prompt.push_str(&format!("- Solução de interesse: {solution}\n"));
        }
        match slots.has_competitor {
            Some(true) => {
                let name = slots.competitor_name.as_deref().unwrap_or("concorrente");
                let pct = slots
                    .competitor_discount_pct
                    .map(|p| format!(" ({p:.0}% de desconto)"))
                    .unwrap_or_default();
                prompt.push_str(&format!("- Já tem desconto com {name}{pct}\n"));
            }
            Some(false) => prompt.push_str("- Sem desconto de concorrente\n"),
            None => {}
        }

        if !knowledge.is_empty() {
            prompt.push_str("\n## Base de conhecimento (use como fonte)\n");
            for (i, chunk) in knowledge.iter().enumerate() {
                prompt.push_str(&format!("[{}] {chunk}\n", i + 1));
            }
        }

        prompt.push_str(ENVELOPE_INSTRUCTION);
        prompt
    }
}

/// Parse the model's envelope, tolerating fences and stray prose.
///
/// Never fails: an unparsable payload becomes a plain-text reply with no slot
/// updates.
pub fn parse_structured(text: &str) -> StructuredReply {
    let candidate = strip_fences(text);
    if let Some(json) = extract_json_object(candidate) {
        match serde_json::from_str::<StructuredReply>(json) {
            Ok(parsed) if !parsed.reply.trim().is_empty() => return parsed,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "structured reply parse failed, using raw text"),
        }
    }
    StructuredReply {
        reply: text.trim().to_string(),
        ..Default::default()
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use solis_core::types::{LeadId, Phone, SolutionChoice, Temperature};

    fn lead() -> Lead {
        Lead {
            id: LeadId::new(),
            phone: Phone::new("+5581999999999"),
            display_name: None,
            email: None,
            stage: QualificationStage::CapturingBill,
            solution: SolutionChoice::OwnPlant,
            bill_amount: None,
            competitor_name: None,
            competitor_discount_pct: None,
            score: 30,
            temperature: Temperature::Cold,
            crm_external_id: None,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn build_includes_slot_state_and_envelope() {
        let persona = PersonaPrompt::builtin();
        let slots = Slots {
            name: Some("João".to_string()),
            bill_amount: Some(850.0),
            ..Default::default()
        };
        let prompt = persona.build(&lead(), &slots, &[]);
        assert!(prompt.contains("João"));
        assert!(prompt.contains("R$ 850.00"));
        assert!(prompt.contains("\"reply\""));
    }

    #[test]
    fn build_numbers_knowledge_chunks() {
        let persona = PersonaPrompt::builtin();
        let prompt = persona.build(
            &lead(),
            &Slots::default(),
            &["payback médio de 5 anos".to_string()],
        );
        assert!(prompt.contains("[1] payback médio de 5 anos"));
    }

    #[test]
    fn parse_clean_envelope() {
        let parsed = parse_structured(
            r#"{"reply": "Perfeito, João!", "slots": {"bill_amount": 850.0}, "stage_hint": "checking_competitor", "next_action": null}"#,
        );
        assert_eq!(parsed.reply, "Perfeito, João!");
        assert_eq!(parsed.slots.bill_amount, Some(850.0));
        assert_eq!(parsed.stage_hint, Some(QualificationStage::CheckingCompetitor));
    }

    #[test]
    fn parse_fenced_envelope() {
        let parsed = parse_structured("```json\n{\"reply\": \"Oi!\", \"slots\": {}}\n```");
        assert_eq!(parsed.reply, "Oi!");
    }

    #[test]
    fn parse_plain_prose_falls_back() {
        let parsed = parse_structured("Oi! Como posso ajudar?");
        assert_eq!(parsed.reply, "Oi! Como posso ajudar?");
        assert_eq!(parsed.slots, Slots::default());
    }

    #[test]
    fn parse_envelope_with_surrounding_prose() {
        let parsed = parse_structured("Claro! Aqui está: {\"reply\": \"Olá\", \"slots\": {}} espero que ajude");
        assert_eq!(parsed.reply, "Olá");
    }
}
