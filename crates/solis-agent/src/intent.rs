//! Intent signals — decide between a subagent and the coordinator model.
//!
//! Keyword sets per intent plus a cheap complexity heuristic (length,
//! question density, media). Signals are scored; the strongest one above the
//! threshold wins the delegation.

use solis_core::types::ContentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Booking, moving, or canceling a meeting.
    Calendar,
    /// "Call me later", "can you remind me".
    FollowUp,
    /// Bill amounts, attached bill media.
    Bill,
    /// Deep informational question → knowledge retrieval.
    Knowledge,
}

#[derive(Debug, Clone, Copy)]
pub struct Signals {
    pub intent: Option<Intent>,
    /// Length + question-density heuristic; high complexity favors retrieval.
    pub complex: bool,
}

const CALENDAR_TERMS: &[&str] = &[
    "agendar", "agenda", "reunião", "reuniao", "marcar", "remarcar", "desmarcar", "cancelar",
    "horário", "horario", "disponibilidade",
];

const FOLLOWUP_TERMS: &[&str] = &[
    "me chama depois", "mais tarde", "semana que vem", "me lembra", "me avisa", "outro momento",
];

const BILL_TERMS: &[&str] = &[
    "conta de luz", "conta de energia", "fatura", "boleto", "valor da conta", "kwh",
];

const KNOWLEDGE_TERMS: &[&str] = &[
    "como funciona", "o que é", "o que e", "qual a diferença", "qual a diferenca", "payback",
    "garantia", "instalação", "instalacao", "manutenção", "manutencao", "financiamento",
    "inversor", "placa", "painel",
];

/// Message length past which we call the message complex.
const COMPLEX_LEN: usize = 280;

pub fn classify(text: &str, content_type: ContentType) -> Signals {
    let lower = text.to_lowercase();

    // Media rides straight to the bill analyzer — people photograph bills.
    if matches!(content_type, ContentType::Image | ContentType::Document) {
        return Signals {
            intent: Some(Intent::Bill),
            complex: false,
        };
    }

    let scores = [
        (Intent::Calendar, hits(&lower, CALENDAR_TERMS)),
        (Intent::FollowUp, hits(&lower, FOLLOWUP_TERMS)),
        (Intent::Bill, hits(&lower, BILL_TERMS)),
        (Intent::Knowledge, hits(&lower, KNOWLEDGE_TERMS)),
    ];

    let best = scores
        .iter()
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(intent, _)| *intent);

    let questions = lower.matches('?').count();
    let complex = lower.len() > COMPLEX_LEN || questions >= 2;

    // Long, question-dense messages with no clearer signal lean on retrieval.
    let intent = match best {
        Some(i) => Some(i),
        None if complex && questions > 0 => Some(Intent::Knowledge),
        None => None,
    };

    Signals { intent, complex }
}

fn hits(lower: &str, terms: &[&str]) -> usize {
    terms.iter().filter(|t| lower.contains(*t)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_request_routes_to_calendar() {
        let s = classify("Podemos agendar uma reunião terça?", ContentType::Text);
        assert_eq!(s.intent, Some(Intent::Calendar));
    }

    #[test]
    fn informational_question_routes_to_knowledge() {
        let s = classify("Como funciona o payback da usina?", ContentType::Text);
        assert_eq!(s.intent, Some(Intent::Knowledge));
    }

    #[test]
    fn bill_talk_routes_to_bill() {
        let s = classify("minha conta de luz veio alta", ContentType::Text);
        assert_eq!(s.intent, Some(Intent::Bill));
    }

    #[test]
    fn image_always_routes_to_bill() {
        let s = classify("", ContentType::Image);
        assert_eq!(s.intent, Some(Intent::Bill));
    }

    #[test]
    fn postponement_routes_to_followup() {
        let s = classify("me chama depois, estou ocupado", ContentType::Text);
        assert_eq!(s.intent, Some(Intent::FollowUp));
    }

    #[test]
    fn small_talk_has_no_intent() {
        let s = classify("oi, tudo bem?", ContentType::Text);
        assert_eq!(s.intent, None);
        assert!(!s.complex);
    }

    #[test]
    fn long_question_dense_message_is_complex() {
        let text = format!("{} o que acham? e o preço? ", "detalhes ".repeat(40));
        let s = classify(&text, ContentType::Text);
        assert!(s.complex);
        assert_eq!(s.intent, Some(Intent::Knowledge));
    }
}
