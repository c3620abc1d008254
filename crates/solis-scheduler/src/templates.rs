//! Outbound message templates for follow-ups and reminders.
//!
//! Keys are stored on the follow-up row; rendering fills in the lead's name
//! and known slot values. Unknown keys fall back to a generic nudge.

use chrono::{DateTime, Timelike, Utc};

use solis_store::types::Lead;

pub fn render(template_key: &str, lead: &Lead) -> String {
    let name = lead
        .display_name
        .clone()
        .unwrap_or_else(|| "tudo bem".to_string());

    match template_key {
        "reengage_first" => format!(
            "Oi {name}! 😊 Vi que nossa conversa ficou pela metade. \
             Ainda posso te ajudar a economizar na conta de luz?"
        ),
        "reengage_requested" => format!(
            "Oi {name}! Como combinado, voltando pra gente continuar. \
             Podemos retomar de onde paramos?"
        ),
        "nurture" => format!(
            "Oi {name}! Passando pra lembrar que a economia com energia solar \
             começa já na primeira conta. ☀️ Quer retomar nossa conversa?"
        ),
        _ => format!("Oi {name}! Ainda está por aí? Qualquer dúvida sobre energia solar, me chama!"),
    }
}

/// Reminder message for a meeting starting at `start_at`.
pub fn render_reminder(template_key: &str, lead: &Lead, start_at: DateTime<Utc>) -> String {
    let name = lead.display_name.clone().unwrap_or_else(|| "olá".to_string());
    let when = format!(
        "{} às {:02}h{:02}",
        start_at.format("%d/%m"),
        start_at.hour(),
        start_at.minute()
    );

    match template_key {
        "reminder_24h" => format!(
            "Oi {name}! Lembrete: sua reunião sobre energia solar é amanhã, {when}. \
             Nos vemos lá! 😊"
        ),
        "reminder_2h" => format!(
            "Oi {name}! Sua reunião é daqui a pouco, {when}. Já deixa o link aberto! 🙌"
        ),
        "reminder_30m" => format!("{name}, sua reunião começa em 30 minutos ({when}). Até já! ⏰"),
        _ => format!("Oi {name}! Lembrete da sua reunião: {when}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use solis_core::types::{LeadId, Phone, QualificationStage, SolutionChoice, Temperature};

    fn lead(name: Option<&str>) -> Lead {
        Lead {
            id: LeadId::new(),
            phone: Phone::new("+5581999999999"),
            display_name: name.map(String::from),
            email: None,
            stage: QualificationStage::CapturingBill,
            solution: SolutionChoice::Unknown,
            bill_amount: None,
            competitor_name: None,
            competitor_discount_pct: None,
            score: 0,
            temperature: Temperature::Cold,
            crm_external_id: None,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn templates_include_the_name() {
        let text = render("reengage_first", &lead(Some("João")));
        assert!(text.contains("João"));
    }

    #[test]
    fn unknown_key_falls_back() {
        let text = render("no_such_template", &lead(Some("Ana")));
        assert!(text.contains("Ana"));
    }

    #[test]
    fn reminder_includes_time() {
        let start = Utc.with_ymd_and_hms(2025, 6, 17, 10, 0, 0).unwrap();
        let text = render_reminder("reminder_2h", &lead(Some("João")), start);
        assert!(text.contains("10h00"));
    }
}
