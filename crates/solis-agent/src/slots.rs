//! Rule-based slot extraction — regexes first, the model only as fallback.
//!
//! Extraction never overwrites a filled slot unless the message carries an
//! explicit correction marker ("na verdade", "errei", "corrigindo"…).

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use regex::Regex;

use solis_core::types::{QualificationStage, SolutionChoice};
use solis_store::types::Slots;

pub struct SlotExtractor {
    name_re: Vec<Regex>,
    currency_re: Regex,
    bare_amount_re: Regex,
    percent_re: Regex,
    email_re: Regex,
    competitor_with_re: Regex,
    no_competitor_re: Regex,
    correction_re: Regex,
    time_re: Regex,
}

impl Default for SlotExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotExtractor {
    pub fn new() -> Self {
        Self {
            name_re: vec![
                Regex::new(r"(?i)\bmeu nome é\s+([[:alpha:]À-ÿ]+(?:\s+[[:alpha:]À-ÿ]+){0,3})")
                    .unwrap(),
                Regex::new(r"(?i)\bme chamo\s+([[:alpha:]À-ÿ]+(?:\s+[[:alpha:]À-ÿ]+){0,3})")
                    .unwrap(),
                Regex::new(r"(?i)\baqui é (?:o|a)\s+([[:alpha:]À-ÿ]+(?:\s+[[:alpha:]À-ÿ]+){0,2})")
                    .unwrap(),
                Regex::new(r"(?i)^sou (?:o|a)\s+([[:alpha:]À-ÿ]+(?:\s+[[:alpha:]À-ÿ]+){0,2})")
                    .unwrap(),
            ],
            currency_re: Regex::new(r"(?i)r\$\s*([\d.]+(?:,\d{1,2})?)").unwrap(),
            bare_amount_re: Regex::new(r"(?i)\b(?:pago|conta(?: de)?|valor(?: de)?|em torno de|uns)\s+([\d.]+(?:,\d{1,2})?)\s*(?:reais|por mês|mensais)?")
                .unwrap(),
            percent_re: Regex::new(r"(\d{1,2}(?:[.,]\d{1,2})?)\s*%").unwrap(),
            email_re: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
            competitor_with_re: Regex::new(
                r"(?i)\bcom (?:a|o)\s+([[:alpha:]À-ÿ][[:alpha:]À-ÿ0-9]*(?:\s+Energia)?)",
            )
            .unwrap(),
            no_competitor_re: Regex::new(
                r"(?i)\b(?:não|nao)\s+(?:tenho|tem|possuo)\b|\bnenhum desconto\b|\bsem desconto\b",
            )
            .unwrap(),
            // Reschedule verbs count as corrections so a new meeting time can
            // replace the one already captured.
            correction_re: Regex::new(
                r"(?i)\bna verdade\b|\berrei\b|\bcorrigindo\b|\bmudei de ideia\b|\bquis dizer\b|\bremarcar\b|\breagendar\b",
            )
            .unwrap(),
            time_re: Regex::new(r"(?i)\b(?:às|as)\s*(\d{1,2})(?:[:h](\d{2}))?\s*h?\b").unwrap(),
        }
    }

    /// Extract whatever the message gives; fields the text is silent about
    /// stay `None`.
    pub fn extract(&self, text: &str, stage: QualificationStage, now: DateTime<Utc>) -> Slots {
        let mut slots = Slots::default();

        for re in &self.name_re {
            if let Some(cap) = re.captures(text) {
                let raw = cap[1].trim();
                slots.name = Some(title_case(raw));
                break;
            }
        }

        if let Some(cap) = self.currency_re.captures(text) {
            slots.bill_amount = parse_brl(&cap[1]);
        } else if let Some(cap) = self.bare_amount_re.captures(text) {
            slots.bill_amount = parse_brl(&cap[1]);
        }

        slots.solution = detect_solution(text);

        if let Some(cap) = self.percent_re.captures(text) {
            slots.competitor_discount_pct = cap[1].replace(',', ".").parse::<f64>().ok();
        }

        // Competitor interpretation depends on where the funnel is: a bare
        // "não tenho" only means "no competitor" while that question is open.
        if self.competitor_with_re.is_match(text)
            && (text.to_lowercase().contains("desconto") || slots.competitor_discount_pct.is_some())
        {
            slots.has_competitor = Some(true);
            if let Some(cap) = self.competitor_with_re.captures(text) {
                slots.competitor_name = Some(cap[1].trim().to_string());
            }
        } else if stage == QualificationStage::CheckingCompetitor
            && self.no_competitor_re.is_match(text)
        {
            slots.has_competitor = Some(false);
        }

        for m in self.email_re.find_iter(text) {
            slots.emails.push(m.as_str().to_lowercase());
        }

        slots.meeting_at = self.parse_meeting(text, now);

        slots
    }

    /// Does the message explicitly correct earlier information?
    pub fn is_correction(&self, text: &str) -> bool {
        self.correction_re.is_match(text)
    }

    /// Parse "terça às 10h", "amanhã às 14h", "hoje às 9:30" into an instant.
    fn parse_meeting(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lower = text.to_lowercase();
        let time = self.time_re.captures(&lower)?;
        let hour: u32 = time[1].parse().ok()?;
        let minute: u32 = time
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        if hour > 23 || minute > 59 {
            return None;
        }

        let date = if lower.contains("amanhã") || lower.contains("amanha") {
            now.date_naive() + Duration::days(1)
        } else if lower.contains("hoje") {
            now.date_naive()
        } else if let Some(weekday) = detect_weekday(&lower) {
            let mut date = now.date_naive() + Duration::days(1);
            while date.weekday() != weekday {
                date += Duration::days(1);
            }
            date
        } else {
            return None;
        };

        let naive = date.and_hms_opt(hour, minute, 0)?;
        Some(Utc.from_utc_datetime(&naive))
    }
}

/// Merge freshly extracted slots into the session, respecting the
/// never-overwrite rule.
pub fn merge(existing: &mut Slots, extracted: Slots, correction: bool) {
    merge_field(&mut existing.name, extracted.name, correction);
    merge_field(&mut existing.bill_amount, extracted.bill_amount, correction);
    merge_field(&mut existing.solution, extracted.solution, correction);
    merge_field(&mut existing.has_competitor, extracted.has_competitor, correction);
    merge_field(&mut existing.competitor_name, extracted.competitor_name, correction);
    merge_field(
        &mut existing.competitor_discount_pct,
        extracted.competitor_discount_pct,
        correction,
    );
    merge_field(&mut existing.meeting_at, extracted.meeting_at, correction);
    for email in extracted.emails {
        if !existing.emails.contains(&email) {
            existing.emails.push(email);
        }
    }
}

fn merge_field<T>(existing: &mut Option<T>, extracted: Option<T>, correction: bool) {
    if extracted.is_some() && (existing.is_none() || correction) {
        *existing = extracted;
    }
}

fn detect_solution(text: &str) -> Option<SolutionChoice> {
    let lower = text.to_lowercase();
    if lower.contains("usina própria") || lower.contains("usina propria") {
        return Some(SolutionChoice::OwnPlant);
    }
    if lower.contains("aluguel de lote") || lower.contains("alugar um lote") || lower.contains("lote")
    {
        return Some(SolutionChoice::LotRental);
    }
    if lower.contains("desconto alto") {
        return Some(SolutionChoice::DiscountHigh);
    }
    if lower.contains("desconto baixo") {
        return Some(SolutionChoice::DiscountLow);
    }
    if lower.contains("investimento") || lower.contains("investir") {
        return Some(SolutionChoice::Investment);
    }
    // A bare menu reply: the whole message is one digit.
    let trimmed = text.trim();
    if trimmed.len() == 1 {
        if let Ok(n) = trimmed.parse::<u8>() {
            return SolutionChoice::from_menu(n);
        }
    }
    None
}

fn detect_weekday(lower: &str) -> Option<Weekday> {
    // "terça" also matches "terça-feira".
    if lower.contains("segunda") {
        Some(Weekday::Mon)
    } else if lower.contains("terça") || lower.contains("terca") {
        Some(Weekday::Tue)
    } else if lower.contains("quarta") {
        Some(Weekday::Wed)
    } else if lower.contains("quinta") {
        Some(Weekday::Thu)
    } else if lower.contains("sexta") {
        Some(Weekday::Fri)
    } else if lower.contains("sábado") || lower.contains("sabado") {
        Some(Weekday::Sat)
    } else if lower.contains("domingo") {
        Some(Weekday::Sun)
    } else {
        None
    }
}

/// Parse a pt-BR money string: "1.234,56" → 1234.56, "850" → 850.0.
fn parse_brl(raw: &str) -> Option<f64> {
    let normalized = raw.replace('.', "").replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| *v > 0.0)
}

fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn extractor() -> SlotExtractor {
        SlotExtractor::new()
    }

    fn now() -> DateTime<Utc> {
        // A Friday.
        Utc.with_ymd_and_hms(2025, 6, 13, 15, 0, 0).unwrap()
    }

    #[test]
    fn extracts_name_from_introduction() {
        let slots = extractor().extract("Meu nome é João", QualificationStage::Identifying, now());
        assert_eq!(slots.name.as_deref(), Some("João"));
    }

    #[test]
    fn extracts_multi_word_name() {
        let slots = extractor().extract(
            "me chamo maria clara souza",
            QualificationStage::Identifying,
            now(),
        );
        assert_eq!(slots.name.as_deref(), Some("Maria Clara Souza"));
    }

    #[test]
    fn extracts_currency_amount() {
        let slots = extractor().extract("Pago R$ 850", QualificationStage::CapturingBill, now());
        assert_eq!(slots.bill_amount, Some(850.0));
    }

    #[test]
    fn extracts_thousands_amount() {
        let slots = extractor().extract(
            "minha conta vem R$ 1.234,56 por mês",
            QualificationStage::CapturingBill,
            now(),
        );
        assert_eq!(slots.bill_amount, Some(1234.56));
    }

    #[test]
    fn extracts_bare_amount_with_verb() {
        let slots = extractor().extract("pago 900 reais", QualificationStage::CapturingBill, now());
        assert_eq!(slots.bill_amount, Some(900.0));
    }

    #[test]
    fn detects_own_plant_solution() {
        let slots = extractor().extract(
            "Quero uma usina própria",
            QualificationStage::DiscoveringSolution,
            now(),
        );
        assert_eq!(slots.solution, Some(SolutionChoice::OwnPlant));
    }

    #[test]
    fn detects_menu_digit() {
        let slots = extractor().extract("2", QualificationStage::DiscoveringSolution, now());
        assert_eq!(slots.solution, Some(SolutionChoice::LotRental));
    }

    #[test]
    fn extracts_competitor_with_discount() {
        let slots = extractor().extract(
            "Tenho desconto de 10% com a Origo",
            QualificationStage::CheckingCompetitor,
            now(),
        );
        assert_eq!(slots.has_competitor, Some(true));
        assert_eq!(slots.competitor_name.as_deref(), Some("Origo"));
        assert_eq!(slots.competitor_discount_pct, Some(10.0));
    }

    #[test]
    fn no_competitor_only_in_checking_stage() {
        let e = extractor();
        let in_stage = e.extract("não tenho desconto nenhum", QualificationStage::CheckingCompetitor, now());
        assert_eq!(in_stage.has_competitor, Some(false));
        let out_of_stage = e.extract("não tenho desconto nenhum", QualificationStage::Identifying, now());
        assert_eq!(out_of_stage.has_competitor, None);
    }

    #[test]
    fn extracts_email_and_meeting() {
        let slots = extractor().extract(
            "Podemos agendar terça às 10h? email joao@exemplo.com",
            QualificationStage::Scheduling,
            now(),
        );
        assert_eq!(slots.emails, vec!["joao@exemplo.com".to_string()]);
        let meeting = slots.meeting_at.unwrap();
        assert_eq!(meeting.weekday(), Weekday::Tue);
        assert_eq!(meeting, Utc.with_ymd_and_hms(2025, 6, 17, 10, 0, 0).unwrap());
    }

    #[test]
    fn meeting_tomorrow() {
        let slots = extractor().extract("amanhã às 14h30 pode ser?", QualificationStage::Scheduling, now());
        assert_eq!(
            slots.meeting_at,
            Some(Utc.with_ymd_and_hms(2025, 6, 14, 14, 30, 0).unwrap())
        );
    }

    #[test]
    fn time_without_date_is_not_a_meeting() {
        let slots = extractor().extract("às 10h", QualificationStage::Scheduling, now());
        assert_eq!(slots.meeting_at, None);
    }

    #[test]
    fn merge_never_overwrites_without_correction() {
        let mut existing = Slots {
            name: Some("João".to_string()),
            ..Default::default()
        };
        merge(
            &mut existing,
            Slots {
                name: Some("Pedro".to_string()),
                bill_amount: Some(500.0),
                ..Default::default()
            },
            false,
        );
        assert_eq!(existing.name.as_deref(), Some("João"));
        assert_eq!(existing.bill_amount, Some(500.0));
    }

    #[test]
    fn merge_overwrites_on_correction() {
        let mut existing = Slots {
            bill_amount: Some(500.0),
            ..Default::default()
        };
        merge(
            &mut existing,
            Slots {
                bill_amount: Some(850.0),
                ..Default::default()
            },
            true,
        );
        assert_eq!(existing.bill_amount, Some(850.0));
    }

    #[test]
    fn correction_markers_detected() {
        let e = extractor();
        assert!(e.is_correction("na verdade pago R$ 950"));
        assert!(e.is_correction("errei, é 700"));
        assert!(e.is_correction("podemos remarcar para quinta às 14h?"));
        assert!(!e.is_correction("pago R$ 850"));
    }

    #[test]
    fn emails_are_unioned_without_duplicates() {
        let mut existing = Slots {
            emails: vec!["a@b.com".to_string()],
            ..Default::default()
        };
        merge(
            &mut existing,
            Slots {
                emails: vec!["a@b.com".to_string(), "c@d.com".to_string()],
                ..Default::default()
            },
            false,
        );
        assert_eq!(existing.emails.len(), 2);
    }
}
