//! Deterministic guard rails, checked before any model call.
//!
//! Whole-word matching on a forbidden-information set: requests involving
//! CPF, RG, bank credentials and the like get a canned refusal with no model
//! involvement. Word boundaries matter — "energia" must not trip the "rg"
//! rule.

use regex::Regex;

/// Terms that trigger the refusal. Matched case-insensitively, whole-word.
const FORBIDDEN_TERMS: &[&str] = &[
    "cpf",
    "rg",
    "senha",
    "pix",
    "cartão de crédito",
    "cartao de credito",
    "conta bancária",
    "conta bancaria",
    "dados bancários",
    "dados bancarios",
    "código de segurança",
    "codigo de seguranca",
];

const REFUSAL: &str = "Por segurança, não trato de documentos ou dados bancários por aqui. \
Posso te ajudar com tudo sobre energia solar — planos, valores e agendamento. 😊";

pub struct GuardRails {
    patterns: Vec<Regex>,
}

impl Default for GuardRails {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardRails {
    pub fn new() -> Self {
        let patterns = FORBIDDEN_TERMS
            .iter()
            .map(|term| {
                // \b around the escaped term enforces whole-word semantics;
                // multi-word terms keep their internal spaces.
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))).unwrap()
            })
            .collect();
        Self { patterns }
    }

    /// The first forbidden term the text matches, if any.
    pub fn screen(&self, text: &str) -> Option<&'static str> {
        for (pattern, term) in self.patterns.iter().zip(FORBIDDEN_TERMS) {
            if pattern.is_match(text) {
                return Some(term);
            }
        }
        None
    }

    pub fn refusal_reply(&self) -> &'static str {
        REFUSAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpf_request_triggers() {
        let g = GuardRails::new();
        assert_eq!(g.screen("Me envia seu CPF para cadastro"), Some("cpf"));
    }

    #[test]
    fn rg_alone_triggers() {
        let g = GuardRails::new();
        assert_eq!(g.screen("RG"), Some("rg"));
        assert_eq!(g.screen("qual seu rg?"), Some("rg"));
    }

    #[test]
    fn energia_does_not_trip_the_rg_rule() {
        let g = GuardRails::new();
        assert_eq!(g.screen("quero saber sobre energia solar"), None);
    }

    #[test]
    fn multi_word_terms_match_as_phrases() {
        let g = GuardRails::new();
        assert!(g.screen("passa os dados bancários aí").is_some());
        assert_eq!(g.screen("dados do consumo"), None);
    }

    #[test]
    fn case_insensitive() {
        let g = GuardRails::new();
        assert!(g.screen("SENHA do banco").is_some());
    }
}
