//! Bill analyzer — turns a power-bill artifact into structured values.
//!
//! Documents go through regex extraction directly; images go to the vision
//! model first and the same regexes then run over its description. Extraction
//! failure is not an error path for the lead — the orchestrator asks for the
//! typed value instead.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;

use solis_media::Artifact;

use crate::error::Result;
use crate::provider::{ChatMessage, CompletionRequest, ImagePart, ModelProvider, Role};

use super::{Subagent, SubagentOutcome, TurnContext};

/// Values read off a power bill.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BillAnalysis {
    pub amount: Option<f64>,
    pub kwh: Option<f64>,
    pub distributor: Option<String>,
    pub reference_period: Option<String>,
}

pub struct BillAnalyzerAgent {
    provider: Arc<dyn ModelProvider>,
    amount_re: Regex,
    kwh_re: Regex,
    period_re: Regex,
    distributor_re: Regex,
}

impl BillAnalyzerAgent {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            amount_re: Regex::new(
                r"(?i)(?:total a pagar|valor total|total)[^\d]{0,20}([\d.]+,\d{2})",
            )
            .unwrap(),
            kwh_re: Regex::new(r"(?i)([\d.]+)\s*kwh").unwrap(),
            period_re: Regex::new(r"(?i)(?:referente a|referência|ref\.?)\s*:?\s*(\w+[/ ]\d{4})")
                .unwrap(),
            distributor_re: Regex::new(
                r"(?i)\b(neoenergia|celpe|enel|light|cemig|copel|cpfl|energisa|equatorial)\b",
            )
            .unwrap(),
        }
    }

    /// Pull bill values out of free text (extracted document text or a vision
    /// model's description).
    pub fn parse_text(&self, text: &str) -> BillAnalysis {
        let amount = self
            .amount_re
            .captures(text)
            .and_then(|cap| parse_brl(&cap[1]));
        let kwh = self
            .kwh_re
            .captures(text)
            .and_then(|cap| cap[1].replace('.', "").parse::<f64>().ok());
        let reference_period = self.period_re.captures(text).map(|cap| cap[1].to_string());
        let distributor = self
            .distributor_re
            .captures(text)
            .map(|cap| cap[1].to_string());
        BillAnalysis {
            amount,
            kwh,
            distributor,
            reference_period,
        }
    }

    /// Analyze an ingested artifact.
    pub async fn analyze(&self, artifact: &Artifact) -> Result<BillAnalysis> {
        match artifact {
            Artifact::Document { extracted_text, .. } => Ok(self.parse_text(extracted_text)),
            Artifact::Audio { transcript, .. } => Ok(self.parse_text(transcript)),
            Artifact::Image { bytes, mime, .. } => {
                let req = CompletionRequest {
                    model: String::new(),
                    system: "Você lê contas de energia brasileiras. Descreva os campos da \
                             conta na imagem: total a pagar (R$), consumo em kWh, \
                             distribuidora e mês de referência. Se não for uma conta de \
                             energia, diga apenas 'não é uma conta'."
                        .to_string(),
                    messages: vec![ChatMessage {
                        role: Role::User,
                        content: "Extraia os dados da conta.".to_string(),
                    }],
                    images: vec![ImagePart {
                        mime: mime.clone(),
                        data: base64::engine::general_purpose::STANDARD.encode(bytes),
                    }],
                    temperature: 0.0,
                    max_tokens: 512,
                };
                let resp = self.provider.complete(&req).await?;
                Ok(self.parse_text(&resp.text))
            }
        }
    }
}

#[async_trait]
impl Subagent for BillAnalyzerAgent {
    fn name(&self) -> &str {
        "bill_analyzer"
    }

    async fn handle(&self, ctx: &TurnContext<'_>) -> Result<SubagentOutcome> {
        let Some(artifact) = ctx.artifact else {
            // Bill talk without media: ask for the number directly.
            return Ok(SubagentOutcome {
                reply: "Me diz quanto vem sua conta por mês, ou manda uma foto dela que eu \
                        leio pra você! 📸"
                    .to_string(),
                ..Default::default()
            });
        };

        let analysis = self.analyze(artifact).await?;
        let mut outcome = SubagentOutcome::default();

        match analysis.amount {
            Some(amount) => {
                outcome.slot_updates.bill_amount = Some(amount);
                let kwh_part = analysis
                    .kwh
                    .map(|k| format!(" ({k:.0} kWh)"))
                    .unwrap_or_default();
                outcome.reply = format!(
                    "Consegui ler sua conta: R$ {amount:.2}{kwh_part}. Com esse valor dá \
                     pra economizar bastante com energia solar! 🎉"
                );
                outcome.analytics.push((
                    "bill_analyzed".to_string(),
                    serde_json::json!({
                        "amount": amount,
                        "kwh": analysis.kwh,
                        "distributor": analysis.distributor,
                    }),
                ));
            }
            None => {
                outcome.reply = "Não consegui ler o valor na imagem. 😅 Pode digitar quanto \
                                 vem sua conta por mês?"
                    .to_string();
                outcome
                    .analytics
                    .push(("bill_extraction_failed".to_string(), serde_json::json!({})));
            }
        }
        Ok(outcome)
    }
}

fn parse_brl(raw: &str) -> Option<f64> {
    raw.replace('.', "").replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CompletionResponse, ProviderError};

    struct NoopProvider;

    #[async_trait]
    impl ModelProvider for NoopProvider {
        fn name(&self) -> &str {
            "noop"
        }
        async fn complete(
            &self,
            _req: &CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            Err(ProviderError::Unavailable("not used".to_string()))
        }
    }

    fn agent() -> BillAnalyzerAgent {
        BillAnalyzerAgent::new(Arc::new(NoopProvider))
    }

    #[test]
    fn parses_bill_fields_from_text() {
        let text = "NEOENERGIA PERNAMBUCO\nReferente a: MAIO/2025\n\
                    Consumo 420 kWh\nTotal a pagar: 853,41";
        let analysis = agent().parse_text(text);
        assert_eq!(analysis.amount, Some(853.41));
        assert_eq!(analysis.kwh, Some(420.0));
        assert_eq!(analysis.distributor.as_deref(), Some("NEOENERGIA"));
        assert_eq!(analysis.reference_period.as_deref(), Some("MAIO/2025"));
    }

    #[test]
    fn parses_thousands_in_amount() {
        let analysis = agent().parse_text("Valor total 1.253,90");
        assert_eq!(analysis.amount, Some(1253.90));
    }

    #[test]
    fn missing_fields_stay_none() {
        let analysis = agent().parse_text("não é uma conta");
        assert_eq!(analysis, BillAnalysis::default());
    }

    #[tokio::test]
    async fn document_artifact_skips_the_model() {
        let artifact = Artifact::Document {
            extracted_text: "Total a pagar: 700,00".to_string(),
            page_count: 1,
        };
        let analysis = agent().analyze(&artifact).await.unwrap();
        assert_eq!(analysis.amount, Some(700.0));
    }
}
