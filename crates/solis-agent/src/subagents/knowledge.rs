//! Knowledge subagent — retrieval-grounded answers with citations.

use std::sync::Arc;

use async_trait::async_trait;

use solis_knowledge::KnowledgeStore;

use crate::error::Result;
use crate::provider::{ChatMessage, CompletionRequest, ModelProvider, Role};

use super::{Subagent, SubagentOutcome, TurnContext};

pub struct KnowledgeAgent {
    store: Arc<KnowledgeStore>,
    provider: Arc<dyn ModelProvider>,
    topk: usize,
}

/// A grounded answer plus the chunks that back it.
#[derive(Debug)]
pub struct GroundedAnswer {
    pub answer: String,
    pub citations: Vec<String>,
}

impl KnowledgeAgent {
    pub fn new(store: Arc<KnowledgeStore>, provider: Arc<dyn ModelProvider>, topk: usize) -> Self {
        Self {
            store,
            provider,
            topk,
        }
    }

    /// Raw retrieval: formatted Q/A snippets for prompt grounding, no model
    /// call involved.
    pub async fn snippets(&self, query: &str) -> Result<Vec<String>> {
        let hits = self.store.search(query, self.topk).await?;
        Ok(hits
            .iter()
            .map(|h| format!("P: {} — R: {}", h.chunk.question, h.chunk.answer))
            .collect())
    }

    /// Retrieve top-k chunks, ask the model to synthesize, return answer +
    /// chunk topic keys as citations.
    pub async fn answer_with_sources(&self, query: &str) -> Result<GroundedAnswer> {
        let hits = self.store.search(query, self.topk).await?;
        if hits.is_empty() {
            return Ok(GroundedAnswer {
                answer: "Essa eu vou confirmar com o time técnico e te retorno, combinado? \
                         Enquanto isso, posso te ajudar com mais alguma coisa?"
                    .to_string(),
                citations: vec![],
            });
        }

        let mut grounding = String::new();
        for (i, hit) in hits.iter().enumerate() {
            grounding.push_str(&format!(
                "[{}] P: {}\nR: {}\n\n",
                i + 1,
                hit.chunk.question,
                hit.chunk.answer
            ));
        }

        let system = format!(
            "Você é uma consultora de energia solar. Responda a pergunta do lead \
             usando SOMENTE as fontes abaixo, em tom de WhatsApp, curto e claro. \
             Se as fontes não cobrirem a pergunta, diga que vai confirmar.\n\n{grounding}"
        );
        let req = CompletionRequest {
            model: String::new(), // the router fills the slot model in
            system,
            messages: vec![ChatMessage {
                role: Role::User,
                content: query.to_string(),
            }],
            images: vec![],
            temperature: 0.3,
            max_tokens: 512,
        };
        let resp = self.provider.complete(&req).await?;

        Ok(GroundedAnswer {
            answer: resp.text,
            citations: hits.iter().map(|h| h.chunk.topic_key.clone()).collect(),
        })
    }
}

#[async_trait]
impl Subagent for KnowledgeAgent {
    fn name(&self) -> &str {
        "knowledge"
    }

    async fn handle(&self, ctx: &TurnContext<'_>) -> Result<SubagentOutcome> {
        let grounded = self.answer_with_sources(ctx.text).await?;
        let mut outcome = SubagentOutcome {
            reply: grounded.answer,
            ..Default::default()
        };
        outcome.analytics.push((
            "knowledge_answer".to_string(),
            serde_json::json!({ "citations": grounded.citations }),
        ));
        Ok(outcome)
    }
}
