use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A curated Q&A chunk as stored, embedding included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    /// Stable slug identifying the topic; upserts key on this.
    pub topic_key: String,
    pub question: String,
    pub synonyms: Vec<String>,
    pub answer: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Absent until the embedder has run (backfill fills these in).
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Hash of the embedded text; a change triggers re-embedding.
    pub text_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the corpus file provides per chunk (ingestion input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInput {
    pub topic_key: String,
    pub question: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ChunkInput {
    /// The text the embedder sees: question + synonyms + answer prefix.
    pub fn embeddable_text(&self) -> String {
        let mut text = self.question.clone();
        for syn in &self.synonyms {
            text.push('\n');
            text.push_str(syn);
        }
        text.push('\n');
        let answer_prefix: String = self.answer.chars().take(512).collect();
        text.push_str(&answer_prefix);
        text
    }
}

/// One retrieval result with the blended score and its components.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: KnowledgeChunk,
    pub score: f32,
    pub vector_score: f32,
    pub lexical_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddable_text_includes_synonyms_and_caps_answer() {
        let input = ChunkInput {
            topic_key: "payback".to_string(),
            question: "Qual o payback?".to_string(),
            synonyms: vec!["Em quanto tempo se paga?".to_string()],
            answer: "x".repeat(2000),
            category: None,
            tags: vec![],
        };
        let text = input.embeddable_text();
        assert!(text.contains("Qual o payback?"));
        assert!(text.contains("Em quanto tempo se paga?"));
        assert!(text.len() < 1200);
    }
}
