//! Hybrid retrieval over the curated Q&A corpus.
//!
//! Score = `α · cosine(query_emb, chunk_emb) + (1−α) · lexical`, where the
//! lexical term is the FTS5 bm25 rank normalized into [0,1] against the best
//! match of the result set. Results below the configured minimum are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use solis_core::config::{KnowledgeConfig, EMBEDDING_DIM};

use crate::db::init_db;
use crate::error::{KnowledgeError, Result};
use crate::types::{ChunkInput, KnowledgeChunk, SearchHit};

/// Query-embedding cache entries expire after 5 minutes.
const CACHE_TTL_SECS: i64 = 300;
const MAX_CACHE_ENTRIES: usize = 256;

/// Produces 768-dim embeddings. Implemented by the model provider layer.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct KnowledgeStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    cfg: KnowledgeConfig,
    query_cache: Mutex<HashMap<String, (Vec<f32>, DateTime<Utc>)>>,
}

impl KnowledgeStore {
    pub fn new(conn: Connection, embedder: Arc<dyn Embedder>, cfg: KnowledgeConfig) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            cfg,
            query_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Upsert a chunk, embedding its text. Unchanged text keeps the stored
    /// embedding; changed text re-embeds.
    pub async fn index(&self, input: &ChunkInput) -> Result<KnowledgeChunk> {
        let text = input.embeddable_text();
        let hash = text_hash(&text);

        let existing: Option<(i64, String)> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT id, text_hash FROM knowledge_chunks WHERE topic_key = ?1",
                [&input.topic_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let needs_embedding = match &existing {
            Some((_, old_hash)) => *old_hash != hash,
            None => true,
        };
        let embedding = if needs_embedding {
            Some(self.checked_embed(&text).await?)
        } else {
            None
        };

        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let synonyms_json = serde_json::to_string(&input.synonyms)?;
        let tags_json = serde_json::to_string(&input.tags)?;

        let rowid = match existing {
            Some((id, _)) => {
                // FTS delete must see the pre-update values, so sync first.
                conn.execute(
                    "INSERT INTO knowledge_fts(knowledge_fts, rowid, question, synonyms, answer)
                     SELECT 'delete', id, question, synonyms, answer
                     FROM knowledge_chunks WHERE id = ?1",
                    [id],
                )
                .ok();
                conn.execute(
                    "UPDATE knowledge_chunks
                     SET question = ?1, synonyms = ?2, answer = ?3, category = ?4,
                         tags = ?5, text_hash = ?6, updated_at = ?7
                     WHERE id = ?8",
                    params![
                        input.question,
                        synonyms_json,
                        input.answer,
                        input.category,
                        tags_json,
                        hash,
                        now,
                        id
                    ],
                )?;
                if let Some(ref emb) = embedding {
                    conn.execute(
                        "UPDATE knowledge_chunks SET embedding = ?1 WHERE id = ?2",
                        params![embedding_to_blob(emb), id],
                    )?;
                }
                conn.execute(
                    "INSERT INTO knowledge_fts(rowid, question, synonyms, answer)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, input.question, synonyms_json, input.answer],
                )?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO knowledge_chunks
                       (chunk_id, topic_key, question, synonyms, answer, category,
                        tags, embedding, text_hash, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        Uuid::new_v4().to_string(),
                        input.topic_key,
                        input.question,
                        synonyms_json,
                        input.answer,
                        input.category,
                        tags_json,
                        embedding.as_ref().map(|e| embedding_to_blob(e)),
                        hash,
                        now
                    ],
                )?;
                let id = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO knowledge_fts(rowid, question, synonyms, answer)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, input.question, synonyms_json, input.answer],
                )?;
                id
            }
        };

        debug!(topic = %input.topic_key, rowid, reembedded = needs_embedding, "chunk indexed");
        self.chunk_by_rowid(&conn, rowid)
    }

    /// Hybrid search. Returned hits are sorted descending and all score at or
    /// above the configured minimum.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_emb = self.query_embedding(query).await?;

        let conn = self.conn.lock().unwrap();

        // Lexical pass: bm25 rank per rowid. SQLite's bm25() is
        // smaller-is-better and negative for matches; flip and normalize below.
        let mut lexical: HashMap<i64, f32> = HashMap::new();
        if let Some(match_expr) = fts_query(query) {
            let mut stmt = conn.prepare(
                "SELECT rowid, bm25(knowledge_fts) FROM knowledge_fts
                 WHERE knowledge_fts MATCH ?1",
            )?;
            let rows = stmt.query_map([&match_expr], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)? as f32))
            })?;
            for row in rows.flatten() {
                lexical.insert(row.0, -row.1);
            }
        }
        let lex_max = lexical.values().fold(0.0f32, |acc, v| acc.max(*v));

        // Vector pass: full scan of the curated corpus (hundreds of rows).
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT id, chunk_id, topic_key, question, synonyms, answer, category,
                    tags, embedding, text_hash, created_at, updated_at
             FROM knowledge_chunks WHERE embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map([], row_to_chunk)?;
        for row in rows.flatten() {
            let (rowid, chunk) = row;
            let vector_score = chunk
                .embedding
                .as_ref()
                .map(|emb| cosine_similarity(&query_emb, emb))
                .unwrap_or(0.0);
            let lexical_score = if lex_max > 0.0 {
                lexical.get(&rowid).copied().unwrap_or(0.0) / lex_max
            } else {
                0.0
            };
            let score =
                self.cfg.hybrid_alpha * vector_score + (1.0 - self.cfg.hybrid_alpha) * lexical_score;
            if score >= self.cfg.min_score {
                hits.push(SearchHit {
                    chunk,
                    score,
                    vector_score,
                    lexical_score,
                });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k.max(1));
        Ok(hits)
    }

    /// Re-embed every chunk whose embedding is missing. Returns the count.
    pub async fn backfill_embeddings(&self) -> Result<usize> {
        let pending: Vec<(i64, String)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, question, synonyms, answer FROM knowledge_chunks
                 WHERE embedding IS NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                let question: String = row.get(1)?;
                let synonyms_json: String = row.get(2)?;
                let answer: String = row.get(3)?;
                Ok((row.get::<_, i64>(0)?, question, synonyms_json, answer))
            })?;
            rows.flatten()
                .map(|(id, question, synonyms_json, answer)| {
                    let synonyms: Vec<String> =
                        serde_json::from_str(&synonyms_json).unwrap_or_default();
                    let input = ChunkInput {
                        topic_key: String::new(),
                        question,
                        synonyms,
                        answer,
                        category: None,
                        tags: vec![],
                    };
                    (id, input.embeddable_text())
                })
                .collect()
        };

        let mut done = 0;
        for (id, text) in pending {
            let emb = self.checked_embed(&text).await?;
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE knowledge_chunks SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
                params![embedding_to_blob(&emb), Utc::now().to_rfc3339(), id],
            )?;
            done += 1;
        }
        if done > 0 {
            info!(count = done, "embeddings backfilled");
        }
        Ok(done)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge_chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    async fn checked_embed(&self, text: &str) -> Result<Vec<f32>> {
        let emb = self.embedder.embed(text).await?;
        if emb.len() != EMBEDDING_DIM {
            return Err(KnowledgeError::Dimension {
                expected: EMBEDDING_DIM,
                got: emb.len(),
            });
        }
        Ok(emb)
    }

    /// Embed a query, caching identical strings for the session TTL.
    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        {
            let cache = self.query_cache.lock().unwrap();
            if let Some((emb, at)) = cache.get(query) {
                if Utc::now().signed_duration_since(*at).num_seconds() < CACHE_TTL_SECS {
                    return Ok(emb.clone());
                }
            }
        }

        let emb = self.checked_embed(query).await?;

        let mut cache = self.query_cache.lock().unwrap();
        if cache.len() >= MAX_CACHE_ENTRIES {
            let oldest = cache
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                cache.remove(&k);
            }
        }
        cache.insert(query.to_string(), (emb.clone(), Utc::now()));
        Ok(emb)
    }

    fn chunk_by_rowid(&self, conn: &Connection, rowid: i64) -> Result<KnowledgeChunk> {
        let (_, chunk) = conn.query_row(
            "SELECT id, chunk_id, topic_key, question, synonyms, answer, category,
                    tags, embedding, text_hash, created_at, updated_at
             FROM knowledge_chunks WHERE id = ?1",
            [rowid],
            row_to_chunk,
        )?;
        Ok(chunk)
    }
}

/// Cosine similarity of two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Little-endian f32 packing for the BLOB column.
pub fn embedding_to_blob(emb: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(emb.len() * 4);
    for v in emb {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build a defensive FTS5 MATCH expression: bare terms, OR-joined.
/// Returns `None` when nothing queryable remains.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

type ChunkRow = (i64, KnowledgeChunk);

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRow> {
    let rowid: i64 = row.get(0)?;
    let synonyms_json: String = row.get(4)?;
    let tags_json: String = row.get(7)?;
    let blob: Option<Vec<u8>> = row.get(8)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;
    Ok((
        rowid,
        KnowledgeChunk {
            id: row.get(1)?,
            topic_key: row.get(2)?,
            question: row.get(3)?,
            synonyms: serde_json::from_str(&synonyms_json).unwrap_or_default(),
            answer: row.get(5)?,
            category: row.get(6)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            embedding: blob.map(|b| blob_to_embedding(&b)),
            text_hash: row.get(9)?,
            created_at: DateTime::parse_from_rfc3339(&created)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic stand-in for the real embedder: hash words into buckets.
    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; EMBEDDING_DIM];
            for word in text.to_lowercase().split_whitespace() {
                let mut h: usize = 5381;
                for b in word.bytes() {
                    h = h.wrapping_mul(33).wrapping_add(b as usize);
                }
                v[h % EMBEDDING_DIM] += 1.0;
            }
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x /= norm;
                }
            }
            Ok(v)
        }
    }

    fn store() -> KnowledgeStore {
        KnowledgeStore::new(
            Connection::open_in_memory().unwrap(),
            Arc::new(StubEmbedder),
            KnowledgeConfig::default(),
        )
        .unwrap()
    }

    fn chunk(topic: &str, question: &str, answer: &str) -> ChunkInput {
        ChunkInput {
            topic_key: topic.to_string(),
            question: question.to_string(),
            synonyms: vec![],
            answer: answer.to_string(),
            category: None,
            tags: vec![],
        }
    }

    #[test]
    fn blob_round_trip() {
        let emb = vec![0.25f32, -1.5, 3.0];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&emb)), emb);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn index_then_search_finds_relevant_chunk() {
        let s = store();
        s.index(&chunk(
            "payback",
            "qual o tempo de payback da usina propria",
            "O payback médio fica entre 4 e 6 anos.",
        ))
        .await
        .unwrap();
        s.index(&chunk(
            "lot_rental",
            "como funciona o aluguel de lote",
            "Você aluga um lote na nossa fazenda solar.",
        ))
        .await
        .unwrap();

        let hits = s.search("qual o tempo de payback da usina propria", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk.topic_key, "payback");
        // Scores sorted descending, all at or above the minimum.
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for hit in &hits {
            assert!(hit.score >= KnowledgeConfig::default().min_score);
        }
    }

    #[tokio::test]
    async fn reindex_same_text_keeps_embedding() {
        let s = store();
        let input = chunk("t", "pergunta", "resposta");
        s.index(&input).await.unwrap();
        let again = s.index(&input).await.unwrap();
        assert!(again.embedding.is_some());
        assert_eq!(s.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn backfill_embeds_missing_rows() {
        let s = store();
        // Insert a row with no embedding by hand.
        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO knowledge_chunks
                   (chunk_id, topic_key, question, synonyms, answer, tags, text_hash,
                    created_at, updated_at)
                 VALUES ('c1', 'bare', 'q', '[]', 'a', '[]', 'h', ?1, ?1)",
                [Utc::now().to_rfc3339()],
            )
            .unwrap();
        }
        let n = s.backfill_embeddings().await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(s.backfill_embeddings().await.unwrap(), 0);
    }

    #[test]
    fn fts_query_escapes_terms() {
        assert_eq!(fts_query("payback usina"), Some("\"payback\" OR \"usina\"".to_string()));
        assert_eq!(fts_query("? !"), None);
    }
}
