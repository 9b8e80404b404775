//! Semantic index (C4): local SQLite database combining lexical (FTS5),
//! vector, and graph retrieval into one hybrid score.
//!
//! Grounded in the teacher's own `rusqlite` dependency
//! (`crates/pagi-mimir/Cargo.toml`) and the pack's `dashflow-sqlitevss`
//! crate's table-per-concern layout (lexical table + vector BLOB table).
//! The embedding backend is a capability trait per §9 REDESIGN FLAGS:
//! its absence is a normal, fully-supported state — retrieval just
//! degrades to lexical-only — mirroring the teacher's own optional
//! `lancedb`/`vector`/`keyring` Cargo features.

use crate::error::IndexError;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

/// Capability hook for embedding backends (e.g. `fastembed` behind the
/// `embeddings` feature). `None` is a normal return, not an error.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, texts: &[String]) -> Option<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub scope: String,
    pub project_key: String,
    pub category: String,
    pub created_at: i64,
    pub source: String,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub lexical_score: f64,
    pub cosine_score: f64,
    pub fusion_score: f64,
}

pub struct RetrievalOptions {
    pub limit: usize,
    pub lexical_weight: f64,
    pub cosine_weight: f64,
    pub graph_seed_weight: f64,
    pub mmr_lambda: f64,
    pub min_similarity: f64,
    pub min_fusion_score: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            lexical_weight: 0.6,
            cosine_weight: 0.4,
            graph_seed_weight: 0.15,
            mmr_lambda: 0.5,
            min_similarity: 0.5,
            min_fusion_score: 0.5,
        }
    }
}

pub struct SemanticIndex {
    conn: Mutex<Connection>,
    embedder: Option<Box<dyn EmbeddingProvider>>,
}

impl SemanticIndex {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn), embedder: None })
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn), embedder: None })
    }

    pub fn with_embedder(mut self, embedder: Box<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn init_schema(conn: &Connection) -> Result<(), IndexError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                scope TEXT NOT NULL,
                project_key TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                source TEXT NOT NULL,
                meta TEXT NOT NULL
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                id UNINDEXED, content
            );
            CREATE TABLE IF NOT EXISTS memories_vec (
                id TEXT PRIMARY KEY,
                dim INTEGER NOT NULL,
                vector BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS memory_edges (
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                weight REAL NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Inserts or replaces a memory row plus its FTS entry and, when an
    /// embedder is configured, its vector row.
    pub fn index(&self, record: &MemoryRecord) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO memories (id, content, scope, project_key, category, created_at, source, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.content,
                record.scope,
                record.project_key,
                record.category,
                record.created_at,
                record.source,
                record.meta.to_string(),
            ],
        )?;
        conn.execute("DELETE FROM memories_fts WHERE id = ?1", params![record.id])?;
        conn.execute(
            "INSERT INTO memories_fts (id, content) VALUES (?1, ?2)",
            params![record.id, record.content],
        )?;

        if let Some(embedder) = &self.embedder {
            if let Some(mut vectors) = embedder.embed(&[record.content.clone()]) {
                if let Some(vector) = vectors.pop() {
                    let bytes = vector_to_bytes(&vector);
                    conn.execute(
                        "INSERT OR REPLACE INTO memories_vec (id, dim, vector) VALUES (?1, ?2, ?3)",
                        params![record.id, vector.len() as i64, bytes],
                    )?;
                }
            }
        }
        Ok(())
    }

    pub fn add_edge(&self, source: &str, target: &str, weight: f64, reason: &str, created_at: i64) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory_edges (source, target, weight, reason, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![source, target, weight, reason, created_at],
        )?;
        Ok(())
    }

    /// Hybrid retrieval: BM25-like FTS score normalized to `1/(1+bm25)`,
    /// optional cosine similarity, fused `0.6*lexical + 0.4*cosine` (or
    /// the caller's weights), then up to `limit-k` graph-expanded items
    /// seeded at `0.15*edge_weight`. Falls back to a rescue pass — lower
    /// thresholds, then top-N regardless of threshold — if strict gates
    /// eliminate everything.
    pub fn search(&self, query: &str, opts: &RetrievalOptions) -> Result<Vec<ScoredMemory>, IndexError> {
        let lexical = self.lexical_search(query, opts.limit * 4)?;
        let query_vec = self.embedder.as_ref().and_then(|e| e.embed(&[query.to_string()])).and_then(|mut v| v.pop());

        let mut scored: Vec<ScoredMemory> = Vec::new();
        for (record, lexical_score) in lexical {
            let cosine_score = match &query_vec {
                Some(qv) => self.cosine_for(&record.id, qv)?.unwrap_or(0.0),
                None => 0.0,
            };
            let fusion = opts.lexical_weight * lexical_score + opts.cosine_weight * cosine_score;
            scored.push(ScoredMemory { record, lexical_score, cosine_score, fusion_score: fusion });
        }

        let mut passing: Vec<ScoredMemory> = scored
            .iter()
            .filter(|s| s.fusion_score >= opts.min_fusion_score || s.cosine_score >= opts.min_similarity)
            .cloned()
            .collect();

        if passing.is_empty() && !scored.is_empty() {
            tracing::info!(target: "spark::index", "strict gates eliminated all results, applying rescue fallback");
            scored.sort_by(|a, b| b.fusion_score.partial_cmp(&a.fusion_score).unwrap_or(std::cmp::Ordering::Equal));
            passing = scored.into_iter().take(opts.limit).collect();
        }

        passing.sort_by(|a, b| b.fusion_score.partial_cmp(&a.fusion_score).unwrap_or(std::cmp::Ordering::Equal));

        let mut result = mmr_diversify(passing, opts.mmr_lambda, opts.limit);

        if result.len() < opts.limit {
            let seeds: Vec<String> = result.iter().map(|s| s.record.id.clone()).collect();
            let expanded = self.graph_expand(&seeds, opts.limit - result.len(), opts.graph_seed_weight)?;
            result.extend(expanded);
        }

        Ok(result)
    }

    fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<(MemoryRecord, f64)>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(
            "SELECT m.id, m.content, m.scope, m.project_key, m.category, m.created_at, m.source, m.meta, bm25(memories_fts)
             FROM memories_fts f JOIN memories m ON m.id = f.id
             WHERE memories_fts MATCH ?1 ORDER BY bm25(memories_fts) LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sanitized, limit as i64], |row| {
            let bm25: f64 = row.get(8)?;
            Ok((
                MemoryRecord {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    scope: row.get(2)?,
                    project_key: row.get(3)?,
                    category: row.get(4)?,
                    created_at: row.get(5)?,
                    source: row.get(6)?,
                    meta: serde_json::from_str(&row.get::<_, String>(7)?).unwrap_or(serde_json::Value::Null),
                },
                1.0 / (1.0 + bm25.max(0.0)),
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn cosine_for(&self, id: &str, query_vec: &[f32]) -> Result<Option<f64>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let bytes: Option<Vec<u8>> = conn
            .query_row("SELECT vector FROM memories_vec WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(bytes.map(|b| cosine_similarity(&bytes_to_vector(&b), query_vec)))
    }

    /// Checks whether any indexed memory's embedding clears
    /// `cosine_threshold` against `text` — the C4 half of the duplicate
    /// detector's "C3 and C4" near-duplicate check. Returns `false` (not
    /// an error) when no embedder is configured: cosine dedup is an
    /// optional capability, same posture as `EmbeddingProvider`'s
    /// absence everywhere else in C4.
    pub fn has_near_duplicate(&self, text: &str, cosine_threshold: f64) -> Result<bool, IndexError> {
        let Some(embedder) = &self.embedder else { return Ok(false) };
        let Some(query_vec) = embedder.embed(&[text.to_string()]).and_then(|mut v| v.pop()) else {
            return Ok(false);
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT vector FROM memories_vec")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        for row in rows {
            let bytes = row?;
            if cosine_similarity(&bytes_to_vector(&bytes), &query_vec) >= cosine_threshold {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn graph_expand(&self, seeds: &[String], want: usize, seed_weight: f64) -> Result<Vec<ScoredMemory>, IndexError> {
        if seeds.is_empty() || want == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        for seed in seeds {
            if out.len() >= want {
                break;
            }
            let mut stmt = conn.prepare(
                "SELECT m.id, m.content, m.scope, m.project_key, m.category, m.created_at, m.source, m.meta, e.weight
                 FROM memory_edges e JOIN memories m ON m.id = e.target
                 WHERE e.source = ?1 ORDER BY e.weight DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![seed, (want - out.len()) as i64], |row| {
                let weight: f64 = row.get(8)?;
                Ok((
                    MemoryRecord {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        scope: row.get(2)?,
                        project_key: row.get(3)?,
                        category: row.get(4)?,
                        created_at: row.get(5)?,
                        source: row.get(6)?,
                        meta: serde_json::from_str(&row.get::<_, String>(7)?).unwrap_or(serde_json::Value::Null),
                    },
                    weight,
                ))
            })?;
            for row in rows {
                let (record, weight) = row?;
                out.push(ScoredMemory {
                    record,
                    lexical_score: 0.0,
                    cosine_score: 0.0,
                    fusion_score: seed_weight * weight,
                });
            }
        }
        Ok(out)
    }
}

/// Greedy maximal-marginal-relevance selection trading off fusion score
/// against lexical-content diversity, bounded by `lambda`.
fn mmr_diversify(candidates: Vec<ScoredMemory>, lambda: f64, limit: usize) -> Vec<ScoredMemory> {
    let mut pool = candidates;
    let mut chosen: Vec<ScoredMemory> = Vec::new();

    while chosen.len() < limit && !pool.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f64::MIN;
        for (idx, candidate) in pool.iter().enumerate() {
            let max_sim = chosen
                .iter()
                .map(|c| jaccard(&candidate.record.content, &c.record.content))
                .fold(0.0_f64, f64::max);
            let mmr_score = lambda * candidate.fusion_score - (1.0 - lambda) * max_sim;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx = idx;
            }
        }
        chosen.push(pool.remove(best_idx));
    }
    chosen
}

fn jaccard(a: &str, b: &str) -> f64 {
    let sa: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let sb: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, content: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            content: content.to_string(),
            scope: "global".into(),
            project_key: "spark".into(),
            category: "reasoning".into(),
            created_at: 0,
            source: "test".into(),
            meta: serde_json::json!({}),
        }
    }

    #[test]
    fn index_and_lexical_search_round_trip() {
        let idx = SemanticIndex::open_in_memory().unwrap();
        idx.index(&record("a", "always run the linter before committing")).unwrap();
        idx.index(&record("b", "prefer small commits over large ones")).unwrap();
        let results = idx.search("linter committing", &RetrievalOptions::default()).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].record.id, "a");
    }

    #[test]
    fn rescue_fallback_returns_something_when_gates_too_strict() {
        let idx = SemanticIndex::open_in_memory().unwrap();
        idx.index(&record("a", "always run the linter before committing")).unwrap();
        let mut opts = RetrievalOptions::default();
        opts.min_fusion_score = 0.999;
        opts.min_similarity = 0.999;
        let results = idx.search("linter", &opts).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn has_near_duplicate_is_false_without_an_embedder() {
        let idx = SemanticIndex::open_in_memory().unwrap();
        idx.index(&record("a", "always run the linter before committing")).unwrap();
        assert!(!idx.has_near_duplicate("always run the linter before committing", 0.92).unwrap());
    }

    #[test]
    fn graph_expand_adds_related_items() {
        let idx = SemanticIndex::open_in_memory().unwrap();
        idx.index(&record("a", "always run the linter before committing")).unwrap();
        idx.index(&record("b", "unrelated content about deployment pipelines")).unwrap();
        idx.add_edge("a", "b", 0.9, "co-occurs", 0).unwrap();
        let mut opts = RetrievalOptions::default();
        opts.limit = 2;
        let results = idx.search("linter committing", &opts).unwrap();
        assert!(results.iter().any(|r| r.record.id == "b"));
    }
}
