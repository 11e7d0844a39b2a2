//! Hand-rolled Okapi BM25 lexical index: explicit postings, per-chunk length
//! bookkeeping, versioned JSON persistence, and incremental update.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retrieval::chunk::{chunk_text, HeadingLevel};
use crate::retrieval::hash::fnv1a32_str;

const SCHEMA_VERSION: u32 = 1;
const K1: f64 = 1.2;
const B: f64 = 0.75;
const MIN_TOKEN_LEN: usize = 3;
const MAX_QUERY_TERMS: usize = 24;
const MAX_RESULT_LIMIT: usize = 400;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "to", "of", "in", "on", "for", "with", "at", "from",
    "by", "as", "is", "are", "was", "were", "be", "been", "it", "that", "this", "these", "those",
];

fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.contains(&term)
}

/// Tokenize for BM25: lowercase, split on any non-letter/non-digit
/// (Unicode-aware), drop tokens shorter than 3 chars, drop stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in lowered.chars() {
        if ch.is_alphabetic() || ch.is_numeric() {
            current.push(ch);
        } else if !current.is_empty() {
            push_token(&mut tokens, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, current);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, token: String) {
    if token.chars().count() >= MIN_TOKEN_LEN && !is_stop_word(&token) {
        tokens.push(token);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub path: String,
    pub ordinal: usize,
    pub start_word: usize,
    pub end_word: usize,
    pub excerpt: String,
    pub length: usize,
    pub text_hash: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileState {
    pub file_hash: u32,
    pub chunk_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Payload {
    pub version: u32,
    pub avgdl: f64,
    pub total_chunks: usize,
    pub file_state: HashMap<String, FileState>,
    pub chunks: HashMap<String, ChunkMeta>,
    pub postings: HashMap<String, Vec<(String, u32)>>,
}

#[derive(Debug, Clone)]
pub struct Bm25Result {
    pub key: String,
    pub path: String,
    pub excerpt: String,
    pub score_raw: f64,
    pub score: f64,
    pub matched_terms: Vec<String>,
}

/// Chunking configuration used to build and validate the index. A change to
/// any of these fields invalidates a persisted payload (they only gate
/// freshness for the vector index's persisted record per §3, but the BM25
/// side uses the same settings to decide whether it must re-chunk).
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub heading_level: HeadingLevel,
    pub target_words: usize,
    pub overlap_words: usize,
}

pub struct Bm25Index {
    chunks_by_key: HashMap<String, ChunkMeta>,
    chunk_keys_by_path: HashMap<String, HashSet<String>>,
    postings: HashMap<String, Vec<(String, u32)>>,
    file_state: HashMap<String, FileState>,
    sum_len: u64,
    loaded: bool,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            chunks_by_key: HashMap::new(),
            chunk_keys_by_path: HashMap::new(),
            postings: HashMap::new(),
            file_state: HashMap::new(),
            sum_len: 0,
            loaded: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks_by_key.len()
    }

    pub fn file_state(&self, path: &str) -> Option<&FileState> {
        self.file_state.get(path)
    }

    pub fn avgdl(&self) -> f64 {
        if self.chunks_by_key.is_empty() {
            0.0
        } else {
            self.sum_len as f64 / self.chunks_by_key.len() as f64
        }
    }

    pub fn sum_len(&self) -> u64 {
        self.sum_len
    }

    /// Idempotent load from a persisted payload. On parse failure the
    /// in-memory state is cleared so the next enqueue rebuilds from scratch.
    pub fn ensure_loaded(&mut self, raw: Option<&str>) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        let Some(raw) = raw else {
            return;
        };
        match serde_json::from_str::<Bm25Payload>(raw) {
            Ok(payload) if payload.version == SCHEMA_VERSION => {
                self.apply_payload(payload);
            }
            Ok(_) => {
                tracing::warn!("bm25 index: schema version mismatch, discarding");
                self.clear();
            }
            Err(e) => {
                tracing::warn!("bm25 index: corrupt persisted payload, discarding: {e}");
                self.clear();
            }
        }
    }

    fn apply_payload(&mut self, payload: Bm25Payload) {
        self.chunks_by_key = payload.chunks;
        self.postings = payload.postings;
        self.file_state = payload.file_state;
        self.chunk_keys_by_path.clear();
        for (key, meta) in &self.chunks_by_key {
            self.chunk_keys_by_path
                .entry(meta.path.clone())
                .or_default()
                .insert(key.clone());
        }
        self.sum_len = self.chunks_by_key.values().map(|c| c.length as u64).sum();
    }

    pub fn clear(&mut self) {
        self.chunks_by_key.clear();
        self.chunk_keys_by_path.clear();
        self.postings.clear();
        self.file_state.clear();
        self.sum_len = 0;
    }

    pub fn to_payload(&self) -> Bm25Payload {
        Bm25Payload {
            version: SCHEMA_VERSION,
            avgdl: self.avgdl(),
            total_chunks: self.chunks_by_key.len(),
            file_state: self.file_state.clone(),
            chunks: self.chunks_by_key.clone(),
            postings: self.postings.clone(),
        }
    }

    /// Remove every chunk belonging to `path`, decrementing `sum_len` and
    /// clearing the file-state entry. Posting-list entries are left as
    /// tombstones (never compacted).
    pub fn remove_path(&mut self, path: &str) {
        if let Some(keys) = self.chunk_keys_by_path.remove(path) {
            for key in keys {
                if let Some(meta) = self.chunks_by_key.remove(&key) {
                    self.sum_len = self.sum_len.saturating_sub(meta.length as u64);
                }
            }
        }
        self.file_state.remove(path);
    }

    /// Reindex a single file: remove its prior chunks, re-chunk, tokenize,
    /// and rebuild postings/length bookkeeping for the new chunks.
    pub fn reindex_file(&mut self, path: &str, content: &str, file_hash: u32, config: ChunkingConfig) {
        self.remove_path(path);

        let raw_chunks = chunk_text(content, config.target_words, config.overlap_words, config.heading_level);
        let mut chunk_count = 0usize;
        let mut keys_for_path = HashSet::new();

        for (ordinal, raw) in raw_chunks.into_iter().enumerate() {
            let tokens = tokenize(&raw.text);
            if tokens.is_empty() {
                continue;
            }

            let key = format!("chunk:{path}:{ordinal}");
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }

            let length = tokens.len();
            self.sum_len += length as u64;

            for (term, count) in &tf {
                self.postings
                    .entry(term.clone())
                    .or_default()
                    .push((key.clone(), *count));
            }

            let meta = ChunkMeta {
                path: path.to_string(),
                ordinal,
                start_word: raw.start_word,
                end_word: raw.end_word,
                excerpt: make_excerpt(&raw.text, 500),
                length,
                text_hash: fnv1a32_str(&normalize_for_hash(&raw.text)),
            };
            self.chunks_by_key.insert(key.clone(), meta);
            keys_for_path.insert(key);
            chunk_count += 1;
        }

        if chunk_count > 0 {
            self.chunk_keys_by_path.insert(path.to_string(), keys_for_path);
        }

        self.file_state.insert(
            path.to_string(),
            FileState {
                file_hash,
                chunk_count,
                updated_at: Utc::now(),
            },
        );
    }

    /// Score `query_text` against the index per §4.2 and return the top
    /// `min(limit, 400)` chunks, normalized to [0, 1] by max-score division.
    pub fn search(&self, query_text: &str, limit: usize) -> Vec<Bm25Result> {
        if query_text.trim().is_empty() || self.chunks_by_key.is_empty() {
            return Vec::new();
        }

        let mut terms: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for term in tokenize(query_text) {
            if seen.insert(term.clone()) {
                terms.push(term);
            }
            if terms.len() >= MAX_QUERY_TERMS {
                break;
            }
        }
        if terms.is_empty() {
            return Vec::new();
        }

        let n = self.chunks_by_key.len() as f64;
        let avgdl = self.avgdl().max(1e-9);

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut matched: HashMap<String, Vec<String>> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let surviving: Vec<&(String, u32)> = postings
                .iter()
                .filter(|(key, _)| self.chunks_by_key.contains_key(key))
                .collect();
            let df = surviving.len();
            if df == 0 {
                continue;
            }
            let idf = (1.0 + (n - df as f64 + 0.5) / (df as f64 + 0.5)).ln();

            for (key, tf) in surviving {
                let Some(meta) = self.chunks_by_key.get(key) else {
                    continue;
                };
                let dl = meta.length as f64;
                let tf = *tf as f64;
                let denom = tf + K1 * (1.0 - B + B * dl / avgdl);
                let contribution = idf * (tf * (K1 + 1.0)) / denom;
                *scores.entry(key.clone()).or_insert(0.0) += contribution;
                matched.entry(key.clone()).or_default().push(term.clone());
            }
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let capped = limit.min(MAX_RESULT_LIMIT);
        ranked.truncate(capped);

        let max_score = ranked.first().map(|(_, s)| *s).unwrap_or(0.0);

        ranked
            .into_iter()
            .filter_map(|(key, score_raw)| {
                let meta = self.chunks_by_key.get(&key)?;
                Some(Bm25Result {
                    key: key.clone(),
                    path: meta.path.clone(),
                    excerpt: meta.excerpt.clone(),
                    score_raw,
                    score: if max_score > 0.0 { score_raw / max_score } else { 0.0 },
                    matched_terms: matched.remove(&key).unwrap_or_default(),
                })
            })
            .collect()
    }

    pub fn chunk_keys_for_path(&self, path: &str) -> Vec<String> {
        self.chunk_keys_by_path
            .get(path)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn validate_invariants(&self) -> Result<(), String> {
        let declared: u64 = self.chunks_by_key.values().map(|c| c.length as u64).sum();
        if declared != self.sum_len {
            return Err(format!("sum_len mismatch: tracked={} actual={}", self.sum_len, declared));
        }
        for (path, keys) in &self.chunk_keys_by_path {
            for key in keys {
                match self.chunks_by_key.get(key) {
                    Some(meta) if &meta.path == path => {}
                    _ => return Err(format!("chunk_keys_by_path partition violated for {path}/{key}")),
                }
            }
        }
        Ok(())
    }
}

pub fn make_excerpt(text: &str, cap: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= cap {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(cap).collect();
        format!("{truncated}…")
    }
}

fn normalize_for_hash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkingConfig {
        ChunkingConfig {
            heading_level: HeadingLevel::None,
            target_words: 200,
            overlap_words: 0,
        }
    }

    #[test]
    fn tokenizer_drops_short_tokens_and_stop_words() {
        let tokens = tokenize("The Fox is on a Log!");
        assert_eq!(tokens, vec!["fox".to_string(), "log".to_string()]);
    }

    #[test]
    fn s1_bm25_single_term() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(None);
        idx.reindex_file("a.md", "the quick brown fox jumps over the lazy dog", 1, cfg());
        idx.reindex_file("b.md", "hello world", 2, cfg());

        let results = idx.search("fox", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "a.md");
        assert!((results[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn s11_single_document_returns_finite_score() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(None);
        idx.reindex_file("only.md", "alpha beta gamma delta alpha", 1, cfg());
        let results = idx.search("alpha", 5);
        assert_eq!(results.len(), 1);
        assert!(results[0].score_raw.is_finite());
    }

    #[test]
    fn empty_query_returns_empty() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(None);
        idx.reindex_file("a.md", "alpha beta gamma", 1, cfg());
        assert!(idx.search("", 5).is_empty());
    }

    #[test]
    fn sum_len_and_avgdl_invariant_holds() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(None);
        idx.reindex_file("a.md", "alpha beta gamma delta epsilon zeta", 1, cfg());
        idx.reindex_file("b.md", "alpha theta iota kappa", 2, cfg());
        idx.validate_invariants().expect("invariants hold");
        assert!((idx.avgdl() - idx.sum_len() as f64 / idx.chunk_count() as f64).abs() < 1e-9);
    }

    #[test]
    fn reindex_unchanged_file_is_idempotent_when_gated_by_caller() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(None);
        idx.reindex_file("a.md", "alpha beta gamma", 1, cfg());
        let before = idx.chunk_keys_for_path("a.md");
        idx.reindex_file("a.md", "alpha beta gamma", 1, cfg());
        let after = idx.chunk_keys_for_path("a.md");
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn persist_reload_round_trip() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(None);
        idx.reindex_file("a.md", "alpha beta gamma delta", 1, cfg());
        let payload = idx.to_payload();
        let raw = serde_json::to_string(&payload).unwrap();

        let mut reloaded = Bm25Index::new();
        reloaded.ensure_loaded(Some(&raw));
        assert_eq!(reloaded.chunk_count(), idx.chunk_count());
        assert!((reloaded.avgdl() - idx.avgdl()).abs() < 1e-9);
    }

    #[test]
    fn corrupt_payload_clears_state() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(Some("not json"));
        assert_eq!(idx.chunk_count(), 0);
    }

    #[test]
    fn removal_tombstones_are_filtered_at_query_time() {
        let mut idx = Bm25Index::new();
        idx.ensure_loaded(None);
        idx.reindex_file("a.md", "zanzibar zanzibar zanzibar", 1, cfg());
        idx.remove_path("a.md");
        assert!(idx.search("zanzibar", 5).is_empty());
    }
}
