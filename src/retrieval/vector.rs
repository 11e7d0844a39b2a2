//! Hand-rolled hashed bag-of-words vector index: deterministic, model-free
//! embeddings scored by cosine similarity (dot product of unit-norm vectors).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::retrieval::chunk::{chunk_text, HeadingLevel};
use crate::retrieval::hash::fnv1a32_str;

const SCHEMA_VERSION: u32 = 1;
pub const DIM: usize = 256;
pub const BACKEND: &str = "hashed-bow-v1";
const MAX_RESULT_LIMIT: usize = 200;

/// Tokenize for the hashed embedding: lowercase runs of `[a-z0-9]` of length
/// >= 2. Deliberately distinct from the BM25 tokenizer (no stop words, no
/// minimum-3 filter, ASCII alnum only).
pub fn embedding_tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() {
            current.push(ch);
        } else if !current.is_empty() {
            flush(&mut tokens, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        flush(&mut tokens, current);
    }
    tokens
}

fn flush(tokens: &mut Vec<String>, token: String) {
    if token.len() >= 2 {
        tokens.push(token);
    }
}

/// Build a deterministic, L2-normalized hashed bag-of-words embedding.
pub fn embed(text: &str) -> [f32; DIM] {
    let mut vec = [0f32; DIM];
    for token in embedding_tokenize(text) {
        let h = fnv1a32_str(&token);
        let i = (h as usize) % DIM;
        let sign = if h % 2 == 0 { 1.0 } else { -1.0 };
        vec[i] += sign;
    }
    l2_normalize(&mut vec);
    vec
}

fn l2_normalize(vec: &mut [f32; DIM]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn dot(a: &[f32; DIM], b: &[f32; DIM]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorChunk {
    pub key: String,
    pub path: String,
    pub ordinal: usize,
    pub start_word: usize,
    pub end_word: usize,
    pub text_hash: u32,
    pub vector: Vec<f32>,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingDescriptor {
    pub heading_level: String,
    pub target_words: usize,
    pub overlap_words: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub version: u32,
    pub dim: usize,
    pub backend: String,
    pub chunking: ChunkingDescriptor,
    pub chunks: Vec<VectorChunk>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub heading_level: HeadingLevel,
    pub target_words: usize,
    pub overlap_words: usize,
}

impl ChunkingConfig {
    fn descriptor(&self) -> ChunkingDescriptor {
        let heading_level = match self.heading_level {
            HeadingLevel::H1 => "h1",
            HeadingLevel::H2 => "h2",
            HeadingLevel::H3 => "h3",
            HeadingLevel::None => "none",
        }
        .to_string();
        ChunkingDescriptor {
            heading_level,
            target_words: self.target_words,
            overlap_words: self.overlap_words,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorResult {
    pub key: String,
    pub path: String,
    pub excerpt: String,
    pub score_raw: f32,
    pub score: f32,
}

pub struct VectorIndex {
    chunks_by_key: HashMap<String, VectorChunk>,
    chunk_keys_by_path: HashMap<String, Vec<String>>,
    config: Option<ChunkingConfig>,
    loaded: bool,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            chunks_by_key: HashMap::new(),
            chunk_keys_by_path: HashMap::new(),
            config: None,
            loaded: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks_by_key.len()
    }

    pub fn vector_for_key(&self, key: &str) -> Option<[f32; DIM]> {
        let chunk = self.chunks_by_key.get(key)?;
        let mut out = [0f32; DIM];
        for (i, v) in chunk.vector.iter().enumerate().take(DIM) {
            out[i] = *v;
        }
        Some(out)
    }

    /// Idempotent load. Discards and clears on version/dim/backend/config
    /// mismatch, or parse failure, so the caller can enqueue a full rescan.
    pub fn ensure_loaded(&mut self, raw: Option<&str>, active_config: ChunkingConfig) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        self.config = Some(active_config);
        let Some(raw) = raw else {
            return;
        };

        let payload = match serde_json::from_str::<VectorPayload>(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("vector index: corrupt persisted payload, discarding: {e}");
                return;
            }
        };

        let expected = active_config.descriptor();
        let config_matches = payload.chunking.heading_level == expected.heading_level
            && payload.chunking.target_words == expected.target_words
            && payload.chunking.overlap_words == expected.overlap_words;

        if payload.version != SCHEMA_VERSION || payload.dim != DIM || payload.backend != BACKEND || !config_matches {
            tracing::warn!("vector index: schema/dim/backend/chunking mismatch, discarding");
            return;
        }

        for chunk in payload.chunks {
            self.chunk_keys_by_path
                .entry(chunk.path.clone())
                .or_default()
                .push(chunk.key.clone());
            self.chunks_by_key.insert(chunk.key.clone(), chunk);
        }
    }

    pub fn clear(&mut self) {
        self.chunks_by_key.clear();
        self.chunk_keys_by_path.clear();
    }

    pub fn to_payload(&self, config: ChunkingConfig) -> VectorPayload {
        VectorPayload {
            version: SCHEMA_VERSION,
            dim: DIM,
            backend: BACKEND.to_string(),
            chunking: config.descriptor(),
            chunks: self.chunks_by_key.values().cloned().collect(),
        }
    }

    pub fn remove_path(&mut self, path: &str) {
        if let Some(keys) = self.chunk_keys_by_path.remove(path) {
            for key in keys {
                self.chunks_by_key.remove(&key);
            }
        }
    }

    /// Reindex a single file: drop its prior chunks, re-chunk, embed each
    /// chunk, and store the resulting vectors. A chunk whose embedding
    /// construction degenerates to the zero vector is skipped (an empty
    /// token stream should already have been filtered by the chunker, so
    /// this is a defensive backstop, not the expected path).
    pub fn reindex_file(&mut self, path: &str, content: &str, config: ChunkingConfig) {
        self.remove_path(path);

        let raw_chunks = chunk_text(content, config.target_words, config.overlap_words, config.heading_level);
        let mut keys = Vec::new();

        for (ordinal, raw) in raw_chunks.into_iter().enumerate() {
            let vector = embed(&raw.text);
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm == 0.0 {
                continue;
            }

            let key = format!("chunk:{path}:{ordinal}");
            let chunk = VectorChunk {
                key: key.clone(),
                path: path.to_string(),
                ordinal,
                start_word: raw.start_word,
                end_word: raw.end_word,
                text_hash: fnv1a32_str(&normalize_for_hash(&raw.text)),
                vector: vector.to_vec(),
                excerpt: crate::retrieval::bm25::make_excerpt(&raw.text, 2500),
            };
            self.chunks_by_key.insert(key.clone(), chunk);
            keys.push(key);
        }

        if !keys.is_empty() {
            self.chunk_keys_by_path.insert(path.to_string(), keys);
        } else {
            tracing::warn!("vector index: file produced no embeddable chunks: {path}");
        }
    }

    /// Score every chunk by dot product against the query vector and return
    /// the top `min(limit, 200)`, mapped to [0, 1] via `(score + 1) / 2`.
    pub fn search(&self, query_text: &str, limit: usize) -> Vec<VectorResult> {
        if query_text.trim().is_empty() || self.chunks_by_key.is_empty() {
            return Vec::new();
        }
        let query_vec = embed(query_text);
        let query_norm: f32 = query_vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<(String, f32)> = self
            .chunks_by_key
            .iter()
            .map(|(key, chunk)| {
                let mut v = [0f32; DIM];
                for (i, x) in chunk.vector.iter().enumerate().take(DIM) {
                    v[i] = *x;
                }
                (key.clone(), dot(&query_vec, &v))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.min(MAX_RESULT_LIMIT));

        scored
            .into_iter()
            .filter_map(|(key, score_raw)| {
                let chunk = self.chunks_by_key.get(&key)?;
                Some(VectorResult {
                    key,
                    path: chunk.path.clone(),
                    excerpt: chunk.excerpt.clone(),
                    score_raw,
                    score: ((score_raw + 1.0) / 2.0).clamp(0.0, 1.0),
                })
            })
            .collect()
    }

    pub fn validate_invariants(&self) -> Result<(), String> {
        for chunk in self.chunks_by_key.values() {
            if chunk.vector.len() != DIM {
                return Err(format!("vector for {} has length {} != {DIM}", chunk.key, chunk.vector.len()));
            }
            let norm: f32 = chunk.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if (norm - 1.0).abs() > 1e-6 && norm != 0.0 {
                return Err(format!("vector for {} has non-unit norm {norm}", chunk.key));
            }
        }
        Ok(())
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
    fn embedding_is_l2_normalized() {
        let v = embed("apple banana cherry date elderberry fig");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn embedding_is_deterministic() {
        assert_eq!(embed("hello world"), embed("hello world"));
    }

    #[test]
    fn s2_vector_cosine_ranks_related_text_higher() {
        let mut idx = VectorIndex::new();
        idx.ensure_loaded(None, cfg());
        idx.reindex_file("a.md", "apple banana cherry", cfg());
        idx.reindex_file("b.md", "xylophone yacht zebra", cfg());

        let results = idx.search("banana", 5);
        assert_eq!(results[0].path, "a.md");
        assert!(results[0].score > 0.5);
    }

    #[test]
    fn dim_and_norm_invariant_holds() {
        let mut idx = VectorIndex::new();
        idx.ensure_loaded(None, cfg());
        idx.reindex_file("a.md", "alpha beta gamma delta", cfg());
        idx.validate_invariants().expect("invariants hold");
    }

    #[test]
    fn persist_reload_round_trip() {
        let mut idx = VectorIndex::new();
        idx.ensure_loaded(None, cfg());
        idx.reindex_file("a.md", "alpha beta gamma delta", cfg());
        let payload = idx.to_payload(cfg());
        let raw = serde_json::to_string(&payload).unwrap();

        let mut reloaded = VectorIndex::new();
        reloaded.ensure_loaded(Some(&raw), cfg());
        assert_eq!(reloaded.chunk_count(), idx.chunk_count());
    }

    #[test]
    fn mismatched_chunking_config_discards_payload() {
        let mut idx = VectorIndex::new();
        idx.ensure_loaded(None, cfg());
        idx.reindex_file("a.md", "alpha beta gamma delta", cfg());
        let payload = idx.to_payload(cfg());
        let raw = serde_json::to_string(&payload).unwrap();

        let different = ChunkingConfig {
            heading_level: HeadingLevel::H2,
            target_words: 200,
            overlap_words: 0,
        };
        let mut reloaded = VectorIndex::new();
        reloaded.ensure_loaded(Some(&raw), different);
        assert_eq!(reloaded.chunk_count(), 0);
    }

    #[test]
    fn empty_query_returns_empty() {
        let mut idx = VectorIndex::new();
        idx.ensure_loaded(None, cfg());
        idx.reindex_file("a.md", "alpha beta gamma", cfg());
        assert!(idx.search("", 5).is_empty());
    }
}
