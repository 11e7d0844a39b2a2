//! Uniform provider contract over the BM25 index, the vector index, and any
//! future heuristic source. Modeled as a small tagged `enum` rather than a
//! trait-object hierarchy, per the coordinator's design notes: the
//! coordinator builds a `Vec<Provider>` from its flags and fans out over it.

use std::path::Path;

use serde::Serialize;

use crate::retrieval::bm25::Bm25Index;
use crate::retrieval::vector::VectorIndex;

/// A single ranked passage returned from a provider or from the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub key: String,
    pub path: String,
    pub title: String,
    pub excerpt: String,
    pub score: f64,
    pub source: String,
    pub reason_tags: Vec<String>,
}

impl ContextItem {
    pub fn title_for_path(path: &str) -> String {
        Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string())
    }
}

/// A provider's stable identity, used as `source` on returned items and as
/// the RRF/MMR bookkeeping key.
pub const PROVIDER_BM25: &str = "bm25";
pub const PROVIDER_VECTOR: &str = "hash-embedding";

/// Search a single provider. Providers never throw: any internal error
/// degrades to an empty result, per the propagation policy in §7.
pub async fn search_bm25(index: &Bm25Index, query_text: &str, limit: usize) -> Vec<ContextItem> {
    if query_text.trim().is_empty() {
        return Vec::new();
    }
    index
        .search(query_text, limit)
        .into_iter()
        .map(|r| ContextItem {
            key: r.key,
            path: r.path.clone(),
            title: ContextItem::title_for_path(&r.path),
            excerpt: r.excerpt,
            score: r.score,
            source: PROVIDER_BM25.to_string(),
            reason_tags: vec!["bm25".to_string()],
        })
        .collect()
}

pub async fn search_vector(index: &VectorIndex, query_text: &str, limit: usize) -> Vec<ContextItem> {
    if query_text.trim().is_empty() {
        return Vec::new();
    }
    index
        .search(query_text, limit)
        .into_iter()
        .map(|r| ContextItem {
            key: r.key,
            path: r.path.clone(),
            title: ContextItem::title_for_path(&r.path),
            excerpt: r.excerpt,
            score: r.score as f64,
            source: PROVIDER_VECTOR.to_string(),
            reason_tags: vec!["hash-embedding".to_string()],
        })
        .collect()
}

/// Settings-driven provider selection: the coordinator builds a `Vec<Provider>`
/// from these flags rather than dispatching through trait objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFlags {
    pub enable_bm25: bool,
    pub enable_semantic_index: bool,
}

/// A tagged variant over the concrete provider backends, carrying only the
/// handle each needs. The coordinator assembles a `Vec<Provider>` from
/// `ProviderFlags` and fans out over it, rather than dispatching through a
/// trait-object hierarchy (§9 "Dynamic provider list").
pub enum Provider<'a> {
    Bm25(&'a Bm25Index),
    Vector(&'a VectorIndex),
}

impl<'a> Provider<'a> {
    pub fn id(&self) -> &'static str {
        match self {
            Provider::Bm25(_) => PROVIDER_BM25,
            Provider::Vector(_) => PROVIDER_VECTOR,
        }
    }

    pub async fn search(&self, query_text: &str, limit: usize) -> Vec<ContextItem> {
        match self {
            Provider::Bm25(index) => search_bm25(index, query_text, limit).await,
            Provider::Vector(index) => search_vector(index, query_text, limit).await,
        }
    }
}

/// Build the active provider list for this query from the coordinator's
/// flags, in a stable order (BM25 first, then the hashed-embedding index).
pub fn active_providers<'a>(bm25: &'a Bm25Index, vector: &'a VectorIndex, flags: ProviderFlags) -> Vec<Provider<'a>> {
    let mut providers = Vec::new();
    if flags.enable_bm25 {
        providers.push(Provider::Bm25(bm25));
    }
    if flags.enable_semantic_index {
        providers.push(Provider::Vector(vector));
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_for_path_uses_last_segment() {
        assert_eq!(ContextItem::title_for_path("notes/projects/a.md"), "a.md");
        assert_eq!(ContextItem::title_for_path("a.md"), "a.md");
    }

    #[test]
    fn active_providers_respects_flags_and_order() {
        let bm25 = Bm25Index::new();
        let vector = VectorIndex::new();

        let both = active_providers(&bm25, &vector, ProviderFlags { enable_bm25: true, enable_semantic_index: true });
        assert_eq!(both.iter().map(Provider::id).collect::<Vec<_>>(), vec![PROVIDER_BM25, PROVIDER_VECTOR]);

        let bm25_only = active_providers(&bm25, &vector, ProviderFlags { enable_bm25: true, enable_semantic_index: false });
        assert_eq!(bm25_only.iter().map(Provider::id).collect::<Vec<_>>(), vec![PROVIDER_BM25]);

        let none = active_providers(&bm25, &vector, ProviderFlags::default());
        assert!(none.is_empty());
    }
}
