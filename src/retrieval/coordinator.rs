//! Multi-provider retrieval coordinator: parallel fan-out, Reciprocal Rank
//! Fusion, optional boosting, and Maximal Marginal Relevance diversification.

use std::collections::{HashMap, HashSet};

use futures_util::future::join_all;

use crate::retrieval::bm25::Bm25Index;
use crate::retrieval::provider::{active_providers, ContextItem, ProviderFlags};
use crate::retrieval::vector::{dot, VectorIndex, DIM};

const RRF_K: f64 = 60.0;
const MMR_LAMBDA: f64 = 0.7;
const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 200;
const CANDIDATE_CEILING: usize = 500;
const CANDIDATE_FACTOR: usize = 8;

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub active_file_path: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub limit: usize,
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_LIMIT, MAX_LIMIT)
}

fn candidate_limit(final_limit: usize) -> usize {
    final_limit.max((final_limit * CANDIDATE_FACTOR).min(CANDIDATE_CEILING))
}

pub struct RetrievalCoordinator<'a> {
    pub bm25: &'a Bm25Index,
    pub vector: &'a VectorIndex,
    pub flags: ProviderFlags,
}

impl<'a> RetrievalCoordinator<'a> {
    pub fn new(bm25: &'a Bm25Index, vector: &'a VectorIndex, flags: ProviderFlags) -> Self {
        Self { bm25, vector, flags }
    }

    /// Entry point per §4.5/§6: query text is trimmed and checked for
    /// emptiness (round-trip law 7), the limit is clamped, providers fan out
    /// concurrently, and the result is fused/diversified.
    pub async fn search(
        &self,
        query: &SearchQuery,
        options: SearchOptions,
        captured_paths: Option<&HashSet<String>>,
    ) -> Vec<ContextItem> {
        if query.text.trim().is_empty() {
            return Vec::new();
        }

        let final_limit = clamp_limit(options.limit);
        let widened = candidate_limit(final_limit);

        // Launch every enabled provider's search as a future up front, then
        // await them together so a slow provider doesn't delay starting the
        // others (§4.5 "launches all provider searches in parallel").
        let providers = active_providers(self.bm25, self.vector, self.flags);
        let searches = providers.iter().map(|p| p.search(&query.text, widened));
        let mut provider_results: Vec<Vec<ContextItem>> = join_all(searches).await;

        if let Some(captured) = captured_paths {
            if !captured.is_empty() {
                apply_capture_boost(&mut provider_results, captured);
            }
        }

        let non_empty: Vec<&Vec<ContextItem>> = provider_results.iter().filter(|r| !r.is_empty()).collect();

        match non_empty.len() {
            0 => Vec::new(),
            1 => {
                let mut items = non_empty[0].clone();
                items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                items.truncate(final_limit);
                items
            }
            _ => {
                let fused = reciprocal_rank_fusion(&provider_results, widened);
                let diversified = maximal_marginal_relevance(fused, self.vector, final_limit, MMR_LAMBDA);
                diversified
            }
        }
    }
}

/// Multiply the originating-provider score of items on a captured path,
/// before fusion. Never introduces items not already surfaced by a provider.
fn apply_capture_boost(provider_results: &mut [Vec<ContextItem>], captured: &HashSet<String>) {
    let multiplier = if captured.len() <= 50 { 2.0 } else { 2.5 };
    for results in provider_results.iter_mut() {
        for item in results.iter_mut() {
            if captured.contains(&item.path) {
                item.score *= multiplier;
                item.reason_tags.push("boosted".to_string());
            }
        }
    }
}

/// Fuse multiple ranked provider result lists via Reciprocal Rank Fusion:
/// `fused_score[key] += 1 / (60 + rank)` for each list's descending-score
/// ranking, preserving the best-ranked metadata per key.
fn reciprocal_rank_fusion(provider_results: &[Vec<ContextItem>], truncate_to: usize) -> Vec<ContextItem> {
    let mut fused_scores: HashMap<String, f64> = HashMap::new();
    let mut best_item: HashMap<String, (usize, ContextItem)> = HashMap::new();

    for results in provider_results {
        if results.is_empty() {
            continue;
        }
        let mut sorted = results.clone();
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        for (idx, item) in sorted.into_iter().enumerate() {
            let rank = idx + 1;
            *fused_scores.entry(item.key.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64);

            best_item
                .entry(item.key.clone())
                .and_modify(|(best_rank, best)| {
                    if rank < *best_rank || (rank == *best_rank && item.score > best.score) {
                        *best_rank = rank;
                        *best = item.clone();
                    }
                })
                .or_insert((rank, item));
        }
    }

    let mut out: Vec<ContextItem> = best_item
        .into_iter()
        .map(|(key, (_, mut item))| {
            item.score = *fused_scores.get(&key).unwrap_or(&0.0);
            item
        })
        .collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(truncate_to);
    out
}

/// Select `final_limit` items from the fused candidate list that maximize
/// relevance while penalizing similarity to already-selected items.
fn maximal_marginal_relevance(
    candidates: Vec<ContextItem>,
    vector_index: &VectorIndex,
    final_limit: usize,
    lambda: f64,
) -> Vec<ContextItem> {
    if candidates.is_empty() || final_limit == 0 {
        return Vec::new();
    }

    let max_relevance = candidates.iter().map(|c| c.score).fold(0.0_f64, f64::max);
    let normalize = |score: f64| -> f64 {
        if max_relevance > 0.0 {
            (score / max_relevance).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };

    let vectors: HashMap<String, Option<[f32; DIM]>> = candidates
        .iter()
        .map(|c| (c.key.clone(), vector_index.vector_for_key(&c.key)))
        .collect();

    let mut remaining = candidates;
    let mut selected: Vec<ContextItem> = Vec::new();
    let mut selected_vectors: Vec<[f32; DIM]> = Vec::new();

    while selected.len() < final_limit && !remaining.is_empty() {
        let mut best_idx = 0usize;
        let mut best_mmr = f64::NEG_INFINITY;

        for (idx, candidate) in remaining.iter().enumerate() {
            let relevance = normalize(candidate.score);
            let candidate_vec = vectors.get(&candidate.key).copied().flatten();

            let max_sim = if selected_vectors.is_empty() {
                0.0
            } else if let Some(cv) = candidate_vec {
                selected_vectors.iter().map(|sv| dot(&cv, sv) as f64).fold(f64::NEG_INFINITY, f64::max)
            } else {
                // Candidates without a vector keep their fused score and are
                // deprioritized by never benefiting from a zero-similarity bonus.
                1.0
            };

            let mmr = lambda * relevance - (1.0 - lambda) * max_sim.max(0.0);
            if mmr > best_mmr {
                best_mmr = mmr;
                best_idx = idx;
            }
        }

        let chosen = remaining.remove(best_idx);
        if let Some(Some(v)) = vectors.get(&chosen.key) {
            selected_vectors.push(*v);
        }
        selected.push(chosen);
    }

    selected.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    selected.truncate(final_limit);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, path: &str, score: f64) -> ContextItem {
        ContextItem {
            key: key.to_string(),
            path: path.to_string(),
            title: path.to_string(),
            excerpt: String::new(),
            score,
            source: "test".to_string(),
            reason_tags: vec![],
        }
    }

    #[test]
    fn s3_rrf_fusion_exact_order() {
        let bm25 = vec![item("A", "a.md", 3.0), item("B", "b.md", 2.0), item("C", "c.md", 1.0)];
        let vector = vec![item("B", "b.md", 3.0), item("C", "c.md", 2.0), item("A", "a.md", 1.0)];

        let fused = reciprocal_rank_fusion(&[bm25, vector], 500);
        let order: Vec<&str> = fused.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);

        let b_score = fused.iter().find(|i| i.key == "B").unwrap().score;
        let a_score = fused.iter().find(|i| i.key == "A").unwrap().score;
        let c_score = fused.iter().find(|i| i.key == "C").unwrap().score;
        assert!((b_score - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert!((a_score - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-12);
        assert!((c_score - (1.0 / 62.0 + 1.0 / 62.0)).abs() < 1e-12);
    }

    #[test]
    fn candidate_limit_widens_with_a_ceiling() {
        assert_eq!(candidate_limit(10), 80);
        assert_eq!(candidate_limit(100), 500);
        assert_eq!(candidate_limit(1), 8);
    }

    #[test]
    fn clamp_limit_bounds_to_1_200() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(5000), 200);
        assert_eq!(clamp_limit(50), 50);
    }

    #[test]
    fn capture_boost_multiplies_matching_paths_only() {
        let mut results = vec![vec![item("A", "notes/a.md", 1.0), item("B", "notes/b.md", 1.0)]];
        let mut captured = HashSet::new();
        captured.insert("notes/a.md".to_string());
        apply_capture_boost(&mut results, &captured);
        assert_eq!(results[0][0].score, 2.0);
        assert_eq!(results[0][1].score, 1.0);
    }

    /// §8 S4: two near-duplicate chunks from the same file plus a distinct
    /// chunk from a second file, all tied on fused score. MMR must not
    /// return both near-duplicates.
    #[test]
    fn s4_mmr_diversifies_across_files() {
        use crate::retrieval::chunk::HeadingLevel;
        use crate::retrieval::vector::{ChunkingConfig, VectorIndex};

        // target_words at its minimum (200) with overlap one short of that
        // (199) gives a step of 1: consecutive chunks differ by a single
        // word and are near-identical bags-of-words.
        let cfg = ChunkingConfig { heading_level: HeadingLevel::None, target_words: 200, overlap_words: 199 };
        let mut vector_index = VectorIndex::new();
        vector_index.ensure_loaded(None, cfg);

        let a_text: String = (0..205).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        vector_index.reindex_file("a.md", &a_text, cfg);

        // Disjoint vocabulary produces a dissimilar vector for b.md.
        let b_text: String = (0..50).map(|i| format!("other{i}")).collect::<Vec<_>>().join(" ");
        vector_index.reindex_file("b.md", &b_text, cfg);

        let candidates = vec![
            item("chunk:a.md:0", "a.md", 1.0),
            item("chunk:a.md:1", "a.md", 1.0),
            item("chunk:b.md:0", "b.md", 1.0),
        ];

        let selected = maximal_marginal_relevance(candidates, &vector_index, 2, MMR_LAMBDA);

        assert_eq!(selected.len(), 2);
        let paths: HashSet<&str> = selected.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths.len(), 2, "expected one chunk per file, got {paths:?}");
        assert!(paths.contains("a.md"));
        assert!(paths.contains("b.md"));
    }
}
