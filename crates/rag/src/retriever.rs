//! Hybrid retriever
//!
//! Orchestrates the full retrieval pipeline for one query: expansion, dual
//! hybrid search with RRF fusion, merge and dedup across branches, feature
//! reranking, and small-to-big promotion to parent segments.
//!
//! CPU scans (cosine and keyword scoring) run on the blocking pool; the two
//! hybrid branches and the vector/lexical legs inside each branch run in
//! parallel once their inputs are ready.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bookwise_config::RagFeatures;
use bookwise_core::{Embedder, Error, LanguageModel, Result, ScoredSegment};
use bookwise_index::ChunkIndex;

use crate::expansion::QueryExpander;
use crate::fusion::{reciprocal_rank_fusion, RRF_K};
use crate::rerank::rerank;
use crate::RagError;

/// Retriever tuning knobs
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Candidates fetched by each of the vector and lexical legs
    pub branch_top_k: usize,
    /// Candidates kept after RRF fusion within one branch
    pub fused_top_k: usize,
    /// Final number of passages returned
    pub final_top_k: usize,
    /// RRF k parameter
    pub rrf_k: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            branch_top_k: 20,
            fused_top_k: 20,
            final_top_k: 5,
            rrf_k: RRF_K,
        }
    }
}

/// Hybrid retriever over the chunk index
pub struct HybridRetriever {
    config: RetrieverConfig,
    features: RagFeatures,
    index: Arc<ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    expander: QueryExpander,
}

impl HybridRetriever {
    pub fn new(
        index: Arc<ChunkIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        features: RagFeatures,
        book_title: impl Into<String>,
    ) -> Self {
        Self {
            config: RetrieverConfig::default(),
            features,
            index,
            embedder,
            expander: QueryExpander::new(llm, book_title),
        }
    }

    pub fn with_config(mut self, config: RetrieverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn index(&self) -> &Arc<ChunkIndex> {
        &self.index
    }

    /// Run the full pipeline and return up to `final_top_k` parent passages,
    /// sorted by score descending.
    ///
    /// An empty query returns an empty list without any external calls.
    /// Expansion failures degrade the pipeline; the result is at least the
    /// vector-only answer for the normalised query or an error.
    pub async fn retrieve(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredSegment>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let expanded = self.expander.expand(query, &self.features, cancel).await?;

        let primary = self.hybrid_search(&expanded.query_en, expanded.primary_embed_text(), cancel);
        let step_back = async {
            match (expanded.step_back.as_deref(), expanded.step_back_embed_text()) {
                (Some(question), Some(embed_text)) => {
                    self.hybrid_search(question, embed_text, cancel).await.map(Some)
                }
                _ => Ok(None),
            }
        };

        let (primary_results, step_back_results) = tokio::join!(primary, step_back);

        let primary_results = match primary_results {
            Ok(results) => results,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "primary hybrid search failed, falling back to vector-only");
                self.vector_only(&expanded.query_en, cancel).await?
            }
        };

        let step_back_results = match step_back_results {
            Ok(results) => results.unwrap_or_default(),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "step-back branch failed, continuing with the primary branch");
                Vec::new()
            }
        };

        debug!(
            primary = primary_results.len(),
            step_back = step_back_results.len(),
            "merging dual branches"
        );
        let merged = merge_and_deduplicate(primary_results, step_back_results);

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Rerank against the user's original message; with reranking off the
        // fused order is kept, only the cutoff applies.
        let selected = if self.features.rerank {
            rerank(query, merged, self.config.final_top_k)
        } else {
            let mut kept = merged;
            kept.truncate(self.config.final_top_k);
            kept
        };

        let parents = self.promote_to_parents(selected);
        info!(passages = parents.len(), "retrieval complete");
        Ok(parents)
    }

    /// One hybrid branch: vector search on the embedded text and lexical
    /// search on the query, in parallel, fused with RRF. With hybrid search
    /// disabled the branch degrades to vector-only.
    async fn hybrid_search(
        &self,
        lexical_query: &str,
        embed_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredSegment>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let vector = self.vector_only(embed_text, cancel);

        let lexical = async {
            if !self.features.hybrid_search {
                return Ok(Vec::new());
            }
            let index = Arc::clone(&self.index);
            let query = lexical_query.to_string();
            let k = self.config.branch_top_k;
            tokio::task::spawn_blocking(move || index.lexical_search(&query, k))
                .await
                .map_err(|e| Error::from(RagError::Join(e.to_string())))
        };

        let (vector_results, lexical_results) = tokio::join!(vector, lexical);
        let vector_results = vector_results?;

        if !self.features.hybrid_search {
            return Ok(vector_results);
        }

        let lexical_results = lexical_results?;
        let mut fused =
            reciprocal_rank_fusion(&vector_results, &lexical_results, self.config.rrf_k);
        fused.truncate(self.config.fused_top_k);
        Ok(fused)
    }

    /// Plain vector search over the child segments: no expansion, fusion,
    /// reranking, or promotion. Backs the basic streaming endpoint, which
    /// feeds raw child passages to the generator.
    pub async fn basic_search(
        &self,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredSegment>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut results = self.vector_only(query, cancel).await?;
        results.truncate(k);
        Ok(results)
    }

    /// Embed a text on the blocking pool and run the cosine scan
    async fn vector_only(
        &self,
        embed_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredSegment>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let embedder = Arc::clone(&self.embedder);
        let text = embed_text.to_string();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| Error::from(RagError::Join(e.to_string())))??;

        let index = Arc::clone(&self.index);
        let k = self.config.branch_top_k;
        tokio::task::spawn_blocking(move || index.vector_search(&query_vector, k))
            .await
            .map_err(|e| Error::from(RagError::Join(e.to_string())))
    }

    /// Replace matched children by their parents, deduplicating by parent id
    /// and keeping the best child score. Children without a resolvable
    /// parent are kept as-is.
    fn promote_to_parents(&self, children: Vec<ScoredSegment>) -> Vec<ScoredSegment> {
        let mut by_parent: HashMap<String, ScoredSegment> = HashMap::new();

        for child in children {
            let (key, promoted) = match self.index.parent_of(&child.segment) {
                Some(parent) => (
                    parent.id.clone(),
                    ScoredSegment::new(parent, child.score),
                ),
                None => {
                    warn!(child = %child.segment.id, "no parent found, keeping the child");
                    (child.segment.id.clone(), child)
                }
            };

            by_parent
                .entry(key)
                .and_modify(|existing| {
                    if promoted.score > existing.score {
                        *existing = promoted.clone();
                    }
                })
                .or_insert(promoted);
        }

        let mut parents: Vec<ScoredSegment> = by_parent.into_values().collect();
        parents.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| {
                let left = a.segment.metadata.parent_index.unwrap_or(usize::MAX);
                let right = b.segment.metadata.parent_index.unwrap_or(usize::MAX);
                left.cmp(&right)
            })
        });
        parents.truncate(self.config.final_top_k);
        parents
    }
}

/// Union two branch results by segment text, keeping the higher score on
/// duplicates, ordered by score descending.
fn merge_and_deduplicate(
    first: Vec<ScoredSegment>,
    second: Vec<ScoredSegment>,
) -> Vec<ScoredSegment> {
    let mut by_text: HashMap<String, ScoredSegment> = HashMap::new();

    for result in first.into_iter().chain(second) {
        by_text
            .entry(result.segment.text.clone())
            .and_modify(|existing| {
                if result.score > existing.score {
                    *existing = result.clone();
                }
            })
            .or_insert(result);
    }

    let mut merged: Vec<ScoredSegment> = by_text.into_values().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookwise_core::Segment;

    fn scored(id: usize, text: &str, score: f32) -> ScoredSegment {
        ScoredSegment::new(Arc::new(Segment::parent(id, text)), score)
    }

    #[test]
    fn test_merge_keeps_higher_score_on_duplicates() {
        let first = vec![scored(0, "same text", 0.4), scored(1, "unique a", 0.3)];
        let second = vec![scored(2, "same text", 0.9), scored(3, "unique b", 0.2)];

        let merged = merge_and_deduplicate(first, second);

        assert_eq!(merged.len(), 3);
        let same = merged.iter().find(|r| r.segment.text == "same text").unwrap();
        assert_eq!(same.score, 0.9);
    }

    #[test]
    fn test_merge_orders_by_score() {
        let merged = merge_and_deduplicate(
            vec![scored(0, "low", 0.1), scored(1, "high", 0.8)],
            vec![scored(2, "mid", 0.5)],
        );
        let scores: Vec<f32> = merged.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.8, 0.5, 0.1]);
    }

    #[test]
    fn test_default_config() {
        let config = RetrieverConfig::default();
        assert_eq!(config.branch_top_k, 20);
        assert_eq!(config.final_top_k, 5);
        assert_eq!(config.rrf_k, 60.0);
    }
}
