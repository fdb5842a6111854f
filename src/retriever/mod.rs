// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Retrieval
//!
//! Embeds the resolved query, searches the vector index with headroom over
//! the requested K, applies the hard relevance threshold, then re-ranks for
//! episode diversity. A backend failure is retried once with backoff, then
//! surfaced as retrieval-unavailable so it's never confused with "no
//! relevant passages".

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::corpus::{ChunkStore, Passage};
use crate::error::{GatewayError, QueryError, RetrievalStage};
use crate::gateway::{EmbeddingGateway, IndexFilter, VectorIndex};

/// Backoff before the single retry of a transient backend failure
const RETRY_BACKOFF_MS: u64 = 250;

/// A passage scored against one query, ephemeral
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Arc<Passage>,
    pub relevance_score: f32,
}

/// Ordered retrieval output, consumed once by the context assembler
///
/// Order is the final relevance/diversity-adjusted rank.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Per-query retrieval knobs; unset fields fall back to configuration
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: Option<usize>,
    pub diversity: Option<bool>,
    pub filter: Option<IndexFilter>,
}

pub struct Retriever {
    embedding: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    chunks: Arc<ChunkStore>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedding: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        chunks: Arc<ChunkStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedding,
            index,
            chunks,
            config,
        }
    }

    /// Retrieve relevant passages for a resolved query
    pub async fn retrieve(
        &self,
        resolved_query: &str,
        opts: &RetrieveOptions,
    ) -> Result<RetrievalResult, QueryError> {
        let top_k = opts.top_k.unwrap_or(self.config.top_k);
        let diversity = opts.diversity.unwrap_or(self.config.diversity_enabled);
        let candidate_k = top_k * self.config.candidate_multiplier;

        // Embed (retry once on a transient failure)
        let vector = match self.embedding.embed(resolved_query).await {
            Ok(v) => v,
            Err(e) if e.is_retryable() => {
                warn!("Embedding failed ({}), retrying once", e);
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                self.embedding
                    .embed(resolved_query)
                    .await
                    .map_err(|e| unavailable(RetrievalStage::Embed, e))?
            }
            Err(e) => return Err(unavailable(RetrievalStage::Embed, e)),
        };

        // Search (same retry policy)
        let filter = opts.filter.as_ref();
        let hits = match self.index.search(&vector, candidate_k, filter).await {
            Ok(h) => h,
            Err(e) if e.is_retryable() => {
                warn!("Index search failed ({}), retrying once", e);
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                self.index
                    .search(&vector, candidate_k, filter)
                    .await
                    .map_err(|e| unavailable(RetrievalStage::Search, e))?
            }
            Err(e) => return Err(unavailable(RetrievalStage::Search, e)),
        };

        // Hard threshold cut, then passage resolution. An id the index knows
        // but the chunk store doesn't indicates a stale index; drop it loudly
        // rather than failing the whole query.
        let mut candidates: Vec<ScoredPassage> = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.score < self.config.score_threshold {
                continue;
            }
            match self.chunks.get(&hit.passage_id) {
                Some(passage) => candidates.push(ScoredPassage {
                    passage,
                    relevance_score: hit.score,
                }),
                None => warn!(
                    passage_id = %hit.passage_id,
                    "Index returned unknown passage id, skipping"
                ),
            }
        }

        let selected = if diversity {
            diversity_rerank(candidates, top_k, self.config.max_per_episode)
        } else {
            candidates.truncate(top_k);
            candidates
        };

        debug!(
            requested = top_k,
            selected = selected.len(),
            diversity,
            "Retrieval complete"
        );
        Ok(RetrievalResult { passages: selected })
    }
}

fn unavailable(stage: RetrievalStage, err: GatewayError) -> QueryError {
    QueryError::RetrievalUnavailable {
        stage,
        reason: err.to_string(),
    }
}

/// Greedy diversity selection over relevance-ordered candidates
///
/// Accepts candidates in descending relevance order unless their episode is
/// already represented `max_per_episode` times; skipped candidates backfill
/// the quota afterwards (still in relevance order) so a uniquely relevant
/// passage from an over-represented episode is never discarded when nothing
/// else can fill the slot.
pub fn diversity_rerank(
    candidates: Vec<ScoredPassage>,
    top_k: usize,
    max_per_episode: usize,
) -> Vec<ScoredPassage> {
    let mut accepted: Vec<ScoredPassage> = Vec::with_capacity(top_k);
    let mut skipped: Vec<ScoredPassage> = Vec::new();
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for candidate in candidates {
        if accepted.len() >= top_k {
            break;
        }
        let count = counts
            .get(candidate.passage.episode_id.as_str())
            .copied()
            .unwrap_or(0);
        if count < max_per_episode {
            counts.insert(candidate.passage.episode_id.clone(), count + 1);
            accepted.push(candidate);
        } else {
            skipped.push(candidate);
        }
    }

    // Backfill from skipped candidates in relevance order
    let mut backfill = skipped.into_iter();
    while accepted.len() < top_k {
        match backfill.next() {
            Some(candidate) => accepted.push(candidate),
            None => break,
        }
    }

    accepted
}
