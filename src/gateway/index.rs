// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vector index
//!
//! Stores (vector, passage-id, metadata) triples and answers top-K
//! nearest-neighbor queries with optional equality filters. The in-memory
//! implementation uses exact cosine similarity, which is plenty for a corpus
//! of podcast transcripts and keeps tests hermetic.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::GatewayError;

/// One search hit, before passage resolution
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub passage_id: String,
    pub score: f32,
}

/// Equality filters supported by the index
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub episode_id: Option<String>,
    pub industry_tag: Option<String>,
}

impl IndexFilter {
    pub fn is_empty(&self) -> bool {
        self.episode_id.is_none() && self.industry_tag.is_none()
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-K nearest neighbors by similarity, highest first
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<IndexHit>, GatewayError>;
}

struct IndexEntry {
    passage_id: String,
    vector: Vec<f32>,
    episode_id: String,
    industry_tags: BTreeSet<String>,
}

/// Exact-scan in-memory index
pub struct InMemoryVectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    /// Add a vector to the index
    ///
    /// Rejects wrong dimensions and non-finite values, which would silently
    /// corrupt similarity ordering.
    pub fn add(
        &mut self,
        passage_id: String,
        vector: Vec<f32>,
        episode_id: String,
        industry_tags: BTreeSet<String>,
    ) -> Result<(), GatewayError> {
        if vector.len() != self.dimension {
            return Err(GatewayError::InvalidResponse(format!(
                "Invalid vector dimensions: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(GatewayError::InvalidResponse(
                "Vector contains NaN or Infinity".to_string(),
            ));
        }
        self.entries.push(IndexEntry {
            passage_id,
            vector,
            episode_id,
            industry_tags,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<IndexHit>, GatewayError> {
        if vector.len() != self.dimension {
            return Err(GatewayError::InvalidResponse(format!(
                "Invalid query dimensions: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }

        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .filter(|entry| match filter {
                Some(f) => {
                    f.episode_id
                        .as_ref()
                        .map_or(true, |id| entry.episode_id == *id)
                        && f.industry_tag
                            .as_ref()
                            .map_or(true, |tag| entry.industry_tags.contains(tag))
                }
                None => true,
            })
            .map(|entry| IndexHit {
                passage_id: entry.passage_id.clone(),
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}
