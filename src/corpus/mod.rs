// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Immutable transcript corpus
//!
//! The chunk store holds the output of the offline ingestion job: transcript
//! passages with full provenance metadata. It is read-only for the query
//! pipeline; ingestion writes it once at startup.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A passage of transcript text with attached provenance metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    /// Globally unique, stable across restarts (see [`derive_passage_id`])
    pub passage_id: String,
    pub text: String,
    pub episode_id: String,
    pub episode_title: String,
    pub guest_name: String,
    pub guest_expertise: String,
    pub industry_tags: BTreeSet<String>,
    pub episode_themes: BTreeSet<String>,
    pub source_url: String,
    /// Seconds into the episode where this passage starts
    pub timestamp_offset: u64,
    /// This is chunk #X out of Y within the episode
    pub sequence_index: u32,
    pub sequence_total: u32,
}

/// Derive a passage id from its episode and position
///
/// The id is a truncated SHA-256 digest of `episode_id` and `sequence_index`,
/// so re-running ingestion over the same corpus reproduces the same ids and
/// citations stored in past responses stay resolvable.
pub fn derive_passage_id(episode_id: &str, sequence_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(episode_id.as_bytes());
    hasher.update(b":");
    hasher.update(sequence_index.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Read-only store of ingested passages, keyed by passage id
#[derive(Debug, Default)]
pub struct ChunkStore {
    passages: HashMap<String, Arc<Passage>>,
}

impl ChunkStore {
    /// Build a store from ingested passages
    ///
    /// Validates the per-passage invariants the rest of the pipeline relies
    /// on: `sequence_index < sequence_total` and unique ids.
    pub fn from_passages(passages: Vec<Passage>) -> Result<Self> {
        let mut map = HashMap::with_capacity(passages.len());
        for passage in passages {
            if passage.sequence_index >= passage.sequence_total {
                return Err(anyhow!(
                    "Passage {} has sequence_index {} >= sequence_total {}",
                    passage.passage_id,
                    passage.sequence_index,
                    passage.sequence_total
                ));
            }
            let id = passage.passage_id.clone();
            if map.insert(id.clone(), Arc::new(passage)).is_some() {
                return Err(anyhow!("Duplicate passage id: {}", id));
            }
        }
        Ok(Self { passages: map })
    }

    pub fn get(&self, passage_id: &str) -> Option<Arc<Passage>> {
        self.passages.get(passage_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Iterate all passages (used by index builders at startup)
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Passage>> {
        self.passages.values()
    }
}
