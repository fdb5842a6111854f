// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Conversation memory
//!
//! A bounded ring buffer of prior turns per session, plus the heuristic
//! reference resolver. Resolution never fabricates referents: when the query
//! carries a pronoun-like marker it only prefixes the literal previous
//! question as disambiguating context for the embedding and generation
//! stages.
//!
//! Memory is session-scoped state. [`SessionStore`] maps session ids to
//! independent buffers; the per-session mutex is what serializes query
//! cycles within a session.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Closed set of unresolved-reference markers
///
/// Matched on word boundaries, case-insensitive. Deliberately conservative:
/// false positives only cost a slightly longer resolved query.
const REFERENCE_MARKERS: &[&str] = &["that", "it", "this", "he", "she", "they"];

/// One complete question/answer exchange
///
/// Created after a full query cycle completes, never mutated afterward.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub user_query: String,
    pub resolved_query: String,
    pub assistant_answer: String,
    pub cited_passage_ids: Vec<String>,
}

/// Bounded FIFO buffer of conversation turns
#[derive(Debug)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// Resolve ambiguous references in a query against recent history
    ///
    /// Returns the query unchanged when it has no reference marker or the
    /// history is empty.
    pub fn resolve(&self, query: &str) -> String {
        let previous = match self.turns.back() {
            Some(turn) => &turn.user_query,
            None => return query.to_string(),
        };
        if !contains_reference_marker(query) {
            return query.to_string();
        }
        debug!("Reference marker found, prefixing previous query");
        format!("Following up on '{}': {}", previous, query)
    }

    /// Append a completed turn, evicting the oldest on overflow
    pub fn append(&mut self, turn: ConversationTurn) {
        if self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<&ConversationTurn> {
        let start = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(start).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Clear history ("new conversation")
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

fn contains_reference_marker(query: &str) -> bool {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .any(|token| {
            let lower = token.to_lowercase();
            REFERENCE_MARKERS.contains(&lower.as_str())
        })
}

/// Session-keyed store of conversation memories
///
/// Each session owns an independent buffer behind its own mutex. Holding the
/// mutex across a whole query cycle is required: reference resolution must
/// never read a half-committed history.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationMemory>>>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    /// Get the session's memory, creating it on first use
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<ConversationMemory>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(memory) = sessions.get(session_id) {
                return memory.clone();
            }
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationMemory::new(self.max_turns))))
            .clone()
    }

    /// Drop a session's history entirely
    pub async fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
