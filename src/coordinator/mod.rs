// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Generation coordination
//!
//! Builds the instruction + history + context + question prompt, picks the
//! model, invokes the generation gateway, and reassembles the answer together
//! with the ordered source list. Ordinal citations the model emits are mapped
//! back through the citation map; passages the model never referenced are
//! still attributed (after referenced ones) so the caller keeps full
//! provenance even when the model's citation discipline is imperfect.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::context::{floor_char_boundary, ContextBlock};
use crate::error::{GatewayError, QueryError};
use crate::gateway::{FragmentStream, GenerationGateway, GenerationRequest};
use crate::memory::ConversationTurn;
use crate::prompts::INSTRUCTION_BLOCK;
use crate::retriever::RetrievalResult;

/// Backoff before the single retry of a pre-first-token failure
const RETRY_BACKOFF_MS: u64 = 250;
/// Cap on each history line rendered into the prompt, so history cost stays
/// small and independent of the context budget
const HISTORY_LINE_CHARS: usize = 400;
/// Length of the source excerpt returned to the caller
const EXCERPT_CHARS: usize = 200;

/// Which configured model a query is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChoice {
    Fast,
    Deep,
}

/// Pure model-routing classification
///
/// Deep model for large contexts, long questions, or explicitly comparative
/// ones; fast model otherwise. Testable in isolation from the generation
/// call.
pub fn classify(query: &str, context_size: usize, deep_context_chars: usize) -> ModelChoice {
    if context_size > deep_context_chars {
        return ModelChoice::Deep;
    }
    if query.split_whitespace().count() > 24 {
        return ModelChoice::Deep;
    }
    let lower = query.to_lowercase();
    for marker in ["compare", "contrast", "versus", " vs ", "difference between"] {
        if lower.contains(marker) {
            return ModelChoice::Deep;
        }
    }
    ModelChoice::Fast
}

/// Provenance entry returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct SourceAttribution {
    pub guest: String,
    pub guest_expertise: String,
    pub episode_id: String,
    pub source_url: String,
    pub excerpt: String,
    pub industry_tags: Vec<String>,
    pub episode_themes: Vec<String>,
    pub relevance_score: f32,
}

/// Final answer with ordered provenance
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer_text: String,
    pub sources: Vec<SourceAttribution>,
    pub resolved_query: String,
    /// True when a streamed answer was interrupted and carries the
    /// truncation notice; such responses never append a conversation turn
    pub truncated: bool,
}

pub struct GenerationCoordinator {
    gateway: Arc<dyn GenerationGateway>,
    config: GenerationConfig,
    citation_regex: Regex,
}

impl GenerationCoordinator {
    pub fn new(gateway: Arc<dyn GenerationGateway>, config: GenerationConfig) -> Self {
        Self {
            gateway,
            config,
            // Ordinal anchors as embedded in the context block
            citation_regex: Regex::new(r"\[(\d+)\]").expect("static regex"),
        }
    }

    /// Build the full prompt: instruction block, recent turns, context,
    /// question, in that fixed order
    pub fn build_prompt(
        &self,
        resolved_query: &str,
        context_text: &str,
        history: &[&ConversationTurn],
    ) -> String {
        let mut prompt = String::from(INSTRUCTION_BLOCK);

        if !history.is_empty() {
            prompt.push_str("\n\nRecent conversation:\n");
            for turn in history {
                prompt.push_str("Q: ");
                prompt.push_str(clip(&turn.user_query, HISTORY_LINE_CHARS));
                prompt.push('\n');
                prompt.push_str("A: ");
                prompt.push_str(clip(&turn.assistant_answer, HISTORY_LINE_CHARS));
                prompt.push('\n');
            }
        }

        prompt.push_str("\n\nTranscript excerpts:\n");
        prompt.push_str(context_text);
        prompt.push_str("\n\nQuestion: ");
        prompt.push_str(resolved_query);
        prompt
    }

    fn request(&self, prompt: String, choice: ModelChoice, stream: bool) -> GenerationRequest {
        let model = match choice {
            ModelChoice::Fast => self.config.fast_model.clone(),
            ModelChoice::Deep => self.config.deep_model.clone(),
        };
        GenerationRequest {
            model,
            prompt,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        }
    }

    /// Whole-response generation
    pub async fn generate(
        &self,
        resolved_query: &str,
        block: &ContextBlock,
        retrieval: &RetrievalResult,
        history: &[&ConversationTurn],
    ) -> Result<QueryResponse, QueryError> {
        let prompt = self.build_prompt(resolved_query, &block.text, history);
        let choice = classify(resolved_query, block.text.len(), self.config.deep_context_chars);
        debug!(?choice, prompt_chars = prompt.len(), "Invoking generation");

        let request = self.request(prompt, choice, false);
        let answer = match self.gateway.generate(request.clone()).await {
            Ok(text) => text,
            Err(e) if e.is_retryable() => {
                warn!("Generation failed ({}), retrying once", e);
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                self.gateway.generate(request).await.map_err(generation_error)?
            }
            Err(e) => return Err(generation_error(e)),
        };

        Ok(self.finalize(answer, false, resolved_query, block, retrieval))
    }

    /// Open a streaming generation call
    ///
    /// Failures before the first token are retried once here; mid-stream
    /// failures surface on the returned stream and are fatal for the cycle.
    pub async fn open_stream(
        &self,
        resolved_query: &str,
        block: &ContextBlock,
        history: &[&ConversationTurn],
    ) -> Result<FragmentStream, QueryError> {
        let prompt = self.build_prompt(resolved_query, &block.text, history);
        let choice = classify(resolved_query, block.text.len(), self.config.deep_context_chars);
        let request = self.request(prompt, choice, true);

        match self.gateway.generate_stream(request.clone()).await {
            Ok(stream) => Ok(stream),
            Err(e) if e.is_retryable() => {
                warn!("Streaming generation failed to start ({}), retrying once", e);
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                self.gateway
                    .generate_stream(request)
                    .await
                    .map_err(|e| QueryError::GenerationUnavailable(e.to_string()))
            }
            Err(e) => Err(QueryError::GenerationUnavailable(e.to_string())),
        }
    }

    /// Assemble the final response from the answer text
    ///
    /// Sources are ordered by first citation in the answer, then the
    /// never-referenced passages in relevance order.
    pub fn finalize(
        &self,
        answer_text: String,
        truncated: bool,
        resolved_query: &str,
        block: &ContextBlock,
        retrieval: &RetrievalResult,
    ) -> QueryResponse {
        let mut referenced_ids: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for capture in self.citation_regex.captures_iter(&answer_text) {
            let Ok(ordinal) = capture[1].parse::<usize>() else {
                continue;
            };
            if let Some(id) = block.citations.passage_id(ordinal) {
                if seen.insert(id) {
                    referenced_ids.push(id);
                }
            }
        }

        let mut sources: Vec<SourceAttribution> = Vec::with_capacity(retrieval.len());
        for id in &referenced_ids {
            if let Some(scored) = retrieval.passages.iter().find(|p| p.passage.passage_id == *id) {
                sources.push(attribution(scored));
            }
        }
        for scored in &retrieval.passages {
            if !seen.contains(scored.passage.passage_id.as_str()) {
                sources.push(attribution(scored));
            }
        }

        QueryResponse {
            answer_text,
            sources,
            resolved_query: resolved_query.to_string(),
            truncated,
        }
    }
}

/// Map a whole-response gateway failure to the query error surface
///
/// A connection cut mid-body means the backend produced output that never
/// reached us whole; that is an interruption, not unavailability.
fn generation_error(err: GatewayError) -> QueryError {
    match err {
        GatewayError::StreamInterrupted(reason) => QueryError::GenerationInterrupted {
            received_chars: 0,
            reason,
        },
        other => QueryError::GenerationUnavailable(other.to_string()),
    }
}

fn attribution(scored: &crate::retriever::ScoredPassage) -> SourceAttribution {
    let passage = &scored.passage;
    let cut = floor_char_boundary(&passage.text, EXCERPT_CHARS);
    let excerpt = if cut < passage.text.len() {
        format!("{}...", &passage.text[..cut])
    } else {
        passage.text.clone()
    };
    SourceAttribution {
        guest: passage.guest_name.clone(),
        guest_expertise: passage.guest_expertise.clone(),
        episode_id: passage.episode_id.clone(),
        source_url: passage.source_url.clone(),
        excerpt,
        industry_tags: passage.industry_tags.iter().cloned().collect(),
        episode_themes: passage.episode_themes.iter().cloned().collect(),
        relevance_score: scored.relevance_score,
    }
}

fn clip(s: &str, max: usize) -> &str {
    &s[..floor_char_boundary(s, max)]
}
