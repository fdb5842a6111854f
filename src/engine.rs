// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Query engine
//!
//! The exposed surface of the crate: one synchronous-shaped `answer` entry
//! point and a streaming variant, both safe to call concurrently for
//! different sessions. Within a session, cycles are serialized by holding the
//! session's memory lock from resolution until the turn is (or isn't)
//! appended, so reference resolution never reads a half-committed history.
//!
//! Cycle state machine: IDLE -> RESOLVING -> RETRIEVING -> ASSEMBLING ->
//! GENERATING -> {COMPLETE | FAILED}. FAILED is reachable from RETRIEVING or
//! GENERATING only; resolution and assembly are pure local computations.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::ContextAssembler;
use crate::coordinator::{GenerationCoordinator, QueryResponse};
use crate::corpus::ChunkStore;
use crate::error::QueryError;
use crate::gateway::{EmbeddingGateway, GenerationGateway, VectorIndex};
use crate::memory::{ConversationTurn, SessionStore};
use crate::prompts::{INSUFFICIENT_CONTEXT_ANSWER, TRUNCATION_NOTICE};
use crate::retriever::{RetrieveOptions, Retriever};

/// Phase of a query cycle, for structured logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Resolving,
    Retrieving,
    Assembling,
    Generating,
    Complete,
    Failed,
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryState::Idle => "IDLE",
            QueryState::Resolving => "RESOLVING",
            QueryState::Retrieving => "RETRIEVING",
            QueryState::Assembling => "ASSEMBLING",
            QueryState::Generating => "GENERATING",
            QueryState::Complete => "COMPLETE",
            QueryState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Streaming answer events: fragments as they arrive, then exactly one
/// `Complete` carrying the assembled response
#[derive(Debug)]
pub enum AnswerEvent {
    Fragment(String),
    Complete(Box<QueryResponse>),
}

pub type AnswerStream = ReceiverStream<AnswerEvent>;

pub struct QueryEngine {
    retriever: Retriever,
    assembler: ContextAssembler,
    coordinator: GenerationCoordinator,
    sessions: SessionStore,
    prompt_turns: usize,
}

impl QueryEngine {
    /// Build an engine over the given corpus and backends
    ///
    /// Validates configuration up front; a bad configuration is fatal here,
    /// never per-query.
    pub fn new(
        config: EngineConfig,
        embedding: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        generation: Arc<dyn GenerationGateway>,
        chunks: Arc<ChunkStore>,
    ) -> Result<Self, QueryError> {
        config.validate()?;
        Ok(Self {
            retriever: Retriever::new(embedding, index, chunks, config.retrieval.clone()),
            assembler: ContextAssembler::new(config.context.budget_chars),
            coordinator: GenerationCoordinator::new(generation, config.generation.clone()),
            sessions: SessionStore::new(config.memory.max_turns),
            prompt_turns: config.memory.prompt_turns,
        })
    }

    /// Answer a question within a session
    pub async fn answer(
        &self,
        question: &str,
        session_id: &str,
        opts: RetrieveOptions,
    ) -> Result<QueryResponse, QueryError> {
        let request_id = Uuid::new_v4();
        let memory = self.sessions.get_or_create(session_id).await;
        // Held until the cycle reaches COMPLETE or FAILED: serializes queries
        // within this session
        let mut guard = memory.lock().await;

        debug!(%request_id, session_id, state = %QueryState::Resolving, "Query cycle started");
        let resolved = guard.resolve(question);

        debug!(%request_id, state = %QueryState::Retrieving, query = %resolved, "Retrieving");
        let retrieval = match self.retriever.retrieve(&resolved, &opts).await {
            Ok(r) => r,
            Err(e) => {
                warn!(%request_id, state = %QueryState::Failed, error = %e, "Retrieval failed");
                return Err(e);
            }
        };

        if retrieval.is_empty() {
            // Not an error: search succeeded, nothing cleared the threshold.
            // Generation is skipped; the cycle still completes and the turn
            // is recorded.
            info!(%request_id, state = %QueryState::Complete, "No passage cleared the threshold");
            let response = QueryResponse {
                answer_text: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                resolved_query: resolved.clone(),
                truncated: false,
            };
            guard.append(ConversationTurn {
                user_query: question.to_string(),
                resolved_query: resolved,
                assistant_answer: response.answer_text.clone(),
                cited_passage_ids: Vec::new(),
            });
            return Ok(response);
        }

        debug!(%request_id, state = %QueryState::Assembling, passages = retrieval.len(), "Assembling context");
        let block = self.assembler.assemble(&retrieval);

        debug!(%request_id, state = %QueryState::Generating, context_chars = block.text.len(), "Generating");
        let history = guard.recent(self.prompt_turns);
        let response = match self
            .coordinator
            .generate(&resolved, &block, &retrieval, &history)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // No turn is appended on any FAILED path
                warn!(%request_id, state = %QueryState::Failed, error = %e, "Generation failed");
                return Err(e);
            }
        };

        let cited: Vec<String> = block.citations.iter().map(|(_, id)| id.to_string()).collect();
        guard.append(ConversationTurn {
            user_query: question.to_string(),
            resolved_query: resolved,
            assistant_answer: response.answer_text.clone(),
            cited_passage_ids: cited,
        });
        info!(%request_id, state = %QueryState::Complete, sources = response.sources.len(), "Query cycle complete");
        Ok(response)
    }

    /// Streaming variant of [`answer`](Self::answer)
    ///
    /// Fragments are forwarded as the gateway emits them; the stream ends
    /// with one `Complete` event. Dropping the stream cancels the cycle: the
    /// forwarding task stops pulling from the gateway and no turn is
    /// appended. A mid-stream gateway failure completes the cycle with the
    /// partial answer plus an explicit truncation notice (`truncated` set),
    /// also without appending a turn.
    pub async fn answer_stream(
        self: &Arc<Self>,
        question: &str,
        session_id: &str,
        opts: RetrieveOptions,
    ) -> Result<AnswerStream, QueryError> {
        let request_id = Uuid::new_v4();
        let memory = self.sessions.get_or_create(session_id).await;
        let mut guard = memory.clone().lock_owned().await;

        debug!(%request_id, session_id, state = %QueryState::Resolving, "Streaming cycle started");
        let resolved = guard.resolve(question);

        debug!(%request_id, state = %QueryState::Retrieving, query = %resolved, "Retrieving");
        let retrieval = self.retriever.retrieve(&resolved, &opts).await.map_err(|e| {
            warn!(%request_id, state = %QueryState::Failed, error = %e, "Retrieval failed");
            e
        })?;

        let (tx, rx) = mpsc::channel::<AnswerEvent>(32);

        if retrieval.is_empty() {
            info!(%request_id, state = %QueryState::Complete, "No passage cleared the threshold");
            let response = QueryResponse {
                answer_text: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                resolved_query: resolved.clone(),
                truncated: false,
            };
            guard.append(ConversationTurn {
                user_query: question.to_string(),
                resolved_query: resolved,
                assistant_answer: response.answer_text.clone(),
                cited_passage_ids: Vec::new(),
            });
            let _ = tx.send(AnswerEvent::Complete(Box::new(response))).await;
            return Ok(ReceiverStream::new(rx));
        }

        debug!(%request_id, state = %QueryState::Assembling, passages = retrieval.len(), "Assembling context");
        let block = self.assembler.assemble(&retrieval);

        let history: Vec<ConversationTurn> = guard
            .recent(self.prompt_turns)
            .into_iter()
            .cloned()
            .collect();
        let history_refs: Vec<&ConversationTurn> = history.iter().collect();

        debug!(%request_id, state = %QueryState::Generating, context_chars = block.text.len(), "Opening stream");
        let mut fragments = self
            .coordinator
            .open_stream(&resolved, &block, &history_refs)
            .await
            .map_err(|e| {
                warn!(%request_id, state = %QueryState::Failed, error = %e, "Stream failed to start");
                e
            })?;

        let engine = Arc::clone(self);
        let question = question.to_string();
        tokio::spawn(async move {
            let mut answer = String::new();
            let mut truncated = false;

            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        answer.push_str(&fragment);
                        if tx.send(AnswerEvent::Fragment(fragment)).await.is_err() {
                            // Caller dropped the stream: stop pulling, drop
                            // the gateway stream, append nothing
                            debug!(%request_id, "Stream cancelled by caller");
                            return;
                        }
                    }
                    Err(e) => {
                        // Fatal for this cycle: surface the partial output
                        // with an explicit notice, never retry silently
                        warn!(%request_id, error = %e, "Stream interrupted mid-response");
                        answer.push_str(TRUNCATION_NOTICE);
                        truncated = true;
                        break;
                    }
                }
            }

            let response =
                engine
                    .coordinator
                    .finalize(answer, truncated, &resolved, &block, &retrieval);

            if truncated {
                info!(%request_id, state = %QueryState::Failed, "Cycle ended with truncated answer");
            } else {
                let cited: Vec<String> =
                    block.citations.iter().map(|(_, id)| id.to_string()).collect();
                guard.append(ConversationTurn {
                    user_query: question,
                    resolved_query: resolved.clone(),
                    assistant_answer: response.answer_text.clone(),
                    cited_passage_ids: cited,
                });
                info!(%request_id, state = %QueryState::Complete, "Streaming cycle complete");
            }

            let _ = tx.send(AnswerEvent::Complete(Box::new(response))).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Start a new conversation for a session
    pub async fn clear_session(&self, session_id: &str) {
        self.sessions.clear(session_id).await;
    }
}
