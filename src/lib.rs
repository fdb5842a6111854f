// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! castquery — retrieval and context-assembly engine for Q&A over podcast
//! transcripts
//!
//! Turns a question plus conversation history into a ranked, deduplicated,
//! diversity-constrained set of transcript passages, assembles them into a
//! bounded context block with citation anchors, and coordinates generation
//! while preserving per-passage provenance.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod prompts;
pub mod retriever;

pub use config::EngineConfig;
pub use context::{CitationMap, ContextAssembler, ContextBlock};
pub use coordinator::{
    classify, GenerationCoordinator, ModelChoice, QueryResponse, SourceAttribution,
};
pub use corpus::{derive_passage_id, ChunkStore, Passage};
pub use engine::{AnswerEvent, AnswerStream, QueryEngine, QueryState};
pub use error::{GatewayError, QueryError, RetrievalStage};
pub use gateway::{
    EmbeddingGateway, FragmentStream, GenerationGateway, GenerationRequest, HttpEmbeddingGateway,
    HttpGenerationGateway, InMemoryVectorIndex, IndexFilter, IndexHit, VectorIndex,
};
pub use memory::{ConversationMemory, ConversationTurn, SessionStore};
pub use retriever::{RetrievalResult, Retriever, RetrieveOptions, ScoredPassage};
