// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the query engine
//!
//! All knobs are plain tunables with environment overrides. The relevance
//! threshold (0.7) and per-episode cap (2) are empirical defaults for the
//! original corpus, not semantically meaningful constants.

use std::env;

use crate::error::QueryError;

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub memory: MemoryConfig,
}

/// Embedding gateway configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embedding service endpoint
    pub api_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Model identifier sent with each request
    pub model: String,
    /// Expected vector dimension
    pub dimension: usize,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

/// Generation gateway configuration
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Generation service endpoint
    pub api_url: String,
    /// Bearer token (required by hosted backends)
    pub api_key: Option<String>,
    /// Model used for short, simple questions
    pub fast_model: String,
    /// Model used for long or comparative questions over large contexts
    pub deep_model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens in the answer
    pub max_tokens: usize,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Context size (chars) above which the deep model is chosen
    pub deep_context_chars: usize,
}

/// Retrieval tuning
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Default number of passages to return
    pub top_k: usize,
    /// Candidates fetched per requested result, headroom for threshold
    /// rejection and diversity filtering
    pub candidate_multiplier: usize,
    /// Hard relevance cut on normalized similarity
    pub score_threshold: f32,
    /// Whether diversity re-ranking is on by default
    pub diversity_enabled: bool,
    /// Maximum accepted passages per episode under diversity
    pub max_per_episode: usize,
}

/// Context assembly budget
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Maximum characters in the assembled context block, sized to leave
    /// headroom for the instruction prompt and the answer within the
    /// generation model's window
    pub budget_chars: usize,
}

/// Conversation memory bounds
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Turns kept per session, strict FIFO eviction
    pub max_turns: usize,
    /// Turns rendered into the generation prompt
    pub prompt_turns: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            embedding: EmbeddingConfig {
                api_url: env::var("EMBEDDING_API_URL")
                    .unwrap_or_else(|_| "http://localhost:8090/v1/embed".to_string()),
                api_key: env::var("EMBEDDING_API_KEY").ok(),
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "all-MiniLM-L6-v2".to_string()),
                dimension: env_parse("EMBEDDING_DIMENSION", 384),
                timeout_ms: env_parse("EMBEDDING_TIMEOUT_MS", 5_000),
            },
            generation: GenerationConfig {
                api_url: env::var("GENERATION_API_URL")
                    .unwrap_or_else(|_| "http://localhost:8091/v1/generate".to_string()),
                api_key: env::var("GENERATION_API_KEY").ok(),
                fast_model: env::var("GENERATION_FAST_MODEL")
                    .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string()),
                deep_model: env::var("GENERATION_DEEP_MODEL")
                    .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
                temperature: env_parse("GENERATION_TEMPERATURE", 0.7),
                max_tokens: env_parse("GENERATION_MAX_TOKENS", 1_000),
                timeout_ms: env_parse("GENERATION_TIMEOUT_MS", 30_000),
                deep_context_chars: env_parse("GENERATION_DEEP_CONTEXT_CHARS", 4_000),
            },
            retrieval: RetrievalConfig {
                top_k: env_parse("RETRIEVAL_TOP_K", 5),
                candidate_multiplier: env_parse("RETRIEVAL_CANDIDATE_MULTIPLIER", 4),
                score_threshold: env_parse("RETRIEVAL_SCORE_THRESHOLD", 0.7),
                diversity_enabled: env::var("RETRIEVAL_DIVERSITY")
                    .map(|v| v.to_lowercase() != "false")
                    .unwrap_or(true),
                max_per_episode: env_parse("RETRIEVAL_MAX_PER_EPISODE", 2),
            },
            context: ContextConfig {
                budget_chars: env_parse("CONTEXT_BUDGET_CHARS", 6_000),
            },
            memory: MemoryConfig {
                max_turns: env_parse("MEMORY_MAX_TURNS", 5),
                prompt_turns: env_parse("MEMORY_PROMPT_TURNS", 3),
            },
        }
    }

    /// Validate the configuration
    ///
    /// Called once at startup; a failure here is fatal, never per-query.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.embedding.api_url.is_empty() {
            return Err(QueryError::Configuration(
                "Embedding API URL must not be empty".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(QueryError::Configuration(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }
        if self.generation.api_url.is_empty() {
            return Err(QueryError::Configuration(
                "Generation API URL must not be empty".to_string(),
            ));
        }
        if self.generation.fast_model.is_empty() || self.generation.deep_model.is_empty() {
            return Err(QueryError::Configuration(
                "Generation model identifiers must not be empty".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(QueryError::Configuration(
                "top_k must be greater than 0".to_string(),
            ));
        }
        if self.retrieval.candidate_multiplier == 0 {
            return Err(QueryError::Configuration(
                "candidate_multiplier must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            return Err(QueryError::Configuration(format!(
                "score_threshold must be in [0, 1], got {}",
                self.retrieval.score_threshold
            )));
        }
        if self.retrieval.max_per_episode == 0 {
            return Err(QueryError::Configuration(
                "max_per_episode must be greater than 0".to_string(),
            ));
        }
        if self.context.budget_chars == 0 {
            return Err(QueryError::Configuration(
                "Context budget must be greater than 0".to_string(),
            ));
        }
        if self.memory.max_turns == 0 {
            return Err(QueryError::Configuration(
                "Memory must keep at least one turn".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig {
                api_url: "http://localhost:8090/v1/embed".to_string(),
                api_key: None,
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                timeout_ms: 5_000,
            },
            generation: GenerationConfig {
                api_url: "http://localhost:8091/v1/generate".to_string(),
                api_key: None,
                fast_model: "llama-3.1-8b-instant".to_string(),
                deep_model: "llama-3.3-70b-versatile".to_string(),
                temperature: 0.7,
                max_tokens: 1_000,
                timeout_ms: 30_000,
                deep_context_chars: 4_000,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                candidate_multiplier: 4,
                score_threshold: 0.7,
                diversity_enabled: true,
                max_per_episode: 2,
            },
            context: ContextConfig {
                budget_chars: 6_000,
            },
            memory: MemoryConfig {
                max_turns: 5,
                prompt_turns: 3,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
