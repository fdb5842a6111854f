// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the query pipeline
//!
//! The taxonomy mirrors the cycle's failure surface:
//! - Configuration errors (fatal at startup, never per-query)
//! - Retrieval backend failures (embedding or index unreachable/timed out)
//! - Generation backend failures (before the first token vs mid-stream)
//!
//! "No relevant context" is deliberately NOT an error: a search that succeeds
//! but clears nothing over the threshold produces a normal response with
//! empty sources.

use thiserror::Error;

/// Errors surfaced by a query cycle
#[derive(Error, Debug)]
pub enum QueryError {
    /// Missing or invalid configuration (API keys, model identifiers, limits)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Embedding gateway or vector index unreachable or timed out
    #[error("Retrieval unavailable ({stage}): {reason}")]
    RetrievalUnavailable { stage: RetrievalStage, reason: String },

    /// Generation backend unreachable or timed out before the first token
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Generation stream failed mid-response (non-streaming path only;
    /// streaming surfaces the partial answer with a truncation notice instead)
    #[error("Generation interrupted after {received_chars} chars: {reason}")]
    GenerationInterrupted {
        received_chars: usize,
        reason: String,
    },
}

/// Which external round-trip failed during retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    Embed,
    Search,
}

impl std::fmt::Display for RetrievalStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalStage::Embed => write!(f, "embed"),
            RetrievalStage::Search => write!(f, "search"),
        }
    }
}

impl QueryError {
    /// Get error code for logging and metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            QueryError::Configuration(_) => "CONFIGURATION",
            QueryError::RetrievalUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
            QueryError::GenerationUnavailable(_) => "GENERATION_UNAVAILABLE",
            QueryError::GenerationInterrupted { .. } => "GENERATION_INTERRUPTED",
        }
    }

    /// Check if the caller may retry the whole query
    ///
    /// Transient backend failures have already been retried once inside the
    /// owning component; anything still surfaced here is retryable only at
    /// the caller's discretion, and mid-stream interruptions never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::RetrievalUnavailable { .. } | QueryError::GenerationUnavailable(_)
        )
    }
}

/// Errors from a single gateway round-trip (embedding, index, or generation)
///
/// These stay internal to the components that own the calls; after the
/// retry-once policy they are mapped into [`QueryError`].
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request exceeded its deadline
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport-level failure (connection refused, TLS, DNS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend answered 2xx but the payload did not parse or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Stream ended without a completion signal
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout { .. } | GatewayError::Transport(_) => true,
            // 5xx is transient from the caller's perspective, 4xx is not
            GatewayError::Status { status, .. } => *status >= 500,
            GatewayError::InvalidResponse(_) | GatewayError::StreamInterrupted(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured deadline on the error
            GatewayError::Timeout { timeout_ms: 0 }
        } else if let Some(status) = err.status() {
            GatewayError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}
