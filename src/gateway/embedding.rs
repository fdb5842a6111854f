// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Embedding gateway
//!
//! Maps text to a fixed-dimension vector. Deterministic for identical input
//! within a model version; consumed identically for documents (offline) and
//! queries (online).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::GatewayError;

#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;

    /// Dimension of the vectors this gateway produces
    fn dimension(&self) -> usize;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP embedding backend
pub struct HttpEmbeddingGateway {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingGateway {
    pub fn new(config: EmbeddingConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmbeddingGateway for HttpEmbeddingGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let mut request = self.client.post(&self.config.api_url).json(&EmbedRequest {
            model: &self.config.model,
            input: text,
        });
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                }
            } else {
                GatewayError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if parsed.embedding.len() != self.config.dimension {
            return Err(GatewayError::InvalidResponse(format!(
                "Expected {}-dimensional embedding, got {}",
                self.config.dimension,
                parsed.embedding.len()
            )));
        }
        if parsed.embedding.iter().any(|v| !v.is_finite()) {
            return Err(GatewayError::InvalidResponse(
                "Embedding contains NaN or Infinity".to_string(),
            ));
        }

        debug!(chars = text.len(), "Embedded query text");
        Ok(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
