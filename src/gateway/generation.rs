// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Generation gateway
//!
//! Invokes the text-generation backend in whole-response or streaming mode.
//! A stream is a lazy, finite, non-restartable sequence of text fragments
//! with an explicit completion signal; cancellation is dropping the receiver.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::GatewayError;

/// Fragments as they arrive from the backend
///
/// An `Err` item means the stream died mid-response; the channel closing
/// after an `Ok` run is the completion signal.
pub type FragmentStream = ReceiverStream<Result<String, GatewayError>>;

/// A single generation call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub stream: bool,
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Generate the whole answer in one round-trip
    async fn generate(&self, request: GenerationRequest) -> Result<String, GatewayError>;

    /// Generate a streaming answer
    ///
    /// Returns once the backend has accepted the request; failures before the
    /// first fragment surface here, failures after surface on the stream.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, GatewayError>;
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
}

#[derive(Deserialize)]
struct StreamEvent {
    text: String,
}

/// HTTP generation backend speaking server-sent events in streaming mode
///
/// Stream wire format: `data: {"text": "..."}` lines, terminated by
/// `data: [DONE]`.
pub struct HttpGenerationGateway {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl HttpGenerationGateway {
    pub fn new(config: GenerationConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn send(&self, request: &GenerationRequest) -> Result<reqwest::Response, GatewayError> {
        let mut req = self.client.post(&self.config.api_url).json(request);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
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
        Ok(response)
    }
}

#[async_trait]
impl GenerationGateway for HttpGenerationGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GatewayError> {
        let response = self.send(&request).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        debug!(
            model = %request.model,
            chars = parsed.text.len(),
            "Generation complete"
        );
        Ok(parsed.text)
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, GatewayError> {
        let response = self.send(&request).await?;
        let (tx, rx) = mpsc::channel::<Result<String, GatewayError>>(32);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            let mut completed = false;

            'outer: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Generation stream transport error: {}", e);
                        let _ = tx.send(Err(GatewayError::from(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events are newline-delimited `data:` lines
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        completed = true;
                        break 'outer;
                    }
                    match serde_json::from_str::<StreamEvent>(payload) {
                        Ok(event) => {
                            if tx.send(Ok(event.text)).await.is_err() {
                                // Receiver dropped: caller cancelled, stop
                                // pulling from the backend
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(GatewayError::InvalidResponse(e.to_string())))
                                .await;
                            return;
                        }
                    }
                }
            }

            if !completed {
                let _ = tx
                    .send(Err(GatewayError::StreamInterrupted(
                        "Stream ended without completion signal".to_string(),
                    )))
                    .await;
            }
            // Dropping tx closes the channel: the completion signal
        });

        Ok(ReceiverStream::new(rx))
    }
}
