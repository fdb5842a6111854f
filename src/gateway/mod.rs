// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! External capability gateways
//!
//! The engine consumes three opaque services: text embedding, vector search,
//! and text generation. Each is a trait so the pipeline can be exercised
//! against mocks, with HTTP implementations for production backends and an
//! in-memory index for tests and small corpora.

pub mod embedding;
pub mod generation;
pub mod index;

pub use embedding::{EmbeddingGateway, HttpEmbeddingGateway};
pub use generation::{
    FragmentStream, GenerationGateway, GenerationRequest, HttpGenerationGateway,
};
pub use index::{InMemoryVectorIndex, IndexFilter, IndexHit, VectorIndex};
