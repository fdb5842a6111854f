// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Static prompt text
//!
//! The instruction block directs the model to answer only from the provided
//! excerpts, attribute claims to the cited guest via the bracketed ordinals,
//! and state uncertainty plainly when the context is insufficient.

pub const INSTRUCTION_BLOCK: &str = "\
You are a helpful assistant answering questions about podcast episodes using \
the transcript excerpts provided below. Each excerpt is labeled with a \
bracketed number like [1].

Rules:
- Answer ONLY from the provided excerpts. Never invent information.
- Attribute claims to the guest who made them, citing the excerpt number, \
e.g. \"Kunal Shah argues [1] that...\".
- Read ALL excerpts before answering; when they disagree, present both sides.
- If the excerpts do not contain enough information to answer, say so \
explicitly instead of guessing.
- Keep answers concise: a few short paragraphs at most.";

/// Canned answer when no passage clears the relevance threshold
pub const INSUFFICIENT_CONTEXT_ANSWER: &str = "I don't have enough information in the \
podcast transcripts to answer that question. Try rephrasing, or ask about a \
topic the episodes actually cover.";

/// Appended to a streamed answer that was cut off mid-response
pub const TRUNCATION_NOTICE: &str = "\n\n[Answer truncated: the response stream was interrupted.]";
