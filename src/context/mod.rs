// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Context assembly
//!
//! Converts a diversity-ranked passage list into a budget-bounded context
//! block with ordinal citation anchors, plus the citation map the generation
//! coordinator needs to translate model-referenced ordinals back into real
//! source metadata. Pure, non-failing local computation.

use tracing::debug;

use crate::retriever::RetrievalResult;

/// Separator between rendered passages
const PASSAGE_DELIMITER: &str = "\n---\n";
/// Appended to a tail-truncated passage
const TRUNCATION_ELLIPSIS: &str = "...";

/// Ordinal -> passage id mapping for the passages present in the block
///
/// Never exposed to the generation model beyond the ordinal labels already
/// embedded in the block.
#[derive(Debug, Clone, Default)]
pub struct CitationMap {
    entries: Vec<(usize, String)>,
}

impl CitationMap {
    pub fn push(&mut self, ordinal: usize, passage_id: String) {
        self.entries.push((ordinal, passage_id));
    }

    pub fn passage_id(&self, ordinal: usize) -> Option<&str> {
        self.entries
            .iter()
            .find(|(o, _)| *o == ordinal)
            .map(|(_, id)| id.as_str())
    }

    /// (ordinal, passage_id) pairs in block order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries.iter().map(|(o, id)| (*o, id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Assembled context: citation-annotated text plus the ordinal mapping
#[derive(Debug, Clone, Default)]
pub struct ContextBlock {
    pub text: String,
    pub citations: CitationMap,
}

pub struct ContextAssembler {
    budget_chars: usize,
}

impl ContextAssembler {
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    /// Assemble the context block from ranked passages
    ///
    /// Passages are emitted in rank order with stable ordinals `[1]`, `[2]`,
    /// ... When the budget runs out, the first passage that does not fit is
    /// tail-truncated (text only, never its metadata header) and everything
    /// after it is dropped whole, so all higher-ranked passages stay intact
    /// byte for byte.
    pub fn assemble(&self, result: &RetrievalResult) -> ContextBlock {
        let mut block = ContextBlock::default();

        for (i, scored) in result.passages.iter().enumerate() {
            let ordinal = i + 1;
            let passage = &scored.passage;
            let header = format!(
                "[{}] {} - {} ({})\n",
                ordinal, passage.episode_title, passage.guest_name, passage.guest_expertise
            );
            let delimiter = if block.text.is_empty() {
                ""
            } else {
                PASSAGE_DELIMITER
            };

            let full_len = block.text.len() + delimiter.len() + header.len() + passage.text.len();
            if full_len <= self.budget_chars {
                block.text.push_str(delimiter);
                block.text.push_str(&header);
                block.text.push_str(&passage.text);
                block.citations.push(ordinal, passage.passage_id.clone());
                continue;
            }

            // Over budget: fit what we can of this passage's text, then stop.
            let fixed = block.text.len() + delimiter.len() + header.len() + TRUNCATION_ELLIPSIS.len();
            if fixed < self.budget_chars {
                let available = floor_char_boundary(&passage.text, self.budget_chars - fixed);
                if available > 0 {
                    block.text.push_str(delimiter);
                    block.text.push_str(&header);
                    block.text.push_str(&passage.text[..available]);
                    block.text.push_str(TRUNCATION_ELLIPSIS);
                    block.citations.push(ordinal, passage.passage_id.clone());
                    debug!(ordinal, kept = available, "Truncated lowest-ranked passage");
                }
            }
            break;
        }

        block
    }
}

/// Largest index <= `max` that lands on a char boundary of `s`
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
