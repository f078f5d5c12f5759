// ABOUTME: Immutable reference corpus shared read-only across turns
// ABOUTME: Selects a leading slice of the corpus by a clamped percentage
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use std::sync::Arc;

/// Normalize a requested corpus percentage
///
/// Values in `1..=100` pass through; anything else, including `0` and
/// negatives, becomes `100`.
#[must_use]
pub fn normalize_reference_percent(percent: i64) -> u32 {
    match u32::try_from(percent) {
        Ok(p @ 1..=100) => p,
        _ => 100,
    }
}

/// Reference text loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct ReferenceCorpus {
    text: Arc<str>,
    char_len: usize,
}

impl ReferenceCorpus {
    /// Wrap corpus text, counting its characters once
    #[must_use]
    pub fn new(text: Arc<str>) -> Self {
        let char_len = text.chars().count();
        Self { text, char_len }
    }

    /// Length in Unicode code points
    #[must_use]
    pub const fn char_len(&self) -> usize {
        self.char_len
    }

    /// Whether the corpus has no text
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    /// The first `floor(len * p / 100)` characters for a requested percentage
    #[must_use]
    pub fn slice(&self, percent: i64) -> &str {
        let percent = normalize_reference_percent(percent) as usize;
        let take = self.char_len.saturating_mul(percent) / 100;
        if take >= self.char_len {
            return &self.text;
        }
        let end = self
            .text
            .char_indices()
            .nth(take)
            .map_or(self.text.len(), |(idx, _)| idx);
        &self.text[..end]
    }
}
