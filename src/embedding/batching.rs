//! Token-budget-aware request batching.
//!
//! Before issuing a provider request, chunks are greedily grouped into
//! contiguous sub-batches whose estimated token totals stay under the
//! provider's per-request ceiling. A single chunk that alone exceeds the
//! ceiling is still sent by itself; the provider may truncate it. Splitting
//! never reorders chunks, so concatenating sub-batch results reproduces the
//! original order exactly.

use std::ops::Range;

/// Estimates the token count of a text chunk.
///
/// Word-count heuristic: roughly 4 tokens per 3 words, rounded up, with a
/// floor of 1 so empty and whitespace-only chunks still cost one token.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words * 4).div_ceil(3).max(1)
}

/// Greedily splits `chunks` into contiguous sub-batches under `ceiling`
/// estimated tokens each.
///
/// Returned ranges index into `chunks`, cover it completely, and preserve
/// order. An oversize chunk gets a range of its own.
#[must_use]
pub fn split_by_token_budget(chunks: &[String], ceiling: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut budget_used = 0;

    for (i, chunk) in chunks.iter().enumerate() {
        let tokens = estimate_tokens(chunk);

        if i > start && budget_used + tokens > ceiling {
            batches.push(start..i);
            start = i;
            budget_used = 0;
        }
        budget_used += tokens;
    }

    if start < chunks.len() {
        batches.push(start..chunks.len());
    }

    batches
}
