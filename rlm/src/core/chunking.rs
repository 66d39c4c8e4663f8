//! Byte-range chunking and case-folded match counting.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Chunk sizing recorded in the context index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_bytes: u64,
    pub overlap_bytes: u64,
    /// Always `"byte"`; retained so indexes written elsewhere stay readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ChunkStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Byte,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_bytes: 65_536,
            overlap_bytes: 4096,
            strategy: Some(ChunkStrategy::Byte),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_bytes == 0 {
            bail!("chunking.target_bytes must be > 0");
        }
        Ok(())
    }

    /// Overlap clamped into `[0, target_bytes - 1]`.
    pub fn effective_overlap(&self) -> u64 {
        clamp_overlap(self.target_bytes, self.overlap_bytes)
    }
}

pub fn clamp_overlap(target_bytes: u64, overlap_bytes: u64) -> u64 {
    if overlap_bytes >= target_bytes {
        target_bytes.saturating_sub(1)
    } else {
        overlap_bytes
    }
}

/// Compute chunk byte ranges covering `[0, length)`.
///
/// Each chunk spans at most `target_bytes`; consecutive chunks share
/// `overlap` bytes. Empty input produces no chunks.
pub fn plan_chunk_ranges(length: u64, config: &ChunkingConfig) -> Result<Vec<Range<u64>>> {
    config.validate()?;
    let overlap = config.effective_overlap();
    let mut ranges = Vec::new();
    let mut start = 0u64;
    while start < length {
        let end = start.saturating_add(config.target_bytes).min(length);
        ranges.push(start..end);
        if end >= length {
            break;
        }
        start = end.saturating_sub(overlap);
    }
    Ok(ranges)
}

/// Stable chunk identifier for a 1-based ordinal.
pub fn chunk_id(ordinal: usize) -> String {
    format!("c{ordinal:06}")
}

/// Fold ASCII `A-Z` to lowercase; other bytes pass through unchanged.
pub fn fold_ascii(bytes: &[u8]) -> Vec<u8> {
    bytes.to_ascii_lowercase()
}

/// Non-overlapping occurrences of `needle` inside `haystack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCount {
    pub count: u64,
    pub first_offset: usize,
}

/// Count non-overlapping matches, advancing by the needle length after each hit.
pub fn count_matches(haystack: &[u8], needle: &[u8]) -> Option<MatchCount> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let mut count = 0u64;
    let mut first_offset = None;
    let mut pos = 0usize;
    while pos + needle.len() <= haystack.len() {
        if &haystack[pos..pos + needle.len()] == needle {
            first_offset.get_or_insert(pos);
            count += 1;
            pos += needle.len();
        } else {
            pos += 1;
        }
    }
    first_offset.map(|first_offset| MatchCount {
        count,
        first_offset,
    })
}
