//! Boundary-aware text chunking with overlap.
//!
//! Text is cut near a target size at the most natural boundary available
//! within a window around the target: paragraph break, then newline, then
//! sentence end, semicolon, comma and finally any whitespace. Consecutive
//! chunks overlap by up to `overlap_size` characters.
//!
//! All sizes and positions are counted in characters, never bytes.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Metadata;

pub const CHUNKING_METHOD: &str = "smart_boundary_detection";

/// Boundary patterns in order of preference.
static BOUNDARY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"\n\n+", r"\n", r"\. ", r"[.!?]\s+", r";\s+", r",\s+", r"\s+"]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("Invalid regex"))
        .collect()
});

/// Chunk sizing in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
    /// Texts at most this long, and trailing remainders within
    /// `chunk_size + min_chunk_size`, are never split.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    500
}

fn default_overlap_size() -> usize {
    50
}

fn default_min_chunk_size() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_size: default_overlap_size(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

/// One piece of chunked text and its positional metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct SmartChunker {
    config: ChunkingConfig,
}

impl SmartChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        let offsets = char_offsets(text);
        let len = offsets.len() - 1;
        let slice = |start: usize, end: usize| text[offsets[start]..offsets[end]].to_string();

        let mut spans = Vec::new();
        if len <= self.config.min_chunk_size {
            spans.push((0, len));
        } else {
            let mut start = 0;
            while start < len {
                let target_end = start + self.config.chunk_size;
                if len - start <= self.config.chunk_size + self.config.min_chunk_size {
                    spans.push((start, len));
                    break;
                }

                let end = self.find_best_boundary(text, &offsets, start, target_end);
                spans.push((start, end));

                let next_start = (start + 1).max(end.saturating_sub(self.config.overlap_size));
                start = next_start.min(end);
            }
        }

        let total = spans.len();
        spans
            .into_iter()
            .enumerate()
            .map(|(number, (start, end))| TextChunk {
                text: slice(start, end),
                metadata: self.chunk_metadata(start, end, number, total),
            })
            .collect()
    }

    fn find_best_boundary(&self, text: &str, offsets: &[usize], start: usize, target_end: usize) -> usize {
        let len = offsets.len() - 1;
        if target_end >= len {
            return len;
        }
        let max_end = (target_end + self.config.overlap_size).min(len);
        let min_end = (start + self.config.min_chunk_size)
            .max(target_end.saturating_sub(self.config.overlap_size));
        if min_end >= max_end {
            return target_end;
        }

        let window = &text[offsets[min_end]..offsets[max_end]];
        for pattern in BOUNDARY_PATTERNS.iter() {
            let best = pattern
                .find_iter(window)
                .map(|m| char_index(offsets, offsets[min_end] + m.end()))
                .min_by_key(|&end| end.abs_diff(target_end));
            if let Some(end) = best {
                return end;
            }
        }
        target_end
    }

    fn chunk_metadata(&self, start: usize, end: usize, number: usize, total: usize) -> Metadata {
        let overlapped = number > 0;
        let mut metadata = Metadata::new();
        metadata.insert("chunk_number".into(), Value::from(number));
        metadata.insert("total_chunks".into(), Value::from(total));
        metadata.insert("start_position".into(), Value::from(start));
        metadata.insert("end_position".into(), Value::from(end));
        metadata.insert("character_count".into(), Value::from(end - start));
        metadata.insert("has_overlap".into(), Value::from(overlapped));
        metadata.insert(
            "overlap_size".into(),
            Value::from(if overlapped { self.config.overlap_size } else { 0 }),
        );
        metadata.insert("chunking_method".into(), Value::from(CHUNKING_METHOD));
        metadata.insert("chunk_size_target".into(), Value::from(self.config.chunk_size));
        metadata.insert("is_first_chunk".into(), Value::from(number == 0));
        metadata.insert("is_last_chunk".into(), Value::from(number + 1 == total));
        metadata
    }
}

/// Byte offset of every char, plus the total length as a final entry.
fn char_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Char index of a byte offset that lies on a char boundary.
fn char_index(offsets: &[usize], byte_offset: usize) -> usize {
    offsets.partition_point(|&offset| offset < byte_offset)
}
