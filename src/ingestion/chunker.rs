//! Rules Text Chunker
//!
//! Splits cleaned page text into bounded, overlapping chunks at paragraph
//! boundaries and tags each chunk with score hints used to bias downstream
//! matching.
//!
//! Sizing contract (characters):
//! - no chunk exceeds `max_size`
//! - no chunk is shorter than `min_size` unless it is the final remainder
//! - the tail of chunk *k* (at most `overlap` characters) opens chunk *k+1*
//!
//! Paragraphs longer than [`ChunkConfig::max_unit_size`] are pre-split at
//! sentence ends, then whitespace, then character boundaries.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::cleaner::{CleanPage, LinePosition};
use super::keywords::extract_keywords;
use crate::config::ChunkConfig;

// ============================================================================
// Regex Patterns (compiled once)
// ============================================================================

static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[^\S\n]*\n").unwrap());

static ROLL_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\s*[-–]\s*\d+").unwrap());

static DICE_NOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d*d\d{1,3}\b").unwrap());

static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d{1,2}[.)])\s+\S").unwrap());

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const CHUNK_KEYWORD_LIMIT: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// Boolean pattern checks over a chunk's own text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreHints {
    pub has_roll_ranges: bool,
    pub has_table_pattern: bool,
    pub has_list_pattern: bool,
    pub has_dice_notation: bool,
}

impl ScoreHints {
    /// Probe `text` for roll ranges, table shapes, list markers and dice.
    pub fn detect(text: &str) -> Self {
        Self {
            has_roll_ranges: ROLL_RANGE_RE.is_match(text),
            has_table_pattern: has_table_shape(text),
            has_list_pattern: LIST_MARKER_RE.is_match(text),
            has_dice_notation: DICE_NOTATION_RE.is_match(text),
        }
    }
}

/// A bounded slice of cleaned text ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Position in emission order, contiguous from zero
    pub order_index: usize,
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    /// Start of the first paragraph this chunk adds after the overlap
    pub anchor: LinePosition,
    pub keywords: BTreeSet<String>,
    pub hints: ScoreHints,
}

impl TextChunk {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// A paragraph (or a piece of an oversized one) tagged with where it starts.
#[derive(Debug, Clone)]
struct Unit<'a> {
    text: &'a str,
    start: LinePosition,
}

// ============================================================================
// RulesChunker
// ============================================================================

/// Paragraph-aware chunker with overlap.
#[derive(Debug, Clone, Default)]
pub struct RulesChunker {
    config: ChunkConfig,
}

impl RulesChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Chunk a single block of text as page 1.
    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        let page = CleanPage {
            number: 1,
            text: text.to_string(),
            layout: text.to_string(),
        };
        self.chunk_pages(std::slice::from_ref(&page))
    }

    /// Chunk all pages of a source, in page order.
    pub fn chunk_pages(&self, pages: &[CleanPage]) -> Vec<TextChunk> {
        let max_unit = self.config.max_unit_size().max(1);
        let units: Vec<Unit<'_>> = pages
            .iter()
            .flat_map(|page| {
                paragraphs(&page.text)
                    .into_iter()
                    .flat_map(move |(offset, p)| {
                        split_oversized(p, max_unit)
                            .into_iter()
                            .map(move |(inner, text)| (offset + inner, text))
                    })
                    .map(move |(offset, text)| Unit {
                        text,
                        start: LinePosition::new(page.number, line_at(&page.text, offset)),
                    })
            })
            .collect();

        self.assemble(&units)
    }

    fn assemble(&self, units: &[Unit<'_>]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;
        let mut has_fresh_content = false;
        let mut page_start = 0;
        let mut page_end = 0;
        let mut anchor = None;

        for unit in units {
            let unit_len = unit.text.chars().count();
            let separator_len = if current.is_empty() { 0 } else { PARAGRAPH_SEPARATOR.len() };

            if has_fresh_content
                && current_len >= self.config.min_size
                && current_len + separator_len + unit_len > self.config.target_size
            {
                let tail = overlap_tail(&current, self.config.overlap).to_string();
                chunks.push(self.finish_chunk(chunks.len(), current, page_start, page_end, anchor.take()));

                current_len = tail.chars().count();
                current = tail;
                page_start = page_end;
                has_fresh_content = false;
            }

            if current.is_empty() {
                page_start = unit.start.page;
            } else {
                current.push_str(PARAGRAPH_SEPARATOR);
                current_len += PARAGRAPH_SEPARATOR.len();
            }
            current.push_str(unit.text);
            current_len += unit_len;
            page_end = unit.start.page;
            anchor.get_or_insert(unit.start);
            has_fresh_content = true;
        }

        if has_fresh_content {
            chunks.push(self.finish_chunk(chunks.len(), current, page_start, page_end, anchor));
        }
        chunks
    }

    fn finish_chunk(
        &self,
        order_index: usize,
        text: String,
        page_start: u32,
        page_end: u32,
        anchor: Option<LinePosition>,
    ) -> TextChunk {
        TextChunk {
            order_index,
            keywords: extract_keywords(&text, CHUNK_KEYWORD_LIMIT),
            hints: ScoreHints::detect(&text),
            text,
            page_start,
            page_end,
            anchor: anchor.unwrap_or(LinePosition::new(page_start, 0)),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Byte offset of the `n`th character, or the string length.
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

/// Trimmed, non-empty paragraphs of `text` with their byte offsets.
fn paragraphs(text: &str) -> Vec<(usize, &str)> {
    let breaks = PARAGRAPH_BREAK_RE
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .chain(std::iter::once((text.len(), text.len())));

    let mut out = Vec::new();
    let mut start = 0;
    for (end, next) in breaks {
        let raw = &text[start..end];
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            out.push((start + raw.len() - raw.trim_start().len(), trimmed));
        }
        start = next;
    }
    out
}

/// 0-based line holding byte `offset` of `text`.
fn line_at(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count()
}

/// Split a paragraph into pieces of at most `max_chars` characters, each with
/// its byte offset in `paragraph`.
fn split_oversized(paragraph: &str, max_chars: usize) -> Vec<(usize, &str)> {
    let mut pieces = Vec::new();
    let mut rest = paragraph;

    while rest.chars().count() > max_chars {
        let limit = byte_offset(rest, max_chars);
        let window = &rest[..limit];

        let cut = find_sentence_end(window)
            .or_else(|| window.rfind(char::is_whitespace).filter(|&i| i > 0))
            .unwrap_or(limit);

        let offset = paragraph.len() - rest.len();
        let (piece, remainder) = rest.split_at(cut);
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push((offset, piece));
        }
        rest = remainder.trim_start();
    }

    if !rest.trim().is_empty() {
        pieces.push((paragraph.len() - rest.len(), rest.trim()));
    }
    pieces
}

/// Byte offset just past the last sentence terminator in `window`.
fn find_sentence_end(window: &str) -> Option<usize> {
    window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&end| end < window.len() && window[end..].starts_with(char::is_whitespace))
        .last()
}

/// The last `overlap` characters of `text`, advanced to a word boundary.
fn overlap_tail(text: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    let total = text.chars().count();
    if total <= overlap {
        return text;
    }
    let start = byte_offset(text, total - overlap);
    let tail = &text[start..];

    match tail.find(char::is_whitespace) {
        Some(ws) => {
            let trimmed = tail[ws..].trim_start();
            if trimmed.is_empty() {
                tail
            } else {
                trimmed
            }
        }
        None => tail,
    }
}

/// Delimiter-heavy or column-aligned numeric lines.
///
/// True when at least three lines carry `|` or tab delimiters, or when three
/// consecutive lines each hold three or more tokens of which at least half are
/// numeric.
pub fn has_table_shape(text: &str) -> bool {
    let delimited = text
        .lines()
        .filter(|l| l.matches('|').count() >= 2 || l.contains('\t'))
        .count();
    if delimited >= 3 {
        return true;
    }

    let mut run = 0;
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let numeric = tokens
            .iter()
            .filter(|t| t.trim_end_matches(['+', '"', '\'']).parse::<f64>().is_ok())
            .count();
        if tokens.len() >= 3 && numeric * 2 >= tokens.len() {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

// ============================================================================
// Tests
// ============================================================================
