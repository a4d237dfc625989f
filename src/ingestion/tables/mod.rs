//! Table Detection Module
//!
//! Walks the layout rendition of each page line by line and runs four
//! specialised detectors in priority order:
//!
//! 1. [`RollTableDetector`]: `1:`, `2-3:` and D66 roll tables
//! 2. [`StatsTableDetector`]: stat-line headers such as `M WS BS S T W I A Ld`
//! 3. [`EquipmentTableDetector`]: `Sword 10gc` price lists
//! 4. [`GenericTableDetector`]: tab or wide-space aligned columns
//!
//! The first detector that accepts a line claims the lines it consumed. Claims
//! live in a [`LineClaims`] created for one page pass and handed to every
//! detector call, so detection runs share no state and never overlap.

mod equipment;
mod generic;
mod roll;
mod stats;

pub use equipment::EquipmentTableDetector;
pub use generic::GenericTableDetector;
pub use roll::RollTableDetector;
pub use stats::StatsTableDetector;

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cleaner::{CleanPage, LinePosition};
use super::content::{TableContent, TableRecord};
use super::keywords::{domain_terms, significant_words};

/// Lines of preceding text kept as header context.
const HEADER_CONTEXT_LINES: usize = 3;

// ============================================================================
// Types
// ============================================================================

/// Which detector produced a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    RollTable,
    StatsTable,
    EquipmentTable,
    GenericTable,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RollTable => "roll_table",
            Self::StatsTable => "stats_table",
            Self::EquipmentTable => "equipment_table",
            Self::GenericTable => "generic_table",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roll_table" => Ok(Self::RollTable),
            "stats_table" => Ok(Self::StatsTable),
            "equipment_table" => Ok(Self::EquipmentTable),
            "generic_table" => Ok(Self::GenericTable),
            other => Err(format!("unknown table kind: {other}")),
        }
    }
}

/// How structurally certain a detection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown confidence tier: {other}")),
        }
    }
}

/// What a single detector reports for an accepted table.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Consumed lines, end exclusive
    pub range: Range<usize>,
    pub title_guess: Option<String>,
    pub content: TableContent,
    pub confidence: Confidence,
}

/// A fully described table found on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCandidate {
    pub kind: TableKind,
    pub page_number: u32,
    pub line_range: Range<usize>,
    pub title_guess: Option<String>,
    pub header_context: String,
    pub raw_text: String,
    pub content: TableContent,
    pub confidence: Confidence,
    pub keywords: BTreeSet<String>,
}

impl TableCandidate {
    pub fn records(&self) -> Vec<TableRecord> {
        self.content.records()
    }

    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.contains(keyword)
    }

    /// First consumed line.
    pub fn start(&self) -> LinePosition {
        LinePosition::new(self.page_number, self.line_range.start)
    }

    /// Whether the table consumed `pos`.
    pub fn covers(&self, pos: LinePosition) -> bool {
        pos.page == self.page_number && self.line_range.contains(&pos.line)
    }
}

// ============================================================================
// Line Claims
// ============================================================================

/// Raised when a claim would overlap an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line range {requested:?} overlaps claimed range {existing:?}")]
pub struct ClaimConflict {
    pub requested: Range<usize>,
    pub existing: Range<usize>,
}

/// Line ranges already consumed during one detection pass.
///
/// Ranges are kept sorted and disjoint.
#[derive(Debug, Clone, Default)]
pub struct LineClaims {
    ranges: Vec<Range<usize>>,
}

impl LineClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self, line: usize) -> bool {
        self.ranges.iter().any(|r| r.contains(&line))
    }

    /// First claimed range sharing a line with `range`.
    pub fn conflict(&self, range: &Range<usize>) -> Option<&Range<usize>> {
        self.ranges
            .iter()
            .find(|r| r.start < range.end && range.start < r.end)
    }

    /// Record `range` as consumed. Empty and overlapping ranges are refused.
    pub fn claim(&mut self, range: Range<usize>) -> Result<(), ClaimConflict> {
        if range.is_empty() {
            return Err(ClaimConflict {
                existing: range.clone(),
                requested: range,
            });
        }
        if let Some(existing) = self.conflict(&range) {
            return Err(ClaimConflict {
                requested: range,
                existing: existing.clone(),
            });
        }
        let at = self.ranges.partition_point(|r| r.start < range.start);
        self.ranges.insert(at, range);
        Ok(())
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }
}

// ============================================================================
// Detector Trait
// ============================================================================

/// A heuristic that recognises one table shape starting at a given line.
pub trait LineDetector: Send + Sync {
    fn kind(&self) -> TableKind;

    /// Try to read a table whose first consumed line is `start`.
    ///
    /// Implementations must not consume lines that `claims` already holds.
    fn detect(&self, lines: &[&str], start: usize, claims: &LineClaims) -> Option<Detection>;
}

// ============================================================================
// TableDetector (dispatcher)
// ============================================================================

/// Runs the detectors in priority order over page text.
pub struct TableDetector {
    detectors: Vec<Box<dyn LineDetector>>,
}

impl Default for TableDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TableDetector {
    /// Dispatcher with the four built-in detectors.
    pub fn new() -> Self {
        Self::with_detectors(vec![
            Box::new(RollTableDetector),
            Box::new(StatsTableDetector),
            Box::new(EquipmentTableDetector),
            Box::new(GenericTableDetector),
        ])
    }

    pub fn with_detectors(detectors: Vec<Box<dyn LineDetector>>) -> Self {
        Self { detectors }
    }

    /// Detect tables on every page, in page order.
    pub fn detect_pages(&self, pages: &[CleanPage]) -> Vec<TableCandidate> {
        pages
            .iter()
            .flat_map(|page| self.detect_page(page.number, &page.layout))
            .collect()
    }

    /// Detect tables in one page of text.
    pub fn detect_page(&self, page_number: u32, text: &str) -> Vec<TableCandidate> {
        let lines: Vec<&str> = text.lines().collect();
        let mut claims = LineClaims::new();
        let mut candidates = Vec::new();

        let mut i = 0;
        while i < lines.len() {
            if claims.is_claimed(i) || lines[i].trim().is_empty() {
                i += 1;
                continue;
            }

            let hit = self
                .detectors
                .iter()
                .find_map(|d| d.detect(&lines, i, &claims).map(|det| (d.kind(), det)));

            match hit {
                Some((kind, detection)) => {
                    if let Err(conflict) = claims.claim(detection.range.clone()) {
                        tracing::debug!(page = page_number, %conflict, "Discarding overlapping table");
                        i += 1;
                        continue;
                    }
                    i = detection.range.end.max(i + 1);
                    candidates.push(build_candidate(kind, page_number, &lines, detection));
                }
                None => i += 1,
            }
        }

        candidates
    }
}

fn build_candidate(
    kind: TableKind,
    page_number: u32,
    lines: &[&str],
    detection: Detection,
) -> TableCandidate {
    let Detection {
        range,
        title_guess,
        content,
        confidence,
    } = detection;

    let raw_text = lines[range.clone()]
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    let header_context = header_context(lines, range.start);
    let keywords = table_keywords(kind, title_guess.as_deref(), &raw_text);

    TableCandidate {
        kind,
        page_number,
        line_range: range,
        title_guess,
        header_context,
        raw_text,
        content,
        confidence,
        keywords,
    }
}

/// Up to [`HEADER_CONTEXT_LINES`] non-blank lines preceding `start`, in order.
fn header_context(lines: &[&str], start: usize) -> String {
    let mut context: Vec<&str> = lines[..start]
        .iter()
        .rev()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .take(HEADER_CONTEXT_LINES)
        .collect();
    context.reverse();
    context.join("\n")
}

/// Type tag, title words and domain terms found in the title or raw span.
pub fn table_keywords(kind: TableKind, title: Option<&str>, raw_text: &str) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();
    keywords.insert(kind.as_str().to_string());
    if let Some(title) = title {
        keywords.extend(significant_words(title));
    }
    keywords.extend(domain_terms(&format!("{} {}", title.unwrap_or(""), raw_text)));
    keywords
}

// ============================================================================
// Shared Detector Helpers
// ============================================================================

/// Search up to `lookback` lines above `start` for the nearest non-blank line
/// accepted by `accept`. Blank lines are skipped but count toward the window.
pub(crate) fn find_title<F>(lines: &[&str], start: usize, lookback: usize, accept: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    lines[start.saturating_sub(lookback)..start]
        .iter()
        .rev()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .find(|l| accept(l))
        .map(str::to_string)
}

/// Short line that does not open with a digit.
pub(crate) fn is_plain_title(line: &str) -> bool {
    let len = line.chars().count();
    len > 0
        && len < 60
        && line.chars().any(char::is_alphabetic)
        && !line.starts_with(|c: char| c.is_ascii_digit())
}

// ============================================================================
// Tests
// ============================================================================
