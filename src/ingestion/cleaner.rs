//! Text Cleaning Module
//!
//! Normalizes raw extracted rulebook text before any structure is inferred:
//!
//! - Line ending normalization and control character stripping
//! - Standalone page number and copyright line removal
//! - Horizontal whitespace collapsing (prose rendition only)
//! - Blank line run collapsing
//! - Repeated running header/footer removal across pages
//!
//! Each page is produced in two renditions. The prose rendition is what gets
//! stored and chunked; the layout rendition keeps column gaps so the table
//! detectors can still see them.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::CleanerConfig;

// ============================================================================
// Regex Patterns (compiled once)
// ============================================================================

static PAGE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:page\s+)?\d{1,4}(?:\s+of\s+\d{1,4})?$|^[-–—]\s*\d{1,4}\s*[-–—]$").unwrap()
});

static COPYRIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)©|\(c\)\s*\d{4}|\bcopyright\b|all rights reserved").unwrap()
});

static HORIZONTAL_WS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").unwrap());

/// Form feed separates pages in a single extracted blob.
const PAGE_BREAK: char = '\u{000C}';

// ============================================================================
// Types
// ============================================================================

/// One cleaned page in both renditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanPage {
    /// 1-based page number
    pub number: u32,
    /// Prose rendition: whitespace collapsed, stored as the page text
    pub text: String,
    /// Layout rendition: column gaps preserved, read by table detection
    pub layout: String,
}

impl CleanPage {
    /// Character count of the prose rendition.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A line of cleaned text, ordered by page and then line.
///
/// Both renditions of a page keep the same lines, so a position found in the
/// layout rendition points at the same line of the prose rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinePosition {
    pub page: u32,
    /// 0-based line index within the page
    pub line: usize,
}

impl LinePosition {
    pub fn new(page: u32, line: usize) -> Self {
        Self { page, line }
    }
}

/// Outcome of cleaning a whole source.
#[derive(Debug, Clone, Default)]
pub struct CleanedDocument {
    pub pages: Vec<CleanPage>,
    /// Distinct repeated header/footer lines that were stripped
    pub repeated_lines: Vec<String>,
    /// Total line occurrences removed as headers/footers
    pub lines_removed: usize,
}

impl CleanedDocument {
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(CleanPage::is_blank)
    }
}

// ============================================================================
// TextCleaner
// ============================================================================

/// Normalizes extracted text and strips running headers/footers.
#[derive(Debug, Clone, Default)]
pub struct TextCleaner {
    config: CleanerConfig,
}

impl TextCleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    /// Clean a single blob into the prose rendition.
    pub fn clean_text(&self, raw: &str) -> String {
        clean_lines(raw, false)
    }

    /// Clean a single blob into the layout rendition.
    pub fn clean_layout(&self, raw: &str) -> String {
        clean_lines(raw, true)
    }

    /// Clean every page of a source and strip repeated headers/footers.
    pub fn clean_pages(&self, raw_pages: &[String]) -> CleanedDocument {
        let mut pages: Vec<CleanPage> = raw_pages
            .iter()
            .enumerate()
            .map(|(i, raw)| CleanPage {
                number: i as u32 + 1,
                text: self.clean_text(raw),
                layout: self.clean_layout(raw),
            })
            .collect();

        let prose: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        let repeated = self.detect_repeated_lines(&prose);

        let mut lines_removed = 0;
        if !repeated.is_empty() {
            for page in &mut pages {
                let (text, removed) = remove_lines(&page.text, &repeated);
                let (layout, _) = remove_lines(&page.layout, &repeated);
                page.text = text;
                page.layout = layout;
                lines_removed += removed;
            }
        }

        let mut repeated_lines: Vec<String> = repeated.into_iter().collect();
        repeated_lines.sort();

        CleanedDocument {
            pages,
            repeated_lines,
            lines_removed,
        }
    }

    /// Find normalized lines that repeat at the page edges across most pages.
    ///
    /// Looks at the first and last `edge_lines` non-blank lines of every page and
    /// counts each normalized line once per page. Returns nothing when there are
    /// fewer than `min_pages` pages.
    pub fn detect_repeated_lines(&self, pages: &[&str]) -> HashSet<String> {
        if pages.len() < self.config.min_pages {
            return HashSet::new();
        }

        let mut frequency: HashMap<String, usize> = HashMap::new();
        for page in pages {
            let lines: Vec<&str> = page.lines().filter(|l| !l.trim().is_empty()).collect();
            let head = lines.iter().take(self.config.edge_lines);
            let tail = lines
                .iter()
                .skip(lines.len().saturating_sub(self.config.edge_lines));

            let edge: HashSet<String> = head.chain(tail).map(|l| normalize_edge_line(l)).collect();
            for line in edge {
                *frequency.entry(line).or_insert(0) += 1;
            }
        }

        let threshold = self.config.repeat_ratio * pages.len() as f64;
        frequency
            .into_iter()
            .filter(|(line, count)| {
                *count as f64 >= threshold
                    && !line.is_empty()
                    && line.chars().count() < self.config.max_repeat_len
            })
            .map(|(line, _)| line)
            .collect()
    }
}

/// Split a single extracted blob into pages on form feeds.
pub fn split_pages(raw: &str) -> Vec<String> {
    if raw.contains(PAGE_BREAK) {
        raw.split(PAGE_BREAK).map(str::to_string).collect()
    } else {
        vec![raw.to_string()]
    }
}

// ============================================================================
// Line Helpers
// ============================================================================

fn clean_lines(raw: &str, preserve_columns: bool) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out: Vec<String> = Vec::new();
    let mut blank_run = 0;
    for line in normalized.lines() {
        let stripped: String = line
            .chars()
            .filter(|c| !is_stripped_char(*c))
            .collect();

        let line = if preserve_columns {
            stripped
                .chars()
                .map(|c| if c != '\t' && c.is_whitespace() { ' ' } else { c })
                .collect::<String>()
        } else {
            HORIZONTAL_WS_RE.replace_all(&stripped, " ").into_owned()
        };
        let line = line.trim();

        if is_page_number_line(line) || is_copyright_line(line) {
            continue;
        }

        if line.is_empty() {
            blank_run += 1;
            // 3+ blank lines collapse to a single one
            if blank_run >= 3 {
                if blank_run == 3 {
                    out.pop();
                }
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line.to_string());
    }

    while out.first().is_some_and(|l| l.is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }

    out.join("\n")
}

fn is_stripped_char(c: char) -> bool {
    // Tabs survive here; the whitespace pass decides what happens to them.
    c != '\t' && (c == '\u{FEFF}' || c.is_control())
}

/// Standalone page number lines: `12`, `Page 12`, `- 12 -`.
pub fn is_page_number_line(line: &str) -> bool {
    !line.is_empty() && PAGE_NUMBER_RE.is_match(line)
}

/// Copyright and rights-reserved notices.
pub fn is_copyright_line(line: &str) -> bool {
    !line.is_empty() && line.len() < 200 && COPYRIGHT_RE.is_match(line)
}

fn normalize_edge_line(line: &str) -> String {
    HORIZONTAL_WS_RE
        .replace_all(line.trim(), " ")
        .to_lowercase()
}

fn remove_lines(text: &str, repeated: &HashSet<String>) -> (String, usize) {
    let mut removed = 0;
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let hit = !line.trim().is_empty() && repeated.contains(&normalize_edge_line(line));
            if hit {
                removed += 1;
            }
            !hit
        })
        .collect();
    (kept.join("\n").trim_matches('\n').to_string(), removed)
}

// ============================================================================
// Tests
// ============================================================================
