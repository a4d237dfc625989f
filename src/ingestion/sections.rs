//! Section Detection Module
//!
//! Finds heading-like lines in cleaned page text and turns them into a
//! hierarchy of titled regions with page spans.
//!
//! Three independent heading patterns are recognised, none authoritative:
//!
//! - **All caps**: a 4-59 character line equal to its upper-cased form
//! - **Numbered**: `1 Title`, `2.3 Title`, `4.1.2 Title`
//! - **Title shape**: a short line, a blank line, then a line of 50+ characters
//!
//! Numbered roll rows such as `11 Dead` look like numbered headings. Callers
//! that have already found tables pass their lines to
//! [`SectionDetector::build_sections_excluding`] so those rows stay body text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::cleaner::{CleanPage, LinePosition};
use super::keywords::extract_keywords;

static NUMBERED_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?:\.(\d{1,2}))?(?:\.(\d{1,2}))?\.?\s+(\p{Lu}[^:]*)$").unwrap()
});

const MIN_HEADING_LEN: usize = 4;
const MAX_HEADING_LEN: usize = 59;
const MIN_BODY_LINE_LEN: usize = 50;
const SECTION_KEYWORD_LIMIT: usize = 12;

// ============================================================================
// Types
// ============================================================================

/// Which pattern produced a heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadingKind {
    AllCaps,
    Numbered { depth: usize },
    TitleShape,
}

impl HeadingKind {
    /// Nesting level used to build section paths (1 is outermost).
    pub fn level(self) -> usize {
        match self {
            Self::AllCaps => 1,
            Self::Numbered { depth } => depth,
            Self::TitleShape => 2,
        }
    }
}

/// A heading line found in a block of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingCandidate {
    pub title: String,
    /// Index of the heading line within the scanned text
    pub line_index: usize,
    pub kind: HeadingKind,
}

/// A titled region of the source spanning one or more pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSection {
    pub title: String,
    /// Titles of enclosing sections, outermost first
    pub path: Vec<String>,
    pub level: usize,
    pub page_start: u32,
    /// Line of the heading within `page_start`
    pub line_start: usize,
    pub page_end: u32,
    pub body: Option<String>,
    pub keywords: BTreeSet<String>,
}

impl DetectedSection {
    /// Breadcrumb including this section's own title.
    pub fn full_path(&self) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(self.title.clone());
        path
    }

    /// Where the heading sits.
    pub fn start(&self) -> LinePosition {
        LinePosition::new(self.page_start, self.line_start)
    }
}

// ============================================================================
// SectionDetector
// ============================================================================

/// Detects headings and assembles sections.
#[derive(Debug, Clone)]
pub struct SectionDetector {
    body_max_chars: usize,
}

impl Default for SectionDetector {
    fn default() -> Self {
        Self::new(4000)
    }
}

impl SectionDetector {
    pub fn new(body_max_chars: usize) -> Self {
        Self { body_max_chars }
    }

    /// Scan text line by line for heading candidates.
    pub fn detect_headings(&self, text: &str) -> Vec<HeadingCandidate> {
        let lines: Vec<&str> = text.lines().collect();
        lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| {
                heading_kind(&lines, i).map(|kind| HeadingCandidate {
                    title: line.trim().to_string(),
                    line_index: i,
                    kind,
                })
            })
            .collect()
    }

    /// Build the section hierarchy for a whole source.
    ///
    /// A section runs from its heading to the line before the next heading,
    /// possibly across pages. Text before the first heading belongs to no section.
    pub fn build_sections(&self, pages: &[CleanPage]) -> Vec<DetectedSection> {
        self.build_sections_excluding(pages, |_| false)
    }

    /// Build sections, ignoring heading matches on lines where `excluded`
    /// holds. Excluded lines still count as body text.
    pub fn build_sections_excluding<F>(&self, pages: &[CleanPage], excluded: F) -> Vec<DetectedSection>
    where
        F: Fn(LinePosition) -> bool,
    {
        let mut sections: Vec<DetectedSection> = Vec::new();
        let mut bodies: Vec<String> = Vec::new();
        let mut stack: Vec<(usize, String)> = Vec::new();

        for page in pages {
            let headings: Vec<HeadingCandidate> = self
                .detect_headings(&page.text)
                .into_iter()
                .filter(|h| !excluded(LinePosition::new(page.number, h.line_index)))
                .collect();
            let mut next_heading = headings.iter().peekable();

            for (i, line) in page.text.lines().enumerate() {
                if let Some(heading) = next_heading.next_if(|h| h.line_index == i) {
                    let level = heading.kind.level();
                    while stack.last().is_some_and(|(l, _)| *l >= level) {
                        stack.pop();
                    }
                    let path = stack.iter().map(|(_, t)| t.clone()).collect();
                    stack.push((level, heading.title.clone()));

                    sections.push(DetectedSection {
                        title: heading.title.clone(),
                        path,
                        level,
                        page_start: page.number,
                        line_start: i,
                        page_end: page.number,
                        body: None,
                        keywords: BTreeSet::new(),
                    });
                    bodies.push(String::new());
                    continue;
                }

                let (Some(section), Some(body)) = (sections.last_mut(), bodies.last_mut()) else {
                    continue;
                };
                if line.trim().is_empty() {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    continue;
                }
                section.page_end = page.number;
                if body.chars().count() < self.body_max_chars {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(line);
                }
            }
        }

        for (section, body) in sections.iter_mut().zip(bodies) {
            let body = truncate_chars(body.trim(), self.body_max_chars);
            section.keywords =
                extract_keywords(&format!("{}\n{}", section.title, body), SECTION_KEYWORD_LIMIT);
            section.body = (!body.is_empty()).then_some(body);
        }

        sections
    }
}

/// Decide whether line `i` is a heading, and by which pattern.
fn heading_kind(lines: &[&str], i: usize) -> Option<HeadingKind> {
    let line = lines.get(i)?.trim();
    if let Some(depth) = numbered_depth(line) {
        return Some(HeadingKind::Numbered { depth });
    }
    if is_all_caps_heading(line) {
        return Some(HeadingKind::AllCaps);
    }
    if is_title_shape(lines, i) {
        return Some(HeadingKind::TitleShape);
    }
    None
}

fn heading_length_ok(line: &str) -> bool {
    let len = line.chars().count();
    (MIN_HEADING_LEN..=MAX_HEADING_LEN).contains(&len)
}

/// A line equal to its own upper-cased form that contains at least one letter.
pub fn is_all_caps_heading(line: &str) -> bool {
    heading_length_ok(line)
        && line.chars().any(char::is_alphabetic)
        && line == line.to_uppercase()
}

/// Depth of a `N[.N[.N]] Title` heading, if the line is one.
pub fn numbered_depth(line: &str) -> Option<usize> {
    if line.chars().count() > MAX_HEADING_LEN + 8 || line.ends_with('.') || line.ends_with(',') {
        return None;
    }
    let caps = NUMBERED_HEADING_RE.captures(line)?;
    let depth = 1 + usize::from(caps.get(2).is_some()) + usize::from(caps.get(3).is_some());
    Some(depth)
}

/// Short line, blank line, then a long body line.
fn is_title_shape(lines: &[&str], i: usize) -> bool {
    let line = lines[i].trim();
    if !heading_length_ok(line)
        || line.ends_with('.')
        || line.ends_with(',')
        || !line.chars().any(char::is_alphabetic)
    {
        return false;
    }
    let blank_follows = lines.get(i + 1).is_some_and(|l| l.trim().is_empty());
    let body_follows = lines
        .get(i + 2)
        .is_some_and(|l| l.trim().chars().count() >= MIN_BODY_LINE_LEN);
    blank_follows && body_follows
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
