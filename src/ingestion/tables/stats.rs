//! Stats table detection: profile lines headed by stat abbreviations.
//!
//! ```text
//! Name        M   WS  BS  S   T   W   I   A   Ld
//! Champion    4   4   3   3   3   1   4   1   8
//! ```

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{find_title, is_plain_title, Confidence, Detection, LineClaims, LineDetector, TableKind};
use crate::ingestion::content::TableContent;

/// Stat-line abbreviations recognised in header rows.
pub const STAT_ABBREVIATIONS: &[&str] = &[
    "M", "WS", "BS", "S", "T", "W", "I", "A", "Ld", "Sv", "Mv", "Rng", "Acc", "Str", "AP", "Dmg",
];

static COLUMN_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\t+|\s{2,}").unwrap());

static STAT_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^(?:[+-]?\d+(?:[+"']|/\d+)?|\d*d\d+(?:[+-]\d+)?|-|–|n/a)$"#).unwrap()
});

const MIN_HEADER_COLUMNS: usize = 3;
const MIN_DISTINCT_ABBREVIATIONS: usize = 3;
const MAX_HEADER_LEN: usize = 120;
const TITLE_LOOKBACK: usize = 3;

/// Detects stat-line tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsTableDetector;

impl LineDetector for StatsTableDetector {
    fn kind(&self) -> TableKind {
        TableKind::StatsTable
    }

    fn detect(&self, lines: &[&str], start: usize, claims: &LineClaims) -> Option<Detection> {
        let header_line = lines.get(start)?.trim();
        if !is_stat_header(header_line) {
            return None;
        }

        let (headers, columnar) = split_header(header_line);
        if headers.len() < MIN_HEADER_COLUMNS {
            return None;
        }

        let mut rows = Vec::new();
        let mut end = start + 1;
        for (i, raw) in lines.iter().enumerate().skip(start + 1) {
            if claims.is_claimed(i) {
                break;
            }
            let line = raw.trim();
            if line.is_empty() {
                break;
            }
            let Some(cells) = split_row(line, headers.len(), columnar) else {
                break;
            };
            rows.push(cells);
            end = i + 1;
        }

        if rows.is_empty() {
            return None;
        }

        Some(Detection {
            range: start..end,
            title_guess: find_title(lines, start, TITLE_LOOKBACK, is_plain_title),
            content: TableContent::StatsTable { headers, rows },
            confidence: Confidence::High,
        })
    }
}

/// At least three distinct abbreviations making up half the tokens of a short line.
pub fn is_stat_header(line: &str) -> bool {
    if line.is_empty() || line.len() >= MAX_HEADER_LEN {
        return false;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let abbreviations: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| STAT_ABBREVIATIONS.contains(t))
        .collect();
    let distinct: HashSet<&str> = abbreviations.iter().copied().collect();

    distinct.len() >= MIN_DISTINCT_ABBREVIATIONS && abbreviations.len() * 2 >= tokens.len()
}

/// Header cells and whether they came from wide-gap column splitting.
fn split_header(line: &str) -> (Vec<String>, bool) {
    let cells = split_columns(line);
    if cells.len() >= MIN_HEADER_COLUMNS {
        return (cells, true);
    }
    (line.split_whitespace().map(str::to_string).collect(), false)
}

fn split_columns(line: &str) -> Vec<String> {
    COLUMN_SPLIT_RE
        .split(line)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a data row to at most `width` cells, or `None` if it is not a stat row.
///
/// Surplus leading tokens belong to a multi-word name in the first column.
/// A row may carry one value fewer than there are headers.
fn split_row(line: &str, width: usize, columnar: bool) -> Option<Vec<String>> {
    let mut cells = if columnar {
        split_columns(line)
    } else {
        line.split_whitespace().map(str::to_string).collect()
    };

    if cells.len() > width {
        let surplus = cells.len() - width + 1;
        let name = cells.drain(..surplus).collect::<Vec<_>>().join(" ");
        cells.insert(0, name);
    }
    if cells.len() + 1 < width {
        return None;
    }

    let values = &cells[1..];
    let stat_like = values.iter().filter(|v| STAT_VALUE_RE.is_match(v)).count();
    (stat_like * 2 >= values.len()).then_some(cells)
}
