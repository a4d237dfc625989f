//! Generic table fallback: tab-separated or wide-space aligned columns.

use std::sync::LazyLock;

use regex::Regex;

use super::{find_title, is_plain_title, Confidence, Detection, LineClaims, LineDetector, TableKind};
use crate::ingestion::content::TableContent;

static CELL_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ ]*\t[\t ]*| {3,}").unwrap());

const MIN_COLUMNS: usize = 2;
const MIN_ROWS: usize = 2;
const TITLE_LOOKBACK: usize = 3;

/// Detects aligned columns with no stronger structural signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericTableDetector;

impl LineDetector for GenericTableDetector {
    fn kind(&self) -> TableKind {
        TableKind::GenericTable
    }

    fn detect(&self, lines: &[&str], start: usize, claims: &LineClaims) -> Option<Detection> {
        let headers = split_cells(lines.get(start)?)?;

        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut end = start + 1;
        let mut blank_run = 0;

        for (i, raw) in lines.iter().enumerate().skip(start + 1) {
            if claims.is_claimed(i) {
                break;
            }
            if raw.trim().is_empty() {
                blank_run += 1;
                if rows.len() >= MIN_ROWS || blank_run >= 2 {
                    break;
                }
                continue;
            }
            let Some(mut cells) = split_cells(raw) else {
                break;
            };
            if cells.len() > headers.len() {
                let overflow = cells.split_off(headers.len() - 1).join(" ");
                cells.push(overflow);
            }
            rows.push(cells);
            end = i + 1;
            blank_run = 0;
        }

        if rows.len() < MIN_ROWS {
            return None;
        }

        Some(Detection {
            range: start..end,
            title_guess: find_title(lines, start, TITLE_LOOKBACK, is_plain_title),
            content: TableContent::GenericTable { headers, rows },
            confidence: Confidence::Low,
        })
    }
}

/// Cells of a separator-bearing line, or `None` when it has fewer than two.
fn split_cells(line: &str) -> Option<Vec<String>> {
    let line = line.trim_matches(|c: char| c == ' ' || c == '\r');
    if !CELL_SEPARATOR_RE.is_match(line) {
        return None;
    }
    let cells: Vec<String> = CELL_SEPARATOR_RE
        .split(line)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    (cells.len() >= MIN_COLUMNS).then_some(cells)
}
