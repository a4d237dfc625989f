//! Roll table detection: `1: Result`, `2-5: Result` and D66 `11 Result` rows.

use std::sync::LazyLock;

use regex::Regex;

use super::{find_title, is_plain_title, Confidence, Detection, LineClaims, LineDetector, TableKind};
use crate::ingestion::content::{RollRow, TableContent};

static ROLL_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<roll>\d{1,2}\s*[-–]\s*\d{1,2}|\d{1,3})\s*:\s*(?P<result>\S.*)$").unwrap()
});

static D66_ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<roll>[1-6][1-6])\s+(?P<result>\S.*)$").unwrap());

const TITLE_LOOKBACK: usize = 5;
const MIN_ROWS: usize = 3;
const MAX_MISSES: usize = 2;

/// Detects numbered roll tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollTableDetector;

impl LineDetector for RollTableDetector {
    fn kind(&self) -> TableKind {
        TableKind::RollTable
    }

    fn detect(&self, lines: &[&str], start: usize, claims: &LineClaims) -> Option<Detection> {
        parse_row(lines.get(start)?.trim())?;

        let mut rows: Vec<RollRow> = Vec::new();
        let mut last_row_line = None;
        let mut end = start;
        let mut misses = 0;

        for (i, raw) in lines.iter().enumerate().skip(start) {
            if claims.is_claimed(i) {
                break;
            }
            let line = raw.trim();

            if line.is_empty() {
                misses += 1;
                if misses >= MAX_MISSES {
                    break;
                }
                continue;
            }

            if let Some(row) = parse_row(line) {
                rows.push(row);
                last_row_line = Some(i);
                end = i + 1;
                misses = 0;
                continue;
            }

            let follows_row = last_row_line.is_some_and(|r| r + 1 == i);
            if follows_row && line.starts_with(char::is_lowercase) {
                if let Some(prev) = rows.last_mut() {
                    prev.result.push(' ');
                    prev.result.push_str(line);
                }
                last_row_line = Some(i);
                end = i + 1;
                continue;
            }

            if rows.len() > 2 {
                break;
            }
            misses += 1;
            if misses >= MAX_MISSES {
                break;
            }
        }

        if rows.len() < MIN_ROWS {
            return None;
        }

        let confidence = confidence(&rows);
        Some(Detection {
            range: start..end,
            title_guess: find_title(lines, start, TITLE_LOOKBACK, is_plain_title),
            content: TableContent::RollTable { rows },
            confidence,
        })
    }
}

fn parse_row(line: &str) -> Option<RollRow> {
    let caps = ROLL_ROW_RE.captures(line).or_else(|| D66_ROW_RE.captures(line))?;
    let roll: String = caps["roll"].split_whitespace().collect();
    Some(RollRow::new(roll, caps["result"].trim()))
}

/// High for a d6 spread, any range or any D66 code; medium otherwise.
fn confidence(rows: &[RollRow]) -> Confidence {
    if rows.len() == 6 || rows.iter().any(|r| r.is_range() || r.is_d66_code()) {
        Confidence::High
    } else {
        Confidence::Medium
    }
}
