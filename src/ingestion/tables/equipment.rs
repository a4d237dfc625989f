//! Equipment table detection: price lists such as `Sword 10gc` or `Helm - 8 gc +1 Sv`.

use std::sync::LazyLock;

use regex::Regex;

use super::{find_title, Confidence, Detection, LineClaims, LineDetector, TableKind};
use crate::ingestion::content::{EquipmentRow, TableContent};

static EQUIPMENT_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<name>[^\d:|]+?)\s*(?:[-–]\s*)?(?P<cost>\d+)\s*(?P<unit>gc|gold(?:\s+crowns)?|pts|points)\b\.?\s*(?P<effect>.*)$",
    )
    .unwrap()
});

const TITLE_WORDS: &[&str] = &["equipment", "weapon", "armour", "armor", "item", "gear"];
const TITLE_LOOKBACK: usize = 3;
const SCAN_WINDOW: usize = 30;
const MIN_ROWS: usize = 3;

/// Detects priced equipment lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct EquipmentTableDetector;

impl LineDetector for EquipmentTableDetector {
    fn kind(&self) -> TableKind {
        TableKind::EquipmentTable
    }

    fn detect(&self, lines: &[&str], start: usize, claims: &LineClaims) -> Option<Detection> {
        parse_row(lines.get(start)?.trim())?;

        let window_end = lines.len().min(start + 1 + SCAN_WINDOW);
        let mut rows = Vec::new();
        let mut end = start;
        let mut blank_run = 0;

        for i in start..window_end {
            if claims.is_claimed(i) {
                break;
            }
            let line = lines[i].trim();
            if line.is_empty() {
                blank_run += 1;
                if blank_run >= 2 {
                    break;
                }
                continue;
            }
            let Some(row) = parse_row(line) else {
                break;
            };
            rows.push(row);
            end = i + 1;
            blank_run = 0;
        }

        if rows.len() < MIN_ROWS {
            return None;
        }

        Some(Detection {
            range: start..end,
            title_guess: find_title(lines, start, TITLE_LOOKBACK, is_equipment_title),
            content: TableContent::EquipmentTable { rows },
            confidence: Confidence::Medium,
        })
    }
}

fn parse_row(line: &str) -> Option<EquipmentRow> {
    let caps = EQUIPMENT_ROW_RE.captures(line)?;
    let name = caps["name"].trim().trim_end_matches(['-', '–']).trim();
    if !name.chars().any(char::is_alphabetic) {
        return None;
    }
    let effect = caps["effect"].trim();
    Some(EquipmentRow {
        name: name.to_string(),
        cost: format!("{} {}", &caps["cost"], caps["unit"].to_lowercase()),
        effect: (!effect.is_empty()).then(|| effect.to_string()),
    })
}

fn is_equipment_title(line: &str) -> bool {
    let lower = line.to_lowercase();
    line.chars().count() < 80 && TITLE_WORDS.iter().any(|w| lower.contains(w))
}
