//! Property-based tests for line claims
//!
//! Tests invariants:
//! - Accepted claims are pairwise disjoint and kept sorted
//! - A rejected claim overlaps something already held
//! - Tables detected on one page never share a line

use std::ops::Range;

use proptest::prelude::*;

use crate::ingestion::tables::{LineClaims, TableDetector};

fn range() -> impl Strategy<Value = Range<usize>> {
    (0usize..200, 0usize..20).prop_map(|(start, len)| start..start + len)
}

fn table_line() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "1: Gold",
        "2-3: Silver",
        "4: Copper",
        "5-6: Nothing",
        "11: Ambush",
        "Sword 10gc",
        "Helm 8gc +1 save",
        "Equipment",
        "Name  M  WS  BS  S  T  W  I  A  Ld",
        "Hero  4  3  3  3  3  1  3  1  7",
        "Item\tUse",
        "Rope\tClimb",
        "COMBAT SKILLS",
        "Warriors may charge once per turn.",
        "",
    ])
    .prop_map(str::to_string)
}

proptest! {
    #[test]
    fn accepted_claims_never_overlap(ranges in prop::collection::vec(range(), 0..40)) {
        let mut claims = LineClaims::new();
        for r in ranges {
            let overlapped = claims.conflict(&r).is_some();
            match claims.claim(r.clone()) {
                Ok(()) => prop_assert!(!overlapped && !r.is_empty()),
                Err(_) => prop_assert!(overlapped || r.is_empty()),
            }
        }

        let held = claims.ranges();
        for pair in held.windows(2) {
            prop_assert!(pair[0].end <= pair[1].start, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn detected_tables_never_share_lines(lines in prop::collection::vec(table_line(), 0..80)) {
        let text = lines.join("\n");
        let tables = TableDetector::new().detect_page(1, &text);

        for (i, a) in tables.iter().enumerate() {
            prop_assert!(!a.line_range.is_empty());
            for b in &tables[i + 1..] {
                let disjoint = a.line_range.end <= b.line_range.start || b.line_range.end <= a.line_range.start;
                prop_assert!(disjoint, "{:?} overlaps {:?}", a.line_range, b.line_range);
            }
        }
    }
}
