//! Table Dispatcher Cases
//!
//! One block of page text per case, run through the full detector priority
//! order.

use rstest::rstest;

use crate::config::IndexingConfig;
use crate::ingestion::tables::{Confidence, TableDetector, TableKind};
use crate::ingestion::{build_index, SourceInput};

const COMBAT_SKILLS: &str =
    "COMBAT SKILLS\n\n1: Weapon Master - +1 to hit\n2: Parry\n3: Riposte\n4: Counter\n5: Brutal\n6: Berserk";

const EQUIPMENT: &str = "Equipment\nSword 10gc\nShield 5gc\nHelm 8gc";

const WEATHER: &str = "Weather\tEffect\nRain\tSlippery\nFog\tHidden\nWind\tGusty";

const PROFILES: &str = "Champion profile\n\
Name  M  WS  BS  S  T  W  I  A  Ld\n\
Champion  4  4  3  3  3  1  4  1  8\n\
Youngblood  4  2  2  3  3  1  3  1  6";

const D66_ENCOUNTERS: &str = "Random Encounters\n11: Ambush\n12: Fog\n13: Rats";

#[rstest]
#[case::roll_table(COMBAT_SKILLS, TableKind::RollTable, 6, Confidence::High, Some("COMBAT SKILLS"))]
#[case::equipment(EQUIPMENT, TableKind::EquipmentTable, 3, Confidence::Medium, Some("Equipment"))]
#[case::generic(WEATHER, TableKind::GenericTable, 3, Confidence::Low, None)]
#[case::stats(PROFILES, TableKind::StatsTable, 2, Confidence::High, Some("Champion profile"))]
#[case::d66(D66_ENCOUNTERS, TableKind::RollTable, 3, Confidence::High, Some("Random Encounters"))]
fn test_single_table_detected(
    #[case] text: &str,
    #[case] kind: TableKind,
    #[case] rows: usize,
    #[case] confidence: Confidence,
    #[case] title: Option<&str>,
) {
    let tables = TableDetector::new().detect_page(1, text);
    assert_eq!(tables.len(), 1, "tables: {tables:#?}");

    let table = &tables[0];
    assert_eq!(table.kind, kind);
    assert_eq!(table.content.row_count(), rows);
    assert_eq!(table.confidence, confidence);
    assert_eq!(table.title_guess.as_deref(), title);
    assert!(table.keywords.contains(kind.as_str()));
}

#[rstest]
#[case::two_roll_rows("1: Only\n2: Two")]
#[case::two_priced_items("Equipment\nSword 10gc\nShield 5gc")]
#[case::prose("Warriors move 4 inches.\nThey may charge once per turn.")]
#[case::header_only("Name  M  WS  BS  S  T")]
fn test_near_misses_yield_nothing(#[case] text: &str) {
    assert!(TableDetector::new().detect_page(1, text).is_empty());
}

#[test]
fn test_tables_on_one_page_never_share_lines() {
    let text = [COMBAT_SKILLS, "", EQUIPMENT, "", WEATHER].join("\n");
    let tables = TableDetector::new().detect_page(7, &text);

    let kinds: Vec<TableKind> = tables.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![TableKind::RollTable, TableKind::EquipmentTable, TableKind::GenericTable]
    );
    for pair in tables.windows(2) {
        assert!(pair[0].line_range.end <= pair[1].line_range.start);
    }
    assert!(tables.iter().all(|t| t.page_number == 7));
}

#[rstest]
#[case::colonless_d66("SERIOUS INJURIES\n11 Dead\n12 Captured\n13 Robbed\n14 Leg wound", &["SERIOUS INJURIES"])]
#[case::d66_with_headed_rules(
    "1 Campaign Play\nAfter each battle roll below.\n\nOUT OF ACTION\n11 Dead\n12 Captured\n13 Robbed\n\n2 Experience",
    &["1 Campaign Play", "OUT OF ACTION", "2 Experience"]
)]
#[case::stat_header_line(
    "WARBAND ROSTER\nM  WS  BS  S  T  W  I  A  Ld\n4  4  3  3  3  1  4  1  8",
    &["WARBAND ROSTER"]
)]
fn test_table_lines_are_not_headings(#[case] text: &str, #[case] titles: &[&str]) {
    let index = build_index(SourceInput::Text(text.to_string()), &IndexingConfig::default()).unwrap();

    let found: Vec<&str> = index.sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(found, titles);
    assert_eq!(index.tables.len(), 1);
    assert!(index.tables[0].section.is_some());
}
