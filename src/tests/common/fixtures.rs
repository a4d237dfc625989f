//! Test Fixtures
//!
//! Temporary databases, registered sources and sample rulebook text.

use tempfile::TempDir;

use crate::config::IndexingConfig;
use crate::database::{Database, SourceOps, SourceRecord, SourceType};
use crate::ingestion::RulesIndexer;

// =============================================================================
// Database Fixtures
// =============================================================================

/// Create a test database in a temporary directory.
/// Returns both the database and the TempDir (which must be kept alive).
pub async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db = Database::new(temp_dir.path())
        .await
        .expect("Failed to create test database");
    (db, temp_dir)
}

/// Register a pasted-text source and return it.
pub async fn create_test_source(db: &Database, title: &str) -> SourceRecord {
    let source = SourceRecord::new(Some("camp-test".to_string()), SourceType::PastedText, title, &[]);
    db.create_source(&source)
        .await
        .expect("Failed to create source");
    source
}

/// Indexer over `db` with default tunables.
pub fn create_test_indexer(db: &Database) -> RulesIndexer {
    RulesIndexer::new(db.clone(), IndexingConfig::default())
}

// =============================================================================
// Sample Text
// =============================================================================

/// Three pages: an introduction, a skills roll table followed by an equipment
/// list, and a serious injuries table with roll ranges.
///
/// Detects three tables (two high, one medium) and three datasets
/// (Equipment 3 rows, Injuries 6 rows, Skills 6 rows).
pub fn sample_rulebook() -> String {
    [
        "INTRODUCTION\n\
         This book describes warbands fighting in the ruined city.\n\
         Each warband recruits heroes and henchmen before the first battle.",
        "COMBAT SKILLS\n\
         \n\
         1: Weapon Master - +1 to hit\n\
         2: Parry\n\
         3: Riposte\n\
         4: Counter\n\
         5: Brutal\n\
         6: Berserk\n\
         \n\
         Equipment\n\
         Sword 10gc\n\
         Shield 5gc\n\
         Helm 8gc",
        "SERIOUS INJURIES\n\
         \n\
         11-15: Dead\n\
         16-21: Multiple injuries\n\
         22-26: Leg wound\n\
         31-36: Arm wound\n\
         41-46: Madness\n\
         51-66: Full recovery",
    ]
    .join("\u{000C}")
}

const PAGE_NAMES: &[&str] = &["ALPHA", "BRAVO", "CHARLIE", "DELTA", "ECHO", "FOXTROT", "GOLF"];

/// `count` pages, each holding one six-row roll table with distinct text.
pub fn roll_table_pages(count: usize) -> String {
    PAGE_NAMES
        .iter()
        .take(count)
        .map(|name| {
            let rows: Vec<String> = (1..=6).map(|i| format!("{i}: {name} outcome {i}")).collect();
            format!("{name} RAIDS\n\n{}", rows.join("\n"))
        })
        .collect::<Vec<_>>()
        .join("\u{000C}")
}
