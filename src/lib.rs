/// Rulebook Index - Rules Indexing Pipeline
///
/// Turns extracted tabletop wargame rulebook text into searchable pages,
/// sections, chunks, structured tables and aggregated datasets, stored per
/// source in SQLite.

pub mod config;
pub mod core;
pub mod database;
pub mod ingestion;


pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
