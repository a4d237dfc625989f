//! Database Migrations
//!
//! Handles schema creation and versioned migrations.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{info, warn};

/// Current database schema version
const SCHEMA_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version = get_current_version(pool).await?;

    info!(current_version, target_version = SCHEMA_VERSION, "Checking database migrations");

    if current_version < SCHEMA_VERSION {
        info!("Running database migrations from v{} to v{}", current_version, SCHEMA_VERSION);

        for version in (current_version + 1)..=SCHEMA_VERSION {
            run_migration(pool, version).await?;
        }

        info!("Database migrations completed successfully");
    }

    Ok(())
}

/// Get the current schema version
async fn get_current_version(pool: &SqlitePool) -> Result<i32, sqlx::Error> {
    let result = sqlx::query("SELECT MAX(version) as version FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(result
        .and_then(|row| row.try_get::<i32, _>("version").ok())
        .unwrap_or(0))
}

/// Run a specific migration version inside its own transaction
async fn run_migration(pool: &SqlitePool, version: i32) -> Result<(), sqlx::Error> {
    let (name, sql) = match version {
        1 => ("source_registry", MIGRATION_V1),
        2 => ("rules_index", MIGRATION_V2),
        3 => ("index_lease_token", MIGRATION_V3),
        _ => {
            warn!("Unknown migration version: {}", version);
            return Ok(());
        }
    };

    info!("Applying migration v{}: {}", version, name);

    let mut tx = pool.begin().await?;
    for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement.trim()).execute(&mut *tx).await?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(version)
        .bind(name)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Migration v1: source registry
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    campaign_id TEXT,
    source_type TEXT NOT NULL,
    title TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    index_status TEXT NOT NULL DEFAULT 'not_indexed',
    index_stats TEXT,
    last_error TEXT,
    index_generation INTEGER NOT NULL DEFAULT 0,
    indexing_started_at TEXT,
    last_indexed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sources_campaign ON sources(campaign_id);
CREATE INDEX IF NOT EXISTS idx_sources_status ON sources(index_status)
"#;

/// Migration v2: derived rules index
const MIGRATION_V2: &str = r#"
CREATE TABLE IF NOT EXISTS source_pages (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    page_number INTEGER NOT NULL,
    text TEXT NOT NULL,
    char_count INTEGER NOT NULL,
    UNIQUE (source_id, generation, page_number),
    FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS source_sections (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    section_index INTEGER NOT NULL,
    title TEXT NOT NULL,
    path TEXT NOT NULL DEFAULT '[]',
    level INTEGER NOT NULL,
    page_start INTEGER NOT NULL,
    page_end INTEGER NOT NULL,
    body TEXT,
    keywords TEXT NOT NULL DEFAULT '[]',
    FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_source_sections_source ON source_sections(source_id, generation, section_index);

CREATE TABLE IF NOT EXISTS source_chunks (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    section_id TEXT,
    order_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    page_start INTEGER NOT NULL,
    page_end INTEGER NOT NULL,
    section_path TEXT NOT NULL DEFAULT '[]',
    keywords TEXT NOT NULL DEFAULT '[]',
    has_roll_ranges INTEGER NOT NULL DEFAULT 0,
    has_table_pattern INTEGER NOT NULL DEFAULT 0,
    has_list_pattern INTEGER NOT NULL DEFAULT 0,
    has_dice_notation INTEGER NOT NULL DEFAULT 0,
    UNIQUE (source_id, generation, order_index),
    FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE,
    FOREIGN KEY (section_id) REFERENCES source_sections(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS rule_tables (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    section_id TEXT,
    table_kind TEXT NOT NULL,
    title_guess TEXT,
    header_context TEXT NOT NULL DEFAULT '',
    page_number INTEGER NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    raw_text TEXT NOT NULL,
    content TEXT,
    confidence TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE,
    FOREIGN KEY (section_id) REFERENCES source_sections(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_rule_tables_source ON rule_tables(source_id, generation, page_number);
CREATE INDEX IF NOT EXISTS idx_rule_tables_confidence ON rule_tables(confidence);

CREATE TABLE IF NOT EXISTS datasets (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    name TEXT NOT NULL,
    dataset_type TEXT NOT NULL,
    fields TEXT NOT NULL DEFAULT '[]',
    confidence TEXT NOT NULL,
    row_count INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS dataset_rows (
    id TEXT PRIMARY KEY,
    dataset_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    table_id TEXT,
    row_index INTEGER NOT NULL,
    page_number INTEGER,
    source_path TEXT,
    data TEXT NOT NULL,
    FOREIGN KEY (dataset_id) REFERENCES datasets(id) ON DELETE CASCADE,
    FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE,
    FOREIGN KEY (table_id) REFERENCES rule_tables(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_dataset_rows_dataset ON dataset_rows(dataset_id, row_index)
"#;

/// Migration v3: per-run lease token on sources
const MIGRATION_V3: &str = r#"
ALTER TABLE sources ADD COLUMN lease_id TEXT
"#;
