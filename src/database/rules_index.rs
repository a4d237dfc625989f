//! Derived rules index database operations
//!
//! An index run is committed as a generation swap inside one transaction:
//!
//! 1. bump `index_generation` on the source, guarded by the run's lease token
//! 2. bulk-insert every derived row under the new generation
//! 3. delete rows of every other generation for the source
//! 4. mark the source `indexed` with its stats
//!
//! Readers keep seeing the previous generation until the commit. Any error
//! rolls the whole swap back.

use serde::Serialize;
use sqlx::sqlite::{Sqlite, SqliteConnection};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, info};

use super::models::{
    ChunkRecord, DatasetRecord, DatasetRowRecord, IndexStatus, PageRecord, RuleTableRecord, SectionRecord,
};
use super::sources::{current_status, push_lease_guard, refused_transition, IndexLease, SourceError};
use super::Database;
use crate::config::MAX_INSERT_BATCH_SIZE;
use crate::ingestion::pipeline::{DerivedIndex, IndexStats};

/// Derived tables, children first so deletes never trip a foreign key.
const DERIVED_TABLES: &[&str] = &[
    "dataset_rows",
    "datasets",
    "rule_tables",
    "source_chunks",
    "source_sections",
    "source_pages",
];

/// Row counts for a source across every generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexCounts {
    pub pages: i64,
    pub sections: i64,
    pub chunks: i64,
    pub tables: i64,
    pub datasets: i64,
    pub dataset_rows: i64,
}

/// Extension trait for derived index operations
pub trait RulesIndexOps {
    fn commit_index(&self, lease: &IndexLease, index: &DerivedIndex, stats: &IndexStats, batch_size: usize) -> impl std::future::Future<Output = Result<i64, SourceError>> + Send;

    fn list_pages(&self, source_id: &str) -> impl std::future::Future<Output = Result<Vec<PageRecord>, sqlx::Error>> + Send;
    fn list_sections(&self, source_id: &str) -> impl std::future::Future<Output = Result<Vec<SectionRecord>, sqlx::Error>> + Send;
    fn list_chunks(&self, source_id: &str) -> impl std::future::Future<Output = Result<Vec<ChunkRecord>, sqlx::Error>> + Send;
    fn list_tables(&self, source_id: &str) -> impl std::future::Future<Output = Result<Vec<RuleTableRecord>, sqlx::Error>> + Send;
    fn list_datasets(&self, source_id: &str) -> impl std::future::Future<Output = Result<Vec<DatasetRecord>, sqlx::Error>> + Send;
    fn list_dataset_rows(&self, dataset_id: &str) -> impl std::future::Future<Output = Result<Vec<DatasetRowRecord>, sqlx::Error>> + Send;
    fn index_counts(&self, source_id: &str) -> impl std::future::Future<Output = Result<IndexCounts, sqlx::Error>> + Send;
}

impl RulesIndexOps for Database {
    // =========================================================================
    // Commit
    // =========================================================================

    /// Replace the source's derived index and mark it `indexed`.
    ///
    /// `lease` must still hold the source. Returns the new generation number.
    async fn commit_index(
        &self,
        lease: &IndexLease,
        index: &DerivedIndex,
        stats: &IndexStats,
        batch_size: usize,
    ) -> Result<i64, SourceError> {
        let source_id = lease.source_id.as_str();
        let batch_size = batch_size.clamp(1, MAX_INSERT_BATCH_SIZE);
        let mut tx = self.pool().begin().await?;

        // Write first so the transaction holds the write lock before reading
        let now = chrono::Utc::now().to_rfc3339();
        let mut bump = QueryBuilder::<Sqlite>::new(
            "UPDATE sources SET index_generation = index_generation + 1, updated_at = ",
        );
        bump.push_bind(now.as_str());
        push_lease_guard(&mut bump, lease, IndexStatus::Indexed);
        let bumped = bump.build().execute(&mut *tx).await?;

        if bumped.rows_affected() == 0 {
            let current = current_status(&mut *tx, source_id).await?;
            return Err(refused_transition(source_id, current, IndexStatus::Indexed));
        }
        let generation: i64 = sqlx::query_scalar("SELECT index_generation FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_one(&mut *tx)
            .await?;

        let rows = IndexRows::build(source_id, generation, index)?;
        insert_pages(&mut *tx, &rows.pages, batch_size).await?;
        insert_sections(&mut *tx, &rows.sections, batch_size).await?;
        insert_chunks(&mut *tx, &rows.chunks, batch_size).await?;
        insert_tables(&mut *tx, &rows.tables, batch_size).await?;
        insert_datasets(&mut *tx, &rows.datasets, batch_size).await?;
        insert_dataset_rows(&mut *tx, &rows.dataset_rows, batch_size).await?;

        for table in DERIVED_TABLES {
            let sql = format!("DELETE FROM {table} WHERE source_id = ? AND generation <> ?");
            let result = sqlx::query(&sql)
                .bind(source_id)
                .bind(generation)
                .execute(&mut *tx)
                .await?;
            debug!(table, removed = result.rows_affected(), "Dropped previous generation");
        }

        sqlx::query(
            r#"
            UPDATE sources
            SET index_status = 'indexed', index_stats = ?, last_error = NULL,
                indexing_started_at = NULL, lease_id = NULL, last_indexed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(stats)?)
        .bind(&now)
        .bind(&now)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(source_id, generation, "Committed rules index");
        Ok(generation)
    }

    // =========================================================================
    // Queries (current generation only)
    // =========================================================================

    async fn list_pages(&self, source_id: &str) -> Result<Vec<PageRecord>, sqlx::Error> {
        sqlx::query_as::<_, PageRecord>(
            "SELECT * FROM source_pages WHERE source_id = ? AND generation = (SELECT index_generation FROM sources WHERE id = ?) ORDER BY page_number",
        )
        .bind(source_id)
        .bind(source_id)
        .fetch_all(self.pool())
        .await
    }

    async fn list_sections(&self, source_id: &str) -> Result<Vec<SectionRecord>, sqlx::Error> {
        sqlx::query_as::<_, SectionRecord>(
            "SELECT * FROM source_sections WHERE source_id = ? AND generation = (SELECT index_generation FROM sources WHERE id = ?) ORDER BY section_index",
        )
        .bind(source_id)
        .bind(source_id)
        .fetch_all(self.pool())
        .await
    }

    async fn list_chunks(&self, source_id: &str) -> Result<Vec<ChunkRecord>, sqlx::Error> {
        sqlx::query_as::<_, ChunkRecord>(
            "SELECT * FROM source_chunks WHERE source_id = ? AND generation = (SELECT index_generation FROM sources WHERE id = ?) ORDER BY order_index",
        )
        .bind(source_id)
        .bind(source_id)
        .fetch_all(self.pool())
        .await
    }

    async fn list_tables(&self, source_id: &str) -> Result<Vec<RuleTableRecord>, sqlx::Error> {
        sqlx::query_as::<_, RuleTableRecord>(
            "SELECT * FROM rule_tables WHERE source_id = ? AND generation = (SELECT index_generation FROM sources WHERE id = ?) ORDER BY page_number, line_start",
        )
        .bind(source_id)
        .bind(source_id)
        .fetch_all(self.pool())
        .await
    }

    async fn list_datasets(&self, source_id: &str) -> Result<Vec<DatasetRecord>, sqlx::Error> {
        sqlx::query_as::<_, DatasetRecord>(
            "SELECT * FROM datasets WHERE source_id = ? AND generation = (SELECT index_generation FROM sources WHERE id = ?) ORDER BY name",
        )
        .bind(source_id)
        .bind(source_id)
        .fetch_all(self.pool())
        .await
    }

    async fn list_dataset_rows(&self, dataset_id: &str) -> Result<Vec<DatasetRowRecord>, sqlx::Error> {
        sqlx::query_as::<_, DatasetRowRecord>("SELECT * FROM dataset_rows WHERE dataset_id = ? ORDER BY row_index")
            .bind(dataset_id)
            .fetch_all(self.pool())
            .await
    }

    async fn index_counts(&self, source_id: &str) -> Result<IndexCounts, sqlx::Error> {
        let mut counts = IndexCounts::default();
        for table in DERIVED_TABLES {
            let sql = format!("SELECT COUNT(*) as count FROM {table} WHERE source_id = ?");
            let row = sqlx::query(&sql).bind(source_id).fetch_one(self.pool()).await?;
            let count: i64 = row.get("count");
            match *table {
                "source_pages" => counts.pages = count,
                "source_sections" => counts.sections = count,
                "source_chunks" => counts.chunks = count,
                "rule_tables" => counts.tables = count,
                "datasets" => counts.datasets = count,
                _ => counts.dataset_rows = count,
            }
        }
        Ok(counts)
    }
}

// ============================================================================
// Row Building
// ============================================================================

/// Every row of one generation, encoded and ready to insert.
struct IndexRows {
    pages: Vec<PageRecord>,
    sections: Vec<SectionRecord>,
    chunks: Vec<ChunkRecord>,
    tables: Vec<RuleTableRecord>,
    datasets: Vec<DatasetRecord>,
    dataset_rows: Vec<DatasetRowRecord>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl IndexRows {
    fn build(source_id: &str, generation: i64, index: &DerivedIndex) -> Result<Self, serde_json::Error> {
        let pages = index
            .pages
            .iter()
            .map(|page| PageRecord {
                id: new_id(),
                source_id: source_id.to_string(),
                generation,
                page_number: i64::from(page.number),
                text: page.text.clone(),
                char_count: page.char_count() as i64,
            })
            .collect();

        let sections = index
            .sections
            .iter()
            .enumerate()
            .map(|(i, section)| {
                Ok(SectionRecord {
                    id: new_id(),
                    source_id: source_id.to_string(),
                    generation,
                    section_index: i as i64,
                    title: section.title.clone(),
                    path: serde_json::to_string(&section.path)?,
                    level: section.level as i64,
                    page_start: i64::from(section.page_start),
                    page_end: i64::from(section.page_end),
                    body: section.body.clone(),
                    keywords: serde_json::to_string(&section.keywords)?,
                })
            })
            .collect::<Result<Vec<SectionRecord>, serde_json::Error>>()?;

        let section_id = |i: Option<usize>| i.and_then(|i| sections.get(i)).map(|s| s.id.clone());

        let chunks = index
            .chunks
            .iter()
            .map(|placed| {
                let chunk = &placed.chunk;
                Ok(ChunkRecord {
                    id: new_id(),
                    source_id: source_id.to_string(),
                    generation,
                    section_id: section_id(placed.section),
                    order_index: chunk.order_index as i64,
                    text: chunk.text.clone(),
                    page_start: i64::from(chunk.page_start),
                    page_end: i64::from(chunk.page_end),
                    section_path: serde_json::to_string(&placed.section_path)?,
                    keywords: serde_json::to_string(&chunk.keywords)?,
                    has_roll_ranges: chunk.hints.has_roll_ranges,
                    has_table_pattern: chunk.hints.has_table_pattern,
                    has_list_pattern: chunk.hints.has_list_pattern,
                    has_dice_notation: chunk.hints.has_dice_notation,
                })
            })
            .collect::<Result<Vec<ChunkRecord>, serde_json::Error>>()?;

        let tables = index
            .tables
            .iter()
            .map(|placed| {
                let table = &placed.table;
                Ok(RuleTableRecord {
                    id: new_id(),
                    source_id: source_id.to_string(),
                    generation,
                    section_id: section_id(placed.section),
                    table_kind: table.kind.as_str().to_string(),
                    title_guess: table.title_guess.clone(),
                    header_context: table.header_context.clone(),
                    page_number: i64::from(table.page_number),
                    line_start: table.line_range.start as i64,
                    line_end: table.line_range.end as i64,
                    raw_text: table.raw_text.clone(),
                    content: Some(serde_json::to_string(&table.content)?),
                    confidence: table.confidence.as_str().to_string(),
                    keywords: serde_json::to_string(&table.keywords)?,
                })
            })
            .collect::<Result<Vec<RuleTableRecord>, serde_json::Error>>()?;

        let mut datasets = Vec::with_capacity(index.datasets.len());
        let mut dataset_rows = Vec::new();
        for dataset in &index.datasets {
            let dataset_id = new_id();
            for (row_index, row) in dataset.rows.iter().enumerate() {
                dataset_rows.push(DatasetRowRecord {
                    id: new_id(),
                    dataset_id: dataset_id.clone(),
                    source_id: source_id.to_string(),
                    generation,
                    table_id: tables.get(row.table_index).map(|t| t.id.clone()),
                    row_index: row_index as i64,
                    page_number: row.page_number.map(i64::from),
                    source_path: row.source_path.clone(),
                    data: serde_json::to_string(&row.data)?,
                });
            }
            datasets.push(DatasetRecord {
                id: dataset_id,
                source_id: source_id.to_string(),
                generation,
                name: dataset.name.clone(),
                dataset_type: dataset.dataset_type.as_str().to_string(),
                fields: serde_json::to_string(&dataset.fields)?,
                confidence: dataset.confidence.as_str().to_string(),
                row_count: dataset.rows.len() as i64,
            });
        }

        Ok(Self {
            pages,
            sections,
            chunks,
            tables,
            datasets,
            dataset_rows,
        })
    }
}

// ============================================================================
// Batched Inserts
// ============================================================================

async fn insert_pages(conn: &mut SqliteConnection, rows: &[PageRecord], batch_size: usize) -> Result<(), sqlx::Error> {
    for batch in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO source_pages (id, source_id, generation, page_number, text, char_count) ");
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.source_id.as_str())
                .push_bind(r.generation)
                .push_bind(r.page_number)
                .push_bind(r.text.as_str())
                .push_bind(r.char_count);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_sections(conn: &mut SqliteConnection, rows: &[SectionRecord], batch_size: usize) -> Result<(), sqlx::Error> {
    for batch in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO source_sections (id, source_id, generation, section_index, title, path, level, page_start, page_end, body, keywords) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.source_id.as_str())
                .push_bind(r.generation)
                .push_bind(r.section_index)
                .push_bind(r.title.as_str())
                .push_bind(r.path.as_str())
                .push_bind(r.level)
                .push_bind(r.page_start)
                .push_bind(r.page_end)
                .push_bind(r.body.as_deref())
                .push_bind(r.keywords.as_str());
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_chunks(conn: &mut SqliteConnection, rows: &[ChunkRecord], batch_size: usize) -> Result<(), sqlx::Error> {
    for batch in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO source_chunks (id, source_id, generation, section_id, order_index, text, page_start, page_end, \
             section_path, keywords, has_roll_ranges, has_table_pattern, has_list_pattern, has_dice_notation) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.source_id.as_str())
                .push_bind(r.generation)
                .push_bind(r.section_id.as_deref())
                .push_bind(r.order_index)
                .push_bind(r.text.as_str())
                .push_bind(r.page_start)
                .push_bind(r.page_end)
                .push_bind(r.section_path.as_str())
                .push_bind(r.keywords.as_str())
                .push_bind(r.has_roll_ranges)
                .push_bind(r.has_table_pattern)
                .push_bind(r.has_list_pattern)
                .push_bind(r.has_dice_notation);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_tables(conn: &mut SqliteConnection, rows: &[RuleTableRecord], batch_size: usize) -> Result<(), sqlx::Error> {
    for batch in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO rule_tables (id, source_id, generation, section_id, table_kind, title_guess, header_context, \
             page_number, line_start, line_end, raw_text, content, confidence, keywords) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.source_id.as_str())
                .push_bind(r.generation)
                .push_bind(r.section_id.as_deref())
                .push_bind(r.table_kind.as_str())
                .push_bind(r.title_guess.as_deref())
                .push_bind(r.header_context.as_str())
                .push_bind(r.page_number)
                .push_bind(r.line_start)
                .push_bind(r.line_end)
                .push_bind(r.raw_text.as_str())
                .push_bind(r.content.as_deref())
                .push_bind(r.confidence.as_str())
                .push_bind(r.keywords.as_str());
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_datasets(conn: &mut SqliteConnection, rows: &[DatasetRecord], batch_size: usize) -> Result<(), sqlx::Error> {
    for batch in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO datasets (id, source_id, generation, name, dataset_type, fields, confidence, row_count) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.source_id.as_str())
                .push_bind(r.generation)
                .push_bind(r.name.as_str())
                .push_bind(r.dataset_type.as_str())
                .push_bind(r.fields.as_str())
                .push_bind(r.confidence.as_str())
                .push_bind(r.row_count);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_dataset_rows(conn: &mut SqliteConnection, rows: &[DatasetRowRecord], batch_size: usize) -> Result<(), sqlx::Error> {
    for batch in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO dataset_rows (id, dataset_id, source_id, generation, table_id, row_index, page_number, source_path, data) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.id.as_str())
                .push_bind(r.dataset_id.as_str())
                .push_bind(r.source_id.as_str())
                .push_bind(r.generation)
                .push_bind(r.table_id.as_deref())
                .push_bind(r.row_index)
                .push_bind(r.page_number)
                .push_bind(r.source_path.as_deref())
                .push_bind(r.data.as_str());
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}
