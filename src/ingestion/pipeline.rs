//! Rules Indexing Pipeline
//!
//! Orchestrates one index run for a source:
//!
//! ```text
//! parsing → cleaning → tables → sections → chunking → datasets → saving
//! ```
//!
//! Tables are found before sections so that numbered roll rows are never
//! mistaken for numbered headings.
//!
//! Every stage before `saving` is a pure function of the input text and the
//! [`IndexingConfig`]; [`build_index`] runs them and returns a [`DerivedIndex`].
//! [`RulesIndexer`] wraps that with the source status lease and the storage
//! commit. A stage failure never escapes as an error: it is recorded on the
//! source as `failed` with `{stage, message, timestamp}`.

use std::fmt;
use std::time::Instant;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::chunker::{RulesChunker, TextChunk};
use super::cleaner::{split_pages, CleanPage, LinePosition, TextCleaner};
use super::datasets::{aggregate_datasets, AggregatedDataset};
use super::sections::{DetectedSection, SectionDetector};
use super::tables::{Confidence, TableCandidate, TableDetector};
use crate::config::IndexingConfig;
use crate::database::{Database, IndexLease, RulesIndexOps, SourceError, SourceOps};

// ============================================================================
// Stage and Outcome Types
// ============================================================================

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Parsing,
    Cleaning,
    Sections,
    Chunking,
    Tables,
    Datasets,
    Saving,
    /// Lease-level failures such as an abandoned run
    Indexing,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Cleaning => "cleaning",
            Self::Sections => "sections",
            Self::Chunking => "chunking",
            Self::Tables => "tables",
            Self::Datasets => "datasets",
            Self::Saving => "saving",
            Self::Indexing => "indexing",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pure stage refused its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} stage failed: {message}")]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Counts recorded on a source after a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub pages: usize,
    pub sections: usize,
    pub chunks: usize,
    pub tables_high: usize,
    pub tables_medium: usize,
    pub tables_low: usize,
    pub datasets: usize,
    pub dataset_rows: usize,
}

impl IndexStats {
    pub fn tables(&self) -> usize {
        self.tables_high + self.tables_medium + self.tables_low
    }
}

/// Error recorded on a source after a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexError {
    pub stage: PipelineStage,
    pub message: String,
    /// RFC 3339
    pub timestamp: String,
}

impl IndexError {
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl From<StageFailure> for IndexError {
    fn from(failure: StageFailure) -> Self {
        Self::new(failure.stage, failure.message)
    }
}

/// How a run that obtained the lease ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { generation: i64, stats: IndexStats },
    Failed(IndexError),
}

/// Errors that stop a run before it starts or while recording its end.
#[derive(Debug, Error, Diagnostic)]
pub enum IndexerError {
    #[error("Source not found: {0}")]
    #[diagnostic(code("RULEBOOK::SOURCE_NOT_FOUND"), help("Run `rulebook-index list` to see registered sources"))]
    SourceNotFound(String),

    #[error("Source {0} is already being indexed")]
    #[diagnostic(
        code("RULEBOOK::ALREADY_INDEXING"),
        help("Wait for the running index to finish, or run `rulebook-index recover` if it was abandoned")
    )]
    AlreadyIndexing(String),

    #[error("Index run for source {0} lost its lease")]
    #[diagnostic(
        code("RULEBOOK::LEASE_LOST"),
        help("The run was recovered as stale and another run took over; its results were discarded")
    )]
    LeaseLost(String),

    #[error("Source registry error: {0}")]
    #[diagnostic(code("RULEBOOK::REGISTRY_ERROR"))]
    Registry(SourceError),
}

impl From<SourceError> for IndexerError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(id) => Self::SourceNotFound(id),
            SourceError::AlreadyIndexing(id) => Self::AlreadyIndexing(id),
            SourceError::LeaseLost(id) => Self::LeaseLost(id),
            other => Self::Registry(other),
        }
    }
}

// ============================================================================
// Input
// ============================================================================

/// Raw text handed to an index run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// Pasted or extracted text; form feeds separate pages
    Text(String),
    /// Text already split into pages
    Pages(Vec<String>),
    /// External JSON: `["page", ...]` or `{"pages": ["page", ...]}`
    Json(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPages {
    List(Vec<String>),
    Object { pages: Vec<String> },
}

impl SourceInput {
    /// Resolve the input into raw page strings.
    pub fn into_pages(self) -> Result<Vec<String>, StageFailure> {
        match self {
            Self::Text(text) => Ok(split_pages(&text)),
            Self::Pages(pages) => Ok(pages),
            Self::Json(json) => match serde_json::from_str::<JsonPages>(&json) {
                Ok(JsonPages::List(pages) | JsonPages::Object { pages }) => Ok(pages),
                Err(e) => Err(StageFailure::new(
                    PipelineStage::Parsing,
                    format!("invalid page JSON: {e}"),
                )),
            },
        }
    }
}

// ============================================================================
// Derived Index
// ============================================================================

/// A chunk with the section it falls in.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: TextChunk,
    /// Index into [`DerivedIndex::sections`]
    pub section: Option<usize>,
    /// Full breadcrumb of that section
    pub section_path: Vec<String>,
}

/// A table with the section it falls in.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedTable {
    pub table: TableCandidate,
    pub section: Option<usize>,
}

/// Everything one run derives from a source, before storage.
#[derive(Debug, Clone, Default)]
pub struct DerivedIndex {
    pub pages: Vec<CleanPage>,
    pub sections: Vec<DetectedSection>,
    pub chunks: Vec<IndexedChunk>,
    pub tables: Vec<IndexedTable>,
    pub datasets: Vec<AggregatedDataset>,
    /// Header/footer lines stripped during cleaning
    pub repeated_lines: Vec<String>,
}

impl DerivedIndex {
    pub fn stats(&self) -> IndexStats {
        let tier = |c: Confidence| self.tables.iter().filter(|t| t.table.confidence == c).count();
        IndexStats {
            pages: self.pages.len(),
            sections: self.sections.len(),
            chunks: self.chunks.len(),
            tables_high: tier(Confidence::High),
            tables_medium: tier(Confidence::Medium),
            tables_low: tier(Confidence::Low),
            datasets: self.datasets.len(),
            dataset_rows: self.datasets.iter().map(|d| d.rows.len()).sum(),
        }
    }
}

/// Index of the last section whose heading is at or before `pos`.
///
/// Sections are ordered by heading position.
pub fn section_at(sections: &[DetectedSection], pos: LinePosition) -> Option<usize> {
    sections.partition_point(|s| s.start() <= pos).checked_sub(1)
}

/// Run every pure stage over `input`.
pub fn build_index(input: SourceInput, config: &IndexingConfig) -> Result<DerivedIndex, StageFailure> {
    let started = Instant::now();

    let raw_pages = input.into_pages()?;
    if raw_pages.is_empty() {
        return Err(StageFailure::new(PipelineStage::Parsing, "source has no pages"));
    }
    debug!(pages = raw_pages.len(), "Parsed source pages");

    let cleaned = TextCleaner::new(config.cleaner.clone()).clean_pages(&raw_pages);
    if cleaned.is_blank() {
        return Err(StageFailure::new(PipelineStage::Cleaning, "no text left after cleaning"));
    }
    debug!(
        repeated = cleaned.repeated_lines.len(),
        lines_removed = cleaned.lines_removed,
        "Cleaned pages"
    );

    let detected = TableDetector::new().detect_pages(&cleaned.pages);
    debug!(tables = detected.len(), "Detected tables");

    let sections = SectionDetector::new(config.section_body_max_chars)
        .build_sections_excluding(&cleaned.pages, |pos| detected.iter().any(|t| t.covers(pos)));
    debug!(sections = sections.len(), "Detected sections");

    config
        .chunk
        .validate()
        .map_err(|msg| StageFailure::new(PipelineStage::Chunking, msg))?;
    let chunks: Vec<IndexedChunk> = RulesChunker::new(config.chunk.clone())
        .chunk_pages(&cleaned.pages)
        .into_iter()
        .map(|chunk| {
            let section = section_at(&sections, chunk.anchor);
            let section_path = section.map(|i| sections[i].full_path()).unwrap_or_default();
            IndexedChunk {
                chunk,
                section,
                section_path,
            }
        })
        .collect();
    debug!(chunks = chunks.len(), "Chunked text");

    let tables: Vec<IndexedTable> = detected
        .into_iter()
        .map(|table| IndexedTable {
            section: section_at(&sections, table.start()),
            table,
        })
        .collect();

    let candidates: Vec<TableCandidate> = tables.iter().map(|t| t.table.clone()).collect();
    let paths: Vec<Vec<String>> = tables
        .iter()
        .map(|t| t.section.map(|i| sections[i].full_path()).unwrap_or_default())
        .collect();
    let datasets = aggregate_datasets(&candidates, &paths);
    debug!(datasets = datasets.len(), "Aggregated datasets");

    let index = DerivedIndex {
        pages: cleaned.pages,
        sections,
        chunks,
        tables,
        datasets,
        repeated_lines: cleaned.repeated_lines,
    };
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        stats = ?index.stats(),
        "Built rules index"
    );
    Ok(index)
}

// ============================================================================
// RulesIndexer
// ============================================================================

/// Runs index jobs against the database.
#[derive(Clone)]
pub struct RulesIndexer {
    db: Database,
    config: IndexingConfig,
}

impl RulesIndexer {
    pub fn new(db: Database, config: IndexingConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Index a source from raw input.
    ///
    /// Takes the `indexing` lease first; a source already held by another run
    /// is rejected without touching stored data. Once the lease is held, every
    /// failure is recorded on the source and reported as
    /// [`IndexOutcome::Failed`]. A run whose lease was recovered and handed to
    /// another run writes nothing and returns [`IndexerError::LeaseLost`].
    #[instrument(skip(self, input))]
    pub async fn index_source(&self, source_id: &str, input: SourceInput) -> Result<IndexOutcome, IndexerError> {
        let lease = self.db.begin_indexing(source_id).await?;
        info!(lease_id = %lease.lease_id, "Index run started");

        let index = match build_index(input, &self.config) {
            Ok(index) => index,
            Err(failure) => return self.fail(&lease, failure.into()).await,
        };

        let stats = index.stats();
        match self
            .db
            .commit_index(&lease, &index, &stats, self.config.insert_batch_size)
            .await
        {
            Ok(generation) => {
                info!(generation, ?stats, "Index run finished");
                Ok(IndexOutcome::Indexed { generation, stats })
            }
            Err(e @ (SourceError::LeaseLost(_) | SourceError::InvalidTransition { .. })) => {
                warn!(error = %e, "Index run lost its lease before commit");
                Err(lease_lost(e))
            }
            Err(e) => {
                self.fail(&lease, IndexError::new(PipelineStage::Saving, e.to_string()))
                    .await
            }
        }
    }

    async fn fail(&self, lease: &IndexLease, error: IndexError) -> Result<IndexOutcome, IndexerError> {
        warn!(stage = %error.stage, message = %error.message, "Index run failed");
        self.db.mark_failed(lease, &error).await.map_err(lease_lost)?;
        Ok(IndexOutcome::Failed(error))
    }

    /// Fail runs that have held the lease longer than the configured limit.
    pub async fn recover_stale(&self) -> Result<Vec<String>, IndexerError> {
        let max_age = std::time::Duration::from_secs(self.config.stale_lease_secs);
        Ok(self.db.recover_stale_sources(max_age).await?)
    }
}

/// A refused status move while holding a lease means the lease was recovered.
fn lease_lost(err: SourceError) -> IndexerError {
    match err {
        SourceError::InvalidTransition { id, .. } => IndexerError::LeaseLost(id),
        other => other.into(),
    }
}

// ============================================================================
// Tests
// ============================================================================
