//! Source registry database operations
//!
//! Source metadata plus the index status lease. Entering `indexing` is a
//! compare-and-swap on the status column, so two runs can never hold the same
//! source at once. Each lease carries a fresh token; leaving `indexing`
//! requires that token, so a run whose lease was recovered as stale cannot
//! finish over the run that replaced it.
//!
//! Every status guard is built from [`IndexStatus::predecessors`], and a
//! refused move is explained through [`IndexStatus::can_transition_to`].

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::Sqlite;
use sqlx::{QueryBuilder, Row};
use tracing::{info, warn};

use super::models::{encode_tags, IndexStatus, SourceRecord};
use super::Database;
use crate::ingestion::pipeline::{IndexError, PipelineStage};

/// Message recorded on sources whose run never finished.
pub const ABANDONED_RUN_MESSAGE: &str = "index run abandoned";

// ============================================================================
// Error Types
// ============================================================================

/// Errors specific to source registry operations
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Source {0} is already being indexed")]
    AlreadyIndexing(String),

    #[error("Source {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: IndexStatus,
        to: IndexStatus,
    },

    #[error("Index lease on source {0} is no longer held by this run")]
    LeaseLost(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Extension trait for source registry operations
pub trait SourceOps {
    fn create_source(&self, source: &SourceRecord) -> impl std::future::Future<Output = Result<(), SourceError>> + Send;
    fn get_source(&self, id: &str) -> impl std::future::Future<Output = Result<Option<SourceRecord>, SourceError>> + Send;
    fn require_source(&self, id: &str) -> impl std::future::Future<Output = Result<SourceRecord, SourceError>> + Send;
    fn list_sources(&self, campaign_id: Option<&str>) -> impl std::future::Future<Output = Result<Vec<SourceRecord>, SourceError>> + Send;
    fn update_source_metadata(&self, id: &str, title: Option<&str>, tags: Option<&[String]>) -> impl std::future::Future<Output = Result<SourceRecord, SourceError>> + Send;
    fn delete_source(&self, id: &str) -> impl std::future::Future<Output = Result<bool, SourceError>> + Send;

    // Status lease
    fn begin_indexing(&self, id: &str) -> impl std::future::Future<Output = Result<IndexLease, SourceError>> + Send;
    fn mark_failed(&self, lease: &IndexLease, error: &IndexError) -> impl std::future::Future<Output = Result<(), SourceError>> + Send;
    fn recover_stale_sources(&self, max_age: Duration) -> impl std::future::Future<Output = Result<Vec<String>, SourceError>> + Send;
}

impl SourceOps for Database {
    // =========================================================================
    // Metadata
    // =========================================================================

    async fn create_source(&self, source: &SourceRecord) -> Result<(), SourceError> {
        sqlx::query(
            r#"
            INSERT INTO sources
            (id, campaign_id, source_type, title, tags, index_status, index_stats, last_error,
             index_generation, indexing_started_at, lease_id, last_indexed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.campaign_id)
        .bind(&source.source_type)
        .bind(&source.title)
        .bind(&source.tags)
        .bind(&source.index_status)
        .bind(&source.index_stats)
        .bind(&source.last_error)
        .bind(source.index_generation)
        .bind(&source.indexing_started_at)
        .bind(&source.lease_id)
        .bind(&source.last_indexed_at)
        .bind(&source.created_at)
        .bind(&source.updated_at)
        .execute(self.pool())
        .await?;

        info!(source_id = %source.id, title = %source.title, "Created source");
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<SourceRecord>, SourceError> {
        let source = sqlx::query_as::<_, SourceRecord>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(source)
    }

    async fn require_source(&self, id: &str) -> Result<SourceRecord, SourceError> {
        self.get_source(id)
            .await?
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    async fn list_sources(&self, campaign_id: Option<&str>) -> Result<Vec<SourceRecord>, SourceError> {
        let sources = match campaign_id {
            Some(campaign_id) => {
                sqlx::query_as::<_, SourceRecord>(
                    "SELECT * FROM sources WHERE campaign_id = ? ORDER BY created_at, id",
                )
                .bind(campaign_id)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, SourceRecord>("SELECT * FROM sources ORDER BY created_at, id")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(sources)
    }

    async fn update_source_metadata(
        &self,
        id: &str,
        title: Option<&str>,
        tags: Option<&[String]>,
    ) -> Result<SourceRecord, SourceError> {
        let mut source = self.require_source(id).await?;
        if let Some(title) = title {
            source.title = title.to_string();
        }
        if let Some(tags) = tags {
            source.tags = encode_tags(tags);
        }
        source.updated_at = Utc::now().to_rfc3339();

        sqlx::query("UPDATE sources SET title = ?, tags = ?, updated_at = ? WHERE id = ?")
            .bind(&source.title)
            .bind(&source.tags)
            .bind(&source.updated_at)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(source)
    }

    /// Delete a source; derived rows go with it through `ON DELETE CASCADE`.
    async fn delete_source(&self, id: &str) -> Result<bool, SourceError> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(source_id = id, "Deleted source");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Status Lease
    // =========================================================================

    /// Move the source to `indexing` if no other run holds it.
    ///
    /// Derived rows are left untouched; they are only replaced when the run
    /// commits.
    async fn begin_indexing(&self, id: &str) -> Result<IndexLease, SourceError> {
        let lease = IndexLease {
            source_id: id.to_string(),
            lease_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now().to_rfc3339(),
        };

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE sources SET index_status = ");
        query
            .push_bind(IndexStatus::Indexing.as_str())
            .push(", lease_id = ")
            .push_bind(lease.lease_id.as_str())
            .push(", indexing_started_at = ")
            .push_bind(lease.started_at.as_str())
            .push(", updated_at = ")
            .push_bind(lease.started_at.as_str())
            .push(" WHERE id = ")
            .push_bind(id);
        push_status_guard(&mut query, IndexStatus::Indexing);
        let result = query.build().execute(self.pool()).await?;

        if result.rows_affected() == 0 {
            let current = current_status(self.pool(), id).await?;
            return Err(refused_transition(id, current, IndexStatus::Indexing));
        }

        info!(source_id = id, lease_id = %lease.lease_id, "Took index lease");
        Ok(lease)
    }

    /// Record a failed run. Previously committed derived rows and stats stay.
    async fn mark_failed(&self, lease: &IndexLease, error: &IndexError) -> Result<(), SourceError> {
        let error_json = serde_json::to_string(error)?;

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE sources SET index_status = ");
        query
            .push_bind(IndexStatus::Failed.as_str())
            .push(", last_error = ")
            .push_bind(error_json)
            .push(", indexing_started_at = NULL, lease_id = NULL, updated_at = ")
            .push_bind(error.timestamp.as_str());
        push_lease_guard(&mut query, lease, IndexStatus::Failed);
        let result = query.build().execute(self.pool()).await?;

        if result.rows_affected() == 0 {
            let current = current_status(self.pool(), &lease.source_id).await?;
            return Err(refused_transition(&lease.source_id, current, IndexStatus::Failed));
        }

        warn!(
            source_id = %lease.source_id,
            stage = %error.stage,
            message = %error.message,
            "Index run failed"
        );
        Ok(())
    }

    /// Fail every source that has been `indexing` for longer than `max_age`.
    ///
    /// Returns the ids that were moved to `failed`.
    async fn recover_stale_sources(&self, max_age: Duration) -> Result<Vec<String>, SourceError> {
        let Some(cutoff) = TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query("SELECT id, indexing_started_at FROM sources WHERE index_status = 'indexing'")
            .fetch_all(self.pool())
            .await?;

        let mut recovered = Vec::new();
        for row in rows {
            let id: String = row.try_get("id")?;
            let started_at: Option<String> = row.try_get("indexing_started_at")?;

            let is_stale = match started_at.as_deref().map(DateTime::parse_from_rfc3339) {
                Some(Ok(started)) => started.with_timezone(&Utc) <= cutoff,
                // Missing or unreadable lease time
                Some(Err(_)) | None => true,
            };
            if !is_stale {
                continue;
            }

            let error = IndexError::new(PipelineStage::Indexing, ABANDONED_RUN_MESSAGE);
            let result = sqlx::query(
                r#"
                UPDATE sources
                SET index_status = 'failed', last_error = ?, indexing_started_at = NULL,
                    lease_id = NULL, updated_at = ?
                WHERE id = ? AND index_status = 'indexing' AND indexing_started_at IS ?
                "#,
            )
            .bind(serde_json::to_string(&error)?)
            .bind(&error.timestamp)
            .bind(&id)
            .bind(&started_at)
            .execute(self.pool())
            .await?;

            if result.rows_affected() > 0 {
                warn!(source_id = %id, "Recovered stale index run");
                recovered.push(id);
            }
        }

        Ok(recovered)
    }
}

// ============================================================================
// Lease Helpers
// ============================================================================

/// Proof that one run holds a source's `indexing` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLease {
    pub source_id: String,
    /// Token stored on the source while this run holds it
    pub lease_id: String,
    /// RFC 3339
    pub started_at: String,
}

/// Append ` AND index_status IN (..)` for every status with an edge into `to`.
fn push_status_guard(query: &mut QueryBuilder<'_, Sqlite>, to: IndexStatus) {
    query.push(" AND index_status IN (");
    let mut statuses = query.separated(", ");
    for from in IndexStatus::predecessors(to) {
        statuses.push_bind(from.as_str());
    }
    statuses.push_unseparated(")");
}

/// Append a `WHERE` clause matching only the source still held by `lease`.
pub(super) fn push_lease_guard<'args>(
    query: &mut QueryBuilder<'args, Sqlite>,
    lease: &'args IndexLease,
    to: IndexStatus,
) {
    query
        .push(" WHERE id = ")
        .push_bind(lease.source_id.as_str())
        .push(" AND lease_id = ")
        .push_bind(lease.lease_id.as_str());
    push_status_guard(query, to);
}

pub(super) async fn current_status<'e, E>(executor: E, id: &str) -> Result<Option<String>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT index_status FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Explain why a guarded move of source `id` to `to` matched no row.
pub(super) fn refused_transition(id: &str, current: Option<String>, to: IndexStatus) -> SourceError {
    let Some(raw) = current else {
        return SourceError::NotFound(id.to_string());
    };
    let from = match raw.parse::<IndexStatus>() {
        Ok(from) => from,
        Err(e) => return SourceError::InvalidValue(e),
    };

    if from == IndexStatus::Indexing && to == IndexStatus::Indexing {
        SourceError::AlreadyIndexing(id.to_string())
    } else if !from.can_transition_to(to) {
        SourceError::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        }
    } else if to == IndexStatus::Indexing {
        // Another run took and released the lease between the update and this read
        SourceError::AlreadyIndexing(id.to_string())
    } else {
        SourceError::LeaseLost(id.to_string())
    }
}
