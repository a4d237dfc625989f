//! Source Registry Records
//!
//! A source is one uploaded or pasted rulebook tracked through the indexing
//! lifecycle:
//!
//! ```text
//! not_indexed ──► indexing ──► indexed
//!                    ▲  │
//!                    │  └────► failed
//!                    └─────────┘ (re-index from indexed or failed)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{decode_json, decode_optional_json};
use crate::ingestion::pipeline::{IndexError, IndexStats};

// ============================================================================
// Enums
// ============================================================================

/// Lifecycle status of a source's derived index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    NotIndexed,
    Indexing,
    Indexed,
    Failed,
}

impl IndexStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotIndexed => "not_indexed",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    /// Whether the registry accepts a move from `self` to `next`.
    pub fn can_transition_to(self, next: IndexStatus) -> bool {
        use IndexStatus::*;
        matches!(
            (self, next),
            (NotIndexed | Indexed | Failed, Indexing) | (Indexing, Indexed | Failed)
        )
    }

    pub const ALL: [IndexStatus; 4] = [Self::NotIndexed, Self::Indexing, Self::Indexed, Self::Failed];

    /// Statuses with an edge into `next`.
    pub fn predecessors(next: IndexStatus) -> Vec<IndexStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_indexed" => Ok(Self::NotIndexed),
            "indexing" => Ok(Self::Indexing),
            "indexed" => Ok(Self::Indexed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown index status: {other}")),
        }
    }
}

/// How the source text reached the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Pdf,
    PastedText,
    ExternalJson,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::PastedText => "pasted_text",
            Self::ExternalJson => "external_json",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(Self::Pdf),
            "pasted_text" | "pasted-text" | "text" => Ok(Self::PastedText),
            "external_json" | "external-json" | "json" => Ok(Self::ExternalJson),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

// ============================================================================
// Source Record
// ============================================================================

/// Source database record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SourceRecord {
    pub id: String,
    pub campaign_id: Option<String>,
    pub source_type: String,
    pub title: String,
    pub tags: String,                // JSON array
    pub index_status: String,
    pub index_stats: Option<String>, // JSON IndexStats
    pub last_error: Option<String>,  // JSON IndexError
    pub index_generation: i64,
    pub indexing_started_at: Option<String>,
    /// Token of the run holding the `indexing` status
    pub lease_id: Option<String>,
    pub last_indexed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SourceRecord {
    pub fn new(campaign_id: Option<String>, source_type: SourceType, title: impl Into<String>, tags: &[String]) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id,
            source_type: source_type.as_str().to_string(),
            title: title.into(),
            tags: encode_tags(tags),
            index_status: IndexStatus::NotIndexed.as_str().to_string(),
            index_stats: None,
            last_error: None,
            index_generation: 0,
            indexing_started_at: None,
            lease_id: None,
            last_indexed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn status(&self) -> Result<IndexStatus, String> {
        self.index_status.parse()
    }

    pub fn kind(&self) -> Result<SourceType, String> {
        self.source_type.parse()
    }

    pub fn tag_list(&self) -> Result<Vec<String>, serde_json::Error> {
        decode_json(&self.tags)
    }

    pub fn stats(&self) -> Result<Option<IndexStats>, serde_json::Error> {
        decode_optional_json(self.index_stats.as_deref())
    }

    pub fn error(&self) -> Result<Option<IndexError>, serde_json::Error> {
        decode_optional_json(self.last_error.as_deref())
    }
}

/// Normalise tags to a sorted, de-duplicated JSON array.
pub fn encode_tags(tags: &[String]) -> String {
    let set: std::collections::BTreeSet<&str> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    serde_json::to_string(&set).unwrap_or_else(|_| "[]".to_string())
}
