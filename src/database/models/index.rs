//! Derived Index Records
//!
//! Rows written by an index run. Every row carries the generation of the run
//! that produced it; only the source's current generation is ever visible
//! after a run commits.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::decode_json;
use crate::ingestion::chunker::ScoreHints;
use crate::ingestion::content::{ContentError, TableContent, TableRecord};
use crate::ingestion::tables::Confidence;

// ============================================================================
// Page Record
// ============================================================================

/// Cleaned page text
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PageRecord {
    pub id: String,
    pub source_id: String,
    pub generation: i64,
    pub page_number: i64,
    pub text: String,
    pub char_count: i64,
}

// ============================================================================
// Section Record
// ============================================================================

/// Detected section
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SectionRecord {
    pub id: String,
    pub source_id: String,
    pub generation: i64,
    pub section_index: i64,
    pub title: String,
    pub path: String, // JSON array of ancestor titles
    pub level: i64,
    pub page_start: i64,
    pub page_end: i64,
    pub body: Option<String>,
    pub keywords: String, // JSON array
}

impl SectionRecord {
    pub fn path_titles(&self) -> Result<Vec<String>, serde_json::Error> {
        decode_json(&self.path)
    }

    pub fn keyword_list(&self) -> Result<Vec<String>, serde_json::Error> {
        decode_json(&self.keywords)
    }
}

// ============================================================================
// Chunk Record
// ============================================================================

/// Stored text chunk
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChunkRecord {
    pub id: String,
    pub source_id: String,
    pub generation: i64,
    pub section_id: Option<String>,
    pub order_index: i64,
    pub text: String,
    pub page_start: i64,
    pub page_end: i64,
    pub section_path: String, // JSON array
    pub keywords: String,     // JSON array
    pub has_roll_ranges: bool,
    pub has_table_pattern: bool,
    pub has_list_pattern: bool,
    pub has_dice_notation: bool,
}

impl ChunkRecord {
    pub fn hints(&self) -> ScoreHints {
        ScoreHints {
            has_roll_ranges: self.has_roll_ranges,
            has_table_pattern: self.has_table_pattern,
            has_list_pattern: self.has_list_pattern,
            has_dice_notation: self.has_dice_notation,
        }
    }

    pub fn section_titles(&self) -> Result<Vec<String>, serde_json::Error> {
        decode_json(&self.section_path)
    }

    pub fn keyword_list(&self) -> Result<Vec<String>, serde_json::Error> {
        decode_json(&self.keywords)
    }
}

// ============================================================================
// Rule Table Record
// ============================================================================

/// Detected table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RuleTableRecord {
    pub id: String,
    pub source_id: String,
    pub generation: i64,
    pub section_id: Option<String>,
    pub table_kind: String,
    pub title_guess: Option<String>,
    pub header_context: String,
    pub page_number: i64,
    pub line_start: i64,
    pub line_end: i64,
    pub raw_text: String,
    pub content: Option<String>, // JSON TableContent
    pub confidence: String,
    pub keywords: String, // JSON array
}

impl RuleTableRecord {
    /// Decode and validate the parsed content, if any was stored.
    pub fn parsed_content(&self) -> Result<Option<TableContent>, ContentError> {
        self.content.as_deref().map(TableContent::from_json).transpose()
    }

    /// Parsed rows as ordered string-keyed records.
    pub fn records(&self) -> Result<Option<Vec<TableRecord>>, ContentError> {
        Ok(self.parsed_content()?.map(|c| c.records()))
    }

    pub fn confidence_tier(&self) -> Result<Confidence, String> {
        self.confidence.parse()
    }

    pub fn keyword_list(&self) -> Result<Vec<String>, serde_json::Error> {
        decode_json(&self.keywords)
    }
}

// ============================================================================
// Dataset Records
// ============================================================================

/// Aggregated dataset
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DatasetRecord {
    pub id: String,
    pub source_id: String,
    pub generation: i64,
    pub name: String,
    pub dataset_type: String,
    pub fields: String, // JSON array
    pub confidence: String,
    pub row_count: i64,
}

impl DatasetRecord {
    pub fn field_names(&self) -> Result<IndexSet<String>, serde_json::Error> {
        decode_json(&self.fields)
    }
}

/// One row of a dataset
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DatasetRowRecord {
    pub id: String,
    pub dataset_id: String,
    pub source_id: String,
    pub generation: i64,
    pub table_id: Option<String>,
    pub row_index: i64,
    pub page_number: Option<i64>,
    pub source_path: Option<String>,
    pub data: String, // JSON object
}

impl DatasetRowRecord {
    pub fn record(&self) -> Result<TableRecord, serde_json::Error> {
        decode_json(&self.data)
    }
}
