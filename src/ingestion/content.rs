//! Structured Table Content
//!
//! Parsed table rows are stored as one explicit variant per table shape rather
//! than an untyped JSON blob. Stored content is validated when it is read back,
//! so a malformed row set surfaces as an error instead of leaking into callers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single parsed row, keyed by column name in column order.
pub type TableRecord = IndexMap<String, String>;

/// Errors raised when reading stored table content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Table content is not valid JSON for any known shape: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Table content has an invalid shape: {0}")]
    Shape(String),
}

/// One row of a roll table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRow {
    /// Roll value or range as printed: `3`, `2-5`, `11`
    pub roll: String,
    pub result: String,
}

impl RollRow {
    pub fn new(roll: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            roll: roll.into(),
            result: result.into(),
        }
    }

    /// True for printed ranges such as `2-5`.
    pub fn is_range(&self) -> bool {
        self.roll.contains(['-', '–'])
    }

    /// True for two-digit D66 codes where both digits are 1-6.
    pub fn is_d66_code(&self) -> bool {
        let digits: Vec<char> = self.roll.chars().collect();
        digits.len() == 2 && digits.iter().all(|d| ('1'..='6').contains(d))
    }
}

/// One row of an equipment price list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRow {
    pub name: String,
    /// Cost including its unit, e.g. `10 gc`
    pub cost: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

/// Parsed rows of a detected table, one variant per detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableContent {
    RollTable {
        rows: Vec<RollRow>,
    },
    StatsTable {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    EquipmentTable {
        rows: Vec<EquipmentRow>,
    },
    GenericTable {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

impl TableContent {
    /// Number of data rows.
    pub fn row_count(&self) -> usize {
        match self {
            Self::RollTable { rows } => rows.len(),
            Self::EquipmentTable { rows } => rows.len(),
            Self::StatsTable { rows, .. } | Self::GenericTable { rows, .. } => rows.len(),
        }
    }

    /// Flatten any variant into ordered string-keyed records.
    ///
    /// Columnar variants zip cells to headers positionally; a short row simply
    /// has fewer keys.
    pub fn records(&self) -> Vec<TableRecord> {
        match self {
            Self::RollTable { rows } => rows
                .iter()
                .map(|r| {
                    let mut record = TableRecord::new();
                    record.insert("Roll".to_string(), r.roll.clone());
                    record.insert("Result".to_string(), r.result.clone());
                    record
                })
                .collect(),
            Self::EquipmentTable { rows } => rows
                .iter()
                .map(|r| {
                    let mut record = TableRecord::new();
                    record.insert("Name".to_string(), r.name.clone());
                    record.insert("Cost".to_string(), r.cost.clone());
                    record.insert("Effect".to_string(), r.effect.clone().unwrap_or_default());
                    record
                })
                .collect(),
            Self::StatsTable { headers, rows } | Self::GenericTable { headers, rows } => rows
                .iter()
                .map(|cells| {
                    headers
                        .iter()
                        .cloned()
                        .zip(cells.iter().cloned())
                        .collect::<TableRecord>()
                })
                .collect(),
        }
    }

    /// Check structural rules that serde alone cannot express.
    pub fn validate(&self) -> Result<(), ContentError> {
        match self {
            Self::StatsTable { headers, rows } | Self::GenericTable { headers, rows } => {
                if headers.is_empty() {
                    return Err(ContentError::Shape("columnar table without headers".to_string()));
                }
                if let Some(i) = rows.iter().position(|r| r.len() > headers.len()) {
                    return Err(ContentError::Shape(format!(
                        "row {i} has more cells than the {} headers",
                        headers.len()
                    )));
                }
            }
            Self::RollTable { rows } => {
                if let Some(i) = rows.iter().position(|r| r.roll.trim().is_empty()) {
                    return Err(ContentError::Shape(format!("roll row {i} has no roll value")));
                }
            }
            Self::EquipmentTable { rows } => {
                if let Some(i) = rows.iter().position(|r| r.name.trim().is_empty()) {
                    return Err(ContentError::Shape(format!("equipment row {i} has no name")));
                }
            }
        }
        Ok(())
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String, ContentError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode stored content and validate its shape.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        let content: Self = serde_json::from_str(json)?;
        content.validate()?;
        Ok(content)
    }
}
