//! Dataset Aggregation
//!
//! Groups related tables into named datasets with a merged field schema:
//!
//! | Keyword     | Dataset      | Accepts          | Dataset confidence |
//! |-------------|--------------|------------------|--------------------|
//! | `equipment` | `Equipment`  | high, medium     | high               |
//! | `skill`     | `Skills`     | any              | medium             |
//! | `injury`    | `Injuries`   | high, medium     | high               |
//!
//! A table carrying several keywords contributes to each matching dataset.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::content::TableRecord;
use super::tables::{Confidence, TableCandidate};

/// Separator between the section path and the table title in a row's source path.
pub const PATH_SEPARATOR: &str = " › ";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    Equipment,
    Skills,
    Spells,
    Tables,
    Injuries,
    Other,
}

impl DatasetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::Skills => "skills",
            Self::Spells => "spells",
            Self::Tables => "tables",
            Self::Injuries => "injuries",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equipment" => Ok(Self::Equipment),
            "skills" => Ok(Self::Skills),
            "spells" => Ok(Self::Spells),
            "tables" => Ok(Self::Tables),
            "injuries" => Ok(Self::Injuries),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown dataset type: {other}")),
        }
    }
}

/// One record contributed by a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    /// Index of the contributing table in the detection output
    pub table_index: usize,
    pub page_number: Option<u32>,
    pub source_path: Option<String>,
    pub data: TableRecord,
}

/// A named, schema-merged group of tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDataset {
    pub name: String,
    pub dataset_type: DatasetType,
    /// Union of row keys in first-seen order
    pub fields: IndexSet<String>,
    pub confidence: Confidence,
    pub rows: Vec<DatasetRow>,
}

struct DatasetRule {
    keyword: &'static str,
    name: &'static str,
    dataset_type: DatasetType,
    /// Weakest table confidence still accepted
    weakest: Confidence,
    confidence: Confidence,
}

const DATASET_RULES: &[DatasetRule] = &[
    DatasetRule {
        keyword: "equipment",
        name: "Equipment",
        dataset_type: DatasetType::Equipment,
        weakest: Confidence::Medium,
        confidence: Confidence::High,
    },
    DatasetRule {
        keyword: "skill",
        name: "Skills",
        dataset_type: DatasetType::Skills,
        weakest: Confidence::Low,
        confidence: Confidence::Medium,
    },
    DatasetRule {
        keyword: "injury",
        name: "Injuries",
        dataset_type: DatasetType::Injuries,
        weakest: Confidence::Medium,
        confidence: Confidence::High,
    },
];

// ============================================================================
// Aggregation
// ============================================================================

/// Build datasets from detected tables.
///
/// `section_paths[i]` is the breadcrumb of the section holding `tables[i]`;
/// a missing entry means the table sits outside any section.
pub fn aggregate_datasets(tables: &[TableCandidate], section_paths: &[Vec<String>]) -> Vec<AggregatedDataset> {
    DATASET_RULES
        .iter()
        .filter_map(|rule| {
            let mut fields = IndexSet::new();
            let mut rows = Vec::new();

            for (index, table) in tables.iter().enumerate() {
                if !table.has_keyword(rule.keyword) || table.confidence > rule.weakest {
                    continue;
                }
                let source_path = source_path(
                    section_paths.get(index).map(Vec::as_slice).unwrap_or_default(),
                    table.title_guess.as_deref(),
                );
                for record in table.records() {
                    fields.extend(record.keys().cloned());
                    rows.push(DatasetRow {
                        table_index: index,
                        page_number: Some(table.page_number),
                        source_path: source_path.clone(),
                        data: record,
                    });
                }
            }

            (!rows.is_empty()).then(|| AggregatedDataset {
                name: rule.name.to_string(),
                dataset_type: rule.dataset_type,
                fields,
                confidence: rule.confidence,
                rows,
            })
        })
        .collect()
}

/// `Section › Subsection › Table title`, or `None` when there is nothing to join.
///
/// A table titled like its own section only appears once.
fn source_path(section_path: &[String], title: Option<&str>) -> Option<String> {
    let mut parts: Vec<&str> = section_path
        .iter()
        .map(String::as_str)
        .chain(title)
        .filter(|p| !p.is_empty())
        .collect();
    parts.dedup();
    (!parts.is_empty()).then(|| parts.join(PATH_SEPARATOR))
}
