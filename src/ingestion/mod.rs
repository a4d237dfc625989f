//! Rules Ingestion Module
//!
//! Turns raw rulebook text into the derived index: cleaned pages, a section
//! hierarchy, retrieval chunks, detected tables and aggregated datasets.

pub mod chunker;
pub mod cleaner;
pub mod content;
pub mod datasets;
pub mod keywords;
pub mod pipeline;
pub mod sections;
pub mod tables;

pub use chunker::{RulesChunker, ScoreHints, TextChunk};
pub use cleaner::{CleanPage, CleanedDocument, TextCleaner};
pub use content::{TableContent, TableRecord};
pub use datasets::{aggregate_datasets, AggregatedDataset, DatasetType};
pub use pipeline::{
    build_index, DerivedIndex, IndexError, IndexOutcome, IndexStats, IndexerError, PipelineStage,
    RulesIndexer, SourceInput, StageFailure,
};
pub use sections::{DetectedSection, SectionDetector};
pub use tables::{Confidence, LineClaims, TableCandidate, TableDetector, TableKind};
