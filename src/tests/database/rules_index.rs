//! Derived Index Storage Tests
//!
//! Full runs through [`RulesIndexer`] plus direct `commit_index` calls:
//! generation swap, idempotent re-index and failure isolation.

use std::time::Duration;

use crate::config::IndexingConfig;
use crate::database::{IndexLease, IndexStatus, RulesIndexOps, SourceError, SourceOps};
use crate::ingestion::{build_index, Confidence, IndexOutcome, IndexerError, PipelineStage, SourceInput, TableContent};
use crate::tests::common::{
    create_test_db, create_test_indexer, create_test_source, roll_table_pages, sample_rulebook,
};

fn text(input: String) -> SourceInput {
    SourceInput::Text(input)
}

// =============================================================================
// Full Run Tests
// =============================================================================

#[tokio::test]
async fn test_index_sample_rulebook() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Sample").await;
    let indexer = create_test_indexer(&db);

    let outcome = indexer
        .index_source(&source.id, text(sample_rulebook()))
        .await
        .expect("Failed to index");
    let IndexOutcome::Indexed { generation, stats } = outcome else {
        panic!("expected indexed outcome, got {outcome:?}");
    };
    assert_eq!(generation, 1);
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.sections, 3);
    assert_eq!(stats.tables_high, 2);
    assert_eq!(stats.tables_medium, 1);
    assert_eq!(stats.tables_low, 0);
    assert_eq!(stats.datasets, 3);
    assert_eq!(stats.dataset_rows, 15);

    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.status(), Ok(IndexStatus::Indexed));
    assert_eq!(stored.stats().unwrap(), Some(stats));
    assert!(stored.last_error.is_none());
    assert!(stored.last_indexed_at.is_some());
    assert!(stored.indexing_started_at.is_none());

    let pages = db.list_pages(&source.id).await.unwrap();
    assert_eq!(pages.iter().map(|p| p.page_number).collect::<Vec<_>>(), vec![1, 2, 3]);

    let sections = db.list_sections(&source.id).await.unwrap();
    let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["INTRODUCTION", "COMBAT SKILLS", "SERIOUS INJURIES"]);

    let chunks = db.list_chunks(&source.id).await.unwrap();
    assert_eq!(chunks.len(), stats.chunks);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.order_index, i as i64);
    }
}

#[tokio::test]
async fn test_tables_stored_with_content() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Tables").await;
    create_test_indexer(&db)
        .index_source(&source.id, text(sample_rulebook()))
        .await
        .unwrap();

    let tables = db.list_tables(&source.id).await.unwrap();
    let kinds: Vec<&str> = tables.iter().map(|t| t.table_kind.as_str()).collect();
    assert_eq!(kinds, vec!["roll_table", "equipment_table", "roll_table"]);

    let skills = &tables[0];
    assert_eq!(skills.title_guess.as_deref(), Some("COMBAT SKILLS"));
    assert_eq!(skills.confidence_tier(), Ok(Confidence::High));
    assert_eq!(skills.page_number, 2);
    assert!(skills.section_id.is_some());
    match skills.parsed_content().unwrap() {
        Some(TableContent::RollTable { rows }) => {
            assert_eq!(rows.len(), 6);
            assert_eq!(rows[0].result, "Weapon Master - +1 to hit");
        }
        other => panic!("unexpected content {other:?}"),
    }

    let equipment = &tables[1];
    assert_eq!(equipment.confidence_tier(), Ok(Confidence::Medium));
    assert_eq!(equipment.records().unwrap().map(|r| r.len()), Some(3));
    assert!(equipment.keyword_list().unwrap().contains(&"equipment".to_string()));
}

#[tokio::test]
async fn test_datasets_stored_with_rows() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Datasets").await;
    create_test_indexer(&db)
        .index_source(&source.id, text(sample_rulebook()))
        .await
        .unwrap();

    let datasets = db.list_datasets(&source.id).await.unwrap();
    let names: Vec<&str> = datasets.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Equipment", "Injuries", "Skills"]);

    let tables = db.list_tables(&source.id).await.unwrap();
    let injuries = &datasets[1];
    assert_eq!(injuries.row_count, 6);
    let rows = db.list_dataset_rows(&injuries.id).await.unwrap();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0].row_index, 0);
    assert_eq!(rows[0].page_number, Some(3));
    assert_eq!(rows[0].table_id.as_deref(), Some(tables[2].id.as_str()));
    assert_eq!(rows[0].source_path.as_deref(), Some("SERIOUS INJURIES"));
    let record = rows[0].record().unwrap();
    assert_eq!(record.get("Roll").map(String::as_str), Some("11-15"));

    let fields = datasets[0].field_names().unwrap();
    assert_eq!(fields.iter().map(String::as_str).collect::<Vec<_>>(), vec!["Name", "Cost", "Effect"]);
}

// =============================================================================
// Re-index Tests
// =============================================================================

#[tokio::test]
async fn test_reindex_replaces_tables() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Replace").await;
    let indexer = create_test_indexer(&db);

    indexer.index_source(&source.id, text(roll_table_pages(3))).await.unwrap();
    assert_eq!(db.list_tables(&source.id).await.unwrap().len(), 3);

    let outcome = indexer.index_source(&source.id, text(roll_table_pages(5))).await.unwrap();
    assert!(matches!(outcome, IndexOutcome::Indexed { generation: 2, .. }));

    let tables = db.list_tables(&source.id).await.unwrap();
    assert_eq!(tables.len(), 5);
    assert!(tables.iter().all(|t| t.generation == 2));

    let counts = db.index_counts(&source.id).await.unwrap();
    assert_eq!(counts.tables, 5, "no residual rows from the previous run");
    assert_eq!(counts.pages, 5);
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Twice").await;
    let indexer = create_test_indexer(&db);

    indexer.index_source(&source.id, text(sample_rulebook())).await.unwrap();
    let first = db.index_counts(&source.id).await.unwrap();
    let first_stats = db.require_source(&source.id).await.unwrap().stats().unwrap();

    indexer.index_source(&source.id, text(sample_rulebook())).await.unwrap();
    let second = db.index_counts(&source.id).await.unwrap();
    let second_stats = db.require_source(&source.id).await.unwrap().stats().unwrap();

    assert_eq!(first, second);
    assert_eq!(first_stats, second_stats);
}

#[tokio::test]
async fn test_failed_run_keeps_previous_index() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Keep").await;
    let indexer = create_test_indexer(&db);

    indexer.index_source(&source.id, text(roll_table_pages(3))).await.unwrap();
    let before = db.require_source(&source.id).await.unwrap();

    let outcome = indexer
        .index_source(&source.id, text("   \n\n  ".to_string()))
        .await
        .unwrap();
    let IndexOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.stage, PipelineStage::Cleaning);

    let after = db.require_source(&source.id).await.unwrap();
    assert_eq!(after.status(), Ok(IndexStatus::Failed));
    assert_eq!(after.index_generation, before.index_generation);
    assert_eq!(after.stats().unwrap(), before.stats().unwrap());
    assert_eq!(after.error().unwrap().map(|e| e.stage), Some(PipelineStage::Cleaning));
    assert_eq!(db.list_tables(&source.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_success_clears_previous_error() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Recover").await;
    let indexer = create_test_indexer(&db);

    indexer
        .index_source(&source.id, SourceInput::Json("not json".to_string()))
        .await
        .unwrap();
    let failed = db.require_source(&source.id).await.unwrap();
    assert_eq!(failed.error().unwrap().map(|e| e.stage), Some(PipelineStage::Parsing));

    indexer.index_source(&source.id, text(sample_rulebook())).await.unwrap();
    let indexed = db.require_source(&source.id).await.unwrap();
    assert_eq!(indexed.status(), Ok(IndexStatus::Indexed));
    assert!(indexed.last_error.is_none());
}

#[tokio::test]
async fn test_index_rejected_while_leased() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Locked").await;
    let indexer = create_test_indexer(&db);

    indexer.index_source(&source.id, text(roll_table_pages(3))).await.unwrap();
    db.begin_indexing(&source.id).await.unwrap();

    let err = indexer
        .index_source(&source.id, text(roll_table_pages(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::AlreadyIndexing(_)));
    assert_eq!(db.list_tables(&source.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_index_missing_source() {
    let (db, _temp) = create_test_db().await;
    let err = create_test_indexer(&db)
        .index_source("missing", text(sample_rulebook()))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::SourceNotFound(id) if id == "missing"));
}

// =============================================================================
// Commit Tests
// =============================================================================

#[tokio::test]
async fn test_commit_requires_lease() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "NoLease").await;

    let index = build_index(text(sample_rulebook()), &IndexingConfig::default()).unwrap();
    let unleased = IndexLease {
        source_id: source.id.clone(),
        lease_id: "not-a-lease".to_string(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };
    let err = db
        .commit_index(&unleased, &index, &index.stats(), 100)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SourceError::InvalidTransition { to: IndexStatus::Indexed, .. }
    ));
    assert_eq!(db.index_counts(&source.id).await.unwrap().pages, 0);
}

#[tokio::test]
async fn test_commit_with_tiny_batches() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Batches").await;

    let index = build_index(text(sample_rulebook()), &IndexingConfig::default()).unwrap();
    let lease = db.begin_indexing(&source.id).await.unwrap();
    let generation = db
        .commit_index(&lease, &index, &index.stats(), 1)
        .await
        .expect("Failed to commit");
    assert_eq!(generation, 1);

    let counts = db.index_counts(&source.id).await.unwrap();
    assert_eq!(counts.dataset_rows, 15);
    assert_eq!(counts.tables, 3);
}

#[tokio::test]
async fn test_commit_clamps_oversized_batches() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Wide").await;

    let index = build_index(text(sample_rulebook()), &IndexingConfig::default()).unwrap();
    let lease = db.begin_indexing(&source.id).await.unwrap();
    db.commit_index(&lease, &index, &index.stats(), usize::MAX)
        .await
        .expect("Failed to commit");
    assert_eq!(db.index_counts(&source.id).await.unwrap().dataset_rows, 15);
}

#[tokio::test]
async fn test_replaced_lease_cannot_commit() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Overtaken").await;
    let index = build_index(text(sample_rulebook()), &IndexingConfig::default()).unwrap();

    let stale = db.begin_indexing(&source.id).await.unwrap();
    db.recover_stale_sources(Duration::ZERO).await.unwrap();
    let current = db.begin_indexing(&source.id).await.unwrap();

    let err = db
        .commit_index(&stale, &index, &index.stats(), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::LeaseLost(id) if id == source.id));
    assert_eq!(db.index_counts(&source.id).await.unwrap().pages, 0);
    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.status(), Ok(IndexStatus::Indexing));
    assert_eq!(stored.index_generation, 0);

    let generation = db
        .commit_index(&current, &index, &index.stats(), 100)
        .await
        .expect("current lease commits");
    assert_eq!(generation, 1);
    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.status(), Ok(IndexStatus::Indexed));
    assert!(stored.lease_id.is_none());
}

#[tokio::test]
async fn test_recovered_lease_cannot_commit() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Recovered").await;
    let index = build_index(text(sample_rulebook()), &IndexingConfig::default()).unwrap();

    let stale = db.begin_indexing(&source.id).await.unwrap();
    db.recover_stale_sources(Duration::ZERO).await.unwrap();

    let err = db
        .commit_index(&stale, &index, &index.stats(), 100)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SourceError::InvalidTransition {
            from: IndexStatus::Failed,
            to: IndexStatus::Indexed,
            ..
        }
    ));
    assert_eq!(db.index_counts(&source.id).await.unwrap().tables, 0);
}

#[tokio::test]
async fn test_failed_commit_keeps_previous_index() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Saving").await;
    let indexer = create_test_indexer(&db);

    indexer.index_source(&source.id, text(roll_table_pages(3))).await.unwrap();
    let before = db.require_source(&source.id).await.unwrap();
    let counts_before = db.index_counts(&source.id).await.unwrap();
    let chunks_before = db.list_chunks(&source.id).await.unwrap().len();
    let datasets_before = db.list_datasets(&source.id).await.unwrap().len();

    sqlx::query(
        r#"
        CREATE TRIGGER fail_second_generation BEFORE INSERT ON rule_tables
        WHEN NEW.generation > 1
        BEGIN
            SELECT RAISE(ABORT, 'disk full');
        END
        "#,
    )
    .execute(db.pool())
    .await
    .unwrap();

    let outcome = indexer
        .index_source(&source.id, text(roll_table_pages(5)))
        .await
        .expect("commit failures are reported as outcomes");
    let IndexOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.stage, PipelineStage::Saving);
    assert!(error.message.contains("disk full"), "{}", error.message);

    let after = db.require_source(&source.id).await.unwrap();
    assert_eq!(after.status(), Ok(IndexStatus::Failed));
    assert_eq!(after.index_generation, before.index_generation);
    assert_eq!(after.stats().unwrap(), before.stats().unwrap());
    assert_eq!(after.last_indexed_at, before.last_indexed_at);
    assert!(after.lease_id.is_none());
    assert_eq!(after.error().unwrap().map(|e| e.stage), Some(PipelineStage::Saving));

    assert_eq!(db.index_counts(&source.id).await.unwrap(), counts_before);
    let tables = db.list_tables(&source.id).await.unwrap();
    assert_eq!(tables.len(), 3);
    assert!(tables.iter().all(|t| t.generation == 1));
    assert_eq!(db.list_chunks(&source.id).await.unwrap().len(), chunks_before);
    assert_eq!(db.list_datasets(&source.id).await.unwrap().len(), datasets_before);
}

#[tokio::test]
async fn test_delete_cascades_to_index() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Cascade").await;
    create_test_indexer(&db)
        .index_source(&source.id, text(sample_rulebook()))
        .await
        .unwrap();
    assert!(db.index_counts(&source.id).await.unwrap().tables > 0);

    db.delete_source(&source.id).await.unwrap();
    let counts = db.index_counts(&source.id).await.unwrap();
    assert_eq!(counts, Default::default());
}
