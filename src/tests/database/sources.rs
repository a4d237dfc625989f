//! Source Registry Tests
//!
//! CRUD, the `indexing` lease and stale lease recovery.

use std::time::Duration;

use crate::database::{
    IndexLease, IndexStatus, SourceError, SourceOps, SourceRecord, SourceType, ABANDONED_RUN_MESSAGE,
};
use crate::ingestion::{IndexError, PipelineStage};
use crate::tests::common::{create_test_db, create_test_source};

// =============================================================================
// Basic CRUD Tests
// =============================================================================

#[tokio::test]
async fn test_create_and_get_source() {
    let (db, _temp) = create_test_db().await;

    let tags = vec!["core".to_string(), "mordheim".to_string()];
    let source = SourceRecord::new(Some("camp-1".to_string()), SourceType::Pdf, "Mordheim Rulebook", &tags);
    db.create_source(&source).await.expect("Failed to create source");

    let retrieved = db
        .get_source(&source.id)
        .await
        .expect("Failed to get source")
        .expect("Source not found");

    assert_eq!(retrieved.title, "Mordheim Rulebook");
    assert_eq!(retrieved.kind(), Ok(SourceType::Pdf));
    assert_eq!(retrieved.status(), Ok(IndexStatus::NotIndexed));
    assert_eq!(retrieved.tag_list().unwrap(), tags);
    assert!(retrieved.indexing_started_at.is_none());
}

#[tokio::test]
async fn test_get_missing_source() {
    let (db, _temp) = create_test_db().await;

    assert!(db.get_source("nope").await.unwrap().is_none());
    assert!(matches!(
        db.require_source("nope").await,
        Err(SourceError::NotFound(id)) if id == "nope"
    ));
}

#[tokio::test]
async fn test_list_sources_by_campaign() {
    let (db, _temp) = create_test_db().await;

    create_test_source(&db, "First").await;
    create_test_source(&db, "Second").await;
    let other = SourceRecord::new(Some("camp-other".to_string()), SourceType::PastedText, "Other", &[]);
    db.create_source(&other).await.unwrap();

    assert_eq!(db.list_sources(None).await.unwrap().len(), 3);
    let in_campaign = db.list_sources(Some("camp-test")).await.unwrap();
    assert_eq!(in_campaign.len(), 2);
    assert!(in_campaign.iter().all(|s| s.campaign_id.as_deref() == Some("camp-test")));
}

#[tokio::test]
async fn test_update_metadata() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Draft").await;

    let tags = vec!["house-rules".to_string()];
    let updated = db
        .update_source_metadata(&source.id, Some("Final"), Some(tags.as_slice()))
        .await
        .expect("Failed to update");
    assert_eq!(updated.title, "Final");

    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.title, "Final");
    assert_eq!(stored.tag_list().unwrap(), tags);
    assert_eq!(stored.status(), Ok(IndexStatus::NotIndexed));

    let title_only = db.update_source_metadata(&source.id, Some("Again"), None).await.unwrap();
    assert_eq!(title_only.tag_list().unwrap(), tags);
}

#[tokio::test]
async fn test_delete_source() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Doomed").await;

    assert!(db.delete_source(&source.id).await.unwrap());
    assert!(!db.delete_source(&source.id).await.unwrap());
    assert!(db.get_source(&source.id).await.unwrap().is_none());
}

// =============================================================================
// Lease Tests
// =============================================================================

#[tokio::test]
async fn test_begin_indexing_takes_lease() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Lease").await;

    let lease = db.begin_indexing(&source.id).await.expect("Failed to take lease");
    assert_eq!(lease.source_id, source.id);

    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.status(), Ok(IndexStatus::Indexing));
    assert_eq!(stored.lease_id.as_deref(), Some(lease.lease_id.as_str()));
    assert_eq!(stored.indexing_started_at.as_deref(), Some(lease.started_at.as_str()));
}

#[tokio::test]
async fn test_second_lease_rejected() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Busy").await;

    db.begin_indexing(&source.id).await.unwrap();
    let err = db.begin_indexing(&source.id).await.unwrap_err();
    assert!(matches!(err, SourceError::AlreadyIndexing(id) if id == source.id));
}

#[tokio::test]
async fn test_concurrent_leases_only_one_wins() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Race").await;

    let (a, b) = tokio::join!(db.begin_indexing(&source.id), db.begin_indexing(&source.id));
    assert_eq!(
        [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "exactly one run may hold the lease"
    );
}

#[tokio::test]
async fn test_begin_indexing_missing_source() {
    let (db, _temp) = create_test_db().await;
    assert!(matches!(
        db.begin_indexing("ghost").await,
        Err(SourceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_mark_failed_requires_lease() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Idle").await;

    let error = IndexError::new(PipelineStage::Tables, "boom");
    let unleased = IndexLease {
        source_id: source.id.clone(),
        lease_id: "not-a-lease".to_string(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };
    let err = db.mark_failed(&unleased, &error).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::InvalidTransition {
            from: IndexStatus::NotIndexed,
            to: IndexStatus::Failed,
            ..
        }
    ));

    let lease = db.begin_indexing(&source.id).await.unwrap();
    db.mark_failed(&lease, &error).await.expect("Failed to mark failed");

    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.status(), Ok(IndexStatus::Failed));
    assert!(stored.indexing_started_at.is_none());
    assert!(stored.lease_id.is_none());
    let recorded = stored.error().unwrap().expect("error recorded");
    assert_eq!(recorded.stage, PipelineStage::Tables);
    assert_eq!(recorded.message, "boom");
}

#[tokio::test]
async fn test_failed_source_can_be_leased_again() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Retry").await;

    let first = db.begin_indexing(&source.id).await.unwrap();
    db.mark_failed(&first, &IndexError::new(PipelineStage::Parsing, "bad"))
        .await
        .unwrap();

    let second = db.begin_indexing(&source.id).await.expect("Failed to re-lease");
    assert_ne!(second.lease_id, first.lease_id);
    assert_eq!(
        db.require_source(&source.id).await.unwrap().status(),
        Ok(IndexStatus::Indexing)
    );
}

#[tokio::test]
async fn test_mark_failed_with_replaced_lease_is_refused() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Replaced").await;

    let stale = db.begin_indexing(&source.id).await.unwrap();
    db.recover_stale_sources(Duration::ZERO).await.unwrap();
    let current = db.begin_indexing(&source.id).await.unwrap();

    let err = db
        .mark_failed(&stale, &IndexError::new(PipelineStage::Tables, "late"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::LeaseLost(id) if id == source.id));

    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.status(), Ok(IndexStatus::Indexing));
    assert_eq!(stored.lease_id, Some(current.lease_id));
}

// =============================================================================
// Stale Recovery Tests
// =============================================================================

#[tokio::test]
async fn test_recover_stale_lease() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Abandoned").await;
    db.begin_indexing(&source.id).await.unwrap();

    let recovered = db.recover_stale_sources(Duration::ZERO).await.unwrap();
    assert_eq!(recovered, vec![source.id.clone()]);

    let stored = db.require_source(&source.id).await.unwrap();
    assert_eq!(stored.status(), Ok(IndexStatus::Failed));
    assert!(stored.lease_id.is_none());
    let error = stored.error().unwrap().expect("error recorded");
    assert_eq!(error.stage, PipelineStage::Indexing);
    assert_eq!(error.message, ABANDONED_RUN_MESSAGE);
}

#[tokio::test]
async fn test_fresh_lease_not_recovered() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Running").await;
    db.begin_indexing(&source.id).await.unwrap();

    let recovered = db.recover_stale_sources(Duration::from_secs(3600)).await.unwrap();
    assert!(recovered.is_empty());
    assert_eq!(
        db.require_source(&source.id).await.unwrap().status(),
        Ok(IndexStatus::Indexing)
    );
}

#[tokio::test]
async fn test_lease_without_timestamp_is_recovered() {
    let (db, _temp) = create_test_db().await;
    let source = create_test_source(&db, "Orphan").await;

    sqlx::query("UPDATE sources SET index_status = 'indexing', indexing_started_at = NULL WHERE id = ?")
        .bind(&source.id)
        .execute(db.pool())
        .await
        .unwrap();

    let recovered = db.recover_stale_sources(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(recovered, vec![source.id]);
}

#[tokio::test]
async fn test_recovery_ignores_idle_sources() {
    let (db, _temp) = create_test_db().await;
    create_test_source(&db, "Idle").await;

    assert!(db.recover_stale_sources(Duration::ZERO).await.unwrap().is_empty());
}
