//! Integration tests for the ranking pipeline against both store backends.

mod common;

use common::*;
use pathrank_core::{BatchCounts, ProgressState};
use pathrank_store::models::UploadRow;
use pathrank_store::repos::ingest::ExportSymbols;
use pathrank_store::{RankingTable, StoreError};
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};

fn payload_of(row: &pathrank_store::models::PathRanksRow) -> BTreeMap<String, i64> {
    row.payload.0.0.clone()
}

fn counts(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::test]
async fn test_export_claims_each_upload_once_per_root() {
    run_store_test_both(|store| async move {
        add_repo(&store, 1, 10).await;
        add_repo(&store, 2, 20).await;
        add_visible_uploads(
            &store,
            &[UploadRow::completed(10, 1), UploadRow::completed(20, 2)],
        )
        .await;
        // Not visible at tip
        store.insert_upload(&UploadRow::completed(11, 1)).await.unwrap();

        let first = store
            .select_uploads_for_export(&root_key(), "ranking", 10, OffsetDateTime::now_utc())
            .await
            .unwrap();
        let uploads: Vec<i64> = first.iter().map(|r| r.upload_id).collect();
        assert_eq!(uploads, vec![10, 20]);
        assert!(first.iter().all(|r| r.graph_key == ROOT && r.object_prefix == "ranking"));

        let again = store
            .select_uploads_for_export(&root_key(), "ranking", 10, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(again.is_empty());

        let other_root = pathrank_core::new_graph_key("other");
        let exported = store
            .select_uploads_for_export(&other_root, "ranking", 1, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(exported.len(), 1, "batch size bounds the claim");

        let fetched = store.get_exported_upload(first[0].id).await.unwrap().unwrap();
        assert_eq!(fetched.upload_id, 10);
    })
    .await;
}

#[tokio::test]
async fn test_export_skips_deleted_repositories() {
    run_store_test_both(|store| async move {
        add_repo(&store, 1, 10).await;
        add_visible_uploads(&store, &[UploadRow::completed(10, 1)]).await;
        store.soft_delete_repo(1, OffsetDateTime::now_utc()).await.unwrap();

        let exported = store
            .select_uploads_for_export(&root_key(), "ranking", 10, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(exported.is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_ingest_requires_known_export() {
    run_store_test_both(|store| async move {
        let mut stream = vec![("foo".to_string(), "foo.go".to_string())].into_iter();
        let err = store
            .insert_definitions_for_ranking(&root_key(), 10, 9999, &mut stream)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let mut names = vec!["foo".to_string()].into_iter();
        let err = store
            .insert_references_for_ranking(&root_key(), 10, 9999, &mut names)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    })
    .await;
}

#[tokio::test]
async fn test_ingest_groups_rows_by_batch_size() {
    run_store_test_both(|store| async move {
        add_repo(&store, 1, 10).await;
        add_visible_uploads(&store, &[UploadRow::completed(10, 1)]).await;
        let exports = export_all(&store).await;

        let mut names = ["a", "b", "a", "c", "d"].iter().map(|s| s.to_string());
        let rows = store
            .insert_references_for_ranking(&root_key(), 2, exports[&10], &mut names)
            .await
            .unwrap();
        assert_eq!(rows, 3);

        let mut defs = (0..5).map(|i| (format!("sym{i}"), format!("file{i}.go")));
        let inserted = store
            .insert_definitions_for_ranking(&root_key(), 2, exports[&10], &mut defs)
            .await
            .unwrap();
        assert_eq!(inserted, 5);

        let (live, deleted) = store
            .count_rows(RankingTable::References, &root_key())
            .await
            .unwrap();
        assert_eq!((live, deleted), (3, 0));
    })
    .await;
}

#[tokio::test]
async fn test_reference_shadowing_across_and_within_batches() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        let key = epoch(123);
        assert!(store.start_mapper_phase(&key, OffsetDateTime::now_utc()).await.unwrap());

        // First batch holds 90, 91, 92 and 93; 94 lands alone in the second.
        let first = store
            .insert_path_count_inputs(&key, 5, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(first.scanned, 5);
        let second = store
            .insert_path_count_inputs(&key, 5, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(second, BatchCounts::new(1, 0), "94 is shadowed by 93");

        drain_mappers(&store, &key, 5).await;
        drain_reducer(&store, &key, 100).await;

        let repo50 = store.get_path_ranks(50).await.unwrap().unwrap();
        assert_eq!(payload_of(&repo50), counts(&[("bar.go", 2), ("foo.go", 2)]));
        let repo51 = store.get_path_ranks(51).await.unwrap().unwrap();
        assert_eq!(payload_of(&repo51), counts(&[("baz.go", 1), ("bonk.go", 1)]));
        assert!(store.get_path_ranks(52).await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_mapper_is_idempotent_once_complete() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        let key = epoch(7);
        store.start_mapper_phase(&key, OffsetDateTime::now_utc()).await.unwrap();
        drain_mappers(&store, &key, 2).await;

        let before = store.list_path_count_inputs(&key).await.unwrap();
        let again = store
            .insert_path_count_inputs(&key, 100, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(again, BatchCounts::default());
        let after = store.list_path_count_inputs(&key).await.unwrap();
        assert_eq!(before.len(), after.len());

        let epoch_rows = store.count_epoch_rows(&key).await.unwrap();
        assert_eq!(epoch_rows.references_processed, 6);

        let progress = store.progress(&key).await.unwrap().unwrap();
        assert_eq!(progress.num_reference_records_total, 6);
        assert_eq!(progress.num_reference_records_processed, 6);
        assert_eq!(progress.state(), ProgressState::ReducerPending);
    })
    .await;
}

#[tokio::test]
async fn test_start_mapper_phase_snapshots_watermarks_once() {
    run_store_test_both(|store| async move {
        let exports = seed_shadowing_scenario(&store).await;
        let key = epoch(9);
        assert!(store.start_mapper_phase(&key, OffsetDateTime::now_utc()).await.unwrap());
        assert!(!store.start_mapper_phase(&key, OffsetDateTime::now_utc()).await.unwrap());

        // Inserted after the snapshot: ignored by this epoch.
        ingest_references(&store, exports[&43], &["foo"]).await;

        drain_mappers(&store, &key, 100).await;
        let epoch_rows = store.count_epoch_rows(&key).await.unwrap();
        assert_eq!(epoch_rows.references_processed, 6);
    })
    .await;
}

#[tokio::test]
async fn test_reducer_waits_for_both_mappers() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        let key = epoch(11);
        let now = OffsetDateTime::now_utc();

        assert!(!store.start_reducer_phase(&key, now).await.unwrap(), "no progress row");
        store.start_mapper_phase(&key, now).await.unwrap();
        assert!(!store.start_reducer_phase(&key, now).await.unwrap());
        assert_eq!(
            store.insert_path_ranks(&key, 100, now).await.unwrap(),
            BatchCounts::default(),
            "reducer is inert before it starts"
        );

        drain_mappers(&store, &key, 100).await;
        let total = store.list_path_count_inputs(&key).await.unwrap().len() as i64;
        assert!(store.start_reducer_phase(&key, now).await.unwrap());
        assert!(!store.start_reducer_phase(&key, now).await.unwrap());

        let progress = store.progress(&key).await.unwrap().unwrap();
        assert_eq!(progress.num_count_records_total, total);
        assert_eq!(progress.state(), ProgressState::Reducing);
    })
    .await;
}

#[tokio::test]
async fn test_seed_paths_appear_with_zero_counts() {
    run_store_test_both(|store| async move {
        let exports = seed_shadowing_scenario(&store).await;
        ingest_paths(&store, exports[&42], &["foo.go", "bar.go", "README.md"]).await;
        ingest_paths(&store, exports[&43], &["baz.go"]).await;

        run_epoch(&store, &epoch(1)).await;

        let repo50 = store.get_path_ranks(50).await.unwrap().unwrap();
        assert_eq!(
            payload_of(&repo50),
            counts(&[("README.md", 0), ("bar.go", 2), ("foo.go", 2)])
        );

        let progress = store.progress(&epoch(1)).await.unwrap().unwrap();
        assert_eq!(progress.num_path_records_total, 2);
        assert_eq!(progress.num_path_records_processed, 2);
        assert_eq!(progress.state(), ProgressState::Done);
    })
    .await;
}

#[tokio::test]
async fn test_new_epoch_replaces_previous_payload() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        run_epoch(&store, &epoch(1)).await;
        run_epoch(&store, &epoch(2)).await;

        let repo50 = store.get_path_ranks(50).await.unwrap().unwrap();
        assert_eq!(repo50.graph_key, epoch(2).as_str());
        assert_eq!(
            payload_of(&repo50),
            counts(&[("bar.go", 2), ("foo.go", 2)]),
            "counts from epoch 1 must not accumulate into epoch 2"
        );
    })
    .await;
}

#[tokio::test]
async fn test_blocked_and_deleted_repositories_are_not_reduced() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        store.set_repo_blocked(50, true).await.unwrap();
        store.soft_delete_repo(51, OffsetDateTime::now_utc()).await.unwrap();

        run_epoch(&store, &epoch(3)).await;

        assert!(store.get_path_ranks(50).await.unwrap().is_none());
        assert!(store.get_path_ranks(51).await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_summaries_newest_first_and_delete_progress() {
    run_store_test_both(|store| async move {
        let early = OffsetDateTime::now_utc() - Duration::hours(1);
        let late = OffsetDateTime::now_utc();
        store.start_mapper_phase(&epoch(1), early).await.unwrap();
        store.start_mapper_phase(&epoch(2), late).await.unwrap();

        let keys: Vec<String> = store
            .summaries()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.graph_key)
            .collect();
        assert_eq!(keys, vec![epoch(2).as_str().to_string(), epoch(1).as_str().to_string()]);

        assert_eq!(store.delete_ranking_progress(&epoch(1)).await.unwrap(), 1);
        assert!(store.progress(&epoch(1)).await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_invalid_derivative_key_is_rejected() {
    run_store_test_both(|store| async move {
        let bad = pathrank_core::DerivativeGraphKey::from_stored("no-separator");
        let err = store
            .start_mapper_phase(&bad, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Core(_)));
    })
    .await;
}

#[tokio::test]
async fn test_retrieval_queries() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        run_epoch(&store, &epoch(1)).await;

        let ranks = store
            .get_document_ranks(&repo_name(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ranks.get("foo.go"), Some(&2.0));
        assert!(store.get_document_ranks(&repo_name(52)).await.unwrap().is_none());
        assert!(store.get_document_ranks("unknown").await.unwrap().is_none());

        // Stars are 500..540 for repos 50..54.
        assert_eq!(store.get_star_rank(&repo_name(50)).await.unwrap(), 0.0);
        assert_eq!(store.get_star_rank(&repo_name(54)).await.unwrap(), 1.0);
        assert_eq!(store.get_star_rank(&repo_name(52)).await.unwrap(), 0.5);
        assert_eq!(store.get_star_rank("unknown").await.unwrap(), 0.0);

        let mean = store.get_reference_count_statistics().await.unwrap();
        let expected = (3.0_f64.ln() * 2.0 + 2.0_f64.ln() * 2.0) / 4.0;
        assert!((mean - expected).abs() < 1e-9, "mean {mean} != {expected}");

        let updated = store.last_updated_at(&[50, 51, 52]).await.unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.contains_key(&50) && updated.contains_key(&51));
    })
    .await;
}

#[tokio::test]
async fn test_ingest_export_is_atomic_and_runs_once() {
    run_store_test_both(|store| async move {
        add_repo(&store, 1, 10).await;
        add_visible_uploads(&store, &[UploadRow::completed(10, 1)]).await;
        let exports = export_all(&store).await;
        let export_id = exports[&10];

        let mut definitions = vec![("foo".to_string(), "foo.go".to_string())].into_iter();
        let mut references = vec!["bar".to_string(), "baz".to_string()].into_iter();
        let mut paths = vec!["foo.go".to_string()].into_iter();
        let now = OffsetDateTime::now_utc();
        let inserted = store
            .ingest_export(
                &root_key(),
                100,
                export_id,
                ExportSymbols {
                    definitions: &mut definitions,
                    references: &mut references,
                    paths: &mut paths,
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(inserted, Some(3));

        let row = store.get_exported_upload(export_id).await.unwrap().unwrap();
        assert!(row.ingested_at.is_some());

        let mut definitions = vec![("foo".to_string(), "foo.go".to_string())].into_iter();
        let mut references = std::iter::empty::<String>();
        let mut paths = std::iter::empty::<String>();
        let again = store
            .ingest_export(
                &root_key(),
                100,
                export_id,
                ExportSymbols {
                    definitions: &mut definitions,
                    references: &mut references,
                    paths: &mut paths,
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(again, None, "an ingested export is never ingested twice");
        assert_eq!(
            store.count_rows(RankingTable::Definitions, &root_key()).await.unwrap(),
            (1, 0)
        );

        let mut definitions = std::iter::empty::<(String, String)>();
        let mut references = std::iter::empty::<String>();
        let mut paths = std::iter::empty::<String>();
        let err = store
            .ingest_export(
                &root_key(),
                100,
                9999,
                ExportSymbols {
                    definitions: &mut definitions,
                    references: &mut references,
                    paths: &mut paths,
                },
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    })
    .await;
}

#[tokio::test]
async fn test_pending_exports_are_reclaimed_after_retry_window() {
    run_store_test_both(|store| async move {
        add_repo(&store, 1, 10).await;
        add_visible_uploads(
            &store,
            &[UploadRow::completed(10, 1), UploadRow::completed(11, 1)],
        )
        .await;
        let claimed_at = OffsetDateTime::now_utc() - Duration::hours(1);
        let claimed = store
            .select_uploads_for_export(&root_key(), "ranking", 10, claimed_at)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 2);
        let first = claimed
            .iter()
            .find(|r| r.upload_id == 10)
            .map(|r| r.id)
            .unwrap();

        let mut definitions = std::iter::empty::<(String, String)>();
        let mut references = vec!["foo".to_string()].into_iter();
        let mut paths = std::iter::empty::<String>();
        store
            .ingest_export(
                &root_key(),
                100,
                first,
                ExportSymbols {
                    definitions: &mut definitions,
                    references: &mut references,
                    paths: &mut paths,
                },
                claimed_at,
            )
            .await
            .unwrap();

        // Claimed after the cutoff: still owned by its exporter.
        let now = OffsetDateTime::now_utc();
        let early = store
            .reclaim_pending_exports(&root_key(), 10, claimed_at - Duration::minutes(5), now)
            .await
            .unwrap();
        assert!(early.is_empty());

        let reclaimed = store
            .reclaim_pending_exports(&root_key(), 10, now - Duration::minutes(5), now)
            .await
            .unwrap();
        let ids: Vec<i64> = reclaimed.iter().map(|r| r.upload_id).collect();
        assert_eq!(ids, vec![11], "only the export that was never ingested comes back");
        assert!(reclaimed[0].claimed_at.is_some_and(|t| t > claimed_at));

        let again = store
            .reclaim_pending_exports(&root_key(), 10, now - Duration::minutes(5), now)
            .await
            .unwrap();
        assert!(again.is_empty(), "a fresh claim hides the export until the window passes");
    })
    .await;
}

#[tokio::test]
async fn test_failed_ingest_leaves_export_pending() {
    let test_store = TestStore::new().await.unwrap();
    let store = test_store.store();
    add_repo(&store, 1, 10).await;
    add_visible_uploads(&store, &[UploadRow::completed(10, 1)]).await;
    let export_id = export_all(&store).await[&10];

    sqlx::query(
        r#"
        CREATE TRIGGER reject_paths BEFORE INSERT ON ranking_initial_path_ranks
        BEGIN SELECT RAISE(ABORT, 'disk full'); END
        "#,
    )
    .execute(test_store.pool())
    .await
    .unwrap();

    let ingest = move |store: std::sync::Arc<dyn pathrank_store::RankingStore>| async move {
        let mut definitions = vec![("foo".to_string(), "foo.go".to_string())].into_iter();
        let mut references = vec!["foo".to_string()].into_iter();
        let mut paths = vec!["foo.go".to_string()].into_iter();
        store
            .ingest_export(
                &root_key(),
                100,
                export_id,
                ExportSymbols {
                    definitions: &mut definitions,
                    references: &mut references,
                    paths: &mut paths,
                },
                OffsetDateTime::now_utc(),
            )
            .await
    };

    assert!(ingest(store.clone()).await.is_err());
    assert_eq!(
        store.count_rows(RankingTable::Definitions, &root_key()).await.unwrap(),
        (0, 0)
    );
    assert_eq!(
        store.count_rows(RankingTable::References, &root_key()).await.unwrap(),
        (0, 0)
    );
    let row = store.get_exported_upload(export_id).await.unwrap().unwrap();
    assert!(row.ingested_at.is_none());

    sqlx::query("DROP TRIGGER reject_paths")
        .execute(test_store.pool())
        .await
        .unwrap();
    assert_eq!(ingest(store.clone()).await.unwrap(), Some(3));
    assert_eq!(
        store.count_rows(RankingTable::References, &root_key()).await.unwrap(),
        (1, 0)
    );
}

#[tokio::test]
async fn test_winner_rows_split_across_batches_all_count() {
    run_store_test_both(|store| async move {
        add_repo(&store, 50, 500).await;
        add_repo(&store, 53, 530).await;
        let now = OffsetDateTime::now_utc();
        let mut younger = UploadRow::completed(91, 53);
        younger.finished_at = Some(now - Duration::minutes(10));
        let mut older = UploadRow::completed(92, 53);
        older.finished_at = Some(now - Duration::minutes(20));
        add_visible_uploads(&store, &[UploadRow::completed(42, 50), younger, older]).await;

        let exports = export_all(&store).await;
        ingest_definitions(&store, exports[&42], &[("foo", "foo.go"), ("bar", "bar.go")]).await;
        // 91 wins the first batch against 92; its `bar` row follows in a later batch.
        ingest_references(&store, exports[&91], &["foo"]).await;
        ingest_references(&store, exports[&92], &["foo"]).await;
        ingest_references(&store, exports[&91], &["bar"]).await;

        for (bucket, batch_size) in [(1, 1), (2, 2), (3, 100)] {
            let key = epoch(bucket);
            store.start_mapper_phase(&key, OffsetDateTime::now_utc()).await.unwrap();
            drain_mappers(&store, &key, batch_size).await;
            drain_reducer(&store, &key, 100).await;

            let repo50 = store.get_path_ranks(50).await.unwrap().unwrap();
            assert_eq!(
                payload_of(&repo50),
                counts(&[("bar.go", 1), ("foo.go", 1)]),
                "batch size {batch_size}"
            );
        }
    })
    .await;
}

fn input_set(rows: &[pathrank_store::models::PathCountInputRow]) -> Vec<(i64, String, i64)> {
    let mut set: Vec<_> = rows
        .iter()
        .map(|r| (r.repository_id, r.document_path.clone(), r.count))
        .collect();
    set.sort();
    set
}

#[tokio::test]
async fn test_batch_retried_after_crash_counts_once() {
    let test_store = TestStore::new().await.unwrap();
    let store = test_store.store();
    let exports = seed_shadowing_scenario(&store).await;
    ingest_paths(&store, exports[&42], &["foo.go", "README.md"]).await;

    let clean = epoch(1);
    store.start_mapper_phase(&clean, OffsetDateTime::now_utc()).await.unwrap();
    drain_mappers(&store, &clean, 2).await;
    let expected_inputs = input_set(&store.list_path_count_inputs(&clean).await.unwrap());
    drain_reducer(&store, &clean, 2).await;
    let expected_payload = payload_of(&store.get_path_ranks(50).await.unwrap().unwrap());

    let key = epoch(2);
    store.start_mapper_phase(&key, OffsetDateTime::now_utc()).await.unwrap();

    // The mapper writes its processed markers before its inputs; failing the input insert
    // aborts the batch after the markers exist.
    sqlx::query(&format!(
        r#"
        CREATE TRIGGER crash_mapper BEFORE INSERT ON ranking_path_count_inputs
        WHEN NEW.graph_key = '{key}'
        BEGIN SELECT RAISE(ABORT, 'worker crashed'); END
        "#
    ))
    .execute(test_store.pool())
    .await
    .unwrap();
    assert!(
        store
            .insert_path_count_inputs(&key, 2, OffsetDateTime::now_utc())
            .await
            .is_err()
    );
    assert_eq!(store.count_epoch_rows(&key).await.unwrap().references_processed, 0);
    let progress = store.progress(&key).await.unwrap().unwrap();
    assert_eq!(progress.num_reference_records_processed, 0);
    sqlx::query("DROP TRIGGER crash_mapper")
        .execute(test_store.pool())
        .await
        .unwrap();

    drain_mappers(&store, &key, 2).await;
    assert_eq!(
        input_set(&store.list_path_count_inputs(&key).await.unwrap()),
        expected_inputs
    );
    let progress = store.progress(&key).await.unwrap().unwrap();
    assert_eq!(progress.num_reference_records_processed, 6);

    // Same for the reducer: the first payload write fails and the batch is retried.
    sqlx::query(&format!(
        r#"
        CREATE TRIGGER crash_reducer BEFORE UPDATE ON path_ranks
        WHEN NEW.graph_key = '{key}'
        BEGIN SELECT RAISE(ABORT, 'worker crashed'); END
        "#
    ))
    .execute(test_store.pool())
    .await
    .unwrap();
    assert!(store.start_reducer_phase(&key, OffsetDateTime::now_utc()).await.unwrap());
    assert!(
        store
            .insert_path_ranks(&key, 2, OffsetDateTime::now_utc())
            .await
            .is_err()
    );
    sqlx::query("DROP TRIGGER crash_reducer")
        .execute(test_store.pool())
        .await
        .unwrap();

    for _ in 0..100 {
        store.insert_path_ranks(&key, 2, OffsetDateTime::now_utc()).await.unwrap();
        if store.progress(&key).await.unwrap().unwrap().reducer_completed_at.is_some() {
            break;
        }
    }
    let repo50 = store.get_path_ranks(50).await.unwrap().unwrap();
    assert_eq!(repo50.graph_key, key.as_str());
    assert_eq!(payload_of(&repo50), expected_payload);
    let progress = store.progress(&key).await.unwrap().unwrap();
    assert_eq!(progress.num_count_records_processed, progress.num_count_records_total);
}

#[tokio::test]
async fn test_bumped_generation_is_latest() {
    run_store_test_both(|store| async move {
        assert!(store.derivative_graph_key_generation(&root_key()).await.unwrap().is_none());

        let now = OffsetDateTime::now_utc();
        let first = store.bump_derivative_graph_key(&root_key(), now).await.unwrap();
        let second = store.bump_derivative_graph_key(&root_key(), now).await.unwrap();
        assert!(second.id > first.id);

        let other = pathrank_core::new_graph_key("other");
        store.bump_derivative_graph_key(&other, now).await.unwrap();

        let latest = store
            .derivative_graph_key_generation(&root_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.graph_key, ROOT);
    })
    .await;
}

#[tokio::test]
async fn test_coverage_counts_track_exports_and_ranks() {
    run_store_test_both(|store| async move {
        let exports = seed_shadowing_scenario(&store).await;
        // Exported but never ingested.
        add_repo(&store, 55, 0).await;
        add_visible_uploads(&store, &[UploadRow::completed(95, 55)]).await;
        let pending = store
            .select_uploads_for_export(&root_key(), "ranking", 10, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        // Deleted repositories leave the target set.
        add_repo(&store, 56, 0).await;
        add_visible_uploads(&store, &[UploadRow::completed(96, 56)]).await;
        store.soft_delete_repo(56, OffsetDateTime::now_utc()).await.unwrap();

        for (upload_id, export_id) in &exports {
            let mut definitions = std::iter::empty::<(String, String)>();
            let mut references = std::iter::empty::<String>();
            let mut paths = std::iter::empty::<String>();
            let marked = store
                .ingest_export(
                    &root_key(),
                    100,
                    *export_id,
                    ExportSymbols {
                        definitions: &mut definitions,
                        references: &mut references,
                        paths: &mut paths,
                    },
                    OffsetDateTime::now_utc(),
                )
                .await
                .unwrap();
            assert_eq!(marked, Some(0), "upload {upload_id}");
        }

        let key = epoch(4);
        let before = store.coverage_counts(&key).await.unwrap();
        assert_eq!(before.num_target_indexes, 8);
        assert_eq!(before.num_exported_indexes, 7);
        assert_eq!(before.num_repositories_with_current_ranks, 0);

        run_epoch(&store, &key).await;
        let after = store.coverage_counts(&key).await.unwrap();
        assert_eq!(after.num_repositories_with_current_ranks, 2);
        assert_eq!(
            store.coverage_counts(&epoch(5)).await.unwrap().num_repositories_with_current_ranks,
            0
        );
    })
    .await;
}
