//! Janitor policies: soft deletion, vacuums and payload retention.

mod common;

use common::*;
use pathrank_core::{PathPayload, new_graph_key};
use pathrank_store::RankingTable;
use sqlx::types::Json;
use time::{Duration, OffsetDateTime};

#[tokio::test]
async fn test_soft_delete_marks_rows_of_hidden_uploads() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        // 92 is no longer visible at the tip of repo 53.
        store.set_visible_uploads(53, &[91]).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let counts = store
            .soft_delete_stale(RankingTable::References, &root_key(), 100, Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(counts.scanned, 6);
        assert_eq!(counts.altered, 1);
        assert_eq!(
            store.count_rows(RankingTable::References, &root_key()).await.unwrap(),
            (5, 1)
        );

        // Everything was just scanned, so nothing is due again within the threshold.
        let again = store
            .soft_delete_stale(RankingTable::References, &root_key(), 100, Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(again.scanned, 0);

        // Past the threshold the live rows are rescanned and stay live.
        let later = store
            .soft_delete_stale(
                RankingTable::References,
                &root_key(),
                100,
                Duration::hours(1),
                now + Duration::hours(2),
            )
            .await
            .unwrap();
        assert_eq!((later.scanned, later.altered), (5, 0));
    })
    .await;
}

#[tokio::test]
async fn test_soft_delete_respects_batch_size() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        let counts = store
            .soft_delete_stale(
                RankingTable::ExportedUploads,
                &root_key(),
                3,
                Duration::hours(1),
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();
        assert_eq!(counts.scanned, 3);
        assert_eq!(counts.altered, 0);
    })
    .await;
}

#[tokio::test]
async fn test_vacuum_waits_for_epochs_that_can_see_deleted_rows() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        let started = OffsetDateTime::now_utc();
        let key = epoch(1);
        store.start_mapper_phase(&key, started).await.unwrap();

        store.set_visible_uploads(53, &[91]).await.unwrap();
        let deleted_at = started + Duration::seconds(1);
        for table in [RankingTable::References, RankingTable::ExportedUploads] {
            store
                .soft_delete_stale(table, &root_key(), 100, Duration::hours(1), deleted_at)
                .await
                .unwrap();
        }

        // The running epoch started before the delete, so it still reads the row.
        let blocked = store
            .vacuum_deleted(RankingTable::References, &root_key(), 100)
            .await
            .unwrap();
        assert_eq!(blocked.altered, 0);

        drain_mappers(&store, &key, 100).await;
        let progress = store.progress(&key).await.unwrap().unwrap();
        assert_eq!(progress.num_reference_records_processed, 6);

        // The export still has a child row until the reference row is gone.
        let export_blocked = store
            .vacuum_deleted(RankingTable::ExportedUploads, &root_key(), 100)
            .await
            .unwrap();
        assert_eq!(export_blocked.altered, 0);

        let refs = store
            .vacuum_deleted(RankingTable::References, &root_key(), 100)
            .await
            .unwrap();
        assert_eq!(refs.altered, 1);
        let exports = store
            .vacuum_deleted(RankingTable::ExportedUploads, &root_key(), 100)
            .await
            .unwrap();
        assert_eq!(exports.altered, 1);

        assert_eq!(
            store.count_rows(RankingTable::References, &root_key()).await.unwrap(),
            (5, 0)
        );
    })
    .await;
}

#[tokio::test]
async fn test_vacuum_abandoned_removes_other_roots() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        store
            .start_mapper_phase(&epoch(1), OffsetDateTime::now_utc())
            .await
            .unwrap();

        // Nothing belongs to another root yet.
        let none = store.vacuum_abandoned(&root_key(), 1000).await.unwrap();
        assert_eq!(none.altered, 0);

        // 7 exports, 4 definitions, 6 references and 1 progress row.
        let renamed = new_graph_key("renamed");
        let counts = store.vacuum_abandoned(&renamed, 1000).await.unwrap();
        assert_eq!(counts.altered, 18);

        for table in RankingTable::ALL {
            assert_eq!(store.count_rows(table, &root_key()).await.unwrap(), (0, 0));
        }
        assert!(store.summaries().await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_vacuum_stale_graphs_keeps_current_and_later_epochs() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        run_epoch(&store, &epoch(1)).await;

        let running = epoch(2);
        store
            .start_mapper_phase(&running, OffsetDateTime::now_utc())
            .await
            .unwrap();
        store
            .insert_path_count_inputs(&running, 2, OffsetDateTime::now_utc())
            .await
            .unwrap();

        // Seen from epoch 1, the running epoch 2 lies ahead and is kept.
        let noop = store.vacuum_stale_graphs(&epoch(1), 1000).await.unwrap();
        assert_eq!(noop.altered, 0);
        assert!(store.progress(&running).await.unwrap().is_some());

        let counts = store.vacuum_stale_graphs(&running, 1000).await.unwrap();
        assert_eq!(counts.altered, 10, "4 inputs and 6 markers of epoch 1");

        let finished = store.count_epoch_rows(&epoch(1)).await.unwrap();
        assert_eq!(finished, Default::default());
        let still_running = store.count_epoch_rows(&running).await.unwrap();
        assert_eq!(still_running.references_processed, 2);
        assert!(store.progress(&running).await.unwrap().is_some());
    })
    .await;
}

#[tokio::test]
async fn test_abandoned_epoch_stops_blocking_vacuum() {
    run_store_test_both(|store| async move {
        seed_shadowing_scenario(&store).await;
        let started = OffsetDateTime::now_utc();
        let abandoned = epoch(1);
        store.start_mapper_phase(&abandoned, started).await.unwrap();
        store
            .insert_path_count_inputs(&abandoned, 2, started)
            .await
            .unwrap();
        assert!(store.count_epoch_rows(&abandoned).await.unwrap().references_processed > 0);

        let current = epoch(2);
        run_epoch(&store, &current).await;

        store.set_visible_uploads(53, &[91]).await.unwrap();
        let deleted = store
            .soft_delete_stale(
                RankingTable::References,
                &root_key(),
                100,
                Duration::hours(1),
                started + Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(deleted.altered, 1);

        let blocked = store
            .vacuum_deleted(RankingTable::References, &root_key(), 100)
            .await
            .unwrap();
        assert_eq!(blocked.altered, 0, "epoch 1 never finished mapping");

        let swept = store.vacuum_stale_graphs(&current, 1000).await.unwrap();
        assert!(swept.altered > 0);
        assert!(store.progress(&abandoned).await.unwrap().is_none());
        assert_eq!(store.count_epoch_rows(&abandoned).await.unwrap(), Default::default());
        assert!(store.progress(&current).await.unwrap().is_some());

        let vacuumed = store
            .vacuum_deleted(RankingTable::References, &root_key(), 100)
            .await
            .unwrap();
        assert_eq!(vacuumed.altered, 1);
    })
    .await;
}

async fn insert_rank(pool: &sqlx::Pool<sqlx::Sqlite>, repository_id: i64, bucket: i64) {
    sqlx::query(
        "INSERT INTO path_ranks (repository_id, graph_key, payload, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(repository_id)
    .bind(epoch(bucket).as_str())
    .bind(Json(PathPayload::new()))
    .bind(OffsetDateTime::now_utc())
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_vacuum_stale_ranks_keeps_current_and_previous_epoch() {
    let test_store = TestStore::new().await.unwrap();
    let store = test_store.store();

    for repository_id in 1..=5 {
        insert_rank(test_store.pool(), repository_id, 123).await;
    }
    insert_rank(test_store.pool(), 6, 234).await;
    insert_rank(test_store.pool(), 7, 345).await;
    insert_rank(test_store.pool(), 8, 456).await;

    let counts = store.vacuum_stale_ranks(&epoch(456), 100).await.unwrap();
    assert_eq!(counts.altered, 6);

    assert!(store.get_path_ranks(7).await.unwrap().is_some());
    assert!(store.get_path_ranks(8).await.unwrap().is_some());
    for repository_id in 1..=6 {
        assert!(store.get_path_ranks(repository_id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_postgres_vacuum_stale_ranks_keeps_current_and_previous_epoch() {
    let Some(test_store) = postgres_or_skip().await else {
        return;
    };
    let store = test_store.store();

    let keys = [(1, 123), (2, 123), (3, 123), (4, 123), (5, 123), (6, 234), (7, 345), (8, 456)];
    for (repository_id, bucket) in keys {
        sqlx::query(
            "INSERT INTO path_ranks (repository_id, graph_key, payload, updated_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(repository_id as i64)
        .bind(epoch(bucket).as_str())
        .bind(Json(PathPayload::new()))
        .bind(OffsetDateTime::now_utc())
        .execute(test_store.pool())
        .await
        .unwrap();
    }

    let counts = store.vacuum_stale_ranks(&epoch(456), 2).await.unwrap();
    assert_eq!(counts.altered, 2, "batch size bounds each call");
    let rest = store.vacuum_stale_ranks(&epoch(456), 100).await.unwrap();
    assert_eq!(rest.altered, 4);

    assert!(store.get_path_ranks(7).await.unwrap().is_some());
    assert!(store.get_path_ranks(8).await.unwrap().is_some());
}
