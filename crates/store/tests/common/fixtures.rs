//! Fixtures shared by the store integration tests.

use pathrank_core::{
    BatchCounts, DerivativeGraphKey, RootGraphKey, new_derivative_graph_key, new_graph_key,
};
use pathrank_store::RankingStore;
use pathrank_store::models::UploadRow;
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

pub const ROOT: &str = "test";

/// Upper bound on calls while draining a phase, so a stuck phase fails instead of hanging.
const MAX_DRAIN_CALLS: usize = 100;

pub fn root_key() -> RootGraphKey {
    new_graph_key(ROOT)
}

pub fn epoch(bucket: i64) -> DerivativeGraphKey {
    new_derivative_graph_key(ROOT, "", bucket)
}

pub fn repo_name(id: i64) -> String {
    format!("github.com/example/repo-{id}")
}

pub async fn add_repo(store: &Arc<dyn RankingStore>, id: i64, stars: i64) {
    store
        .upsert_repo(id, &repo_name(id), stars)
        .await
        .expect("upsert repo failed");
}

/// Insert uploads and make each one visible at its repository's default-branch tip.
pub async fn add_visible_uploads(store: &Arc<dyn RankingStore>, uploads: &[UploadRow]) {
    let mut visible: HashMap<i64, Vec<i64>> = HashMap::new();
    for upload in uploads {
        store.insert_upload(upload).await.expect("insert upload failed");
        visible.entry(upload.repository_id).or_default().push(upload.id);
    }
    for (repository_id, ids) in visible {
        store
            .set_visible_uploads(repository_id, &ids)
            .await
            .expect("set visible uploads failed");
    }
}

/// Export every eligible upload, returning upload id to exported upload id.
pub async fn export_all(store: &Arc<dyn RankingStore>) -> HashMap<i64, i64> {
    store
        .select_uploads_for_export(&root_key(), "ranking", 1000, OffsetDateTime::now_utc())
        .await
        .expect("export failed")
        .into_iter()
        .map(|row| (row.upload_id, row.id))
        .collect()
}

pub async fn ingest_definitions(store: &Arc<dyn RankingStore>, export_id: i64, defs: &[(&str, &str)]) {
    let mut stream = defs.iter().map(|(s, p)| (s.to_string(), p.to_string()));
    store
        .insert_definitions_for_ranking(&root_key(), 100, export_id, &mut stream)
        .await
        .expect("insert definitions failed");
}

/// Insert one reference row holding `symbols`.
pub async fn ingest_references(store: &Arc<dyn RankingStore>, export_id: i64, symbols: &[&str]) {
    let mut stream = symbols.iter().map(|s| s.to_string());
    store
        .insert_references_for_ranking(&root_key(), 1000, export_id, &mut stream)
        .await
        .expect("insert references failed");
}

pub async fn ingest_paths(store: &Arc<dyn RankingStore>, export_id: i64, paths: &[&str]) {
    let mut stream = paths.iter().map(|s| s.to_string());
    store
        .insert_initial_path_ranks(&root_key(), 1000, export_id, &mut stream)
        .await
        .expect("insert initial paths failed");
}

/// Run both mappers of `key` until each records completion.
pub async fn drain_mappers(
    store: &Arc<dyn RankingStore>,
    key: &DerivativeGraphKey,
    batch_size: u32,
) -> BatchCounts {
    let mut total = BatchCounts::default();
    for _ in 0..MAX_DRAIN_CALLS {
        let now = OffsetDateTime::now_utc();
        total += store
            .insert_path_count_inputs(key, batch_size, now)
            .await
            .expect("reference mapper failed");
        total += store
            .insert_initial_path_counts(key, batch_size, now)
            .await
            .expect("seed mapper failed");

        let progress = store.progress(key).await.unwrap().expect("progress missing");
        if progress.mapper_completed_at.is_some() && progress.seed_mapper_completed_at.is_some() {
            return total;
        }
    }
    panic!("mappers of {key} did not complete");
}

/// Start the reducer of `key` and run it until it records completion.
pub async fn drain_reducer(store: &Arc<dyn RankingStore>, key: &DerivativeGraphKey, batch_size: u32) {
    assert!(
        store
            .start_reducer_phase(key, OffsetDateTime::now_utc())
            .await
            .unwrap(),
        "reducer of {key} did not start"
    );
    for _ in 0..MAX_DRAIN_CALLS {
        store
            .insert_path_ranks(key, batch_size, OffsetDateTime::now_utc())
            .await
            .expect("reducer failed");
        let progress = store.progress(key).await.unwrap().expect("progress missing");
        if progress.reducer_completed_at.is_some() {
            return;
        }
    }
    panic!("reducer of {key} did not complete");
}

/// Run one full epoch: start it, map everything, reduce everything.
pub async fn run_epoch(store: &Arc<dyn RankingStore>, key: &DerivativeGraphKey) {
    store
        .start_mapper_phase(key, OffsetDateTime::now_utc())
        .await
        .expect("start mapper phase failed");
    drain_mappers(store, key, 100).await;
    drain_reducer(store, key, 100).await;
}

/// Two defining repositories and five referencing uploads.
///
/// - 42 (repo 50) defines `foo` in foo.go and `bar` in bar.go
/// - 43 (repo 51) defines `baz` in baz.go and `bonk` in bonk.go
/// - 90 (repo 52) references `foo`, `bar`, then `baz` in a second row
/// - 91 and 92 (repo 53) share a project; 91 finished later
/// - 93 and 94 (repo 54, root `lib/`, indexer `test`) share a project
///
/// Returns upload id to exported upload id. Reference rows are inserted in upload order so
/// that 94's single row has the highest id.
pub async fn seed_shadowing_scenario(store: &Arc<dyn RankingStore>) -> HashMap<i64, i64> {
    for id in 50..=54 {
        add_repo(store, id, id * 10).await;
    }

    let now = OffsetDateTime::now_utc();
    let mut younger = UploadRow::completed(91, 53);
    younger.finished_at = Some(now - Duration::minutes(10));
    let mut older = UploadRow::completed(92, 53);
    older.finished_at = Some(now - Duration::minutes(20));
    let lib = |id: i64| UploadRow {
        root: "lib/".to_string(),
        indexer: "test".to_string(),
        ..UploadRow::completed(id, 54)
    };

    add_visible_uploads(
        store,
        &[
            UploadRow::completed(42, 50),
            UploadRow::completed(43, 51),
            UploadRow::completed(90, 52),
            younger,
            older,
            lib(93),
            lib(94),
        ],
    )
    .await;

    let exports = export_all(store).await;
    assert_eq!(exports.len(), 7);

    ingest_definitions(store, exports[&42], &[("foo", "foo.go"), ("bar", "bar.go")]).await;
    ingest_definitions(store, exports[&43], &[("baz", "baz.go"), ("bonk", "bonk.go")]).await;

    ingest_references(store, exports[&90], &["foo", "bar"]).await;
    ingest_references(store, exports[&90], &["baz"]).await;
    ingest_references(store, exports[&91], &["bonk"]).await;
    ingest_references(store, exports[&92], &["foo", "bar", "baz", "bonk"]).await;
    ingest_references(store, exports[&93], &["foo", "bar"]).await;
    ingest_references(store, exports[&94], &["foo", "bar", "baz", "bonk"]).await;

    exports
}
