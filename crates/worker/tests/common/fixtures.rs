//! Source rows and symbol files shared by the worker tests.

use super::server::TestWorker;
use pathrank_store::models::UploadRow;
use serde_json::json;

pub const LIB_REPO: i64 = 1;
pub const APP_REPO: i64 = 2;
pub const LIB_UPLOAD: i64 = 10;
pub const APP_UPLOAD: i64 = 20;

pub const LIB_NAME: &str = "github.com/acme/lib";
pub const APP_NAME: &str = "github.com/acme/app";

/// A library defining `foo` and `bar`, and an application referencing them plus an
/// unresolved `baz`.
pub async fn seed_library_and_app(worker: &TestWorker) {
    let store = worker.store();
    store.upsert_repo(LIB_REPO, LIB_NAME, 100).await.unwrap();
    store.upsert_repo(APP_REPO, APP_NAME, 10).await.unwrap();

    store
        .insert_upload(&UploadRow::completed(LIB_UPLOAD, LIB_REPO))
        .await
        .unwrap();
    store
        .insert_upload(&UploadRow::completed(APP_UPLOAD, APP_REPO))
        .await
        .unwrap();
    store
        .set_visible_uploads(LIB_REPO, &[LIB_UPLOAD])
        .await
        .unwrap();
    store
        .set_visible_uploads(APP_REPO, &[APP_UPLOAD])
        .await
        .unwrap();

    worker.write_symbols(
        LIB_UPLOAD,
        json!({
            "definitions": [
                {"symbol": "foo", "path": "foo.go"},
                {"symbol": "bar", "path": "bar.go"}
            ],
            "paths": ["foo.go", "bar.go", "README.md"]
        }),
    );
    worker.write_symbols(
        APP_UPLOAD,
        json!({
            "references": ["foo", "bar", "baz"],
            "paths": ["main.go"]
        }),
    );
}

/// Percent-encode a repository name into one path segment.
pub fn encode_name(name: &str) -> String {
    name.replace('/', "%2F")
}
