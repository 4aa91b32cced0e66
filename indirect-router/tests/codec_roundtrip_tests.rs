//! Save-then-find through every persistent backend and wire format.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indirect_core::{Artifact, ArtifactKind, CorrelationToken, Request};
use indirect_router::{BackendRegistry, Dispatched, Router};
use indirect_storage::{Backend, FileBackend, Format, LmdbBackend, SqlBackend};
use indirect_test_utils::{assertions, fixtures};
use proptest::prelude::*;
use tempfile::TempDir;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// An artifact the dispatch path hands back unchanged: it already carries an
/// environment, an expiry and a token.
fn settled(key: &str, payload: Vec<u8>) -> Artifact {
    let resolved_at = at(1_750_000_000);
    Artifact::new(ArtifactKind::Catalog, key, payload)
        .with_environment("production")
        .with_resolved_at(resolved_at)
        .with_expires_at(resolved_at + ChronoDuration::hours(1))
        .with_correlation_token(CorrelationToken::new(format!("token-{}", key)))
        .expect("fresh artifact")
        .with_attribute("compiler", "puppet01")
        .with_tag("nightly")
}

fn router_over(backend: Arc<dyn Backend>) -> Router {
    let config = fixtures::catalog_config(backend.name(), None);
    let registry = BackendRegistry::new().with(backend).expect("register");
    Router::new(config, registry).expect("router")
}

async fn save_then_find(router: &Router, artifact: &Artifact) -> Artifact {
    let save = Request::save(artifact.clone()).build();
    assert_eq!(router.dispatch(&save).await.expect("save"), Dispatched::Saved);

    let find = Request::find(artifact.kind(), artifact.key())
        .environment("production")
        .build();
    router
        .dispatch(&find)
        .await
        .expect("find")
        .into_artifact()
        .expect("saved artifact is found")
}

#[tokio::test]
async fn test_file_backend_roundtrips_every_format() {
    for format in [Format::Json, Format::MessagePack, Format::Yaml] {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend = Arc::new(FileBackend::new("file", temp_dir.path()).with_format(format));
        let router = router_over(backend);

        let artifact = settled("web1.example.com", b"\x00binary\xffplan".to_vec());
        let found = save_then_find(&router, &artifact).await;
        assertions::assert_same_artifact(&found, &artifact);
    }
}

#[tokio::test]
async fn test_lmdb_backend_roundtrips() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let backend = Arc::new(LmdbBackend::new("lmdb", temp_dir.path(), 16).expect("lmdb opens"));
    let router = router_over(backend);

    let artifact = settled("web1", b"compiled".to_vec());
    let found = save_then_find(&router, &artifact).await;
    assertions::assert_same_artifact(&found, &artifact);
}

#[tokio::test]
async fn test_sql_backend_roundtrips() {
    let backend = Arc::new(
        SqlBackend::connect("sql", "sqlite::memory:")
            .await
            .expect("sqlite connects"),
    );
    let router = router_over(backend);

    let artifact = settled("web1", b"compiled".to_vec());
    let found = save_then_find(&router, &artifact).await;
    assertions::assert_same_artifact(&found, &artifact);

    let destroy = Request::destroy(ArtifactKind::Catalog, "web1").build();
    assert_eq!(router.dispatch(&destroy).await.expect("destroy"), Dispatched::Destroyed);
    let exists = Request::exists(ArtifactKind::Catalog, "web1").build();
    assert_eq!(router.dispatch(&exists).await.expect("exists").exists(), Some(false));
}

#[tokio::test]
async fn test_environments_do_not_share_entries() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let backend = Arc::new(FileBackend::new("file", temp_dir.path()));
    let router = router_over(backend);

    let artifact = settled("web1", b"production plan".to_vec());
    save_then_find(&router, &artifact).await;

    let staging = Request::find(ArtifactKind::Catalog, "web1").environment("staging").build();
    assert!(router.dispatch(&staging).await.expect("find").is_not_found());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Arbitrary payloads survive every file format unchanged.
    #[test]
    fn prop_file_formats_preserve_payloads(
        payload in prop::collection::vec(any::<u8>(), 0..256),
        format in prop::sample::select(vec![Format::Json, Format::MessagePack, Format::Yaml]),
    ) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend = Arc::new(FileBackend::new("file", temp_dir.path()).with_format(format));
        let router = router_over(backend);

        let artifact = settled("web1", payload);
        let found = runtime.block_on(save_then_find(&router, &artifact));
        prop_assert_eq!(found, artifact);
    }
}

