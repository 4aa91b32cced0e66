//! Indirect Test Utilities
//!
//! Shared test infrastructure for the indirect workspace:
//! - Proptest generators for keys, artifacts and record chains
//! - A scripted backend whose reachability can be toggled
//! - Fixtures for the common hierarchy and cache scenarios
//! - Assertions over resolution errors and results

// Re-export core types for convenience
pub use indirect_core::{
    Artifact, ArtifactKind, Capabilities, CorrelationToken, HierarchicalRecord, IndirectConfig,
    IndirectError, IndirectResult, Operation, ParamValue, Request, Timestamp, UnreachableReason,
    ValidationError,
};
pub use indirect_storage::{Backend, MemoryBackend, Resolved};

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// MOCK BACKENDS
// ============================================================================

/// Memory-backed primary that can be taken offline, slowed down, and
/// counts every call that reaches it.
#[derive(Debug)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    reachable: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: MemoryBackend::new(name),
            reachable: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Seed an artifact in `environment` without counting a call.
    pub fn seed(&self, environment: &str, artifact: Artifact) {
        if let Err(e) = self.inner.insert(environment, artifact) {
            panic!("seeding {} failed: {}", self.inner.name(), e);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    async fn gate(&self) -> IndirectResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndirectError::unreachable(
                self.inner.name(),
                UnreachableReason::ConnectionRefused,
            ))
        }
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        self.gate().await?;
        self.inner.find(request).await
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        self.gate().await?;
        self.inner.search(request).await
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        self.gate().await?;
        self.inner.save(request, artifact).await
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        self.gate().await?;
        self.inner.destroy(request).await
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        self.gate().await?;
        self.inner.exists(request).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for request and record types.

    use super::*;
    use proptest::prelude::*;

    /// A key the validator accepts.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}(\\.[a-z][a-z0-9-]{0,7}){0,2}"
    }

    /// A key the validator must reject.
    pub fn arb_bad_key() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_key().prop_map(|k| format!("../{}", k)),
            arb_key().prop_map(|k| format!("{}/etc", k)),
            arb_key().prop_map(|k| format!("{}\\x", k)),
            arb_key().prop_map(|k| format!("{}\n", k)),
            Just(String::new()),
        ]
    }

    pub fn arb_environment() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("production".to_string()),
            Just("staging".to_string()),
            "[a-z][a-z0-9_]{0,10}",
        ]
    }

    pub fn arb_kind() -> impl Strategy<Value = ArtifactKind> {
        prop::sample::select(ArtifactKind::ALL.to_vec())
    }

    pub fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..512)
    }

    /// A Timestamp with whole-second precision between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Artifact with arbitrary payload and metadata.
    pub fn arb_artifact() -> impl Strategy<Value = Artifact> {
        (
            arb_kind(),
            arb_key(),
            arb_payload(),
            arb_timestamp(),
            prop::option::of("[a-f0-9]{8}"),
            prop::option::of("[a-f0-9]{12}"),
            prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9 ]{0,12}", 0..4),
            prop::collection::btree_set("[a-z]{1,8}", 0..3),
        )
            .prop_map(|(kind, key, payload, resolved_at, token, pin, attributes, tags)| {
                let mut artifact = Artifact::new(kind, key, payload).with_resolved_at(resolved_at);
                for (name, value) in attributes {
                    artifact = artifact.with_attribute(name, value);
                }
                for tag in tags {
                    artifact = artifact.with_tag(tag);
                }
                // A fresh artifact carries neither, so stamping cannot fail.
                if let Some(token) = token {
                    let _ = artifact.stamp_token(CorrelationToken::new(token));
                }
                if let Some(pin) = pin {
                    artifact = artifact.with_content_ref("files/motd");
                    let _ = artifact.pin_version(pin);
                }
                artifact
            })
    }

    /// An acyclic parent chain `n0 -> n1 -> ...`, nearest first.
    pub fn arb_record_chain(max_len: usize) -> impl Strategy<Value = Vec<HierarchicalRecord>> {
        prop::collection::vec(
            (
                prop::collection::vec("c[0-4]", 0..4),
                prop::collection::btree_map("p[0-4]", 0i64..100, 0..4),
            ),
            1..max_len.max(2),
        )
        .prop_map(|levels| {
            let len = levels.len();
            levels
                .into_iter()
                .enumerate()
                .map(|(i, (classes, parameters))| {
                    let mut record = HierarchicalRecord::new(format!("n{}", i)).with_classes(classes);
                    for (name, value) in parameters {
                        record = record.with_parameter(name, value);
                    }
                    if i + 1 < len {
                        record = record.with_parent(format!("n{}", i + 1));
                    }
                    record
                })
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use indirect_storage::MemoryDirectory;
    use std::collections::BTreeMap;

    /// The `web1 -> base -> common` chain, nearest first.
    pub fn web1_chain() -> Vec<HierarchicalRecord> {
        vec![
            HierarchicalRecord::new("web1")
                .with_parent("base")
                .with_classes(["nginx", "ntp"])
                .with_parameter("role", "web"),
            HierarchicalRecord::new("base")
                .with_parent("common")
                .with_classes(["ntp", "ssh"])
                .with_parameter("timezone", "UTC")
                .with_parameter("role", "base"),
            HierarchicalRecord::new("common")
                .with_classes(["ssh", "users"])
                .with_parameter("timezone", "GMT")
                .with_parameter("region", "us"),
        ]
    }

    /// Classes `web1` must flatten to.
    pub fn web1_classes() -> Vec<String> {
        ["nginx", "ntp", "ssh", "users"].map(String::from).to_vec()
    }

    /// Parameters `web1` must flatten to.
    pub fn web1_parameters() -> BTreeMap<String, ParamValue> {
        [("role", "web"), ("timezone", "UTC"), ("region", "us")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), ParamValue::from(v)))
            .collect()
    }

    /// The same chain as directory entries.
    pub fn web1_directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_entry(
                "web1",
                [
                    ("puppetclass", vec!["nginx", "ntp"]),
                    ("parentnode", vec!["base"]),
                    ("role", vec!["web"]),
                ],
            )
            .with_entry(
                "base",
                [
                    ("puppetclass", vec!["ntp", "ssh"]),
                    ("parentnode", vec!["common"]),
                    ("timezone", vec!["UTC"]),
                    ("role", vec!["base"]),
                ],
            )
            .with_entry(
                "common",
                [
                    ("puppetclass", vec!["ssh", "users"]),
                    ("timezone", vec!["GMT"]),
                    ("region", vec!["us"]),
                ],
            )
    }

    /// Lookup closure over a fixed set of records.
    pub fn lookup_in(
        records: Vec<HierarchicalRecord>,
    ) -> impl FnMut(&str) -> IndirectResult<Option<HierarchicalRecord>> {
        move |name| Ok(records.iter().find(|r| r.name == name).cloned())
    }

    /// A catalog artifact in the default environment.
    pub fn catalog(key: &str, payload: &str) -> Artifact {
        Artifact::new(ArtifactKind::Catalog, key, payload.as_bytes().to_vec())
    }

    /// Config routing catalogs to `primary`, optionally cached in `cache`.
    pub fn catalog_config(primary: &str, cache: Option<&str>) -> IndirectConfig {
        let mut source = format!("[kinds.catalog]\nbackend = \"{}\"\n", primary);
        if let Some(cache) = cache {
            source.push_str(&format!("cache = \"{}\"\n", cache));
        }
        match IndirectConfig::from_toml_str(&source) {
            Ok(config) => config,
            Err(e) => panic!("fixture config is invalid: {}", e),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over resolution results.

    use super::*;

    #[track_caller]
    pub fn assert_unreachable<T: std::fmt::Debug>(result: &IndirectResult<T>) {
        match result {
            Err(IndirectError::Unreachable { .. }) => {}
            other => panic!("Expected Unreachable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &IndirectResult<T>) {
        match result {
            Err(IndirectError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unsupported<T: std::fmt::Debug>(result: &IndirectResult<T>, operation: Operation) {
        match result {
            Err(IndirectError::UnsupportedOperation { operation: op, .. }) => {
                assert_eq!(*op, operation, "Wrong operation in UnsupportedOperation");
            }
            other => panic!("Expected UnsupportedOperation({}), got: {:?}", operation, other),
        }
    }

    /// Assert a cycle error whose chain ends with `closing`.
    #[track_caller]
    pub fn assert_cycle<T: std::fmt::Debug>(result: &IndirectResult<T>, closing: &str) {
        match result {
            Err(IndirectError::Cycle { chain }) => {
                assert_eq!(chain.last().map(String::as_str), Some(closing), "Wrong cycle chain");
            }
            other => panic!("Expected Cycle, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_served_from_cache<T>(resolved: &Resolved<T>) {
        assert!(resolved.served_from_cache(), "Expected an answer served from cache");
    }

    #[track_caller]
    pub fn assert_served_from_primary<T>(resolved: &Resolved<T>) {
        assert!(!resolved.served_from_cache(), "Expected an answer from the primary");
    }

    /// Payload and metadata equal, ignoring nothing.
    #[track_caller]
    pub fn assert_same_artifact(left: &Artifact, right: &Artifact) {
        assert_eq!(left.description(), right.description());
        assert_eq!(left.payload(), right.payload(), "payload differs");
        assert_eq!(left.correlation_token(), right.correlation_token(), "token differs");
        assert_eq!(left.version_pin(), right.version_pin(), "version pin differs");
        assert_eq!(left, right);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use indirect_core::hierarchy;
    use proptest::prelude::*;

    #[test]
    fn test_web1_chain_flattens_to_expected() {
        let flat = hierarchy::resolve("web1", fixtures::lookup_in(fixtures::web1_chain()))
            .expect("chain resolves");
        assert_eq!(flat.classes, fixtures::web1_classes());
        assert_eq!(flat.parameters, fixtures::web1_parameters());
    }

    #[test]
    fn test_catalog_config_is_valid() {
        let config = fixtures::catalog_config("compiler", Some("catalog_cache"));
        assert!(config.validate().is_ok());
        let catalog = config.kind(ArtifactKind::Catalog).expect("catalog configured");
        assert_eq!(catalog.cache.as_deref(), Some("catalog_cache"));
    }

    #[tokio::test]
    async fn test_flaky_backend_toggles() {
        let backend = FlakyBackend::new("flaky");
        backend.seed("production", fixtures::catalog("web1", "plan"));
        let request = Request::find(ArtifactKind::Catalog, "web1").build();

        assert!(backend.find(&request).await.expect("reachable").is_some());
        backend.set_reachable(false);
        assertions::assert_unreachable(&backend.find(&request).await);
        assert_eq!(backend.calls(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_keys_validate(key in generators::arb_key()) {
            prop_assert!(indirect_core::validate_key(&key).is_ok());
        }

        #[test]
        fn prop_bad_keys_rejected(key in generators::arb_bad_key()) {
            prop_assert!(indirect_core::validate_key(&key).is_err());
        }

        #[test]
        fn prop_generated_chains_resolve(chain in generators::arb_record_chain(6)) {
            let flat = hierarchy::resolve("n0", fixtures::lookup_in(chain.clone()));
            prop_assert!(flat.is_ok());
        }
    }
}
