//! LMDB-backed artifact store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped
//! key-value store. Entries are keyed by [`ScopedKey`] so every
//! `(kind, environment)` pair is its own contiguous key range, and values
//! are MessagePack-encoded [`Artifact`]s.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, writes use
//! write transactions, and hit/miss statistics are kept behind a lock.

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use indirect_core::{
    Artifact, ArtifactKind, Capabilities, IndirectError, IndirectResult, Request, StorageError,
};

use crate::backend::{blocking, Backend};
use crate::codec::Format;
use crate::scoped_key::{key_matcher, ScopedKey};

/// Error type for LMDB operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LmdbError {
    fn into_indirect(self, backend: &str) -> IndirectError {
        StorageError::Database {
            backend: backend.to_string(),
            reason: self.to_string(),
        }
        .into()
    }
}

/// Hit and miss counters for one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LMDB-backed store, usable as a primary or as a cache.
///
/// Transactions run on the blocking pool; the environment handle and the
/// counters are shared with those tasks through an [`Arc`].
///
/// # Example
///
/// ```ignore
/// let backend = LmdbBackend::new("lmdb", "/var/cache/indirect", 100)?;
/// backend.save(&request, &artifact).await?;
/// let cached = backend.find(&request).await?;
/// ```
#[derive(Clone)]
pub struct LmdbBackend {
    store: Arc<LmdbStore>,
}

/// Handles shared between the backend and its blocking tasks.
struct LmdbStore {
    name: String,
    env: Env,
    /// The single unnamed database.
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend")
            .field("name", &self.store.name)
            .finish_non_exhaustive()
    }
}

impl LmdbBackend {
    /// Open (or create) the store under `path`, sized to `max_size_mb`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(
        name: impl Into<String>,
        path: P,
        max_size_mb: usize,
    ) -> IndirectResult<Self> {
        let name = name.into();
        let (env, db, entry_count) =
            Self::open(path.as_ref(), max_size_mb).map_err(|e| e.into_indirect(&name))?;
        Ok(Self {
            store: Arc::new(LmdbStore {
                name,
                env,
                db,
                stats: RwLock::new(CacheStats {
                    entry_count,
                    ..CacheStats::default()
                }),
            }),
        })
    }

    fn open(
        path: &Path,
        max_size_mb: usize,
    ) -> Result<(Env, Database<Bytes, Bytes>, u64), LmdbError> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| LmdbError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbError::Transaction(e.to_string()))?;

        let entries = {
            let rtxn = env
                .read_txn()
                .map_err(|e| LmdbError::Transaction(e.to_string()))?;
            db.len(&rtxn)
                .map_err(|e| LmdbError::Transaction(e.to_string()))?
        };
        tracing::debug!(path = %path.display(), entries, "Opened LMDB store");

        Ok((env, db, entries))
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Drop every entry of `kind` in `environment`. Returns how many went.
    ///
    /// Runs the write transaction on the calling thread.
    pub fn invalidate_namespace(&self, kind: ArtifactKind, environment: &str) -> IndirectResult<u64> {
        self.store.invalidate_namespace(kind, environment)
    }
}

impl LmdbStore {
    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn adjust_entries(&self, added: u64, removed: u64) {
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = (stats.entry_count + added).saturating_sub(removed);
        }
    }

    fn txn_error(&self, e: heed::Error) -> IndirectError {
        LmdbError::Transaction(e.to_string()).into_indirect(&self.name)
    }

    fn decode(&self, key: &ScopedKey, bytes: &[u8]) -> IndirectResult<Artifact> {
        Format::MessagePack.decode(bytes).map_err(|e| {
            StorageError::Corrupt {
                backend: self.name.clone(),
                key: key.key().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn get(&self, key: &ScopedKey) -> IndirectResult<Option<Artifact>> {
        let rtxn = self.env.read_txn().map_err(|e| self.txn_error(e))?;

        match self.db.get(&rtxn, &key.encode()) {
            Ok(Some(bytes)) => {
                self.record_hit();
                self.decode(key, bytes).map(Some)
            }
            Ok(None) => {
                self.record_miss();
                Ok(None)
            }
            Err(e) => {
                self.record_miss();
                Err(self.txn_error(e))
            }
        }
    }

    fn contains(&self, key: &ScopedKey) -> IndirectResult<bool> {
        let rtxn = self.env.read_txn().map_err(|e| self.txn_error(e))?;
        Ok(self
            .db
            .get(&rtxn, &key.encode())
            .map_err(|e| self.txn_error(e))?
            .is_some())
    }

    fn put(&self, key: &ScopedKey, value: &[u8]) -> IndirectResult<()> {
        let key = key.encode();
        let mut wtxn = self.env.write_txn().map_err(|e| self.txn_error(e))?;
        let is_new = self
            .db
            .get(&wtxn, &key)
            .map_err(|e| self.txn_error(e))?
            .is_none();
        self.db
            .put(&mut wtxn, &key, value)
            .map_err(|e| self.txn_error(e))?;
        wtxn.commit().map_err(|e| self.txn_error(e))?;

        if is_new {
            self.adjust_entries(1, 0);
        }
        Ok(())
    }

    fn delete(&self, key: &ScopedKey) -> IndirectResult<()> {
        let mut wtxn = self.env.write_txn().map_err(|e| self.txn_error(e))?;
        let deleted = self
            .db
            .delete(&mut wtxn, &key.encode())
            .map_err(|e| self.txn_error(e))?;
        wtxn.commit().map_err(|e| self.txn_error(e))?;

        if deleted {
            self.adjust_entries(0, 1);
        }
        Ok(())
    }

    /// Key/value pairs under one `(kind, environment)` namespace.
    ///
    /// Seeks straight to the namespace's key range.
    fn collect_namespace(
        &self,
        rtxn: &heed::RoTxn,
        kind: ArtifactKind,
        environment: &str,
    ) -> IndirectResult<Vec<(ScopedKey, Vec<u8>)>> {
        let prefix = ScopedKey::namespace_prefix(kind, environment);
        let iter = self
            .db
            .prefix_iter(rtxn, prefix.as_slice())
            .map_err(|e| self.txn_error(e))?;

        let mut entries = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(|e| self.txn_error(e))?;
            match ScopedKey::decode(key) {
                Some(scoped) => entries.push((scoped, value.to_vec())),
                None => tracing::warn!(backend = %self.name, "Skipping undecodable LMDB key"),
            }
        }
        Ok(entries)
    }

    fn search(
        &self,
        kind: ArtifactKind,
        environment: &str,
        pattern: &str,
    ) -> IndirectResult<Vec<Artifact>> {
        let matcher = key_matcher(pattern)?;
        let rtxn = self.env.read_txn().map_err(|e| self.txn_error(e))?;
        self.collect_namespace(&rtxn, kind, environment)?
            .into_iter()
            .filter(|(key, _)| matcher.is_match(key.key()))
            .map(|(key, bytes)| self.decode(&key, &bytes))
            .collect()
    }

    fn invalidate_namespace(&self, kind: ArtifactKind, environment: &str) -> IndirectResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(|e| self.txn_error(e))?;
        let keys = self.collect_namespace(&wtxn, kind, environment)?;

        let mut deleted = 0u64;
        for (key, _) in &keys {
            if self
                .db
                .delete(&mut wtxn, &key.encode())
                .map_err(|e| self.txn_error(e))?
            {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(|e| self.txn_error(e))?;

        self.adjust_entries(0, deleted);
        tracing::debug!(backend = %self.name, %kind, environment, deleted, "Invalidated LMDB namespace");
        Ok(deleted)
    }
}

#[async_trait]
impl Backend for LmdbBackend {
    fn name(&self) -> &str {
        &self.store.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let key = ScopedKey::from_request(request);
        let store = Arc::clone(&self.store);
        blocking(&self.store.name, move || store.get(&key)).await
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let (kind, environment) = (request.kind(), request.environment().to_string());
        let pattern = request.key().to_string();
        let store = Arc::clone(&self.store);
        blocking(&self.store.name, move || {
            store.search(kind, &environment, &pattern)
        })
        .await
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        let key = ScopedKey::from_request(request);
        let value = Format::MessagePack.encode(artifact)?;
        let store = Arc::clone(&self.store);
        blocking(&self.store.name, move || store.put(&key, &value)).await
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        let key = ScopedKey::from_request(request);
        let store = Arc::clone(&self.store);
        blocking(&self.store.name, move || store.delete(&key)).await
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        let key = ScopedKey::from_request(request);
        let store = Arc::clone(&self.store);
        blocking(&self.store.name, move || store.contains(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indirect_core::CorrelationToken;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbBackend::new("lmdb", temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn catalog(key: &str) -> Artifact {
        Artifact::new(ArtifactKind::Catalog, key, format!("catalog for {key}").as_str())
            .with_environment("production")
            .with_correlation_token(CorrelationToken::new("tok"))
            .expect("fresh artifact has no token")
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let (backend, _temp_dir) = create_test_backend();
        let artifact = catalog("web1");
        let request = Request::save(artifact.clone()).build();

        backend.save(&request, &artifact).await.expect("save should succeed");

        let find = Request::find(ArtifactKind::Catalog, "web1").build();
        let found = backend.find(&find).await.expect("find should succeed");
        assert_eq!(found, Some(artifact));
        assert_eq!(backend.stats().hits, 1);
        assert_eq!(backend.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_find_missing_counts_miss() {
        let (backend, _temp_dir) = create_test_backend();
        let find = Request::find(ArtifactKind::Catalog, "nope").build();

        assert_eq!(backend.find(&find).await.expect("find should succeed"), None);
        let stats = backend.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_destroy() {
        let (backend, _temp_dir) = create_test_backend();
        let artifact = catalog("web1");
        let request = Request::save(artifact.clone()).build();
        backend.save(&request, &artifact).await.expect("save should succeed");

        let destroy = Request::destroy(ArtifactKind::Catalog, "web1").build();
        backend.destroy(&destroy).await.expect("destroy should succeed");
        assert!(!backend.exists(&destroy).await.expect("exists should succeed"));
        assert_eq!(backend.stats().entry_count, 0);

        // Destroying an absent key is not an error.
        backend.destroy(&destroy).await.expect("destroy should succeed");
    }

    #[tokio::test]
    async fn test_environment_isolation() {
        let (backend, _temp_dir) = create_test_backend();
        let artifact = catalog("web1");
        let staging = Request::save(artifact.clone()).environment("staging").build();
        backend.save(&staging, &artifact).await.expect("save should succeed");

        let prod = Request::find(ArtifactKind::Catalog, "web1").build();
        assert!(backend.find(&prod).await.expect("find should succeed").is_none());
    }

    #[tokio::test]
    async fn test_search_and_invalidate_namespace() {
        let (backend, _temp_dir) = create_test_backend();
        for key in ["web1", "web2", "db1"] {
            let artifact = catalog(key);
            let request = Request::save(artifact.clone()).build();
            backend.save(&request, &artifact).await.expect("save should succeed");
        }

        let search = Request::search(ArtifactKind::Catalog, "web*").build();
        let found = backend.search(&search).await.expect("search should succeed");
        assert_eq!(found.len(), 2);

        let deleted = backend
            .invalidate_namespace(ArtifactKind::Catalog, "production")
            .expect("invalidate should succeed");
        assert_eq!(deleted, 3);
        assert!(backend.search(&search).await.expect("search should succeed").is_empty());
    }

    #[tokio::test]
    async fn test_search_stays_inside_its_namespace() {
        let (backend, _temp_dir) = create_test_backend();
        for environment in ["prod", "production", "staging"] {
            let artifact = catalog("web1").with_environment(environment);
            let request = Request::save(artifact.clone()).environment(environment).build();
            backend.save(&request, &artifact).await.expect("save should succeed");
        }
        let report = Artifact::new(ArtifactKind::Report, "web1", "applied");
        let request = Request::save(report.clone()).environment("prod").build();
        backend.save(&request, &report).await.expect("save should succeed");

        let search = Request::search(ArtifactKind::Catalog, "*").environment("prod").build();
        let found = backend.search(&search).await.expect("search should succeed");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].environment(), Some("prod"));

        let deleted = backend
            .invalidate_namespace(ArtifactKind::Catalog, "prod")
            .expect("invalidate should succeed");
        assert_eq!(deleted, 1);
        assert_eq!(backend.stats().entry_count, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers() {
        let (backend, _temp_dir) = create_test_backend();
        let mut handles = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let artifact = catalog(&format!("web{i}"));
                let request = Request::save(artifact.clone()).build();
                backend.save(&request, &artifact).await
            }));
        }
        for handle in handles {
            handle.await.expect("task should join").expect("save should succeed");
        }

        assert_eq!(backend.stats().entry_count, 16);
        let search = Request::search(ArtifactKind::Catalog, "web*").build();
        assert_eq!(backend.search(&search).await.expect("search should succeed").len(), 16);
    }

    #[tokio::test]
    async fn test_longest_scoped_key_fits() {
        use indirect_core::{validate_request, MAX_ENVIRONMENT_LEN, MAX_KEY_LEN};

        let (backend, _temp_dir) = create_test_backend();
        let environment = "e".repeat(MAX_ENVIRONMENT_LEN);
        let artifact = catalog(&"k".repeat(MAX_KEY_LEN)).with_environment(environment.as_str());
        let request = Request::save(artifact.clone()).environment(environment.as_str()).build();
        validate_request(&request).expect("longest names are valid");

        backend.save(&request, &artifact).await.expect("save should succeed");
        let find = Request::find(ArtifactKind::Catalog, artifact.key())
            .environment(environment.as_str())
            .build();
        assert_eq!(backend.find(&find).await.expect("find should succeed"), Some(artifact));
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let artifact = catalog("web1");
        {
            let backend = LmdbBackend::new("lmdb", temp_dir.path(), 10).expect("open");
            let request = Request::save(artifact.clone()).build();
            backend.save(&request, &artifact).await.expect("save should succeed");
        }
        let backend = LmdbBackend::new("lmdb", temp_dir.path(), 10).expect("reopen");
        assert_eq!(backend.stats().entry_count, 1);
        let find = Request::find(ArtifactKind::Catalog, "web1").build();
        assert_eq!(backend.find(&find).await.expect("find should succeed"), Some(artifact));
    }
}
