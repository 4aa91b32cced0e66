//! Caching decorator with explicit fallback policy.
//!
//! [`CachingBackend`] wraps a primary backend with a cache backend. Every
//! read picks a [`FallbackPolicy`] from the request and answers with a
//! [`Resolved`] value that records whether the cache stood in for the
//! primary.
//!
//! # Find, step by step
//!
//! 1. `ForceCached`: read the cache alone. The primary is never contacted.
//! 2. Otherwise call the primary under the request timeout.
//! 3. Primary answered: queue a write-through and return its answer.
//! 4. Primary unreachable under `StaleOnFailure`: return the cached copy,
//!    expired or not, or the original `Unreachable` when nothing is cached.
//!
//! Save and destroy go to the primary only; on success the cached entry is
//! invalidated, never updated.
//!
//! # Example
//!
//! ```ignore
//! let writer = CacheWriter::spawn(cache.clone());
//! let caching = CachingBackend::new(primary, cache, writer, CacheSettings::default())?;
//!
//! let request = Request::find(ArtifactKind::Catalog, "web1")
//!     .allow_stale_on_failure(true)
//!     .build();
//! if let Some(resolved) = caching.find_resolved(&request).await? {
//!     println!("from cache: {}", resolved.served_from_cache());
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indirect_core::{
    Artifact, Capabilities, ConfigError, Correlator, IndirectResult, Request,
};

use super::policy::{FallbackPolicy, Resolved};
use super::writer::CacheWriter;
use crate::backend::{with_timeout, Backend};

/// Tunables for one caching decorator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Bound on every primary call
    pub request_timeout: Duration,
    /// Stale-on-failure default for requests that leave it unset
    pub default_fallback: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            default_fallback: false,
        }
    }
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_default_fallback(mut self, enabled: bool) -> Self {
        self.default_fallback = enabled;
        self
    }
}

/// A primary backend fronted by a cache.
pub struct CachingBackend {
    primary: Arc<dyn Backend>,
    cache: Arc<dyn Backend>,
    writer: CacheWriter,
    correlator: Correlator,
    settings: CacheSettings,
}

impl CachingBackend {
    /// Pair `primary` with `cache`. `writer` must drain into `cache`.
    ///
    /// Fails if the cache cannot find, save, destroy and answer exists.
    pub fn new(
        primary: Arc<dyn Backend>,
        cache: Arc<dyn Backend>,
        writer: CacheWriter,
        settings: CacheSettings,
    ) -> IndirectResult<Self> {
        if !cache.capabilities().contains(Capabilities::CACHE_STORE) {
            return Err(ConfigError::InvalidValue {
                field: "cache".to_string(),
                value: cache.name().to_string(),
                reason: "a cache backend must support find, save, destroy and exists".to_string(),
            }
            .into());
        }
        if writer.cache_name() != cache.name() {
            return Err(ConfigError::InvalidValue {
                field: "writer".to_string(),
                value: writer.cache_name().to_string(),
                reason: format!("writer drains into a different cache than {}", cache.name()),
            }
            .into());
        }
        Ok(Self {
            primary,
            cache,
            writer,
            correlator: Correlator::new(),
            settings,
        })
    }

    /// Correlator used to check `expected_token` on cache-only reads.
    pub fn with_correlator(mut self, correlator: Correlator) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn primary(&self) -> &Arc<dyn Backend> {
        &self.primary
    }

    pub fn cache(&self) -> &Arc<dyn Backend> {
        &self.cache
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn policy_for(&self, request: &Request) -> FallbackPolicy {
        FallbackPolicy::from_request(request, self.settings.default_fallback)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Resolve one artifact under the request's fallback policy.
    pub async fn find_resolved(&self, request: &Request) -> IndirectResult<Option<Resolved<Artifact>>> {
        let policy = self.policy_for(request);

        if policy.reads_cache_only() {
            match self.read_cache_unexpired(request).await? {
                CacheOnly::Hit(artifact) => return Ok(Some(Resolved::from_cache(artifact))),
                CacheOnly::Miss => return Ok(None),
                CacheOnly::Mismatch => {}
            }
        }

        match self.find_primary(request).await {
            Ok(Some(artifact)) => {
                self.writer.write(request.clone(), artifact.clone());
                Ok(Some(Resolved::from_primary(artifact)))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_unreachable() && policy.falls_back_on_unreachable() => {
                match self.read_cache(request).await {
                    Some(artifact) => {
                        tracing::warn!(
                            primary = %self.primary.name(),
                            cache = %self.cache.name(),
                            request = %request.description(),
                            error = %e,
                            "Primary unreachable, serving cached copy"
                        );
                        Ok(Some(Resolved::from_cache(artifact)))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Answer exists under the same policy as find. Never writes the cache.
    pub async fn exists_resolved(&self, request: &Request) -> IndirectResult<Resolved<bool>> {
        let policy = self.policy_for(request);

        if policy.reads_cache_only() {
            match self.read_cache_unexpired(request).await? {
                CacheOnly::Hit(_) => return Ok(Resolved::from_cache(true)),
                CacheOnly::Miss => return Ok(Resolved::from_cache(false)),
                CacheOnly::Mismatch => {}
            }
        }

        let limit = self.settings.request_timeout;
        match with_timeout(self.primary.name(), limit, self.primary.exists(request)).await {
            Ok(found) => Ok(Resolved::from_primary(found)),
            Err(e) if e.is_unreachable() && policy.falls_back_on_unreachable() => {
                match self.read_cache(request).await {
                    Some(_) => Ok(Resolved::from_cache(true)),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn find_primary(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let limit = self.settings.request_timeout;
        with_timeout(self.primary.name(), limit, self.primary.find(request)).await
    }

    /// Cached copy regardless of expiry. Cache errors count as a miss.
    async fn read_cache(&self, request: &Request) -> Option<Artifact> {
        if let Err(e) = self.writer.flush().await {
            tracing::warn!(cache = %self.cache.name(), error = %e, "Cache writer unavailable");
        }
        match self.cache.find(request).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    cache = %self.cache.name(),
                    request = %request.description(),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    async fn read_cache_unexpired(&self, request: &Request) -> IndirectResult<CacheOnly> {
        let Some(artifact) = self.read_cache(request).await else {
            tracing::debug!(cache = %self.cache.name(), request = %request.description(), "Cache miss");
            return Ok(CacheOnly::Miss);
        };

        if artifact.is_expired() {
            tracing::info!(
                cache = %self.cache.name(),
                request = %request.description(),
                "Cached copy expired"
            );
            return Ok(CacheOnly::Miss);
        }

        if let Some(expected) = request.expected_token() {
            if let Err(mismatch) = self.correlator.check(&artifact, expected) {
                tracing::info!(
                    cache = %self.cache.name(),
                    request = %request.description(),
                    error = %mismatch,
                    "Cached copy from another resolution, resolving fresh"
                );
                return Ok(CacheOnly::Mismatch);
            }
        }

        tracing::debug!(cache = %self.cache.name(), request = %request.description(), "Cache hit");
        Ok(CacheOnly::Hit(artifact))
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    async fn invalidate(&self, request: &Request) -> IndirectResult<()> {
        self.writer.invalidate(request.clone()).await
    }

    /// Mark the cached copy for `request` expired. Returns false when nothing
    /// is cached.
    pub async fn expire(&self, request: &Request) -> IndirectResult<bool> {
        self.writer.flush().await?;
        let Some(mut artifact) = self.cache.find(request).await? else {
            return Ok(false);
        };
        artifact.mark_expired();
        self.writer.write(request.clone(), artifact);
        self.writer.flush().await?;
        tracing::info!(cache = %self.cache.name(), request = %request.description(), "Expired cached copy");
        Ok(true)
    }
}

enum CacheOnly {
    Hit(Artifact),
    Miss,
    /// Present but stamped by another resolution than the caller expects.
    Mismatch,
}

#[async_trait]
impl Backend for CachingBackend {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.primary.capabilities()
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        Ok(self.find_resolved(request).await?.map(Resolved::into_value))
    }

    /// Searches are never cached.
    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let limit = self.settings.request_timeout;
        with_timeout(self.primary.name(), limit, self.primary.search(request)).await
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        let limit = self.settings.request_timeout;
        with_timeout(self.primary.name(), limit, self.primary.save(request, artifact)).await?;
        self.invalidate(request).await
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        let limit = self.settings.request_timeout;
        with_timeout(self.primary.name(), limit, self.primary.destroy(request)).await?;
        self.invalidate(request).await
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        Ok(self.exists_resolved(request).await?.into_value())
    }
}

impl std::fmt::Debug for CachingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingBackend")
            .field("primary", &self.primary.name())
            .field("cache", &self.cache.name())
            .field("settings", &self.settings)
            .finish()
    }
}
