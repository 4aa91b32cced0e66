//! In-process backends: [`MemoryBackend`] and [`NoopBackend`].

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use indirect_core::{Artifact, Capabilities, IndirectResult, Request, StorageError};

use crate::backend::Backend;
use crate::scoped_key::{key_matcher, ScopedKey};

// ============================================================================
// MEMORY BACKEND
// ============================================================================

/// Map-backed store, usable as a primary or as a cache.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    capabilities: Capabilities,
    entries: RwLock<BTreeMap<ScopedKey, Artifact>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities::all(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Restrict the declared capabilities, e.g. to model a read-only primary.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Seed an entry directly, bypassing capability checks.
    pub fn insert(&self, environment: &str, artifact: Artifact) -> IndirectResult<()> {
        let key = ScopedKey::new(artifact.kind(), environment, artifact.key());
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(key, artifact);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(&ScopedKey::from_request(request)).cloned())
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let matcher = key_matcher(request.key())?;
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries
            .iter()
            .filter(|(key, _)| {
                key.kind() == request.kind()
                    && key.environment() == request.environment()
                    && matcher.is_match(key.key())
            })
            .map(|(_, artifact)| artifact.clone())
            .collect())
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(ScopedKey::from_request(request), artifact.clone());
        Ok(())
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&ScopedKey::from_request(request));
        Ok(())
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.contains_key(&ScopedKey::from_request(request)))
    }
}

// ============================================================================
// NOOP BACKEND
// ============================================================================

/// Answers every lookup with an empty default artifact and refuses saves.
/// Used when no backend is configured for a kind.
#[derive(Debug, Clone)]
pub struct NoopBackend {
    name: String,
}

impl NoopBackend {
    pub const NAME: &'static str = "noop";

    pub fn new() -> Self {
        Self {
            name: Self::NAME.to_string(),
        }
    }
}

impl Default for NoopBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for NoopBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all() - Capabilities::SAVE
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let mut artifact = Artifact::empty(request.kind(), request.key());
        artifact = artifact.with_environment(request.environment());
        Ok(Some(artifact))
    }

    async fn search(&self, _request: &Request) -> IndirectResult<Vec<Artifact>> {
        Ok(Vec::new())
    }

    async fn destroy(&self, _request: &Request) -> IndirectResult<()> {
        Ok(())
    }

    async fn exists(&self, _request: &Request) -> IndirectResult<bool> {
        Ok(false)
    }
}
