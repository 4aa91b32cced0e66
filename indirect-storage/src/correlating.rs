//! Decorator that stamps resolution metadata on artifacts leaving a primary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indirect_core::{Artifact, Capabilities, Correlator, IndirectResult, Request};

use crate::backend::Backend;

/// Wraps a primary backend so every artifact it resolves carries an expiry,
/// a correlation token (compiled kinds) and a content version pin.
///
/// Stamping happens before the artifact reaches any cache, so cached copies
/// carry the token minted at resolution time.
pub struct CorrelatingBackend {
    inner: Arc<dyn Backend>,
    correlator: Correlator,
    ttl: Option<Duration>,
}

impl CorrelatingBackend {
    pub fn new(inner: Arc<dyn Backend>, correlator: Correlator) -> Self {
        Self {
            inner,
            correlator,
            ttl: None,
        }
    }

    /// Expire resolved artifacts `ttl` after resolution unless the backend set one.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn inner(&self) -> &Arc<dyn Backend> {
        &self.inner
    }

    async fn stamp(&self, artifact: &mut Artifact) -> IndirectResult<()> {
        if let Some(ttl) = self.ttl {
            artifact.ensure_expiry(ttl);
        }
        self.correlator.on_resolved(artifact).await
    }
}

#[async_trait]
impl Backend for CorrelatingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        match self.inner.find(request).await? {
            Some(mut artifact) => {
                self.stamp(&mut artifact).await?;
                Ok(Some(artifact))
            }
            None => Ok(None),
        }
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let mut found = self.inner.search(request).await?;
        for artifact in &mut found {
            self.stamp(artifact).await?;
        }
        Ok(found)
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        self.inner.save(request, artifact).await
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        self.inner.destroy(request).await
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        self.inner.exists(request).await
    }
}
