//! Correlation of compiled artifacts with derived ones and with content.
//!
//! A compiled artifact is stamped with a [`CorrelationToken`] when it is
//! resolved. Everything derived from it (reports, content fetches) carries
//! the same token, and content it references is fetched at the revision
//! that was current when it was compiled.
//!
//! # Example
//!
//! ```ignore
//! let correlator = Correlator::new().with_content_store(store);
//! correlator.on_resolved(&mut catalog).await?;
//! let body = correlator.fetch_content(&catalog, "modules/ntp/files/ntp.conf").await?;
//! ```

use crate::{
    Artifact, ArtifactKind, ConfigError, CorrelationToken, IndirectError, IndirectResult,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Versioned content repository referenced by compiled artifacts.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Revision identifier of the current content.
    async fn head_revision(&self) -> IndirectResult<String>;

    /// Content at `path` as of `revision`, or `None` if absent there.
    async fn fetch(&self, path: &str, revision: &str) -> IndirectResult<Option<Vec<u8>>>;
}

/// Stamps, propagates and validates correlation metadata.
#[derive(Clone, Default)]
pub struct Correlator {
    content_store: Option<Arc<dyn ContentStore>>,
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("content_store", &self.content_store.is_some())
            .finish()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(store);
        self
    }

    pub fn content_store(&self) -> Option<&Arc<dyn ContentStore>> {
        self.content_store.as_ref()
    }

    /// Stamp metadata on an artifact fresh from its primary backend.
    ///
    /// Compiled kinds without a token get a new one. Artifacts that
    /// reference content get the content store's head revision as their pin,
    /// unless the backend already supplied one.
    pub async fn on_resolved(&self, artifact: &mut Artifact) -> IndirectResult<()> {
        if artifact.kind().is_compiled() && artifact.correlation_token().is_none() {
            let token = CorrelationToken::generate();
            tracing::debug!(
                artifact = %artifact.description(),
                token = %token,
                "Stamped correlation token"
            );
            artifact.stamp_token(token)?;
        }

        if !artifact.content_refs().is_empty() && artifact.version_pin().is_none() {
            if let Some(store) = &self.content_store {
                let revision = store.head_revision().await?;
                tracing::debug!(
                    artifact = %artifact.description(),
                    revision = %revision,
                    "Pinned content revision"
                );
                artifact.pin_version(revision)?;
            }
        }
        Ok(())
    }

    /// Copy the source's token onto a derived artifact.
    ///
    /// A source without a token leaves the derived artifact untouched.
    pub fn propagate_token(&self, source: &Artifact, derived: &mut Artifact) -> IndirectResult<()> {
        match source.correlation_token() {
            Some(token) => derived.stamp_token(token.clone()),
            None => Ok(()),
        }
    }

    /// Build a derived artifact carrying the source's token and environment.
    pub fn derive(
        &self,
        source: &Artifact,
        kind: ArtifactKind,
        payload: impl Into<crate::Payload>,
    ) -> IndirectResult<Artifact> {
        let mut derived = Artifact::new(kind, source.key(), payload);
        if let Some(environment) = source.environment() {
            derived = derived.with_environment(environment);
        }
        self.propagate_token(source, &mut derived)?;
        Ok(derived)
    }

    /// Whether a cached artifact still belongs to the expected compilation.
    pub fn validate(&self, cached: &Artifact, expected: &CorrelationToken) -> bool {
        cached.correlation_token() == Some(expected)
    }

    /// Like [`Correlator::validate`], as an error.
    pub fn check(&self, cached: &Artifact, expected: &CorrelationToken) -> IndirectResult<()> {
        if self.validate(cached, expected) {
            Ok(())
        } else {
            Err(IndirectError::ConsistencyMismatch {
                expected: expected.to_string(),
                found: cached.correlation_token().map(ToString::to_string),
            })
        }
    }

    /// Fetch referenced content at the artifact's pinned revision, or at
    /// head when it carries no pin.
    pub async fn fetch_content(&self, artifact: &Artifact, path: &str) -> IndirectResult<Vec<u8>> {
        let store = self
            .content_store
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "content_store".to_string(),
            })?;

        let revision = match artifact.version_pin() {
            Some(pin) => pin.to_string(),
            None => store.head_revision().await?,
        };

        store
            .fetch(path, &revision)
            .await?
            .ok_or_else(|| IndirectError::NotFound {
                kind: ArtifactKind::FileContent,
                key: format!("{}@{}", path, revision),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Revision list, newest last.
    #[derive(Default)]
    struct VersionedFiles {
        revisions: Mutex<Vec<(String, BTreeMap<String, Vec<u8>>)>>,
    }

    impl VersionedFiles {
        fn commit(&self, rev: &str, path: &str, body: &str) {
            let mut revisions = self.revisions.lock().unwrap();
            let mut files = revisions.last().map(|(_, f)| f.clone()).unwrap_or_default();
            files.insert(path.to_string(), body.as_bytes().to_vec());
            revisions.push((rev.to_string(), files));
        }
    }

    #[async_trait]
    impl ContentStore for VersionedFiles {
        async fn head_revision(&self) -> IndirectResult<String> {
            Ok(self
                .revisions
                .lock()
                .unwrap()
                .last()
                .map(|(rev, _)| rev.clone())
                .unwrap_or_default())
        }

        async fn fetch(&self, path: &str, revision: &str) -> IndirectResult<Option<Vec<u8>>> {
            Ok(self
                .revisions
                .lock()
                .unwrap()
                .iter()
                .find(|(rev, _)| rev == revision)
                .and_then(|(_, files)| files.get(path).cloned()))
        }
    }

    #[tokio::test]
    async fn test_on_resolved_stamps_catalog_only() {
        let correlator = Correlator::new();

        let mut catalog = Artifact::new(ArtifactKind::Catalog, "web1", "c");
        correlator.on_resolved(&mut catalog).await.unwrap();
        assert!(catalog.correlation_token().is_some());

        let mut facts = Artifact::new(ArtifactKind::Facts, "web1", "f");
        correlator.on_resolved(&mut facts).await.unwrap();
        assert!(facts.correlation_token().is_none());
    }

    #[tokio::test]
    async fn test_on_resolved_keeps_existing_token() {
        let correlator = Correlator::new();
        let mut catalog = Artifact::new(ArtifactKind::Catalog, "web1", "c")
            .with_correlation_token(CorrelationToken::new("from-compiler"))
            .unwrap();
        correlator.on_resolved(&mut catalog).await.unwrap();
        assert_eq!(catalog.correlation_token().unwrap().as_str(), "from-compiler");
    }

    #[tokio::test]
    async fn test_pinned_content_survives_new_commits() {
        let store = Arc::new(VersionedFiles::default());
        store.commit("r1", "ntp.conf", "server a");
        let correlator = Correlator::new().with_content_store(store.clone());

        let mut catalog =
            Artifact::new(ArtifactKind::Catalog, "web1", "c").with_content_ref("ntp.conf");
        correlator.on_resolved(&mut catalog).await.unwrap();
        assert_eq!(catalog.version_pin(), Some("r1"));

        store.commit("r2", "ntp.conf", "server b");
        let body = correlator.fetch_content(&catalog, "ntp.conf").await.unwrap();
        assert_eq!(body, b"server a");

        let unpinned = Artifact::new(ArtifactKind::Catalog, "web2", "c");
        let head = correlator.fetch_content(&unpinned, "ntp.conf").await.unwrap();
        assert_eq!(head, b"server b");
    }

    #[tokio::test]
    async fn test_fetch_content_without_store_is_config_error() {
        let correlator = Correlator::new();
        let catalog = Artifact::new(ArtifactKind::Catalog, "web1", "c");
        let err = correlator.fetch_content(&catalog, "x").await.unwrap_err();
        assert!(matches!(err, IndirectError::Config(_)));
    }

    #[test]
    fn test_derive_propagates_token() {
        let correlator = Correlator::new();
        let catalog = Artifact::new(ArtifactKind::Catalog, "web1", "c")
            .with_environment("production")
            .with_correlation_token(CorrelationToken::new("t-9"))
            .unwrap();
        let report = correlator
            .derive(&catalog, ArtifactKind::Report, "applied")
            .unwrap();
        assert_eq!(report.correlation_token(), catalog.correlation_token());
        assert_eq!(report.environment(), Some("production"));

        let untokened = Artifact::new(ArtifactKind::Facts, "web1", "f");
        let derived = correlator
            .derive(&untokened, ArtifactKind::Report, "r")
            .unwrap();
        assert!(derived.correlation_token().is_none());
    }

    #[test]
    fn test_validate_and_check() {
        let correlator = Correlator::new();
        let expected = CorrelationToken::new("t-1");
        let cached = Artifact::new(ArtifactKind::Catalog, "web1", "c")
            .with_correlation_token(expected.clone())
            .unwrap();
        assert!(correlator.validate(&cached, &expected));

        let other = CorrelationToken::new("t-2");
        assert!(!correlator.validate(&cached, &other));
        assert!(matches!(
            correlator.check(&cached, &other),
            Err(IndirectError::ConsistencyMismatch { .. })
        ));
    }
}
