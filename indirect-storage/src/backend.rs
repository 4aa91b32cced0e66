//! The backend trait every storage medium implements.
//!
//! A backend serves a subset of the five operations and declares which in
//! [`Backend::capabilities`]. Operations a backend does not override answer
//! [`IndirectError::UnsupportedOperation`]; the router checks capabilities
//! before calling, so those defaults are only reached by direct callers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use indirect_core::{
    Artifact, Capabilities, IndirectError, IndirectResult, Operation, Request, StorageError,
    UnreachableReason,
};

/// Async storage backend for one or more artifact kinds.
///
/// Implementations must be safe to call concurrently. Requests are keyed by
/// `(kind, environment, key)` taken from the request, never from the artifact.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry name, unique per process.
    fn name(&self) -> &str;

    /// Operations this backend serves.
    fn capabilities(&self) -> Capabilities;

    /// Look up one artifact. `Ok(None)` means absent.
    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let _ = request;
        Err(IndirectError::unsupported(self.name(), Operation::Find))
    }

    /// Look up every artifact whose key matches the request's glob pattern.
    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let _ = request;
        Err(IndirectError::unsupported(self.name(), Operation::Search))
    }

    /// Store an artifact under the request's key, replacing any previous one.
    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        let _ = (request, artifact);
        Err(IndirectError::unsupported(self.name(), Operation::Save))
    }

    /// Remove the artifact under the request's key. Absent keys are not an error.
    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        let _ = request;
        Err(IndirectError::unsupported(self.name(), Operation::Destroy))
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        let _ = request;
        Err(IndirectError::unsupported(self.name(), Operation::Exists))
    }
}

/// Fail with `UnsupportedOperation` unless `backend` declares `operation`.
pub fn ensure_capability(backend: &dyn Backend, operation: Operation) -> IndirectResult<()> {
    if backend.capabilities().supports(operation) {
        Ok(())
    } else {
        Err(IndirectError::unsupported(backend.name(), operation))
    }
}

/// Bound a backend call. Elapsing is `Unreachable { Timeout }`.
pub async fn with_timeout<T, F>(backend: &str, limit: Duration, call: F) -> IndirectResult<T>
where
    F: Future<Output = IndirectResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(backend = %backend, timeout_ms = limit.as_millis() as u64, "Backend call timed out");
            Err(IndirectError::unreachable(backend, UnreachableReason::Timeout))
        }
    }
}

/// Run blocking storage work off the async executor.
pub(crate) async fn blocking<T, F>(backend: &str, work: F) -> IndirectResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> IndirectResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        IndirectError::from(StorageError::Io {
            backend: backend.to_string(),
            reason: format!("blocking task failed: {}", e),
        })
    })?
}
