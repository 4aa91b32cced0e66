//! Ordered, fire-and-forget cache writes.
//!
//! Each cache backend gets one [`CacheWriter`]. Writes go onto an unbounded
//! queue drained by a single task, so writes for one key land in the order
//! they were issued and a slow cache never delays the caller.

use std::sync::Arc;

use indirect_core::{Artifact, IndirectResult, Request, StorageError};
use tokio::sync::{mpsc, oneshot};

use crate::backend::Backend;

enum WriteOp {
    Put {
        request: Request,
        artifact: Artifact,
    },
    Invalidate {
        request: Request,
        ack: oneshot::Sender<IndirectResult<()>>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the write queue of one cache backend.
#[derive(Debug, Clone)]
pub struct CacheWriter {
    cache: String,
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl std::fmt::Debug for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOp::Put { request, .. } => write!(f, "Put({})", request.description()),
            WriteOp::Invalidate { request, .. } => write!(f, "Invalidate({})", request.description()),
            WriteOp::Flush { .. } => f.write_str("Flush"),
        }
    }
}

impl CacheWriter {
    /// Start the drain task for `cache`. Must be called inside a tokio runtime.
    pub fn spawn(cache: Arc<dyn Backend>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = cache.name().to_string();
        tokio::spawn(drain(cache, rx));
        tracing::debug!(cache = %name, "Started cache writer");
        Self { cache: name, tx }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    fn stopped(&self) -> StorageError {
        StorageError::WriterStopped {
            cache: self.cache.clone(),
        }
    }

    /// Queue a write-through. Never fails the caller; problems are logged.
    pub fn write(&self, request: Request, artifact: Artifact) {
        if self.tx.send(WriteOp::Put { request, artifact }).is_err() {
            tracing::warn!(cache = %self.cache, "Cache writer stopped; dropping write");
        }
    }

    /// Remove the cached entry for `request` once every earlier write landed.
    pub async fn invalidate(&self, request: Request) -> IndirectResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteOp::Invalidate { request, ack })
            .map_err(|_| self.stopped())?;
        done.await.map_err(|_| self.stopped())?
    }

    /// Wait until every write queued so far has been applied.
    pub async fn flush(&self) -> IndirectResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteOp::Flush { ack })
            .map_err(|_| self.stopped())?;
        done.await.map_err(|_| self.stopped().into())
    }
}

async fn drain(cache: Arc<dyn Backend>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Put { request, artifact } => {
                if let Err(e) = cache.save(&request, &artifact).await {
                    tracing::warn!(
                        cache = %cache.name(),
                        artifact = %artifact.description(),
                        error = %e,
                        "Cache write failed"
                    );
                }
            }
            WriteOp::Invalidate { request, ack } => {
                let result = cache.destroy(&request).await;
                match &result {
                    Ok(()) => tracing::debug!(
                        cache = %cache.name(),
                        request = %request.description(),
                        "Invalidated cache entry"
                    ),
                    Err(e) => tracing::warn!(
                        cache = %cache.name(),
                        request = %request.description(),
                        error = %e,
                        "Cache invalidation failed"
                    ),
                }
                let _ = ack.send(result);
            }
            WriteOp::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!(cache = %cache.name(), "Cache writer stopped");
}
