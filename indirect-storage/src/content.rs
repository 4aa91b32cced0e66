//! Versioned content stores referenced by compiled artifacts.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use indirect_core::{
    ArtifactKind, ContentStore, IndirectError, IndirectResult, StorageError, ValidationError,
};
use sha2::{Digest, Sha256};

use crate::backend::blocking;

fn no_head() -> IndirectError {
    IndirectError::NotFound {
        kind: ArtifactKind::FileContent,
        key: "HEAD".to_string(),
    }
}

// ============================================================================
// MEMORY
// ============================================================================

#[derive(Debug, Clone)]
struct Revision {
    id: String,
    files: BTreeMap<String, Vec<u8>>,
}

/// In-memory store where every commit is a full snapshot.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    revisions: RwLock<Vec<Revision>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `files` on the current head and return the new revision id.
    ///
    /// Revision ids are the SHA-256 of the parent id plus the snapshot.
    pub fn commit<I, P, B>(&self, files: I) -> IndirectResult<String>
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<Vec<u8>>,
    {
        let mut revisions = self.revisions.write().map_err(|_| StorageError::LockPoisoned)?;
        let (parent, mut snapshot) = match revisions.last() {
            Some(head) => (head.id.clone(), head.files.clone()),
            None => (String::new(), BTreeMap::new()),
        };
        for (path, bytes) in files {
            snapshot.insert(path.into(), bytes.into());
        }

        let mut hasher = Sha256::new();
        hasher.update(parent.as_bytes());
        for (path, bytes) in &snapshot {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        let id = hex::encode(hasher.finalize());

        tracing::debug!(revision = %id, files = snapshot.len(), "Committed content revision");
        revisions.push(Revision {
            id: id.clone(),
            files: snapshot,
        });
        Ok(id)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn head_revision(&self) -> IndirectResult<String> {
        let revisions = self.revisions.read().map_err(|_| StorageError::LockPoisoned)?;
        revisions.last().map(|r| r.id.clone()).ok_or_else(no_head)
    }

    async fn fetch(&self, path: &str, revision: &str) -> IndirectResult<Option<Vec<u8>>> {
        let revisions = self.revisions.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(revisions
            .iter()
            .find(|r| r.id == revision)
            .and_then(|r| r.files.get(path).cloned()))
    }
}

// ============================================================================
// FILESYSTEM
// ============================================================================

/// Read-only view of revisions laid out as `<root>/<revision>/<path>`, with
/// the current revision named in `<root>/HEAD`.
#[derive(Debug, Clone)]
pub struct FileContentStore {
    root: PathBuf,
}

impl FileContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Only plain relative components may appear in a content path.
fn checked_relative(path: &str) -> IndirectResult<&Path> {
    let relative = Path::new(path);
    if path.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ValidationError::InvalidKey {
            key: path.to_string(),
            reason: "content paths must be relative and free of '..'".to_string(),
        }
        .into());
    }
    Ok(relative)
}

fn io_error(path: &Path, e: std::io::Error) -> IndirectError {
    StorageError::Io {
        backend: "content".to_string(),
        reason: format!("{}: {}", path.display(), e),
    }
    .into()
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn head_revision(&self) -> IndirectResult<String> {
        let head = self.root.join("HEAD");
        blocking("content", move || match std::fs::read_to_string(&head) {
            Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            Ok(_) => Err(no_head()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(no_head()),
            Err(e) => Err(io_error(&head, e)),
        })
        .await
    }

    async fn fetch(&self, path: &str, revision: &str) -> IndirectResult<Option<Vec<u8>>> {
        let revision_dir = checked_relative(revision)?;
        let full = self.root.join(revision_dir).join(checked_relative(path)?);
        blocking("content", move || match std::fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&full, e)),
        })
        .await
    }
}
