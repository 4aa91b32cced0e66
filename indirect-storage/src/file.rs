//! One file per artifact under a per-kind root.
//!
//! Layout: `<root>/<kind plural>/<environment>/<key>.<ext>`, where the
//! extension names the [`Format`] the file is encoded in. The whole
//! [`Artifact`] is encoded, so the correlation token and version pin travel
//! with the payload.
//!
//! Writes go to a temporary file in the destination directory, are synced,
//! then renamed over the target. A crash mid-write leaves the previous
//! version in place; concurrent writers to one key are last-rename-wins.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indirect_core::{Artifact, ArtifactKind, Capabilities, IndirectResult, Request, StorageError};
use tempfile::NamedTempFile;

use crate::backend::{blocking, Backend};
use crate::codec::Format;
use crate::scoped_key::key_matcher;

#[derive(Debug, Clone)]
pub struct FileBackend {
    name: String,
    root: PathBuf,
    format: Format,
}

impl FileBackend {
    /// JSON-encoded store rooted at `root`.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            format: Format::Json,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, kind: ArtifactKind, environment: &str) -> PathBuf {
        self.root.join(kind.plural()).join(environment)
    }

    /// Deterministic path of the file holding `request`'s artifact.
    pub fn path_for(&self, request: &Request) -> PathBuf {
        self.namespace_dir(request.kind(), request.environment())
            .join(format!("{}.{}", request.key(), self.format.extension()))
    }
}

fn io_error(backend: &str, path: &Path, e: impl std::fmt::Display) -> StorageError {
    StorageError::Io {
        backend: backend.to_string(),
        reason: format!("{}: {}", path.display(), e),
    }
}

fn read_artifact(backend: &str, format: Format, path: &Path) -> IndirectResult<Option<Artifact>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(backend, path, e).into()),
    };
    format.decode(&bytes).map(Some).map_err(|e| {
        StorageError::Corrupt {
            backend: backend.to_string(),
            key: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn write_atomic(backend: &str, path: &Path, bytes: &[u8]) -> IndirectResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io_error(backend, path, "no parent directory"))?;
    std::fs::create_dir_all(dir).map_err(|e| io_error(backend, dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(backend, dir, e))?;
    tmp.write_all(bytes).map_err(|e| io_error(backend, tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| io_error(backend, tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| io_error(backend, path, e.error))?;
    Ok(())
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let (name, format, path) = (self.name.clone(), self.format, self.path_for(request));
        blocking(&self.name, move || read_artifact(&name, format, &path)).await
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let matcher = key_matcher(request.key())?;
        let dir = self.namespace_dir(request.kind(), request.environment());
        let (name, format) = (self.name.clone(), self.format);

        blocking(&self.name, move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(io_error(&name, &dir, e).into()),
            };

            let mut paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.extension().and_then(|e| e.to_str()) == Some(format.extension())
                        && path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .is_some_and(|stem| matcher.is_match(stem))
                })
                .collect();
            paths.sort();

            let mut found = Vec::with_capacity(paths.len());
            for path in paths {
                if let Some(artifact) = read_artifact(&name, format, &path)? {
                    found.push(artifact);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        let bytes = self.format.encode(artifact)?;
        let (name, path) = (self.name.clone(), self.path_for(request));
        blocking(&self.name, move || write_atomic(&name, &path, &bytes)).await
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        let (name, path) = (self.name.clone(), self.path_for(request));
        blocking(&self.name, move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&name, &path, e).into()),
        })
        .await
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        let path = self.path_for(request);
        blocking(&self.name, move || Ok(path.is_file())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indirect_core::CorrelationToken;
    use tempfile::TempDir;

    fn create_test_backend(format: Format) -> (FileBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend = FileBackend::new("file", temp_dir.path()).with_format(format);
        (backend, temp_dir)
    }

    fn catalog(key: &str) -> Artifact {
        Artifact::new(ArtifactKind::Catalog, key, vec![1u8, 2, 3, 255])
            .with_environment("production")
            .with_content_ref("modules/ntp/files/ntp.conf")
            .with_correlation_token(CorrelationToken::new("tok-42"))
            .expect("fresh artifact")
            .with_version_pin("rev-3")
            .expect("fresh artifact")
    }

    #[tokio::test]
    async fn test_roundtrip_in_every_format() {
        for format in [Format::MessagePack, Format::Json, Format::Yaml] {
            let (backend, _temp_dir) = create_test_backend(format);
            let artifact = catalog("web1");
            let request = Request::save(artifact.clone()).build();
            backend.save(&request, &artifact).await.expect("save should succeed");

            let find = Request::find(ArtifactKind::Catalog, "web1").build();
            let found = backend.find(&find).await.expect("find should succeed");
            assert_eq!(found, Some(artifact), "{format} roundtrip");
        }
    }

    #[tokio::test]
    async fn test_deterministic_layout() {
        let (backend, temp_dir) = create_test_backend(Format::Json);
        let request = Request::find(ArtifactKind::Catalog, "web1")
            .environment("staging")
            .build();
        assert_eq!(
            backend.path_for(&request),
            temp_dir.path().join("catalogs").join("staging").join("web1.json")
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let (backend, _temp_dir) = create_test_backend(Format::Json);
        let find = Request::find(ArtifactKind::Catalog, "ghost").build();
        assert_eq!(backend.find(&find).await.expect("find should succeed"), None);
        assert!(!backend.exists(&find).await.expect("exists should succeed"));
        backend.destroy(&find).await.expect("destroy of absent key succeeds");
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let (backend, _temp_dir) = create_test_backend(Format::Json);
        let first = catalog("web1");
        let request = Request::save(first.clone()).build();
        backend.save(&request, &first).await.expect("save should succeed");

        let second = Artifact::new(ArtifactKind::Catalog, "web1", "v2");
        backend.save(&request, &second).await.expect("save should succeed");

        let find = Request::find(ArtifactKind::Catalog, "web1").build();
        assert_eq!(backend.find(&find).await.expect("find"), Some(second));

        let dir = backend.path_for(&find);
        let siblings = std::fs::read_dir(dir.parent().expect("parent"))
            .expect("read_dir")
            .count();
        assert_eq!(siblings, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let (backend, _temp_dir) = create_test_backend(Format::Json);
        let find = Request::find(ArtifactKind::Catalog, "web1").build();
        let path = backend.path_for(&find);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, b"{truncated").expect("write");

        let err = backend.find(&find).await.unwrap_err();
        assert!(matches!(
            err,
            indirect_core::IndirectError::Storage(StorageError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_search_matches_stems() {
        let (backend, _temp_dir) = create_test_backend(Format::Json);
        for key in ["web1", "web2", "db1"] {
            let artifact = catalog(key);
            let request = Request::save(artifact.clone()).build();
            backend.save(&request, &artifact).await.expect("save should succeed");
        }

        let search = Request::search(ArtifactKind::Catalog, "web?").build();
        let keys: Vec<String> = backend
            .search(&search)
            .await
            .expect("search should succeed")
            .iter()
            .map(|a| a.key().to_string())
            .collect();
        assert_eq!(keys, vec!["web1", "web2"]);

        let other_env = Request::search(ArtifactKind::Catalog, "*")
            .environment("staging")
            .build();
        assert!(backend.search(&other_env).await.expect("search").is_empty());
    }
}
