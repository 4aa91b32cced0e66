//! Hierarchical directory backend for node records.
//!
//! A directory holds one multi-valued entry per node name. Entries are
//! mapped to [`HierarchicalRecord`]s through [`DirectorySettings`] and the
//! parent chain is flattened with [`hierarchy::resolve`] before the record
//! leaves the backend.
//!
//! # Lookup order
//!
//! `find("web1.example.com")` tries `web1.example.com`, then the short name
//! `web1`, then the configured default entry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use indirect_core::hierarchy;
use indirect_core::{
    validate_key, Artifact, Capabilities, HierarchicalRecord, IndirectResult, ParamValue, Request,
    StorageError, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{blocking, Backend};
use crate::scoped_key::key_matcher;

/// Attribute name to its values.
pub type DirectoryEntry = BTreeMap<String, Vec<String>>;

/// How directory attributes map onto record fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    pub class_attributes: Vec<String>,
    pub parent_attribute: String,
    pub stacked_attributes: Vec<String>,
    pub environment_attribute: String,
    /// Entry consulted when neither the key nor its short name exists.
    pub default_entry: String,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            class_attributes: vec!["puppetclass".to_string()],
            parent_attribute: "parentnode".to_string(),
            stacked_attributes: vec!["puppetvar".to_string()],
            environment_attribute: "environment".to_string(),
            default_entry: "default".to_string(),
        }
    }
}

impl DirectorySettings {
    fn is_reserved(&self, attribute: &str) -> bool {
        attribute == self.parent_attribute
            || attribute == self.environment_attribute
            || self.class_attributes.iter().any(|a| a == attribute)
            || self.stacked_attributes.iter().any(|a| a == attribute)
    }

    /// Map a raw entry onto a record named `name`.
    ///
    /// An entry naming more than one parent is corrupt.
    pub fn to_record(&self, name: &str, entry: &DirectoryEntry) -> IndirectResult<HierarchicalRecord> {
        let mut record = HierarchicalRecord::new(name);

        for attribute in &self.class_attributes {
            for class in entry.get(attribute).into_iter().flatten() {
                record.add_class(class.as_str());
            }
        }

        record.parent_name = match entry.get(&self.parent_attribute).map(Vec::as_slice) {
            None | Some([]) => None,
            Some([parent]) => Some(parent.clone()),
            Some(parents) => {
                return Err(StorageError::Corrupt {
                    backend: "directory".to_string(),
                    key: name.to_string(),
                    reason: format!("more than one parent: {}", parents.join(", ")),
                }
                .into())
            }
        };
        record.environment = entry
            .get(&self.environment_attribute)
            .and_then(|values| values.first())
            .cloned();

        for attribute in &self.stacked_attributes {
            record
                .stacked_attributes
                .extend(entry.get(attribute).into_iter().flatten().cloned());
        }

        for (attribute, values) in entry {
            if self.is_reserved(attribute) || values.is_empty() {
                continue;
            }
            record
                .parameters
                .insert(attribute.clone(), parameter_value(values));
        }

        Ok(record)
    }
}

fn scalar(value: &str) -> ParamValue {
    match value {
        "true" => ParamValue::Bool(true),
        "false" => ParamValue::Bool(false),
        other => ParamValue::String(other.to_string()),
    }
}

/// Single values collapse to scalars; multiple values stay a list.
fn parameter_value(values: &[String]) -> ParamValue {
    match values {
        [single] => scalar(single),
        many => ParamValue::Array(many.iter().map(|v| scalar(v)).collect()),
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// Raw entry lookup by exact name.
pub trait DirectorySource: Send + Sync {
    fn entry(&self, name: &str) -> IndirectResult<Option<DirectoryEntry>>;

    /// Every entry name, sorted.
    fn names(&self) -> IndirectResult<Vec<String>>;
}

/// Entries held in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<BTreeMap<String, DirectoryEntry>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, entry: DirectoryEntry) -> IndirectResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(name.into(), entry);
        Ok(())
    }

    /// Builder-style insert of `(attribute, values)` pairs.
    pub fn with_entry<'a, I>(self, name: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Vec<&'a str>)>,
    {
        let entry = attributes
            .into_iter()
            .map(|(k, vs)| (k.to_string(), vs.into_iter().map(str::to_string).collect()))
            .collect();
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(name.to_string(), entry);
        }
        self
    }
}

impl DirectorySource for MemoryDirectory {
    fn entry(&self, name: &str) -> IndirectResult<Option<DirectoryEntry>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(name).cloned())
    }

    fn names(&self) -> IndirectResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}

/// One YAML document per entry at `<root>/<name>.yaml`, mapping attribute
/// names to a scalar or a list of scalars.
#[derive(Debug, Clone)]
pub struct FileDirectory {
    root: PathBuf,
}

impl FileDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl DirectorySource for FileDirectory {
    fn entry(&self, name: &str) -> IndirectResult<Option<DirectoryEntry>> {
        // Parent names come from entry data, so they are checked here too.
        validate_key(name)?;
        let path = self.root.join(format!("{}.yaml", name));
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io {
                    backend: "directory".to_string(),
                    reason: format!("{}: {}", path.display(), e),
                }
                .into())
            }
        };

        let corrupt = |reason: String| StorageError::Corrupt {
            backend: "directory".to_string(),
            key: name.to_string(),
            reason,
        };
        let document: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;

        let mut entry = DirectoryEntry::new();
        for (attribute, value) in document {
            let values = match &value {
                serde_yaml::Value::Sequence(items) => items
                    .iter()
                    .map(|item| {
                        yaml_scalar(item)
                            .ok_or_else(|| corrupt(format!("{} holds a non-scalar", attribute)))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                serde_yaml::Value::Null => Vec::new(),
                other => vec![yaml_scalar(other)
                    .ok_or_else(|| corrupt(format!("{} holds a non-scalar", attribute)))?],
            };
            entry.insert(attribute, values);
        }
        Ok(Some(entry))
    }

    fn names(&self) -> IndirectResult<Vec<String>> {
        let io_err = |e: std::io::Error| StorageError::Io {
            backend: "directory".to_string(),
            reason: format!("{}: {}", self.root.display(), e),
        };
        let listing = match std::fs::read_dir(&self.root) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e).into()),
        };

        let mut names = Vec::new();
        for dirent in listing {
            let path = dirent.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// BACKEND
// ============================================================================

pub struct DirectoryBackend {
    name: String,
    source: Arc<dyn DirectorySource>,
    settings: DirectorySettings,
}

impl std::fmt::Debug for DirectoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryBackend")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DirectoryBackend {
    pub fn new(name: impl Into<String>, source: Arc<dyn DirectorySource>) -> Self {
        Self {
            name: name.into(),
            source,
            settings: DirectorySettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DirectorySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DirectorySettings {
        &self.settings
    }
}

/// Names tried for `key`: the key, its short host name, then the default.
fn candidates(key: &str, default_entry: &str) -> Vec<String> {
    let mut names = vec![key.to_string()];
    if let Some((short, _)) = key.split_once('.') {
        if !short.is_empty() {
            names.push(short.to_string());
        }
    }
    if !names.iter().any(|n| n == default_entry) {
        names.push(default_entry.to_string());
    }
    names
}

fn lookup_flattened(
    source: &dyn DirectorySource,
    settings: &DirectorySettings,
    key: &str,
) -> IndirectResult<Option<HierarchicalRecord>> {
    let mut found = None;
    for candidate in candidates(key, &settings.default_entry) {
        if source.entry(&candidate)?.is_some() {
            found = Some(candidate);
            break;
        }
    }
    let Some(found) = found else {
        return Ok(None);
    };
    if found != key {
        tracing::debug!(key = %key, entry = %found, "Directory lookup fell back");
    }

    let mut record = flatten(source, settings, &found)?;
    record.name = key.to_string();
    Ok(Some(record))
}

fn flatten(
    source: &dyn DirectorySource,
    settings: &DirectorySettings,
    name: &str,
) -> IndirectResult<HierarchicalRecord> {
    hierarchy::resolve(name, |entry_name| {
        source
            .entry(entry_name)?
            .map(|entry| settings.to_record(entry_name, &entry))
            .transpose()
    })
}

/// Flattened records whose names match `pattern` and whose classes include
/// every one of `classes`.
fn search_flattened(
    source: &dyn DirectorySource,
    settings: &DirectorySettings,
    pattern: &str,
    classes: &[String],
) -> IndirectResult<Vec<HierarchicalRecord>> {
    let matcher = key_matcher(pattern)?;
    let mut found = Vec::new();
    for name in source.names()? {
        if !matcher.is_match(&name) {
            continue;
        }
        let record = flatten(source, settings, &name)?;
        if classes.iter().all(|class| record.classes.contains(class)) {
            found.push(record);
        }
    }
    Ok(found)
}

/// The `class` search option: one class name or a list of them.
fn class_filter(request: &Request) -> IndirectResult<Vec<String>> {
    let invalid = || ValidationError::InvalidOption {
        option: "class".to_string(),
        reason: "expected a class name or a list of class names".to_string(),
    };
    match request.option("class") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(class)) => Ok(vec![class.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into),
        Some(_) => Err(invalid().into()),
    }
}

#[async_trait]
impl Backend for DirectoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FIND | Capabilities::SEARCH | Capabilities::EXISTS
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let source = Arc::clone(&self.source);
        let settings = self.settings.clone();
        let key = request.key().to_string();
        let kind = request.kind();

        let record = blocking(&self.name, move || {
            lookup_flattened(source.as_ref(), &settings, &key)
        })
        .await?;

        record
            .map(|record| Artifact::from_record(kind, request.key(), &record))
            .transpose()
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let classes = class_filter(request)?;
        let source = Arc::clone(&self.source);
        let settings = self.settings.clone();
        let pattern = request.key().to_string();

        let records = blocking(&self.name, move || {
            search_flattened(source.as_ref(), &settings, &pattern, &classes)
        })
        .await?;
        tracing::debug!(
            backend = %self.name,
            pattern = %request.key(),
            found = records.len(),
            "Directory search"
        );

        records
            .iter()
            .map(|record| Artifact::from_record(request.kind(), record.name.as_str(), record))
            .collect()
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        Ok(self.find(request).await?.is_some())
    }
}
