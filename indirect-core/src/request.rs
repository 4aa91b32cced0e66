//! Immutable resolution requests.
//!
//! A [`Request`] names what to resolve (operation, kind, key, environment)
//! and how (freshness flags, backend override, expected correlation token).
//! Requests are built once through [`RequestBuilder`] and never mutated;
//! derived requests are new values.

use crate::{Artifact, ArtifactKind, CorrelationToken, Operation};
use serde_json::Value;
use std::collections::BTreeMap;

/// Environment assumed when a request names none.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Free-form request options, forwarded to the backend.
pub type Options = BTreeMap<String, Value>;

/// Command-line style switches that map onto request flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveFlags {
    /// `--use-cached`: answer from the cache only
    pub use_cached: bool,
    /// `--fallback-to-cache`: serve stale data when the primary is unreachable
    pub fallback_to_cache: Option<bool>,
    /// `--force-fresh`: bypass the cache for reads
    pub force_fresh: bool,
    /// `--backend NAME`: override the configured backend
    pub backend: Option<String>,
}

/// A single resolution request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    operation: Operation,
    kind: ArtifactKind,
    key: String,
    environment: String,
    options: Options,
    force_fresh: bool,
    force_cached: bool,
    allow_stale_on_failure: Option<bool>,
    backend_override: Option<String>,
    expected_token: Option<CorrelationToken>,
    instance: Option<Artifact>,
}

impl Request {
    pub fn builder(operation: Operation, kind: ArtifactKind, key: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(operation, kind, key)
    }

    pub fn find(kind: ArtifactKind, key: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Operation::Find, kind, key)
    }

    pub fn search(kind: ArtifactKind, pattern: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Operation::Search, kind, pattern)
    }

    pub fn exists(kind: ArtifactKind, key: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Operation::Exists, kind, key)
    }

    pub fn destroy(kind: ArtifactKind, key: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Operation::Destroy, kind, key)
    }

    /// Save request keyed by the artifact's own kind and key.
    pub fn save(artifact: Artifact) -> RequestBuilder {
        let mut builder = RequestBuilder::new(Operation::Save, artifact.kind(), artifact.key());
        if let Some(environment) = artifact.environment() {
            builder = builder.environment(environment);
        }
        builder.instance(artifact)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn force_fresh(&self) -> bool {
        self.force_fresh
    }

    pub fn force_cached(&self) -> bool {
        self.force_cached
    }

    /// `None` means "use the configured default".
    pub fn allow_stale_on_failure(&self) -> Option<bool> {
        self.allow_stale_on_failure
    }

    pub fn backend_override(&self) -> Option<&str> {
        self.backend_override.as_deref()
    }

    pub fn expected_token(&self) -> Option<&CorrelationToken> {
        self.expected_token.as_ref()
    }

    /// Artifact carried by a save request.
    pub fn instance(&self) -> Option<&Artifact> {
        self.instance.as_ref()
    }

    pub fn is_plural(&self) -> bool {
        self.operation.is_plural()
    }

    /// Label used in log lines, e.g. `find catalog/web1 in production`.
    pub fn description(&self) -> String {
        format!(
            "{} {}/{} in {}",
            self.operation, self.kind, self.key, self.environment
        )
    }

    /// Same target, different operation. The carried instance is kept.
    pub fn with_operation(&self, operation: Operation) -> Request {
        Request {
            operation,
            ..self.clone()
        }
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new(operation: Operation, kind: ArtifactKind, key: impl Into<String>) -> Self {
        Self {
            request: Request {
                operation,
                kind,
                key: key.into(),
                environment: DEFAULT_ENVIRONMENT.to_string(),
                options: Options::new(),
                force_fresh: false,
                force_cached: false,
                allow_stale_on_failure: None,
                backend_override: None,
                expected_token: None,
                instance: None,
            },
        }
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.request.environment = environment.into();
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request.options.insert(name.into(), value.into());
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.request.options.extend(options);
        self
    }

    pub fn force_fresh(mut self, yes: bool) -> Self {
        self.request.force_fresh = yes;
        self
    }

    pub fn force_cached(mut self, yes: bool) -> Self {
        self.request.force_cached = yes;
        self
    }

    pub fn allow_stale_on_failure(mut self, yes: bool) -> Self {
        self.request.allow_stale_on_failure = Some(yes);
        self
    }

    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.request.backend_override = Some(name.into());
        self
    }

    pub fn expected_token(mut self, token: impl Into<CorrelationToken>) -> Self {
        self.request.expected_token = Some(token.into());
        self
    }

    pub fn instance(mut self, artifact: Artifact) -> Self {
        self.request.instance = Some(artifact);
        self
    }

    /// Apply command-line switches. Unset switches leave the builder alone.
    pub fn flags(mut self, flags: &ResolveFlags) -> Self {
        if flags.use_cached {
            self.request.force_cached = true;
        }
        if flags.force_fresh {
            self.request.force_fresh = true;
        }
        if let Some(fallback) = flags.fallback_to_cache {
            self.request.allow_stale_on_failure = Some(fallback);
        }
        if let Some(backend) = &flags.backend {
            self.request.backend_override = Some(backend.clone());
        }
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = Request::find(ArtifactKind::Node, "web1").build();
        assert_eq!(request.operation(), Operation::Find);
        assert_eq!(request.environment(), DEFAULT_ENVIRONMENT);
        assert!(!request.force_fresh());
        assert!(!request.force_cached());
        assert_eq!(request.allow_stale_on_failure(), None);
        assert!(!request.is_plural());
    }

    #[test]
    fn test_flags_map_onto_request() {
        let flags = ResolveFlags {
            use_cached: true,
            fallback_to_cache: Some(false),
            force_fresh: false,
            backend: Some("rest".to_string()),
        };
        let request = Request::find(ArtifactKind::Catalog, "web1")
            .flags(&flags)
            .build();
        assert!(request.force_cached());
        assert_eq!(request.allow_stale_on_failure(), Some(false));
        assert_eq!(request.backend_override(), Some("rest"));
    }

    #[test]
    fn test_save_takes_key_from_artifact() {
        let artifact = Artifact::new(ArtifactKind::Report, "web1", "ok").with_environment("staging");
        let request = Request::save(artifact.clone()).build();
        assert_eq!(request.key(), "web1");
        assert_eq!(request.kind(), ArtifactKind::Report);
        assert_eq!(request.environment(), "staging");
        assert_eq!(request.instance(), Some(&artifact));
    }

    #[test]
    fn test_with_operation_is_a_new_value() {
        let request = Request::find(ArtifactKind::Facts, "db1")
            .option("verbose", true)
            .build();
        let derived = request.with_operation(Operation::Exists);
        assert_eq!(derived.operation(), Operation::Exists);
        assert_eq!(request.operation(), Operation::Find);
        assert_eq!(derived.options(), request.options());
    }

    #[test]
    fn test_description() {
        let request = Request::search(ArtifactKind::Node, "web*")
            .environment("staging")
            .build();
        assert!(request.is_plural());
        assert_eq!(request.description(), "search node/web* in staging");
    }
}
