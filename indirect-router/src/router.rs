//! Indirection router.
//!
//! Backend selection for a request, highest precedence first:
//! 1. the request's explicit backend override
//! 2. the environment-scoped configuration
//! 3. the kind's indirection (from configuration or [`Router::register`])
//! 4. the built-in [`NoopBackend`]
//!
//! The cache for a request is the environment-scoped cache if one is
//! configured, otherwise the indirection's cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indirect_core::{
    validate_request, Artifact, ArtifactKind, Capabilities, ConfigError, Correlator,
    IndirectConfig, IndirectError, IndirectResult, Operation, Request, StorageError, ValidationError,
};
use indirect_storage::{
    ensure_capability, with_timeout, Backend, CacheSettings, CacheWriter, CachingBackend,
    CorrelatingBackend, FallbackPolicy, NoopBackend, Resolved,
};

use crate::registry::BackendRegistry;

// ============================================================================
// INDIRECTION
// ============================================================================

/// The binding between an artifact kind and its active backends.
#[derive(Clone)]
pub struct Indirection {
    kind: ArtifactKind,
    primary: Arc<dyn Backend>,
    cache: Option<Arc<dyn Backend>>,
}

impl Indirection {
    pub fn new(kind: ArtifactKind, primary: Arc<dyn Backend>, cache: Option<Arc<dyn Backend>>) -> Self {
        Self {
            kind,
            primary,
            cache,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn primary(&self) -> &Arc<dyn Backend> {
        &self.primary
    }

    pub fn cache(&self) -> Option<&Arc<dyn Backend>> {
        self.cache.as_ref()
    }
}

impl std::fmt::Debug for Indirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indirection")
            .field("kind", &self.kind)
            .field("primary", &self.primary.name())
            .field("cache", &self.cache.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

// ============================================================================
// DISPATCH RESULTS
// ============================================================================

/// Terminal state of one dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Found(Resolved<Artifact>),
    /// Absence is an answer, not an error.
    NotFound,
    Collection(Vec<Artifact>),
    Exists(Resolved<bool>),
    Saved,
    Destroyed,
}

impl Dispatched {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Dispatched::Found(resolved) => Some(resolved.value()),
            _ => None,
        }
    }

    pub fn into_artifact(self) -> Option<Artifact> {
        match self {
            Dispatched::Found(resolved) => Some(resolved.into_value()),
            _ => None,
        }
    }

    pub fn collection(&self) -> Option<&[Artifact]> {
        match self {
            Dispatched::Collection(found) => Some(found),
            _ => None,
        }
    }

    pub fn exists(&self) -> Option<bool> {
        match self {
            Dispatched::Exists(resolved) => Some(*resolved.value()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Dispatched::NotFound)
    }

    /// True when the cache answered in place of the primary.
    pub fn served_from_cache(&self) -> bool {
        match self {
            Dispatched::Found(resolved) => resolved.served_from_cache(),
            Dispatched::Exists(resolved) => resolved.served_from_cache(),
            _ => false,
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Per-kind backend selection and dispatch.
///
/// Dispatch borrows the router shared; [`Router::register`] and
/// [`Router::reconfigure`] need it exclusively, so indirections never
/// change under an in-flight request.
pub struct Router {
    config: IndirectConfig,
    registry: BackendRegistry,
    indirections: HashMap<ArtifactKind, Indirection>,
    correlator: Correlator,
    noop: Arc<dyn Backend>,
    writers: Mutex<HashMap<String, CacheWriter>>,
}

impl Router {
    /// Build a router from validated configuration. Every backend the
    /// configuration names must be in `registry`.
    pub fn new(config: IndirectConfig, registry: BackendRegistry) -> IndirectResult<Self> {
        let indirections = configured_indirections(&config, &registry)?;
        tracing::info!(
            backends = registry.len(),
            indirections = indirections.len(),
            "Router configured"
        );
        Ok(Self {
            config,
            registry,
            indirections,
            correlator: Correlator::new(),
            noop: Arc::new(NoopBackend::new()),
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// Use `correlator` for token stamping, version pinning and validation.
    pub fn with_correlator(mut self, correlator: Correlator) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn config(&self) -> &IndirectConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn indirection(&self, kind: ArtifactKind) -> Option<&Indirection> {
        self.indirections.get(&kind)
    }

    /// Bind `kind` to `primary`, optionally fronted by `cache`.
    ///
    /// Both backends join the registry under their own names.
    pub fn register(
        &mut self,
        kind: ArtifactKind,
        primary: Arc<dyn Backend>,
        cache: Option<Arc<dyn Backend>>,
    ) -> IndirectResult<()> {
        if let Some(cache) = &cache {
            check_cache_store(cache)?;
        }
        self.registry.adopt(&primary)?;
        if let Some(cache) = &cache {
            self.registry.adopt(cache)?;
        }
        tracing::info!(
            kind = %kind,
            primary = %primary.name(),
            cache = ?cache.as_ref().map(|c| c.name().to_string()),
            "Registered indirection"
        );
        self.indirections.insert(kind, Indirection::new(kind, primary, cache));
        Ok(())
    }

    /// Swap in a new configuration between resolution epochs.
    ///
    /// Kinds the new configuration names get fresh indirections; other kinds
    /// keep the ones they have.
    pub fn reconfigure(&mut self, config: IndirectConfig) -> IndirectResult<()> {
        let mut next = configured_indirections(&config, &self.registry)?;
        for (kind, indirection) in self.indirections.drain() {
            next.entry(kind).or_insert(indirection);
        }
        self.indirections = next;
        self.config = config;
        tracing::info!(indirections = self.indirections.len(), "Router reconfigured");
        Ok(())
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    fn primary_for(&self, request: &Request) -> IndirectResult<Arc<dyn Backend>> {
        if let Some(name) = request.backend_override() {
            return self.registry.get(name);
        }
        if let Some(name) = self.config.environment_backend(request.kind(), request.environment()) {
            return self.registry.get(name);
        }
        if let Some(indirection) = self.indirections.get(&request.kind()) {
            return Ok(Arc::clone(&indirection.primary));
        }
        tracing::debug!(kind = %request.kind(), "No backend configured, using noop");
        Ok(Arc::clone(&self.noop))
    }

    fn cache_for(&self, request: &Request) -> IndirectResult<Option<Arc<dyn Backend>>> {
        if let Some(name) = self.config.environment_cache(request.kind(), request.environment()) {
            return cache_store(&self.registry, name).map(Some);
        }
        Ok(self
            .indirections
            .get(&request.kind())
            .and_then(|i| i.cache.clone()))
    }

    fn writer_for(&self, cache: &Arc<dyn Backend>) -> IndirectResult<CacheWriter> {
        let mut writers = self.writers.lock().map_err(|_| StorageError::LockPoisoned)?;
        let writer = writers
            .entry(cache.name().to_string())
            .or_insert_with(|| CacheWriter::spawn(Arc::clone(cache)));
        Ok(writer.clone())
    }

    fn settings(&self) -> CacheSettings {
        CacheSettings::new()
            .with_request_timeout(self.config.request_timeout())
            .with_default_fallback(self.config.fallback_on_failure)
    }

    fn caching(&self, primary: Arc<dyn Backend>, cache: Arc<dyn Backend>) -> IndirectResult<CachingBackend> {
        let writer = self.writer_for(&cache)?;
        Ok(CachingBackend::new(primary, cache, writer, self.settings())?
            .with_correlator(self.correlator.clone()))
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    /// Validate `request`, pick its backends and run it.
    ///
    /// Validation and the capability check both happen before any backend
    /// I/O.
    pub async fn dispatch(&self, request: &Request) -> IndirectResult<Dispatched> {
        let result = self.run(request).await;
        if let Err(err) = &result {
            log_failure(request, err);
        }
        result
    }

    async fn run(&self, request: &Request) -> IndirectResult<Dispatched> {
        validate_request(request)?;
        let primary = self.primary_for(request)?;
        ensure_capability(primary.as_ref(), request.operation())?;

        tracing::debug!(
            request = %request.description(),
            operation = %request.operation(),
            environment = %request.environment(),
            backend = %primary.name(),
            "Dispatching request"
        );

        let primary: Arc<dyn Backend> = Arc::new(
            CorrelatingBackend::new(primary, self.correlator.clone()).with_ttl(self.config.cache_ttl()),
        );

        match self.cache_for(request)? {
            Some(cache) => {
                let caching = self.caching(primary, cache)?;
                dispatch_cached(&caching, request).await
            }
            None => self.dispatch_direct(primary.as_ref(), request).await,
        }
    }

    async fn dispatch_direct(&self, primary: &dyn Backend, request: &Request) -> IndirectResult<Dispatched> {
        let policy = FallbackPolicy::from_request(request, self.config.fallback_on_failure);
        let limit = self.config.request_timeout();

        match request.operation() {
            Operation::Find => {
                if policy.reads_cache_only() {
                    tracing::info!(
                        request = %request.description(),
                        "Cached copy requested but no cache is configured"
                    );
                    return Ok(Dispatched::NotFound);
                }
                Ok(match with_timeout(primary.name(), limit, primary.find(request)).await? {
                    Some(artifact) => Dispatched::Found(Resolved::from_primary(artifact)),
                    None => Dispatched::NotFound,
                })
            }
            Operation::Exists => {
                if policy.reads_cache_only() {
                    return Ok(Dispatched::Exists(Resolved::from_cache(false)));
                }
                let found = with_timeout(primary.name(), limit, primary.exists(request)).await?;
                Ok(Dispatched::Exists(Resolved::from_primary(found)))
            }
            Operation::Search => {
                let found = with_timeout(primary.name(), limit, primary.search(request)).await?;
                Ok(Dispatched::Collection(found))
            }
            Operation::Save => {
                let artifact = instance(request)?;
                with_timeout(primary.name(), limit, primary.save(request, artifact)).await?;
                Ok(Dispatched::Saved)
            }
            Operation::Destroy => {
                with_timeout(primary.name(), limit, primary.destroy(request)).await?;
                Ok(Dispatched::Destroyed)
            }
        }
    }

    /// Mark the cached copy for `request` expired so the next cache-only read
    /// misses. Returns false when no cache is configured or nothing is cached.
    pub async fn expire(&self, request: &Request) -> IndirectResult<bool> {
        validate_request(request)?;
        let Some(cache) = self.cache_for(request)? else {
            return Ok(false);
        };
        let primary = self.primary_for(request)?;
        self.caching(primary, cache)?.expire(request).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .field("indirections", &self.indirections)
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

async fn dispatch_cached(caching: &CachingBackend, request: &Request) -> IndirectResult<Dispatched> {
    match request.operation() {
        Operation::Find => Ok(match caching.find_resolved(request).await? {
            Some(resolved) => Dispatched::Found(resolved),
            None => Dispatched::NotFound,
        }),
        Operation::Exists => Ok(Dispatched::Exists(caching.exists_resolved(request).await?)),
        Operation::Search => Ok(Dispatched::Collection(caching.search(request).await?)),
        Operation::Save => {
            caching.save(request, instance(request)?).await?;
            Ok(Dispatched::Saved)
        }
        Operation::Destroy => {
            caching.destroy(request).await?;
            Ok(Dispatched::Destroyed)
        }
    }
}

/// Fatal failures are configuration or data bugs; retrying will not help.
fn log_failure(request: &Request, err: &IndirectError) {
    if err.is_fatal() {
        tracing::error!(
            request = %request.description(),
            error = %err,
            "Request failed and cannot be retried"
        );
    } else if err.is_unreachable() {
        tracing::warn!(request = %request.description(), error = %err, "Backend unreachable");
    } else {
        tracing::debug!(request = %request.description(), error = %err, "Request failed");
    }
}

fn instance(request: &Request) -> IndirectResult<&Artifact> {
    request.instance().ok_or_else(|| {
        ValidationError::InvalidOption {
            option: "instance".to_string(),
            reason: "save requires an artifact".to_string(),
        }
        .into()
    })
}

// ============================================================================
// CONFIGURATION
// ============================================================================

fn check_cache_store(cache: &Arc<dyn Backend>) -> IndirectResult<()> {
    if cache.capabilities().contains(Capabilities::CACHE_STORE) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: "cache".to_string(),
            value: cache.name().to_string(),
            reason: "a cache backend must support find, save, destroy and exists".to_string(),
        }
        .into())
    }
}

fn cache_store(registry: &BackendRegistry, name: &str) -> IndirectResult<Arc<dyn Backend>> {
    let cache = registry.get(name)?;
    check_cache_store(&cache)?;
    Ok(cache)
}

/// Indirections named by `config`, after checking every backend it names.
fn configured_indirections(
    config: &IndirectConfig,
    registry: &BackendRegistry,
) -> IndirectResult<HashMap<ArtifactKind, Indirection>> {
    config.validate()?;

    let mut indirections = HashMap::new();
    for (name, kind_config) in &config.kinds {
        let kind: ArtifactKind = name.parse().map_err(|e: indirect_core::ArtifactKindParseError| {
            ConfigError::InvalidValue {
                field: format!("kinds.{}", name),
                value: name.clone(),
                reason: e.to_string(),
            }
        })?;
        let primary = registry.get(&kind_config.backend)?;
        let cache = kind_config
            .cache
            .as_deref()
            .map(|c| cache_store(registry, c))
            .transpose()?;
        indirections.insert(kind, Indirection::new(kind, primary, cache));
    }

    for environment in config.environments.values() {
        for scoped in environment.kinds.values() {
            if let Some(backend) = &scoped.backend {
                registry.get(backend)?;
            }
            if let Some(cache) = &scoped.cache {
                cache_store(registry, cache)?;
            }
        }
    }

    Ok(indirections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indirect_core::ResolveFlags;
    use indirect_storage::MemoryBackend;
    use indirect_test_utils::{assertions, fixtures, FlakyBackend};

    fn memory(name: &str, payload: &str) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(name));
        backend
            .insert("production", fixtures::catalog("web1", payload))
            .expect("insert");
        backend
            .insert("staging", fixtures::catalog("web1", &format!("{payload}-staging")))
            .expect("insert");
        backend
    }

    fn create_test_router() -> Router {
        let registry = BackendRegistry::new()
            .with(memory("compiler", "default"))
            .expect("register")
            .with(memory("staging_compiler", "scoped"))
            .expect("register")
            .with(memory("other", "override"))
            .expect("register");
        let config = IndirectConfig::from_toml_str(
            r#"
            [kinds.catalog]
            backend = "compiler"

            [environments.staging.kinds.catalog]
            backend = "staging_compiler"
            "#,
        )
        .expect("config");
        Router::new(config, registry).expect("router")
    }

    async fn payload(router: &Router, request: Request) -> Vec<u8> {
        router
            .dispatch(&request)
            .await
            .expect("dispatch")
            .into_artifact()
            .expect("found")
            .payload()
            .as_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn test_selection_precedence() {
        let router = create_test_router();

        let default = Request::find(ArtifactKind::Catalog, "web1").build();
        assert_eq!(payload(&router, default).await, b"default");

        let scoped = Request::find(ArtifactKind::Catalog, "web1").environment("staging").build();
        assert_eq!(payload(&router, scoped).await, b"scoped-staging");

        let flags = ResolveFlags {
            backend: Some("other".to_string()),
            ..Default::default()
        };
        let overridden = Request::find(ArtifactKind::Catalog, "web1")
            .environment("staging")
            .flags(&flags)
            .build();
        assert_eq!(payload(&router, overridden).await, b"override-staging");
    }

    #[tokio::test]
    async fn test_unconfigured_kind_uses_noop() {
        let router = create_test_router();
        let request = Request::find(ArtifactKind::Node, "web1").build();
        let found = router.dispatch(&request).await.expect("dispatch");
        let artifact = found.artifact().expect("default object");
        assert!(artifact.payload().is_empty());
        assert_eq!(artifact.environment(), Some("production"));

        let save = Request::save(Artifact::new(ArtifactKind::Node, "web1", "x")).build();
        assertions::assert_unsupported(&router.dispatch(&save).await, Operation::Save);
    }

    #[tokio::test]
    async fn test_unknown_override_is_config_error() {
        let router = create_test_router();
        let request = Request::find(ArtifactKind::Catalog, "web1").backend("missing").build();
        assert!(matches!(
            router.dispatch(&request).await,
            Err(IndirectError::Config(ConfigError::UnknownBackend { .. }))
        ));
    }

    #[tokio::test]
    async fn test_validation_and_capabilities_precede_io() {
        let mut router = create_test_router();
        let flaky = Arc::new(FlakyBackend::new("flaky"));
        let read_only = Arc::new(MemoryBackend::new("read_only").with_capabilities(Capabilities::READ_ONLY));
        router.register(ArtifactKind::Facts, flaky.clone(), None).expect("register");
        router.register(ArtifactKind::Report, read_only, None).expect("register");

        let bad = Request::find(ArtifactKind::Facts, "../etc/passwd").build();
        assertions::assert_validation_error(&router.dispatch(&bad).await);
        assert_eq!(flaky.calls(), 0);

        let report = Artifact::new(ArtifactKind::Report, "web1", "ok");
        let save = Request::save(report).build();
        assertions::assert_unsupported(&router.dispatch(&save).await, Operation::Save);
    }

    #[tokio::test]
    async fn test_force_cached_without_cache_is_not_found() {
        let router = create_test_router();
        let request = Request::find(ArtifactKind::Catalog, "web1").force_cached(true).build();
        assert!(router.dispatch(&request).await.expect("dispatch").is_not_found());
    }

    #[tokio::test]
    async fn test_timeout_is_unreachable() {
        let mut config = IndirectConfig::default();
        config.request_timeout_ms = 20;
        let mut router = Router::new(config, BackendRegistry::new()).expect("router");
        let slow = Arc::new(FlakyBackend::new("slow"));
        slow.seed("production", fixtures::catalog("web1", "late"));
        slow.set_delay(std::time::Duration::from_millis(500));
        router.register(ArtifactKind::Catalog, slow, None).expect("register");

        let request = Request::find(ArtifactKind::Catalog, "web1").build();
        assertions::assert_unreachable(&router.dispatch(&request).await);
    }

    #[tokio::test]
    async fn test_register_rejects_read_only_cache() {
        let mut router = create_test_router();
        let cache = Arc::new(MemoryBackend::new("cache").with_capabilities(Capabilities::READ_ONLY));
        let primary = Arc::new(MemoryBackend::new("primary"));
        assert!(router.register(ArtifactKind::Facts, primary, Some(cache)).is_err());
        assert!(router.indirection(ArtifactKind::Facts).is_none());
    }

    #[tokio::test]
    async fn test_reconfigure_replaces_named_kinds_only() {
        let mut router = create_test_router();
        router
            .register(ArtifactKind::Facts, Arc::new(MemoryBackend::new("facts")), None)
            .expect("register");

        let next = IndirectConfig::from_toml_str("[kinds.catalog]\nbackend = \"other\"\n").expect("config");
        router.reconfigure(next).expect("reconfigure");

        let catalog = router.indirection(ArtifactKind::Catalog).expect("catalog");
        assert_eq!(catalog.primary().name(), "other");
        let facts = router.indirection(ArtifactKind::Facts).expect("facts kept");
        assert_eq!(facts.primary().name(), "facts");

        let scoped = Request::find(ArtifactKind::Catalog, "web1").environment("staging").build();
        assert_eq!(payload(&router, scoped).await, b"override-staging");
    }

    #[test]
    fn test_new_rejects_unknown_backends() {
        let config = fixtures::catalog_config("missing", None);
        assert!(matches!(
            Router::new(config, BackendRegistry::new()),
            Err(IndirectError::Config(ConfigError::UnknownBackend { .. }))
        ));
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut logs) = self.0.lock() {
                logs.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn take(&self) -> String {
            self.0
                .lock()
                .map(|mut logs| String::from_utf8_lossy(&std::mem::take(&mut *logs)).into_owned())
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_fatal_failures_log_as_errors() {
        let logs = CapturedLogs::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut router = create_test_router();
        let down = Arc::new(FlakyBackend::new("down"));
        down.set_reachable(false);
        router.register(ArtifactKind::Facts, down, None).expect("register");

        let unknown = Request::find(ArtifactKind::Catalog, "web1").backend("missing").build();
        assert!(router.dispatch(&unknown).await.is_err());
        let fatal = logs.take();
        assert!(fatal.contains("ERROR"), "{fatal}");
        assert!(fatal.contains("cannot be retried"), "{fatal}");

        let facts = Request::find(ArtifactKind::Facts, "web1").build();
        assertions::assert_unreachable(&router.dispatch(&facts).await);
        let unreachable = logs.take();
        assert!(unreachable.contains("Backend unreachable"), "{unreachable}");
        assert!(!unreachable.contains("cannot be retried"), "{unreachable}");
    }

    #[tokio::test]
    async fn test_environment_cache_beats_indirection_cache() {
        let kind_cache = Arc::new(MemoryBackend::new("kind_cache"));
        let staging_cache = Arc::new(MemoryBackend::new("staging_cache"));
        let registry = BackendRegistry::new()
            .with(memory("compiler", "default"))
            .expect("register")
            .with(kind_cache.clone())
            .expect("register")
            .with(staging_cache.clone())
            .expect("register");
        let config = IndirectConfig::from_toml_str(
            r#"
            [kinds.catalog]
            backend = "compiler"
            cache = "kind_cache"

            [environments.staging.kinds.catalog]
            cache = "staging_cache"
            "#,
        )
        .expect("config");
        let router = Router::new(config, registry).expect("router");

        let staging = Request::find(ArtifactKind::Catalog, "web1").environment("staging").build();
        router.dispatch(&staging).await.expect("dispatch");
        let production = Request::find(ArtifactKind::Catalog, "web1").build();
        router.dispatch(&production).await.expect("dispatch");

        let cached = |environment: &str| {
            Request::find(ArtifactKind::Catalog, "web1")
                .environment(environment)
                .force_cached(true)
                .build()
        };
        assert!(router.dispatch(&cached("staging")).await.expect("dispatch").served_from_cache());
        assert!(router.dispatch(&cached("production")).await.expect("dispatch").served_from_cache());
        assert!(staging_cache.find(&staging).await.expect("read").is_some());
        assert!(staging_cache.find(&production).await.expect("read").is_none());
        assert!(kind_cache.find(&production).await.expect("read").is_some());
        assert!(kind_cache.find(&staging).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_expire_without_cache_is_noop() {
        let router = create_test_router();
        let request = Request::find(ArtifactKind::Catalog, "web1").build();
        assert!(!router.expire(&request).await.expect("expire"));
    }
}
