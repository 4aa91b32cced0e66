//! Indirect Router - Backend Selection and Dispatch
//!
//! The [`Router`] owns one [`Indirection`] per artifact kind, picks the
//! backend for each request, wraps it in the correlating and caching
//! decorators, and returns a [`Dispatched`] result state.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = BackendRegistry::new();
//! registry.register(Arc::new(NetworkBackend::new("server", url, timeout)?))?;
//! registry.register(Arc::new(FileBackend::new("catalog_cache", cache_dir)))?;
//!
//! let router = Router::new(IndirectConfig::from_file(path)?.with_env_overrides(), registry)?;
//! let request = Request::find(ArtifactKind::Catalog, "web1")
//!     .allow_stale_on_failure(true)
//!     .build();
//! match router.dispatch(&request).await? {
//!     Dispatched::Found(resolved) => apply(resolved.value()),
//!     Dispatched::NotFound => {}
//!     other => unreachable!("find answered {:?}", other),
//! }
//! ```

pub mod registry;
pub mod router;
pub mod telemetry;

pub use registry::BackendRegistry;
pub use router::{Dispatched, Indirection, Router};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
