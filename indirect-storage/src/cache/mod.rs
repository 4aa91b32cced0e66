//! Caching layer: a primary backend fronted by a cache backend.
//!
//! Reads choose a [`FallbackPolicy`] and return a [`Resolved`] value that
//! says whether the answer came from the cache. Staleness is never hidden:
//! a cached copy is only served when the caller asked for it, either up
//! front (`force_cached`) or as a fallback (`allow_stale_on_failure`).
//!
//! # Example
//!
//! ```ignore
//! let writer = CacheWriter::spawn(cache.clone());
//! let caching = CachingBackend::new(primary, cache, writer, CacheSettings::default())?;
//!
//! let request = Request::find(ArtifactKind::Catalog, "web1")
//!     .allow_stale_on_failure(true)
//!     .build();
//! let resolved = caching.find_resolved(&request).await?;
//! ```

pub mod decorator;
pub mod policy;
pub mod writer;

pub use decorator::{CacheSettings, CachingBackend};
pub use policy::{FallbackPolicy, Resolved};
pub use writer::CacheWriter;

pub use crate::scoped_key::ScopedKey;
