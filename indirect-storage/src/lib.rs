//! Indirect Storage - Backend Trait, Backends and Caching Decorator
//!
//! Every storage medium the resolution layer can talk to implements
//! [`Backend`]. Decorators ([`CachingBackend`], [`CorrelatingBackend`])
//! implement the same trait, so the router composes them freely.

pub mod backend;
pub mod cache;
pub mod codec;
pub mod content;
pub mod correlating;
pub mod directory;
pub mod file;
pub mod lmdb;
pub mod memory;
pub mod network;
pub mod scoped_key;
pub mod sql;

pub use backend::{ensure_capability, with_timeout, Backend};
pub use cache::{CacheSettings, CacheWriter, CachingBackend, FallbackPolicy, Resolved};
pub use codec::Format;
pub use content::{FileContentStore, MemoryContentStore};
pub use correlating::CorrelatingBackend;
pub use directory::{
    DirectoryBackend, DirectoryEntry, DirectorySettings, DirectorySource, FileDirectory,
    MemoryDirectory,
};
pub use file::FileBackend;
pub use lmdb::{CacheStats, LmdbBackend, LmdbError};
pub use memory::{MemoryBackend, NoopBackend};
pub use network::{encode_options, NetworkBackend, MAX_QUERY_LEN};
pub use scoped_key::{key_matcher, ScopedKey};
pub use sql::SqlBackend;
