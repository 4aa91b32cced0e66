//! Enum types for requests, artifacts and backends

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ARTIFACT KINDS
// ============================================================================

/// The kind of domain artifact an indirection resolves.
///
/// Each kind has at most one registered indirection per process. Kinds are
/// addressed in configuration and on the wire by their snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Classification record for a managed host
    Node,
    /// Compiled configuration document
    Catalog,
    /// Facts gathered from a host
    Facts,
    /// Signed certificate
    Certificate,
    /// Run report derived from a catalog application
    Report,
    /// File content served by reference
    FileContent,
}

impl ArtifactKind {
    /// Every kind, in declaration order.
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::Node,
        ArtifactKind::Catalog,
        ArtifactKind::Facts,
        ArtifactKind::Certificate,
        ArtifactKind::Report,
        ArtifactKind::FileContent,
    ];

    /// Configuration and wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Node => "node",
            ArtifactKind::Catalog => "catalog",
            ArtifactKind::Facts => "facts",
            ArtifactKind::Certificate => "certificate",
            ArtifactKind::Report => "report",
            ArtifactKind::FileContent => "file_content",
        }
    }

    /// Plural wire name, used for search paths.
    pub fn plural(&self) -> &'static str {
        match self {
            ArtifactKind::Node => "nodes",
            ArtifactKind::Catalog => "catalogs",
            ArtifactKind::Facts => "facts",
            ArtifactKind::Certificate => "certificates",
            ArtifactKind::Report => "reports",
            ArtifactKind::FileContent => "file_contents",
        }
    }

    /// Upper-case name used in environment variable overrides.
    pub fn env_name(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// Compiled kinds receive a fresh correlation token when resolved
    /// without one.
    pub fn is_compiled(&self) -> bool {
        matches!(self, ArtifactKind::Catalog)
    }

    /// Hierarchical kinds are resolved through parent chains.
    pub fn is_hierarchical(&self) -> bool {
        matches!(self, ArtifactKind::Node)
    }

    /// Single-byte tag used in binary key encodings.
    pub fn to_byte(self) -> u8 {
        match self {
            ArtifactKind::Node => 0,
            ArtifactKind::Catalog => 1,
            ArtifactKind::Facts => 2,
            ArtifactKind::Certificate => 3,
            ArtifactKind::Report => 4,
            ArtifactKind::FileContent => 5,
        }
    }

    /// Inverse of [`ArtifactKind::to_byte`].
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = ArtifactKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized || kind.plural() == normalized)
            .ok_or_else(|| ArtifactKindParseError(s.to_string()))
    }
}

/// Error when parsing an unknown artifact kind name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKindParseError(pub String);

impl fmt::Display for ArtifactKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown artifact kind: {}", self.0)
    }
}

impl std::error::Error for ArtifactKindParseError {}

// ============================================================================
// OPERATIONS
// ============================================================================

/// The five operations a backend may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Find,
    Search,
    Save,
    Destroy,
    Exists,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Find => "find",
            Operation::Search => "search",
            Operation::Save => "save",
            Operation::Destroy => "destroy",
            Operation::Exists => "exists",
        }
    }

    /// Capability a backend must declare to serve this operation.
    pub fn capability(&self) -> Capabilities {
        match self {
            Operation::Find => Capabilities::FIND,
            Operation::Search => Capabilities::SEARCH,
            Operation::Save => Capabilities::SAVE,
            Operation::Destroy => Capabilities::DESTROY,
            Operation::Exists => Capabilities::EXISTS,
        }
    }

    /// Whether the operation returns a collection.
    pub fn is_plural(&self) -> bool {
        matches!(self, Operation::Search)
    }

    /// Whether the operation modifies the primary backend.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Operation::Save | Operation::Destroy)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

bitflags! {
    /// Operations a backend supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const FIND = 0b0000_0001;
        const SEARCH = 0b0000_0010;
        const SAVE = 0b0000_0100;
        const DESTROY = 0b0000_1000;
        const EXISTS = 0b0001_0000;
        /// Lookups only
        const READ_ONLY = Self::FIND.bits() | Self::SEARCH.bits() | Self::EXISTS.bits();
        /// Everything a cache store must offer
        const CACHE_STORE = Self::FIND.bits() | Self::SAVE.bits() | Self::DESTROY.bits() | Self::EXISTS.bits();
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::empty()
    }
}

impl Capabilities {
    pub fn supports(&self, operation: Operation) -> bool {
        self.contains(operation.capability())
    }
}

// Manual serde implementation for Capabilities (bitflags 2.x + serde)
impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Capabilities {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid Capabilities bits: {:#04x}", bits))
        })
    }
}

// ============================================================================
// FAILURE CLASSIFICATION
// ============================================================================

/// Why a backend could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnreachableReason {
    /// No answer within the configured request timeout
    Timeout,
    /// The remote end refused or dropped the connection
    ConnectionRefused,
    /// The remote end answered with a 5xx status
    ServerError { status: u16 },
    /// Any other transport-level failure
    Transport(String),
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::Timeout => write!(f, "request timed out"),
            UnreachableReason::ConnectionRefused => write!(f, "connection refused"),
            UnreachableReason::ServerError { status } => {
                write!(f, "server error (status {})", status)
            }
            UnreachableReason::Transport(reason) => write!(f, "transport failure: {}", reason),
        }
    }
}
