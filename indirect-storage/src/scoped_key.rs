//! Storage keys scoped by kind and environment.
//!
//! Every local medium stores artifacts under a [`ScopedKey`], so two
//! environments (or two kinds) can never read each other's entries even when
//! they share a key. The only way to build one is from a kind, an
//! environment and a key.

use globset::{Glob, GlobMatcher};
use indirect_core::{ArtifactKind, IndirectResult, Request, ValidationError};

/// Separator byte between the kind tag and the environment.
const SEPARATOR: u8 = 0xFF;

/// Terminator between the environment and the key. Environment names never
/// contain it.
const TERMINATOR: u8 = 0x00;

/// A storage key scoped to one kind in one environment.
///
/// # Binary Format
///
/// - Byte 0: kind tag
/// - Byte 1: separator (0xFF)
/// - Environment name bytes, then a 0x00 terminator
/// - Key bytes
///
/// Keys sort by kind, then environment, so one prefix scan covers a whole
/// `(kind, environment)` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedKey {
    inner: ScopedKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ScopedKeyInner {
    kind: ArtifactKind,
    environment: String,
    key: String,
}

impl ScopedKey {
    pub fn new(kind: ArtifactKind, environment: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            inner: ScopedKeyInner {
                kind,
                environment: environment.into(),
                key: key.into(),
            },
        }
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(request.kind(), request.environment(), request.key())
    }

    pub fn kind(&self) -> ArtifactKind {
        self.inner.kind
    }

    pub fn environment(&self) -> &str {
        &self.inner.environment
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::namespace_prefix(self.inner.kind, &self.inner.environment);
        bytes.extend_from_slice(self.inner.key.as_bytes());
        bytes
    }

    /// Returns `None` for anything [`ScopedKey::encode`] could not have produced.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 || bytes[1] != SEPARATOR {
            return None;
        }
        let kind = ArtifactKind::from_byte(bytes[0])?;
        let rest = &bytes[2..];
        let split = rest.iter().position(|b| *b == TERMINATOR)?;
        let environment = std::str::from_utf8(&rest[..split]).ok()?;
        let key = std::str::from_utf8(&rest[split + 1..]).ok()?;
        Some(Self::new(kind, environment, key))
    }

    /// Prefix shared by every key of `kind` in `environment`.
    pub fn namespace_prefix(kind: ArtifactKind, environment: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(environment.len() + 3);
        prefix.push(kind.to_byte());
        prefix.push(SEPARATOR);
        prefix.extend_from_slice(environment.as_bytes());
        prefix.push(TERMINATOR);
        prefix
    }
}

/// Compile a search pattern (`*`, `?`, `[..]`) into a key matcher.
pub fn key_matcher(pattern: &str) -> IndirectResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| {
            ValidationError::InvalidKey {
                key: pattern.to_string(),
                reason: format!("invalid search pattern: {}", e),
            }
            .into()
        })
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn kind_strategy() -> impl Strategy<Value = ArtifactKind> {
        prop::sample::select(ArtifactKind::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_encode_decode_roundtrip(
            kind in kind_strategy(),
            environment in "[a-z0-9_]{1,12}",
            key in "[a-zA-Z0-9.*_-]{1,40}",
        ) {
            let scoped = ScopedKey::new(kind, environment, key);
            let decoded = ScopedKey::decode(&scoped.encode());
            prop_assert_eq!(Some(scoped), decoded);
        }

        /// Different scoped keys never share an encoding.
        #[test]
        fn prop_encoding_is_injective(
            k1 in kind_strategy(), k2 in kind_strategy(),
            e1 in "[a-z_]{1,6}", e2 in "[a-z_]{1,6}",
            n1 in "[a-z0-9]{1,6}", n2 in "[a-z0-9]{1,6}",
        ) {
            let a = ScopedKey::new(k1, e1, n1);
            let b = ScopedKey::new(k2, e2, n2);
            if a == b {
                prop_assert_eq!(a.encode(), b.encode());
            } else {
                prop_assert_ne!(a.encode(), b.encode());
            }
        }
    }
}
