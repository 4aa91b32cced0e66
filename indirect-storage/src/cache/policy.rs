//! Fallback policy for cached reads.
//!
//! A request picks exactly one policy. Precedence, highest first:
//! `force_fresh`, `force_cached`, `allow_stale_on_failure` (falling back to
//! the configured default when the request leaves it unset), then
//! primary-only.

use chrono::{DateTime, Utc};
use indirect_core::Request;

/// How a read may use the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Primary answer or primary failure. The cache is only written.
    #[default]
    PrimaryOnly,

    /// Primary answer or primary failure, whatever else the request asked.
    ForceFresh,

    /// Answer from the cache alone. The primary is never contacted.
    ForceCached,

    /// Primary first; when it is unreachable, serve the cached copy even if
    /// it has expired.
    StaleOnFailure,
}

impl FallbackPolicy {
    /// Policy for `request`. `default_fallback` applies when the request does
    /// not say whether stale answers are acceptable.
    pub fn from_request(request: &Request, default_fallback: bool) -> Self {
        if request.force_fresh() {
            Self::ForceFresh
        } else if request.force_cached() {
            Self::ForceCached
        } else if request.allow_stale_on_failure().unwrap_or(default_fallback) {
            Self::StaleOnFailure
        } else {
            Self::PrimaryOnly
        }
    }

    pub fn reads_cache_only(&self) -> bool {
        matches!(self, Self::ForceCached)
    }

    pub fn falls_back_on_unreachable(&self) -> bool {
        matches!(self, Self::StaleOnFailure)
    }
}

/// A resolved value tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    value: T,
    served_from_cache: bool,
    read_at: DateTime<Utc>,
}

impl<T> Resolved<T> {
    pub fn from_primary(value: T) -> Self {
        Self {
            value,
            served_from_cache: false,
            read_at: Utc::now(),
        }
    }

    pub fn from_cache(value: T) -> Self {
        Self {
            value,
            served_from_cache: true,
            read_at: Utc::now(),
        }
    }

    /// True when the primary was bypassed or unreachable.
    pub fn served_from_cache(&self) -> bool {
        self.served_from_cache
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            served_from_cache: self.served_from_cache,
            read_at: self.read_at,
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use indirect_core::ArtifactKind;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// force_fresh always wins, and only force_cached reads the cache alone.
        #[test]
        fn prop_policy_precedence(
            fresh in any::<bool>(),
            cached in any::<bool>(),
            stale in proptest::option::of(any::<bool>()),
            default_fallback in any::<bool>(),
        ) {
            let mut builder = Request::find(ArtifactKind::Node, "web1")
                .force_fresh(fresh)
                .force_cached(cached);
            if let Some(stale) = stale {
                builder = builder.allow_stale_on_failure(stale);
            }
            let policy = FallbackPolicy::from_request(&builder.build(), default_fallback);

            if fresh {
                prop_assert_eq!(policy, FallbackPolicy::ForceFresh);
            }
            prop_assert_eq!(policy.reads_cache_only(), !fresh && cached);
            prop_assert_eq!(
                policy.falls_back_on_unreachable(),
                !fresh && !cached && stale.unwrap_or(default_fallback)
            );
        }
    }
}
