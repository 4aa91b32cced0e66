//! Configuration types
//!
//! [`IndirectConfig`] is read from a TOML file and then overridden from
//! `INDIRECT_*` environment variables.
//!
//! ```toml
//! request_timeout_ms = 30000
//! fallback_on_failure = true
//! cache_ttl_secs = 1800
//!
//! [kinds.catalog]
//! backend = "compiler"
//! cache = "catalog_cache"
//!
//! [environments.staging.kinds.catalog]
//! backend = "staging_compiler"
//! ```

use crate::validation::validate_environment;
use crate::{ArtifactKind, ConfigError, IndirectResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_cache_ttl_secs() -> u64 {
    1_800
}

/// Process-wide backend selection for one artifact kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    pub backend: String,
    #[serde(default)]
    pub cache: Option<String>,
}

/// Environment-scoped override for one artifact kind. Unset fields fall
/// back to the process-wide [`KindConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindOverride {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub cache: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub kinds: BTreeMap<String, KindOverride>,
}

/// Master configuration for the resolution layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectConfig {
    /// Upper bound on any single primary backend call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Default for requests that leave stale-on-failure unset
    #[serde(default)]
    pub fallback_on_failure: bool,
    /// Expiry applied to resolved artifacts that carry none
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub kinds: BTreeMap<String, KindConfig>,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl Default for IndirectConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            fallback_on_failure: false,
            cache_ttl_secs: default_cache_ttl_secs(),
            kinds: BTreeMap::new(),
            environments: BTreeMap::new(),
        }
    }
}

impl IndirectConfig {
    pub fn from_toml_str(source: &str) -> IndirectResult<Self> {
        toml::from_str(source).map_err(|e| {
            ConfigError::Parse {
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> IndirectResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&source)
    }

    /// Defaults overridden from the environment.
    ///
    /// Environment variables:
    /// - `INDIRECT_REQUEST_TIMEOUT_MS`: primary call bound (default: 30000)
    /// - `INDIRECT_FALLBACK_ON_FAILURE`: serve stale data on failure (default: false)
    /// - `INDIRECT_CACHE_TTL_SECS`: expiry for resolved artifacts (default: 1800)
    /// - `INDIRECT_<KIND>_BACKEND` / `INDIRECT_<KIND>_CACHE`: per-kind selection
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `INDIRECT_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_overrides<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        self.request_timeout_ms = var("INDIRECT_REQUEST_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.request_timeout_ms);
        self.fallback_on_failure = var("INDIRECT_FALLBACK_ON_FAILURE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.fallback_on_failure);
        self.cache_ttl_secs = var("INDIRECT_CACHE_TTL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.cache_ttl_secs);

        for kind in ArtifactKind::ALL {
            let backend = var(&format!("INDIRECT_{}_BACKEND", kind.env_name()));
            let cache = var(&format!("INDIRECT_{}_CACHE", kind.env_name()));
            match (backend, self.kinds.get_mut(kind.as_str())) {
                (Some(backend), Some(existing)) => existing.backend = backend,
                (Some(backend), None) => {
                    self.kinds.insert(
                        kind.as_str().to_string(),
                        KindConfig {
                            backend,
                            cache: None,
                        },
                    );
                }
                (None, _) => {}
            }
            if let (Some(cache), Some(existing)) = (cache, self.kinds.get_mut(kind.as_str())) {
                existing.cache = Some(cache);
            }
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Process-wide selection for a kind.
    pub fn kind(&self, kind: ArtifactKind) -> Option<&KindConfig> {
        self.kinds.get(kind.as_str())
    }

    fn environment_override(&self, kind: ArtifactKind, environment: &str) -> Option<&KindOverride> {
        self.environments
            .get(environment)
            .and_then(|env| env.kinds.get(kind.as_str()))
    }

    /// Backend named for `kind` in `environment`, if the environment overrides it.
    pub fn environment_backend(&self, kind: ArtifactKind, environment: &str) -> Option<&str> {
        self.environment_override(kind, environment)
            .and_then(|o| o.backend.as_deref())
    }

    /// Cache named for `kind` in `environment`, if the environment overrides it.
    pub fn environment_cache(&self, kind: ArtifactKind, environment: &str) -> Option<&str> {
        self.environment_override(kind, environment)
            .and_then(|o| o.cache.as_deref())
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - request_timeout_ms > 0
    /// - every kind name is known
    /// - no backend or cache name is empty
    /// - every environment name is well formed
    pub fn validate(&self) -> IndirectResult<()> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "request_timeout_ms must be greater than 0".to_string(),
            }
            .into());
        }

        for (name, kind) in &self.kinds {
            check_kind_name(&format!("kinds.{}", name), name)?;
            check_backend_name(&format!("kinds.{}.backend", name), Some(&kind.backend))?;
            check_backend_name(&format!("kinds.{}.cache", name), kind.cache.as_ref())?;
        }

        for (env_name, env) in &self.environments {
            validate_environment(env_name).map_err(|e| ConfigError::InvalidValue {
                field: format!("environments.{}", env_name),
                value: env_name.clone(),
                reason: e.to_string(),
            })?;
            for (name, kind) in &env.kinds {
                let field = format!("environments.{}.kinds.{}", env_name, name);
                check_kind_name(&field, name)?;
                check_backend_name(&format!("{}.backend", field), kind.backend.as_ref())?;
                check_backend_name(&format!("{}.cache", field), kind.cache.as_ref())?;
            }
        }

        Ok(())
    }
}

fn check_kind_name(field: &str, name: &str) -> IndirectResult<()> {
    name.parse::<ArtifactKind>()
        .map(|_| ())
        .map_err(|e| {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value: name.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}

fn check_backend_name(field: &str, name: Option<&String>) -> IndirectResult<()> {
    match name {
        Some(name) if name.trim().is_empty() => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: name.clone(),
            reason: "backend names must not be empty".to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
