//! Named backend registry.

use std::collections::HashMap;
use std::sync::Arc;

use indirect_core::{ConfigError, IndirectResult};
use indirect_storage::Backend;

/// Every backend the process can route to, looked up by name.
///
/// Built once at startup and handed to the router.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own name. Names are unique.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> IndirectResult<()> {
        let name = backend.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(ConfigError::DuplicateBackend { name }.into());
        }
        tracing::debug!(backend = %name, capabilities = ?backend.capabilities(), "Registered backend");
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Builder-style [`BackendRegistry::register`].
    pub fn with(mut self, backend: Arc<dyn Backend>) -> IndirectResult<Self> {
        self.register(backend)?;
        Ok(self)
    }

    /// Register `backend` unless this exact instance is already present.
    ///
    /// A different backend under the same name is still a duplicate.
    pub fn adopt(&mut self, backend: &Arc<dyn Backend>) -> IndirectResult<()> {
        match self.backends.get(backend.name()) {
            Some(existing) if same_instance(existing, backend) => Ok(()),
            Some(_) => Err(ConfigError::DuplicateBackend {
                name: backend.name().to_string(),
            }
            .into()),
            None => self.register(Arc::clone(backend)),
        }
    }

    pub fn get(&self, name: &str) -> IndirectResult<Arc<dyn Backend>> {
        self.backends.get(name).cloned().ok_or_else(|| {
            ConfigError::UnknownBackend {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

fn same_instance(a: &Arc<dyn Backend>, b: &Arc<dyn Backend>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
