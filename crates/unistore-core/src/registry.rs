//! Named storage backends.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::storage::{create_backend, StorageBackend, StorageConfig};
use crate::{Error, Result};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Registry membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderChange {
    Added(String),
    Removed(String),
}

/// Maps provider names to live backends and tracks the default provider.
///
/// The default provider is registered from construction on and can never
/// be removed, so [`get(None)`](Self::get) always resolves.
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn StorageBackend>>>,
    default_provider: String,
    changes: broadcast::Sender<ProviderChange>,
}

impl BackendRegistry {
    /// Build a registry from already-constructed backends.
    ///
    /// Fails with `Initialization` when `default_provider` is not among them.
    pub fn new(
        default_provider: impl Into<String>,
        backends: HashMap<String, Arc<dyn StorageBackend>>,
    ) -> Result<Self> {
        let default_provider = default_provider.into();
        if !backends.contains_key(&default_provider) {
            return Err(Error::Initialization(format!(
                "Default storage provider '{}' is not configured",
                default_provider
            )));
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            backends: RwLock::new(backends),
            default_provider,
            changes,
        })
    }

    /// Build a registry by constructing a backend for every configuration
    pub fn from_configs<'a, I>(default_provider: impl Into<String>, configs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a StorageConfig)>,
    {
        let mut backends = HashMap::new();
        for (name, config) in configs {
            let backend = create_backend(config).map_err(|e| {
                Error::Initialization(format!("Failed to create provider '{}': {}", name, e))
            })?;
            backends.insert(name.clone(), backend);
        }
        Self::new(default_provider, backends)
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Resolve `name`, or the default provider when `None`
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn StorageBackend>> {
        let name = name.unwrap_or(&self.default_provider);
        self.backends
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    /// Resolve `name` together with the registered name it resolved to
    pub fn resolve(&self, name: Option<&str>) -> Result<(String, Arc<dyn StorageBackend>)> {
        let resolved = name.unwrap_or(&self.default_provider).to_string();
        let backend = self.get(Some(&resolved))?;
        Ok((resolved, backend))
    }

    /// Construct a backend from `config` and register it under `name`
    pub fn add(&self, name: impl Into<String>, config: &StorageConfig) -> Result<()> {
        let backend = create_backend(config)?;
        self.register(name, backend);
        Ok(())
    }

    /// Register an existing backend under `name`, replacing any previous one
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        let name = name.into();
        let provider = backend.provider().to_string();
        self.backends.write().insert(name.clone(), backend);
        info!("Registered storage provider '{}' ({})", name, provider);
        // No receivers is fine
        let _ = self.changes.send(ProviderChange::Added(name));
    }

    /// Unregister `name`; the default provider cannot be removed
    pub fn remove(&self, name: &str) -> Result<()> {
        if name == self.default_provider {
            return Err(Error::CannotRemoveDefault(name.to_string()));
        }
        if self.backends.write().remove(name).is_none() {
            return Err(Error::ProviderNotFound(name.to_string()));
        }
        info!("Removed storage provider '{}'", name);
        let _ = self.changes.send(ProviderChange::Removed(name.to_string()));
        Ok(())
    }

    /// Registered provider names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.read().contains_key(name)
    }

    /// Receive [`ProviderChange`] notifications from now on
    pub fn subscribe_provider_changes(&self) -> broadcast::Receiver<ProviderChange> {
        self.changes.subscribe()
    }
}
