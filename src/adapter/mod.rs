//! Backend adapters (ElMo, PyMOL, Coot, console)
//!
//! The dispatcher only knows the [`BackendAdapter`] contract. Adapters are
//! registered by backend id and looked up for each dispatch.

pub mod console;
#[cfg(test)]
pub mod recording;

use crate::error::BackendError;
use crate::event::ParamValue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub use console::ConsoleAdapter;

/// Sink for parameter updates of one visualization backend
///
/// All methods take `&self` so adapters can be shared as
/// `Arc<dyn BackendAdapter>`. Adapters that talk to a non-reentrant tool
/// serialize calls internally.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend id used for routing (e.g. "elmo", "pymol")
    fn adapter_id(&self) -> &str;

    /// Connect to the backend
    async fn init(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Apply one parameter update
    async fn send(&self, parameter: &str, value: ParamValue) -> Result<(), BackendError>;

    /// Release backend resources
    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Adapters keyed by backend id
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<String, Arc<dyn BackendAdapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id
    ///
    /// The adapter is initialized immediately; a failed init is not registered.
    pub async fn register(&self, adapter: Arc<dyn BackendAdapter>) -> Result<(), BackendError> {
        let id = adapter.adapter_id().to_string();
        debug!("Registering adapter '{}'...", id);

        if let Err(e) = adapter.init().await {
            warn!("Failed to initialize adapter '{}': {}", id, e);
            return Err(e);
        }

        let previous = self.adapters.write().await.insert(id.clone(), adapter);
        if previous.is_some() {
            debug!("Adapter '{}' replaced", id);
        }
        debug!("Adapter '{}' registered and initialized", id);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.read().await.get(id).cloned()
    }

    /// Registered backend ids, sorted
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Shut every adapter down and clear the registry
    ///
    /// All adapters are attempted; the failures are returned together.
    pub async fn shutdown_all(&self) -> Result<(), Vec<(String, BackendError)>> {
        debug!("Shutting down all adapters...");

        let adapters: Vec<_> = self
            .adapters
            .write()
            .await
            .drain()
            .collect();

        let mut errors = Vec::new();
        for (id, adapter) in adapters {
            match adapter.shutdown().await {
                Ok(()) => debug!("Adapter '{}' shut down", id),
                Err(e) => {
                    warn!("Failed to shutdown adapter '{}': {}", id, e);
                    errors.push((id, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
