//! Mapping table snapshots and the store that publishes them

use super::Binding;
use crate::error::MappingError;
use crate::event::ControlIdentity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Immutable set of bindings keyed by control identity
///
/// Keys are unique. Bindings are shared as `Arc<Binding>` so a copy of the
/// table keeps the same binding instances for unchanged entries.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    bindings: HashMap<ControlIdentity, Arc<Binding>>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, rejecting invalid bindings and duplicate identities
    pub fn from_bindings(bindings: impl IntoIterator<Item = Binding>) -> Result<Self, MappingError> {
        let mut table = Self::new();
        for binding in bindings {
            binding.validate()?;
            if table.bindings.contains_key(&binding.identity) {
                return Err(MappingError::DuplicateIdentity(binding.identity));
            }
            table
                .bindings
                .insert(binding.identity.clone(), Arc::new(binding));
        }
        Ok(table)
    }

    /// Insert or replace the binding for its identity, returning the old one
    pub fn insert(&mut self, binding: Binding) -> Option<Arc<Binding>> {
        self.bindings
            .insert(binding.identity.clone(), Arc::new(binding))
    }

    pub fn remove(&mut self, identity: &ControlIdentity) -> Option<Arc<Binding>> {
        self.bindings.remove(identity)
    }

    pub fn get(&self, identity: &ControlIdentity) -> Option<&Arc<Binding>> {
        self.bindings.get(identity)
    }

    pub fn contains(&self, identity: &ControlIdentity) -> bool {
        self.bindings.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Owned copy of every binding, sorted by identity
    pub fn bindings(&self) -> Vec<Binding> {
        let mut list: Vec<Binding> = self.bindings.values().map(|b| (**b).clone()).collect();
        list.sort_by(|a, b| a.identity.cmp(&b.identity));
        list
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.bindings.values()
    }
}

/// Publisher of the current [`MappingTable`] snapshot
///
/// Every edit produces a new snapshot (copy on write) and swaps it in as a
/// whole. Readers holding an older snapshot keep a consistent view; the
/// dispatcher is woken through [`MappingStore::subscribe`].
#[derive(Debug, Clone)]
pub struct MappingStore {
    tx: Arc<watch::Sender<Arc<MappingTable>>>,
}

impl MappingStore {
    pub fn new(table: MappingTable) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(table));
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<MappingTable> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MappingTable>> {
        self.tx.subscribe()
    }

    /// Atomically replace the whole table
    ///
    /// Bindings equal to the current ones keep their instance, so their
    /// dispatch state (pending value, throttle window) survives the swap.
    pub fn replace_table(&self, mut table: MappingTable) {
        self.tx.send_modify(|current| {
            let mut kept = 0;
            for (identity, binding) in table.bindings.iter_mut() {
                if let Some(existing) = current.bindings.get(identity) {
                    if **existing == **binding {
                        *binding = existing.clone();
                        kept += 1;
                    }
                }
            }
            debug!(
                "Replacing mapping table ({} bindings, {} unchanged)",
                table.len(),
                kept
            );
            *current = Arc::new(table);
        });
    }

    /// Add a binding, replacing any binding for the same identity
    pub fn add_binding(&self, binding: Binding) -> Result<Option<Arc<Binding>>, MappingError> {
        binding.validate()?;
        debug!("Adding binding {} -> {}", binding.identity, binding.target);

        let mut previous = None;
        self.tx.send_modify(|table| {
            previous = Arc::make_mut(table).insert(binding);
        });
        Ok(previous)
    }

    /// Remove the binding for `identity`, if any
    pub fn remove_binding(&self, identity: &ControlIdentity) -> Option<Arc<Binding>> {
        let mut removed = None;
        self.tx.send_if_modified(|table| {
            if !table.contains(identity) {
                return false;
            }
            removed = Arc::make_mut(table).remove(identity);
            true
        });
        if removed.is_some() {
            debug!("Removed binding {}", identity);
        }
        removed
    }

    /// Enable or disable a binding. Returns false if the identity is unbound.
    pub fn set_enabled(&self, identity: &ControlIdentity, enabled: bool) -> bool {
        let mut found = false;
        self.tx.send_if_modified(|table| {
            let Some(current) = table.get(identity) else {
                return false;
            };
            found = true;
            if current.enabled == enabled {
                return false;
            }
            let mut binding = (**current).clone();
            binding.enabled = enabled;
            Arc::make_mut(table).insert(binding);
            true
        });
        found
    }

    /// Snapshot of every binding, in the shape a profile saver consumes
    pub fn get_bindings(&self) -> Vec<Binding> {
        self.snapshot().bindings()
    }
}

impl Default for MappingStore {
    fn default() -> Self {
        Self::new(MappingTable::new())
    }
}
