//! Plugin base and plugin set.
//!
//! A plugin is a composition unit: `initialize` runs exactly once at load
//! and registers whatever handlers the plugin needs; `teardown` removes
//! them again (the default delegates to bulk removal by owner tag).
//! Lookup is keyed by explicit [`PluginKind`] tags declared at
//! registration — exact match first, then the plugin's declared
//! capability tags — so no runtime type introspection is involved.

use crate::communicator::Communicator;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Identity tag of a concrete plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginKind(pub &'static str);

impl PluginKind {
    /// The tag as a string.
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A capability a plugin declares itself to provide ("is-a" relation used
/// as the lookup fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability(pub &'static str);

/// A composition unit attached to a communicator.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique tag of this concrete plugin.
    fn kind(&self) -> PluginKind;

    /// Capability tags for fallback lookup.
    fn provides(&self) -> &'static [Capability] {
        &[]
    }

    /// Called exactly once when the plugin is loaded. Registers the
    /// plugin's handlers.
    async fn initialize(&self, comm: &Communicator) -> Result<()>;

    /// Called on unload/shutdown. Must remove every handler the plugin
    /// registered; the default removes everything tagged with this
    /// plugin's kind.
    async fn teardown(&self, comm: &Communicator) -> Result<()> {
        comm.remove_all_for_plugin(self.kind()).await;
        Ok(())
    }
}

/// Tag-keyed set of loaded plugins. Loading two plugins of the same kind
/// is rejected (not replaced) so event subscriptions cannot silently
/// disappear.
#[derive(Default)]
pub struct PluginSet {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a plugin, rejecting a duplicate kind.
    pub fn insert(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let mut plugins = self.plugins.write();
        if plugins.iter().any(|p| p.kind() == plugin.kind()) {
            return Err(Error::PluginConflict(plugin.kind().as_str().to_string()));
        }
        plugins.push(plugin);
        Ok(())
    }

    /// Remove and return a plugin by kind.
    pub fn remove(&self, kind: PluginKind) -> Option<Arc<dyn Plugin>> {
        let mut plugins = self.plugins.write();
        let index = plugins.iter().position(|p| p.kind() == kind)?;
        Some(plugins.remove(index))
    }

    /// Look up by kind: exact match first, then the declared capability
    /// table (first plugin providing a capability with the same tag).
    pub fn get(&self, kind: PluginKind) -> Option<Arc<dyn Plugin>> {
        let plugins = self.plugins.read();
        plugins
            .iter()
            .find(|p| p.kind() == kind)
            .or_else(|| {
                plugins
                    .iter()
                    .find(|p| p.provides().iter().any(|c| c.0 == kind.0))
            })
            .cloned()
    }

    /// All loaded plugins, in load order.
    pub fn all(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.read().clone()
    }

    /// Number of loaded plugins.
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    /// Whether no plugin is loaded.
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}
