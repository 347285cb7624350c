//! Name → initializer lookup for plugins and endpoints.
//!
//! An explicit object rather than process-global maps: the server owns a
//! registry built from the static builtin tables, and tests build fresh
//! ones. Duplicate registration is a setup-time error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Directive;
use crate::endpoints::{Endpoint, EndpointContext};
use crate::engine::Plugin;
use crate::error::{ApexError, Result};

pub type PluginInit = fn(&Directive) -> Result<Arc<dyn Plugin>>;
pub type EndpointInit = fn(EndpointContext) -> Result<Arc<dyn Endpoint>>;

#[derive(Clone)]
pub struct PluginEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub init: PluginInit,
}

#[derive(Clone)]
pub struct EndpointEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub init: EndpointInit,
}

#[derive(Default)]
pub struct Registry {
    plugins: HashMap<&'static str, PluginEntry>,
    endpoints: HashMap<&'static str, EndpointEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every compiled-in plugin and endpoint.
    pub fn builtin() -> Result<Self> {
        let mut registry = Registry::new();
        for entry in crate::plugins::builtin() {
            registry.register_plugin(entry)?;
        }
        for entry in crate::endpoints::builtin() {
            registry.register_endpoint(entry)?;
        }
        Ok(registry)
    }

    pub fn register_plugin(&mut self, entry: PluginEntry) -> Result<()> {
        if self.plugins.contains_key(entry.name) {
            return Err(ApexError::DuplicatePlugin(entry.name.to_string()));
        }
        self.plugins.insert(entry.name, entry);
        Ok(())
    }

    pub fn register_endpoint(&mut self, entry: EndpointEntry) -> Result<()> {
        if self.endpoints.contains_key(entry.name) {
            return Err(ApexError::DuplicateEndpoint(entry.name.to_string()));
        }
        self.endpoints.insert(entry.name, entry);
        Ok(())
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginEntry> {
        self.plugins.get(name)
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointEntry> {
        self.endpoints.get(name)
    }
}
