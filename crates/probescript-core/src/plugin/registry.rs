//! Append-only plugin registry.

use crate::engine::{CorePlugin, Plugin};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// How a registered plugin comes into being.
#[derive(Clone)]
pub enum PluginCreator {
    /// Compiled into the host; available from process start.
    Native(fn() -> Arc<dyn Plugin>),
    /// A Lua class, resolved through `require` when first referenced.
    Scripted { class: String },
}

impl PluginCreator {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Scripted { .. } => "lua",
        }
    }
}

impl std::fmt::Debug for PluginCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::Scripted { class } => f.debug_struct("Scripted").field("class", class).finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginRegistration {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<String>,
    #[serde(rename = "kind", serialize_with = "serialize_creator")]
    pub creator: PluginCreator,
}

fn serialize_creator<S: serde::Serializer>(
    creator: &PluginCreator,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(creator.kind())
}

impl PluginRegistration {
    pub fn native(name: &str, description: &str, create: fn() -> Arc<dyn Plugin>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            creator: PluginCreator::Native(create),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.creator, PluginCreator::Native(_))
    }
}

/// Registrations in the order they were added. Names are unique and
/// entries are never replaced or removed.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: RwLock<Vec<PluginRegistration>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in [`CorePlugin`].
    pub fn with_core() -> Self {
        let registry = Self::new();
        registry.entries.write().push(PluginRegistration::native(
            CorePlugin::NAME,
            "Exposes the engine's core events",
            CorePlugin::create,
        ));
        registry
    }

    /// Add `registration`. An existing entry with the same name is kept and
    /// the call fails.
    pub fn register(&self, registration: PluginRegistration) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.name == registration.name) {
            tracing::error!(plugin = %registration.name, "duplicate plugin registration");
            return Err(Error::DuplicatePlugin(registration.name));
        }
        tracing::debug!(
            plugin = %registration.name,
            kind = registration.creator.kind(),
            "plugin registered"
        );
        entries.push(registration);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<PluginRegistration> {
        self.entries.read().iter().find(|e| e.name == name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|e| e.name == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<PluginRegistration> {
        self.entries.read().clone()
    }
}
