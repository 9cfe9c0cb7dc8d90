//! Plugin base capability.

use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;

pub use crate::logging::LogLevel;

/// Identity of a loaded plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    /// Section under `[plugins]` holding this plugin's settings.
    pub config_key: String,
    pub dependencies: Vec<String>,
}

pub trait Plugin: Send + Sync {
    fn info(&self) -> &PluginInfo;

    /// Called once after every plugin has been created.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }
}

/// Built-in plugin owning the core event table. Always available.
#[derive(Debug)]
pub struct CorePlugin {
    info: PluginInfo,
}

impl CorePlugin {
    pub const NAME: &'static str = "CorePlugin";

    pub fn create() -> Arc<dyn Plugin> {
        Arc::new(Self {
            info: PluginInfo {
                name: Self::NAME.to_string(),
                description: "Exposes the engine's core events".to_string(),
                config_key: Self::NAME.to_string(),
                dependencies: Vec::new(),
            },
        })
    }
}

impl Plugin for CorePlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}
