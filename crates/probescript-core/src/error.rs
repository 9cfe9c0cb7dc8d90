//! Error types for probescript-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for probescript-core
#[derive(Error, Debug)]
pub enum Error {
    /// Errors raised by, or while talking to, the Lua runtime
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A plugin name was registered twice
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    /// A plugin host was configured twice
    #[error("plugin '{0}' is already configured")]
    AlreadyConfigured(String),

    /// A Lua class name without a module part (`module.Class`)
    #[error("'{0}' is not a qualified Lua class name (expected module.Class)")]
    InvalidClassName(String),

    /// The named plugin has not been loaded
    #[error("plugin '{0}' is not loaded")]
    PluginNotLoaded(String),

    /// The Lua object returned by a plugin class is not a plugin instance
    #[error("'{0}' did not produce a plugin instance (does it extend probe.plugins.Plugin?)")]
    NotAPlugin(String),

    /// The native signal behind a Lua signal object no longer exists
    #[error("signal '{0}' is not available")]
    SignalUnavailable(String),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl From<Error> for mlua::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Lua(inner) => inner,
            other => Self::external(other),
        }
    }
}
