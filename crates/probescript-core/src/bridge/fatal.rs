//! Unrecoverable Lua errors.
//!
//! Once a script error escapes across the boundary during event dispatch,
//! plugin loading or a state clone, the interpreter's state is unknown and
//! the engine cannot safely continue. Such errors go to a [`FatalHandler`],
//! which never returns.

use crate::error::Error;
pub use luahelper::{UNFETCHABLE_ERROR, describe_lua_error};

/// Exit status used when a Lua error terminates the process.
pub const FOREIGN_ERROR_EXIT_CODE: i32 = 255;

pub trait FatalHandler: Send + Sync {
    /// `context` names the operation that was running, `description` is the
    /// rendered Lua error.
    fn foreign_error(&self, context: &str, description: &str) -> !;
}

/// Log the error and terminate the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitOnForeignError;

impl FatalHandler for ExitOnForeignError {
    fn foreign_error(&self, context: &str, description: &str) -> ! {
        if crate::logging::is_logging_initialized() {
            tracing::error!(context, "Lua error in {context}: {description}");
        } else {
            eprintln!("Lua error in {context}: {description}");
        }
        std::process::exit(FOREIGN_ERROR_EXIT_CODE)
    }
}

/// Panic instead of exiting, for hosts that unwind to a supervisor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicOnForeignError;

impl FatalHandler for PanicOnForeignError {
    fn foreign_error(&self, context: &str, description: &str) -> ! {
        panic!("Lua error in {context}: {description}")
    }
}

/// Render any bridge error the way Lua errors are rendered.
pub fn describe_error(err: &Error) -> String {
    match err {
        Error::Lua(inner) => describe_lua_error(inner),
        other => other.to_string(),
    }
}
