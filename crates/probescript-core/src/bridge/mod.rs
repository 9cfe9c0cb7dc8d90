//! The Rust/Lua boundary.
//!
//! ```text
//! engine Signal ──emit──▶ CallbackAdapter ──Marshal──▶ Lua function
//!       ▲                      ▲                            │
//!       └──── LuaSignal / LuaExecutionSignal ◀── connect ───┘
//! ```
//!
//! Errors escaping Lua during dispatch are handed to a [`FatalHandler`].

pub mod callback;
pub mod execution_signal;
pub mod fatal;
pub mod handles;
pub mod signal;
pub mod value;

pub use callback::{CallbackAdapter, CallbackResult, Marshal, MarshalArgs, MarshalContext};
pub use execution_signal::LuaExecutionSignal;
pub use fatal::{ExitOnForeignError, FOREIGN_ERROR_EXIT_CODE, FatalHandler, PanicOnForeignError};
pub use handles::{LuaBlock, LuaExpr, LuaMemory, LuaRegisters, LuaState};
pub use signal::{LuaSignal, export_signals};
pub use value::{ConfigValue, probe_config_value};
