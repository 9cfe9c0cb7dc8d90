//! probescript-core: Lua plugins for a dynamic binary-analysis engine
//!
//! Scripts subscribe to the engine's events, answer its fork and
//! concretization questions, read their configuration section and keep
//! per-path state that is deep-copied whenever the engine forks.
//!
//! # Architecture
//!
//! ```text
//! Engine events ─▶ bridge (signals, adapters, marshalling) ─▶ Lua callbacks
//!                                                              │
//! Interpreter ─▶ probe.* modules ─▶ plugin classes ─▶ PluginHost / _state
//! ```
//!
//! # Modules
//!
//! - `engine`: reference model of the analysis engine (signals, states, blocks)
//! - `bridge`: callback adapters, Lua signal objects, value conversion, fatal path
//! - `plugin`: plugin host object, registry, fork-safe plugin state
//! - `module`: the `probe` Lua module family
//! - `interpreter`: interpreter lifecycle and plugin load/initialize
//! - `config`: typed TOML configuration reader
//! - `logging`: tracing subscriber setup

#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod logging;
pub mod module;
pub mod plugin;

pub use error::{ConfigError, Error, Result};
pub use interpreter::{Interpreter, InterpreterOptions, PluginStage};
