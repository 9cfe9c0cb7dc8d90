//! Shared fixtures for probescript-core integration tests.
//!
//! ```ignore
//! mod common;
//! let h = common::Harness::new(&[("tracer.lua", SOURCE)], "extra = 1");
//! ```

#![allow(dead_code)]

use probescript_core::bridge::PanicOnForeignError;
use probescript_core::config::ConfigFile;
use probescript_core::engine::Engine;
use probescript_core::{Interpreter, InterpreterOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A module directory on disk, a config pointing at it, an engine and an
/// interpreter that panics on Lua errors.
pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<ConfigFile>,
    pub engine: Arc<Engine>,
    pub interp: Interpreter,
}

impl Harness {
    /// `modules` are `(relative path, source)` pairs; `extra_config` is
    /// appended to the generated `[interpreter]` section.
    pub fn new(modules: &[(&str, &str)], extra_config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (path, source) in modules {
            write_module(dir.path(), path, source);
        }
        let text = format!(
            "[interpreter]\nmodule_paths = [{:?}]\n\n{extra_config}\n",
            dir.path().display().to_string()
        );
        let config = Arc::new(ConfigFile::parse(&text).unwrap());
        let engine = Arc::new(Engine::new(Arc::clone(&config)));
        let options = InterpreterOptions::from_config(&config)
            .with_fatal_handler(Arc::new(PanicOnForeignError));
        let interp = Interpreter::new(Arc::clone(&engine), options).unwrap();
        Self {
            dir,
            config,
            engine,
            interp,
        }
    }

    /// Load and initialize `module.Class`.
    pub fn start(&self, qualified: &str, config_key: &str) {
        let plugin = self.interp.load_plugin(qualified, config_key).unwrap();
        self.interp.initialize_plugin(&plugin.info().name).unwrap();
    }

    /// Evaluate a Lua expression in the interpreter.
    pub fn eval<T: mlua::FromLuaMulti>(&self, code: &str) -> T {
        self.interp.lua().load(code).eval().unwrap()
    }
}

pub fn write_module(root: &Path, relative: &str, source: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, source).unwrap();
}
