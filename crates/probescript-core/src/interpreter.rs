//! Interpreter lifecycle and plugin management.
//!
//! An [`Interpreter`] owns one Lua state with the `probe` modules installed,
//! the plugin registry and every plugin it created. Lua plugins move through
//! `Loaded` (class instantiated, host configured, registered) and
//! `Initialized` (optional `initialize` hook has run).

use crate::bridge::fatal::{ExitOnForeignError, FatalHandler, describe_error};
use crate::config::ConfigFile;
use crate::engine::{Engine, Plugin, PluginInfo};
use crate::error::{Error, Result};
use crate::module;
use crate::plugin::host::PluginHost;
use crate::plugin::{
    LuaPlugin, PluginCreator, PluginRegistration, PluginRegistry, ScriptContext,
};
use mlua::{AnyUserData, Function, Lua, ObjectLike, Table, Value as LuaValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStage {
    Loaded,
    Initialized,
}

pub struct InterpreterOptions {
    /// Directories searched by `require`, in order.
    pub module_paths: Vec<PathBuf>,
    pub fatal: Arc<dyn FatalHandler>,
    /// Compiled plugins besides the built-in core plugin.
    pub natives: Vec<PluginRegistration>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            module_paths: Vec::new(),
            fatal: Arc::new(ExitOnForeignError),
            natives: Vec::new(),
        }
    }
}

impl InterpreterOptions {
    pub fn from_config(config: &ConfigFile) -> Self {
        Self {
            module_paths: config.module_paths().into_iter().map(PathBuf::from).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_fatal_handler(mut self, fatal: Arc<dyn FatalHandler>) -> Self {
        self.fatal = fatal;
        self
    }

    #[must_use]
    pub fn with_native(mut self, registration: PluginRegistration) -> Self {
        self.natives.push(registration);
        self
    }
}

pub struct Interpreter {
    lua: Lua,
    engine: Arc<Engine>,
    ctx: ScriptContext,
    registry: PluginRegistry,
    plugins: Mutex<HashMap<String, Arc<dyn Plugin>>>,
    stages: Mutex<HashMap<String, PluginStage>>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("registry", &self.registry)
            .field("stages", &*self.stages.lock())
            .finish_non_exhaustive()
    }
}

fn lua_class_key(name: &str) -> String {
    format!("plugins.{name}.lua_class")
}

impl Interpreter {
    pub fn new(engine: Arc<Engine>, options: InterpreterOptions) -> Result<Self> {
        let lua = Lua::new();
        for dir in &options.module_paths {
            append_module_path(&lua, dir)?;
        }
        let ctx = module::install(&lua, &engine, &options.fatal)?;

        let registry = PluginRegistry::with_core();
        for native in options.natives {
            registry.register(native)?;
        }

        tracing::info!(
            module_paths = options.module_paths.len(),
            natives = registry.len(),
            "Lua interpreter running"
        );
        Ok(Self {
            lua,
            engine,
            ctx,
            registry,
            plugins: Mutex::new(HashMap::new()),
            stages: Mutex::new(HashMap::new()),
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn stage(&self, name: &str) -> Option<PluginStage> {
        self.stages.lock().get(name).copied()
    }

    /// A plugin created by this interpreter, native or Lua.
    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.lock().get(name).cloned()
    }

    /// Load the Lua class `module.Class` and instantiate it.
    ///
    /// Reusing a registered name fails with [`Error::DuplicatePlugin`].
    /// Every other failure is a Lua failure and goes to the fatal handler.
    pub fn load_plugin(&self, qualified_class: &str, config_key: &str) -> Result<Arc<dyn Plugin>> {
        match self.try_load_plugin(qualified_class, config_key) {
            Ok(plugin) => Ok(plugin),
            Err(err @ Error::DuplicatePlugin(_)) => Err(err),
            Err(err) => self
                .ctx
                .fatal
                .foreign_error(&format!("load_plugin({qualified_class})"), &describe_error(&err)),
        }
    }

    fn try_load_plugin(&self, qualified_class: &str, config_key: &str) -> Result<Arc<dyn Plugin>> {
        let (module_name, class_name) = qualified_class
            .rsplit_once('.')
            .filter(|(module, class)| !module.is_empty() && !class.is_empty())
            .ok_or_else(|| Error::InvalidClassName(qualified_class.to_string()))?;

        if self.registry.contains(class_name) || self.ctx.instances.contains(class_name)? {
            return Err(Error::DuplicatePlugin(class_name.to_string()));
        }

        let require: Function = self.lua.globals().get("require")?;
        let module: Table = require.call(module_name)?;
        let class: Table = module.get::<Option<Table>>(class_name)?.ok_or_else(|| {
            mlua::Error::runtime(format!("module '{module_name}' has no class '{class_name}'"))
        })?;

        let description = class.get::<Option<String>>("description")?.unwrap_or_default();
        let dependencies: Vec<String> =
            luahelper::from_optional_lua_sequence(class.get("dependencies")?)?;

        let instance: Table = class.call(())?;
        self.ctx.instances.insert(class_name, &instance)?;

        let host = match instance.get::<LuaValue>("host")? {
            LuaValue::UserData(ud) if ud.is::<PluginHost>() => ud,
            _ => return Err(Error::NotAPlugin(qualified_class.to_string())),
        };
        let info = PluginInfo {
            name: class_name.to_string(),
            description,
            config_key: config_key.to_string(),
            dependencies,
        };
        configure_host(&host, info.clone(), Arc::clone(self.engine.config()))?;

        self.registry.register(PluginRegistration {
            name: info.name.clone(),
            description: info.description.clone(),
            dependencies: info.dependencies.clone(),
            creator: PluginCreator::Scripted {
                class: qualified_class.to_string(),
            },
        })?;

        let plugin: Arc<dyn Plugin> = Arc::new(LuaPlugin::new(info, instance));
        self.plugins
            .lock()
            .insert(class_name.to_string(), Arc::clone(&plugin));
        self.stages
            .lock()
            .insert(class_name.to_string(), PluginStage::Loaded);
        tracing::info!(plugin = class_name, class = qualified_class, "Lua plugin loaded");
        Ok(plugin)
    }

    /// Run the plugin's `initialize` hook. A missing hook is fine.
    pub fn initialize_plugin(&self, name: &str) -> Result<()> {
        let plugin = self
            .plugin(name)
            .ok_or_else(|| Error::PluginNotLoaded(name.to_string()))?;
        if let Err(err) = plugin.initialize() {
            self.ctx
                .fatal
                .foreign_error(&format!("{name}.initialize"), &describe_error(&err));
        }
        self.stages
            .lock()
            .insert(name.to_string(), PluginStage::Initialized);
        tracing::debug!(plugin = name, "plugin initialized");
        Ok(())
    }

    /// The Lua instance of a loaded plugin, or nil.
    pub fn get_plugin(&self, name: &str) -> mlua::Result<LuaValue> {
        Ok(self
            .ctx
            .instances
            .get(name)?
            .map_or(LuaValue::Nil, LuaValue::Table))
    }

    /// The plugin's `_state` template, or nil.
    pub fn get_plugin_state(&self, name: &str) -> mlua::Result<LuaValue> {
        self.ctx.instances.state_of(name)
    }

    /// Create the plugin configured under `name`.
    ///
    /// Native registrations win. Otherwise `plugins.<name>.lua_class` names
    /// the Lua class to load. `None` means neither exists.
    pub fn create_plugin(&self, name: &str) -> Result<Option<Arc<dyn Plugin>>> {
        if let Some(existing) = self.plugin(name) {
            return Ok(Some(existing));
        }

        if let Some(registration) = self.registry.get(name) {
            if let PluginCreator::Native(create) = registration.creator {
                let plugin = create();
                self.plugins
                    .lock()
                    .insert(name.to_string(), Arc::clone(&plugin));
                self.stages
                    .lock()
                    .insert(name.to_string(), PluginStage::Loaded);
                tracing::debug!(plugin = name, "native plugin created");
                return Ok(Some(plugin));
            }
        }

        let Some(class) = self.engine.config().get_string(&lua_class_key(name)) else {
            tracing::warn!(
                plugin = name,
                "plugin is neither compiled in nor configured with {}",
                lua_class_key(name)
            );
            return Ok(None);
        };
        self.load_plugin(&class, name).map(Some)
    }
}

fn configure_host(host: &AnyUserData, info: PluginInfo, config: Arc<ConfigFile>) -> Result<()> {
    host.borrow::<PluginHost>()?.configure(info, config)
}

fn append_module_path(lua: &Lua, dir: &std::path::Path) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    let current: String = package.get("path")?;
    let dir = dir.display();
    let path = format!("{current};{dir}/?.lua;{dir}/?/init.lua");
    package.set("path", path)?;
    tracing::debug!(%dir, "module path added");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::fatal::PanicOnForeignError;
    use crate::engine::CorePlugin;

    fn interpreter(config: &str) -> Interpreter {
        let config = Arc::new(ConfigFile::parse(config).unwrap());
        let engine = Arc::new(Engine::new(Arc::clone(&config)));
        let options = InterpreterOptions::from_config(&config)
            .with_fatal_handler(Arc::new(PanicOnForeignError));
        Interpreter::new(engine, options).unwrap()
    }

    fn preload(interp: &Interpreter, module: &str, source: &str) {
        let loader = interp
            .lua()
            .load(format!("return function() {source} end"))
            .eval::<Function>()
            .unwrap();
        let preload: Table = interp
            .lua()
            .globals()
            .get::<Table>("package")
            .unwrap()
            .get("preload")
            .unwrap();
        preload.set(module, loader).unwrap();
    }

    const COUNTER: &str = r"
        local Plugin = require('probe.plugins').Plugin
        local Counter = Plugin:extend {
            description = 'counts things',
            dependencies = { 'CorePlugin' },
        }
        function Counter:init() self._state = { count = 0 } end
        function Counter:initialize() self.initialized = true end
        return { Counter = Counter }
    ";

    #[test]
    fn module_paths_are_appended_in_order() {
        let interp = interpreter("[interpreter]\nmodule_paths = [\"/a\", \"/b\"]\n");
        let path: String = interp
            .lua()
            .globals()
            .get::<Table>("package")
            .unwrap()
            .get("path")
            .unwrap();
        let a = path.find("/a/?.lua").unwrap();
        let b = path.find("/b/?.lua").unwrap();
        assert!(a < b);
        assert!(path.ends_with("/b/?/init.lua"));
    }

    #[test]
    fn load_then_initialize() {
        let interp = interpreter("");
        preload(&interp, "counting", COUNTER);
        let plugin = interp.load_plugin("counting.Counter", "counter").unwrap();
        assert_eq!(plugin.info().name, "Counter");
        assert_eq!(plugin.info().description, "counts things");
        assert_eq!(plugin.info().dependencies, vec!["CorePlugin"]);
        assert_eq!(interp.stage("Counter"), Some(PluginStage::Loaded));

        interp.initialize_plugin("Counter").unwrap();
        assert_eq!(interp.stage("Counter"), Some(PluginStage::Initialized));
        let LuaValue::Table(instance) = interp.get_plugin("Counter").unwrap() else {
            panic!("instance missing");
        };
        assert!(instance.get::<bool>("initialized").unwrap());
        assert!(matches!(interp.get_plugin_state("Counter").unwrap(), LuaValue::Table(_)));
    }

    #[test]
    fn lookups_of_unknown_plugins_are_nil() {
        let interp = interpreter("");
        assert!(interp.get_plugin("Ghost").unwrap().is_nil());
        assert!(interp.get_plugin_state("Ghost").unwrap().is_nil());
        assert!(matches!(
            interp.initialize_plugin("Ghost"),
            Err(Error::PluginNotLoaded(_))
        ));
    }

    #[test]
    fn loading_the_same_class_twice_is_rejected() {
        let interp = interpreter("");
        preload(&interp, "counting", COUNTER);
        interp.load_plugin("counting.Counter", "counter").unwrap();
        let err = interp.load_plugin("counting.Counter", "counter").err().unwrap();
        assert!(matches!(err, Error::DuplicatePlugin(name) if name == "Counter"));
    }

    #[test]
    #[should_panic(expected = "Lua error in load_plugin(missing.Thing)")]
    fn unknown_module_is_fatal() {
        interpreter("").load_plugin("missing.Thing", "thing").ok();
    }

    #[test]
    #[should_panic(expected = "has no class 'Other'")]
    fn unknown_class_is_fatal() {
        let interp = interpreter("");
        preload(&interp, "counting", COUNTER);
        interp.load_plugin("counting.Other", "other").ok();
    }

    #[test]
    #[should_panic(expected = "not a qualified Lua class name")]
    fn unqualified_class_is_fatal() {
        interpreter("").load_plugin("Counter", "counter").ok();
    }

    #[test]
    #[should_panic(expected = "did not produce a plugin instance")]
    fn class_without_host_is_fatal() {
        let interp = interpreter("");
        preload(
            &interp,
            "plain",
            "local C = setmetatable({}, { __call = function() return {} end }) return { C = C }",
        );
        interp.load_plugin("plain.C", "c").ok();
    }

    #[test]
    #[should_panic(expected = "Lua error in Broken.initialize")]
    fn raising_initialize_is_fatal() {
        let interp = interpreter("");
        preload(
            &interp,
            "broken",
            r"
            local Broken = probe.plugins.Plugin:extend {}
            function Broken:initialize() error('cannot start') end
            return { Broken = Broken }
            ",
        );
        interp.load_plugin("broken.Broken", "broken").unwrap();
        interp.initialize_plugin("Broken").ok();
    }

    #[test]
    fn create_plugin_prefers_natives() {
        let interp = interpreter("[plugins.CorePlugin]\nlua_class = \"fake.CorePlugin\"\n");
        let core = interp.create_plugin(CorePlugin::NAME).unwrap().unwrap();
        assert_eq!(core.info().name, CorePlugin::NAME);
        let again = interp.create_plugin(CorePlugin::NAME).unwrap().unwrap();
        assert!(Arc::ptr_eq(&core, &again));
    }

    #[test]
    fn create_plugin_loads_configured_class() {
        let interp = interpreter("[plugins.Counter]\nlua_class = \"counting.Counter\"\n");
        preload(&interp, "counting", COUNTER);
        let plugin = interp.create_plugin("Counter").unwrap().unwrap();
        assert_eq!(plugin.info().config_key, "Counter");
        assert!(interp.registry().contains("Counter"));
    }

    #[test]
    fn create_plugin_without_source_is_none() {
        let interp = interpreter("");
        assert!(interp.create_plugin("Nowhere").unwrap().is_none());
        assert!(!interp.registry().contains("Nowhere"));
    }

    #[test]
    fn natives_are_registered_up_front() {
        fn make() -> Arc<dyn Plugin> {
            CorePlugin::create()
        }
        let config = Arc::new(ConfigFile::empty());
        let engine = Arc::new(Engine::new(Arc::clone(&config)));
        let options = InterpreterOptions::default()
            .with_fatal_handler(Arc::new(PanicOnForeignError))
            .with_native(PluginRegistration::native("Extra", "extra", make));
        let interp = Interpreter::new(Arc::clone(&engine), options).unwrap();
        assert_eq!(interp.registry().names(), vec![CorePlugin::NAME, "Extra"]);

        let duplicate = InterpreterOptions::default()
            .with_native(PluginRegistration::native(CorePlugin::NAME, "again", make));
        assert!(matches!(
            Interpreter::new(engine, duplicate),
            Err(Error::DuplicatePlugin(_))
        ));
    }
}
