use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use mlua::{Function, Lua, RegistryKey};
use parking_lot::Mutex;

use crate::dom::Dom;
use crate::facade::Facade;

use super::bindings::{register_globals, ScriptContext};

/// Lua state exposing the façade to document scripts.
///
/// Scripts run on the caller's thread; callbacks registered with `setUpdate`
/// run once per frame through [`ScriptEngine::run_updates`].
pub struct ScriptEngine {
    lua: Lua,
    updates: Arc<Mutex<Vec<RegistryKey>>>,
}

impl ScriptEngine {
    pub fn new(dom: Dom) -> Result<Self> {
        let lua = Lua::new();
        let updates = Arc::new(Mutex::new(Vec::new()));
        let context = ScriptContext {
            facade: Facade::new(dom),
            updates: Arc::clone(&updates),
        };
        register_globals(&lua, &context).map_err(|err| anyhow!("failed to register script globals: {err}"))?;
        Ok(Self { lua, updates })
    }

    /// Executes a chunk of Lua source.
    pub fn exec(&self, name: &str, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|err| anyhow!("{err}"))
            .with_context(|| format!("script {name} failed"))
    }

    pub fn exec_file(&self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("unable to read script {}", path.display()))?;
        info!("running script {}", path.display());
        self.exec(&path.display().to_string(), &source)
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }

    /// Calls every registered update callback in registration order.
    ///
    /// A failing callback is logged and the rest still run. Returns the
    /// number of failures.
    pub fn run_updates(&self) -> usize {
        let callbacks: Vec<Function> = {
            let updates = self.updates.lock();
            updates
                .iter()
                .filter_map(|key| self.lua.registry_value::<Function>(key).ok())
                .collect()
        };
        let mut failures = 0;
        for (index, callback) in callbacks.into_iter().enumerate() {
            if let Err(err) = callback.call::<_, ()>(()) {
                error!("update callback #{index} failed: {err}");
                failures += 1;
            }
        }
        failures
    }
}
