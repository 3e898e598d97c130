mod bindings;
mod engine;

pub use engine::ScriptEngine;
