use std::sync::Arc;

use log::{info, warn};
use mlua::{
    AnyUserData, Lua, LuaSerdeExt, RegistryKey, Result as LuaResult, Table, UserData,
    UserDataFields, UserDataMethods, Value, Variadic,
};
use parking_lot::Mutex;

use crate::facade::{Axis, ElementHandle, Facade};

/// State captured by the Lua globals.
#[derive(Clone)]
pub(super) struct ScriptContext {
    pub facade: Facade,
    pub updates: Arc<Mutex<Vec<RegistryKey>>>,
}

pub(super) fn register_globals(lua: &Lua, context: &ScriptContext) -> LuaResult<()> {
    register_print(lua)?;
    register_dimension(lua, context)?;
    register_set_update(lua, context)?;
    lua.globals().set("includes", lua.create_table()?)?;
    Ok(())
}

fn register_print(lua: &Lua) -> LuaResult<()> {
    let print = lua.create_function(|lua, values: Variadic<Value>| {
        let mut out = Vec::with_capacity(values.len());
        for value in values.iter() {
            let text = match value {
                Value::Nil => "nil".to_string(),
                Value::Boolean(b) => b.to_string(),
                Value::String(s) => s.to_str()?.to_string(),
                _ => match lua.coerce_string(value.clone())? {
                    Some(s) => s.to_str()?.to_string(),
                    None => format!("{value:?}"),
                },
            };
            out.push(text);
        }
        info!(target: "lua", "{}", out.join("\t"));
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(())
}

fn register_dimension(lua: &Lua, context: &ScriptContext) -> LuaResult<()> {
    let dimension = lua.create_table()?;

    let facade = context.facade.clone();
    dimension.set(
        "createElement",
        lua.create_function(move |_, tag: String| Ok(LuaElement(facade.create_element(&tag))))?,
    )?;

    let facade = context.facade.clone();
    dimension.set(
        "appendChild",
        lua.create_function(
            move |_, (child, parent): (Option<AnyUserData>, Option<AnyUserData>)| {
                let Some(child) = child else {
                    return Ok(false);
                };
                let child = child.borrow::<LuaElement>()?.0.clone();
                let parent = match parent {
                    Some(parent) => Some(parent.borrow::<LuaElement>()?.0.clone()),
                    None => None,
                };
                match facade.append_child(&child, parent.as_ref()) {
                    Ok(()) => Ok(true),
                    Err(err) => {
                        warn!(target: "lua", "appendChild failed: {err}");
                        Ok(false)
                    }
                }
            },
        )?,
    )?;

    let facade = context.facade.clone();
    dimension.set(
        "getTree",
        lua.create_function(move |lua, ()| match facade.snapshot() {
            Some(root) => lua.to_value(&root),
            None => Ok(Value::Nil),
        })?,
    )?;

    lua.globals().set("dimension", dimension)?;
    Ok(())
}

fn register_set_update(lua: &Lua, context: &ScriptContext) -> LuaResult<()> {
    let updates = Arc::clone(&context.updates);
    let set_update = lua.create_function(move |lua, callback: mlua::Function| {
        updates.lock().push(lua.create_registry_value(callback)?);
        Ok(())
    })?;
    lua.globals().set("setUpdate", set_update)?;
    Ok(())
}

/// Lua view of an [`ElementHandle`].
struct LuaElement(ElementHandle);

impl UserData for LuaElement {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("tag", |_, this| Ok(this.0.tag()));
        fields.add_field_method_get("key", |_, this| Ok(this.0.key().get()));
        fields.add_field_method_get("src", |_, this| Ok(this.0.src()));
        fields.add_field_method_set("src", |_, this, src: String| {
            this.0.set_src(&src);
            Ok(())
        });
        fields.add_field_method_get("position", |_, this| {
            Ok(TransformProxy {
                element: this.0.clone(),
                kind: TransformKind::Position,
            })
        });
        fields.add_field_method_set("position", |_, this, value: Table| {
            write_axes(&this.0, TransformKind::Position, &value)
        });
        fields.add_field_method_get("rotation", |_, this| {
            Ok(TransformProxy {
                element: this.0.clone(),
                kind: TransformKind::Rotation,
            })
        });
        fields.add_field_method_set("rotation", |_, this, value: Table| {
            write_axes(&this.0, TransformKind::Rotation, &value)
        });
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("setAttribute", |lua, this, (name, value): (String, Value)| {
            let text = match lua.coerce_string(value)? {
                Some(s) => s.to_str()?.to_string(),
                None => String::new(),
            };
            this.0.set_attribute(&name, &text);
            Ok(())
        });
        methods.add_method("getAttribute", |_, this, name: String| {
            Ok(this.0.attribute(&name))
        });
        methods.add_method("getAttributes", |lua, this, ()| match this.0.attributes() {
            Some(attributes) => lua.to_value(&attributes),
            None => Ok(Value::Nil),
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum TransformKind {
    Position,
    /// Degrees, stored verbatim.
    Rotation,
}

/// `element.position` / `element.rotation`: assigning `x`, `y` or `z` writes
/// through to the node.
struct TransformProxy {
    element: ElementHandle,
    kind: TransformKind,
}

impl TransformProxy {
    fn get(&self, axis: Axis) -> f64 {
        let value = match self.kind {
            TransformKind::Position => self.element.position(axis),
            TransformKind::Rotation => self.element.rotation(axis),
        };
        value.unwrap_or(0.0)
    }
}

fn write_axis(element: &ElementHandle, kind: TransformKind, axis: Axis, value: f64) {
    match kind {
        TransformKind::Position => element.set_position(axis, value),
        TransformKind::Rotation => element.set_rotation(axis, value),
    };
}

fn write_axes(element: &ElementHandle, kind: TransformKind, table: &Table) -> LuaResult<()> {
    for axis in Axis::ALL {
        if let Some(value) = table.get::<_, Option<f64>>(axis.name())? {
            write_axis(element, kind, axis, value);
        }
    }
    Ok(())
}

impl UserData for TransformProxy {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        for axis in Axis::ALL {
            fields.add_field_method_get(axis.name(), move |_, this| Ok(this.get(axis)));
            fields.add_field_method_set(axis.name(), move |_, this, value: f64| {
                write_axis(&this.element, this.kind, axis, value);
                Ok(())
            });
        }
    }
}
