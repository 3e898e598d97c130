//! Runtime for HSML scenes.
//!
//! Markup is parsed into a tree of virtual nodes, projected into a render
//! tree and kept in sync as Lua scripts or the inspector mutate the
//! document. Windowing lives in the binary; everything here runs headless
//! so it can be tested and embedded in tools.

pub mod app;
pub mod assets;
pub mod camera;
pub mod config;
pub mod dom;
pub mod facade;
pub mod host;
pub mod input;
pub mod inspector;
pub mod markup;
pub mod projector;
pub mod render;
pub mod render_tree;
pub mod scripting;
pub mod server;
pub mod vnode;

pub use app::Viewer;
pub use camera::FreeCamera;
pub use dom::{Dom, DomError};
pub use facade::{Axis, ElementHandle, Facade};
pub use host::SceneHost;
pub use input::{InputState, KeyCode, NamedKey};
pub use inspector::{Command, Inspector, InspectorEntry};
pub use markup::{parse_document, MarkupError, ScriptRequest};
pub use projector::{project_tree, Projection};
pub use render::{CameraParams, LightParams, Renderer};
pub use render_tree::{RenderKind, RenderObject};
pub use scripting::ScriptEngine;
pub use vnode::{NodeKey, VirtualNode};
