use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::camera::FreeCamera;
use crate::dom::Dom;
use crate::host::SceneHost;
use crate::input::InputState;
use crate::inspector::{Command, Inspector, HELP};
use crate::markup::{parse_document, ScriptRequest};
use crate::render_tree::{RenderKind, RenderObject};
use crate::scripting::ScriptEngine;

/// Top-level controller: one document, its render tree, scripts, the
/// inspector and the camera.
pub struct Viewer {
    dom: Dom,
    host: SceneHost,
    scripts: Option<ScriptEngine>,
    run_scripts: bool,
    inspector: Inspector,
    camera: FreeCamera,
    input: InputState,
    document: Option<PathBuf>,
    frames: u64,
}

impl Viewer {
    pub fn new(run_scripts: bool) -> Self {
        let dom = Dom::new();
        Self {
            host: SceneHost::new(dom.clone(), "."),
            dom,
            scripts: None,
            run_scripts,
            inspector: Inspector::new(),
            camera: FreeCamera::new(),
            input: InputState::new(),
            document: None,
            frames: 0,
        }
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn host(&self) -> &SceneHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut SceneHost {
        &mut self.host
    }

    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    pub fn camera(&self) -> &FreeCamera {
        &self.camera
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn document(&self) -> Option<&Path> {
        self.document.as_deref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Replaces the scene with the document at `path`.
    ///
    /// Read and parse failures leave the current scene untouched. Scripts run
    /// after the new tree is installed, in document order; a failing script
    /// is logged and the rest still run.
    pub fn load_document(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        let mut requests: Vec<ScriptRequest> = Vec::new();
        let root = parse_document(&text, &mut requests)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        info!(
            "loaded {} ({} node(s), {} script(s))",
            path.display(),
            root.node_count(),
            requests.len()
        );

        self.dom.replace_root(root);
        self.host.loader_mut().set_base_dir(&base_dir);
        self.document = Some(path.to_path_buf());
        self.scripts = None;
        if self.run_scripts {
            self.start_scripts(&base_dir, &requests);
        } else if !requests.is_empty() {
            info!("skipping {} script(s)", requests.len());
        }
        self.host.sync();
        self.inspector.refresh(&self.dom);
        Ok(())
    }

    /// Loads the current document again.
    pub fn reload(&mut self) -> Result<()> {
        let path = self.document.clone().context("no document loaded")?;
        self.load_document(&path)
    }

    fn start_scripts(&mut self, base_dir: &Path, requests: &[ScriptRequest]) {
        let engine = match ScriptEngine::new(self.dom.clone()) {
            Ok(engine) => engine,
            Err(err) => {
                error!("{err:#}");
                return;
            }
        };
        for request in requests {
            if let Err(err) = engine.exec_file(&base_dir.join(&request.src)) {
                error!("{err:#}");
            }
        }
        self.scripts = Some(engine);
    }

    /// Advances one frame: update callbacks, render-tree sync, model
    /// completions, camera. Returns the inspector text when the inspector is
    /// visible and the document changed.
    pub fn frame(&mut self) -> Option<String> {
        if let Some(scripts) = &self.scripts {
            scripts.run_updates();
        }
        self.host.sync();
        self.host.pump_models();
        self.camera.update(&mut self.input);
        self.frames += 1;
        (self.inspector.visible() && self.inspector.refresh_if_changed(&self.dom))
            .then(|| self.inspector.render_text())
    }

    /// Blocks until pending model loads finish or `timeout` elapses.
    pub fn settle(&mut self, timeout: Duration) -> usize {
        self.host.sync();
        self.host.wait_for_models(timeout)
    }

    pub fn execute_line(&mut self, line: &str) -> String {
        match line.parse::<Command>() {
            Ok(command) => self.apply_command(command),
            Err(err) => err.to_string(),
        }
    }

    pub fn apply_command(&mut self, command: Command) -> String {
        match command {
            Command::Tree => {
                self.inspector.refresh(&self.dom);
                self.inspector.render_text()
            }
            Command::Dump => self
                .dom
                .with_root(|root| root.map(|root| root.to_markup()))
                .unwrap_or_else(|| "no document loaded".into()),
            Command::Set { key, name, value } => {
                if self.inspector.edit_attribute(&self.dom, key, &name, &value) {
                    format!("{key} {name}=\"{}\"", value.trim())
                } else {
                    format!("no node {key}")
                }
            }
            Command::Delete(key) => {
                if self.inspector.delete(&self.dom, key) {
                    format!("deleted {key}")
                } else {
                    format!("cannot delete {key}")
                }
            }
            Command::Center(key) => {
                self.host.sync();
                if self.inspector.center(&self.host, &mut self.camera, key) {
                    let p = self.camera.position;
                    format!("camera at ({:.2}, {:.2}, {:.2})", p.x, p.y, p.z)
                } else {
                    format!("no render object for {key}")
                }
            }
            Command::Load(path) => match self.load_document(&path) {
                Ok(()) => format!("loaded {}", path.display()),
                Err(err) => {
                    warn!("{err:#}");
                    format!("error: {err:#}")
                }
            },
            Command::Lighting => {
                if self.host.toggle_lighting() {
                    "lighting on".into()
                } else {
                    "lighting off".into()
                }
            }
            Command::Inspector => {
                if self.inspector.toggle() {
                    self.inspector.refresh(&self.dom);
                    self.inspector.render_text()
                } else {
                    "inspector hidden".into()
                }
            }
            Command::Help => HELP.into(),
        }
    }

    /// Human readable dump of the render tree.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let document = self
            .document
            .as_ref()
            .map_or_else(|| "<none>".into(), |path| path.display().to_string());
        let _ = writeln!(out, "Document: {document}");
        let Some(root) = self.host.root() else {
            let _ = writeln!(out, "No scene loaded");
            return out;
        };
        let _ = writeln!(
            out,
            "Scene: {} node(s), {} render object(s), generation {}",
            self.dom.node_count(),
            root.object_count(),
            self.host.generation()
        );
        let _ = writeln!(out, "Final object states:");
        self.describe(root, 0, &mut out);
        out
    }

    fn describe(&self, object: &RenderObject, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let label = match (&object.kind, object.key) {
            (RenderKind::Mesh(mesh), _) => format!(
                "mesh {} ({} vertices, {} triangles)",
                mesh.name,
                mesh.vertex_count(),
                mesh.indices.len() / 3
            ),
            (_, Some(key)) => {
                let tag = self.dom.tag(key).unwrap_or_else(|| "?".into());
                match &object.kind {
                    RenderKind::Model { src: Some(src) } => format!("{key} {tag} src={src}"),
                    _ => format!("{key} {tag}"),
                }
            }
            (_, None) => "group".into(),
        };
        let rotation = object.rotation * (180.0 / std::f32::consts::PI);
        let _ = writeln!(
            out,
            "{indent} - {label} pos=({:.2}, {:.2}, {:.2}) rot=({:.2}, {:.2}, {:.2}) scale=({:.2}, {:.2}, {:.2})",
            object.position.x,
            object.position.y,
            object.position.z,
            rotation.x,
            rotation.y,
            rotation.z,
            object.scale.x,
            object.scale.y,
            object.scale.z
        );
        for child in &object.children {
            self.describe(child, depth + 1, out);
        }
    }
}
