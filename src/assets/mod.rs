//! Background model loading.
//!
//! Loads run on their own threads and report back over a channel. Every
//! completion carries the render-tree generation it was requested for so the
//! host can drop results that belong to a tree it already replaced.

mod gltf_scene;
mod obj;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use log::{debug, error};

use crate::render_tree::RenderObject;
use crate::vnode::NodeKey;

pub use self::obj::parse_obj;

#[cfg(test)]
pub(crate) use self::gltf_scene::TRIANGLE_GLTF;

/// Triangle mesh with interleaved `position.xyz` / `normal.xyz` vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub color: Vec3,
}

impl Mesh {
    pub fn new(name: impl Into<String>, vertices: Vec<f32>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            vertices,
            indices,
            color: Vec3::splat(0.8),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 6
    }

    /// True when at least one vertex has a zero normal.
    pub fn needs_normals(&self) -> bool {
        self.vertices
            .chunks_exact(6)
            .any(|v| v[3] == 0.0 && v[4] == 0.0 && v[5] == 0.0)
    }

    /// Replaces every normal with the normalized sum of its face normals.
    pub fn compute_normals(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.vertex_count()];
        for triangle in self.indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
            if a.max(b).max(c) >= accum.len() {
                continue;
            }
            let p = |i: usize| Vec3::from_slice(&self.vertices[i * 6..i * 6 + 3]);
            let face = (p(b) - p(a)).cross(p(c) - p(a));
            if face.length_squared() > f32::EPSILON {
                let face = face.normalize();
                accum[a] += face;
                accum[b] += face;
                accum[c] += face;
            }
        }
        for (i, normal) in accum.into_iter().enumerate() {
            let normal = normal.normalize_or_zero();
            self.vertices[i * 6 + 3..i * 6 + 6].copy_from_slice(&normal.to_array());
        }
    }
}

/// Model referenced by a `model` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub key: NodeKey,
    pub src: String,
}

/// Outcome of a background model load.
#[derive(Debug)]
pub struct ModelCompletion {
    pub key: NodeKey,
    pub generation: u64,
    pub src: String,
    pub result: Result<RenderObject>,
}

/// Spawns model loads and collects their results.
#[derive(Debug)]
pub struct ModelLoader {
    base_dir: PathBuf,
    sender: Sender<ModelCompletion>,
    receiver: Receiver<ModelCompletion>,
    in_flight: usize,
}

impl ModelLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            base_dir: base_dir.into(),
            sender,
            receiver,
            in_flight: 0,
        }
    }

    /// Directory that relative `src` paths are resolved against.
    pub fn set_base_dir(&mut self, base_dir: impl Into<PathBuf>) {
        self.base_dir = base_dir.into();
    }

    pub fn resolve(&self, src: &str) -> PathBuf {
        let path = Path::new(src);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Starts loading `request` in the background.
    pub fn request(&mut self, request: ModelRequest, generation: u64) {
        let path = self.resolve(&request.src);
        let sender = self.sender.clone();
        debug!("loading model {} for {}", path.display(), request.key);
        let spawned = thread::Builder::new()
            .name("model-loader".into())
            .spawn(move || {
                let result = load_model(&path);
                let _ = sender.send(ModelCompletion {
                    key: request.key,
                    generation,
                    src: request.src,
                    result,
                });
            });
        match spawned {
            Ok(_) => self.in_flight += 1,
            Err(err) => error!("failed to spawn model loader: {err}"),
        }
    }

    /// Returns every completion that is ready without blocking.
    pub fn poll(&mut self) -> Vec<ModelCompletion> {
        let ready: Vec<ModelCompletion> = self.receiver.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(ready.len());
        ready
    }

    /// Blocks until every outstanding load reports back or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Vec<ModelCompletion> {
        let deadline = Instant::now() + timeout;
        let mut ready = Vec::new();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    self.in_flight -= 1;
                    ready.push(completion);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        ready
    }
}

/// Loads a model file into a render subtree, picking the reader by extension.
pub fn load_model(path: &Path) -> Result<RenderObject> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "glb" | "gltf" => gltf_scene::load_gltf(path),
        "obj" => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read {}", path.display()))?;
            let mesh = parse_obj(&path.display().to_string(), &text)
                .with_context(|| format!("failed to parse OBJ mesh {}", path.display()))?;
            Ok(RenderObject::group(None).with_child(RenderObject::mesh(Arc::new(mesh))))
        }
        other => Err(anyhow!(
            "unsupported model format {other:?} for {}",
            path.display()
        )),
    }
}
