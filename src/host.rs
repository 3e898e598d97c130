use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use glam::Vec3;
use log::{debug, error, warn};

use crate::assets::{ModelCompletion, ModelLoader};
use crate::dom::Dom;
use crate::projector::project_tree;
use crate::render::LightParams;
use crate::render_tree::RenderObject;
use crate::vnode::NodeKey;

/// Owns the render tree and rebuilds it from the document.
#[derive(Debug)]
pub struct SceneHost {
    dom: Dom,
    root: Option<RenderObject>,
    generation: u64,
    projected_revision: Option<u64>,
    loader: ModelLoader,
    /// Outstanding loads by `(key, src)`, with the generation that issued them.
    pending: HashMap<(NodeKey, String), u64>,
    /// Finished loads still referenced by the document. `None` marks a failure.
    loaded: HashMap<NodeKey, LoadedModel>,
    lighting: bool,
}

#[derive(Debug)]
struct LoadedModel {
    src: String,
    content: Option<RenderObject>,
}

impl SceneHost {
    pub fn new(dom: Dom, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            dom,
            root: None,
            generation: 0,
            projected_revision: None,
            loader: ModelLoader::new(asset_dir),
            pending: HashMap::new(),
            loaded: HashMap::new(),
            lighting: true,
        }
    }

    pub fn root(&self) -> Option<&RenderObject> {
        self.root.as_ref()
    }

    /// Incremented on every rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loader_mut(&mut self) -> &mut ModelLoader {
        &mut self.loader
    }

    pub fn find(&self, key: NodeKey) -> Option<&RenderObject> {
        self.root.as_ref()?.find(key)
    }

    pub fn world_position(&self, key: NodeKey) -> Option<Vec3> {
        self.root.as_ref()?.world_position(key)
    }

    /// Rebuilds the render tree if the document changed since the last build.
    pub fn sync(&mut self) -> bool {
        if self.projected_revision == Some(self.dom.revision()) {
            return false;
        }
        self.rebuild();
        true
    }

    /// Discards the current render tree and projects the document again.
    ///
    /// Models whose `(key, src)` did not change are not loaded again: finished
    /// content is copied into the new placeholder and outstanding loads are
    /// kept.
    pub fn rebuild(&mut self) {
        self.root = None;
        self.generation += 1;
        self.projected_revision = Some(self.dom.revision());
        let Some(projection) = self.dom.with_root(|root| root.map(project_tree)) else {
            self.pending.clear();
            self.loaded.clear();
            return;
        };

        let wanted: HashMap<NodeKey, &str> = projection
            .models
            .iter()
            .map(|request| (request.key, request.src.as_str()))
            .collect();
        self.pending
            .retain(|(key, src), _| wanted.get(key) == Some(&src.as_str()));
        self.loaded
            .retain(|key, model| wanted.get(key) == Some(&model.src.as_str()));

        let mut root = projection.root;
        let mut requested = 0;
        for request in projection.models {
            if let Some(model) = self.loaded.get(&request.key) {
                if let (Some(content), Some(target)) = (&model.content, root.find_mut(request.key)) {
                    target.children = vec![content.clone()];
                }
                continue;
            }
            let pending_key = (request.key, request.src.clone());
            if self.pending.contains_key(&pending_key) {
                continue;
            }
            self.pending.insert(pending_key, self.generation);
            self.loader.request(request, self.generation);
            requested += 1;
        }
        debug!(
            "generation {}: projected {} object(s), {} new model load(s), {} pending",
            self.generation,
            root.object_count(),
            requested,
            self.pending.len()
        );
        self.root = Some(root);
    }

    /// Applies every model load that finished since the last call.
    pub fn pump_models(&mut self) -> usize {
        let completions = self.loader.poll();
        self.apply_models(completions)
    }

    /// Blocks until outstanding loads finish, then applies them.
    pub fn wait_for_models(&mut self, timeout: Duration) -> usize {
        let completions = self.loader.wait(timeout);
        if self.loader.in_flight() > 0 {
            warn!("{} model load(s) still pending", self.loader.in_flight());
        }
        self.apply_models(completions)
    }

    fn apply_models(&mut self, completions: Vec<ModelCompletion>) -> usize {
        let mut applied = 0;
        for completion in completions {
            if self.apply_model(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Replaces the children of the target placeholder with the loaded content.
    ///
    /// A completion only counts when it answers the outstanding request for
    /// its `(key, src)` issued in the same generation. Anything else belongs
    /// to a tree that was replaced and is dropped. Failed loads are logged and
    /// leave the placeholder empty. Returns whether content was applied.
    pub fn apply_model(&mut self, completion: ModelCompletion) -> bool {
        let request = (completion.key, completion.src);
        if self.pending.get(&request) != Some(&completion.generation) {
            debug!(
                "dropping model {} from generation {} (current {})",
                request.1, completion.generation, self.generation
            );
            return false;
        }
        self.pending.remove(&request);
        let (key, src) = request;
        let content = match completion.result {
            Ok(content) => content,
            Err(err) => {
                error!("failed to load model {src}: {err:#}");
                self.loaded.insert(key, LoadedModel { src, content: None });
                return false;
            }
        };
        let applied = match self.root.as_mut().and_then(|root| root.find_mut(key)) {
            Some(target) => {
                target.children = vec![content.clone()];
                true
            }
            None => false,
        };
        self.loaded.insert(
            key,
            LoadedModel {
                src,
                content: Some(content),
            },
        );
        applied
    }

    pub fn lighting_enabled(&self) -> bool {
        self.lighting
    }

    pub fn toggle_lighting(&mut self) -> bool {
        self.lighting = !self.lighting;
        self.lighting
    }

    pub fn light(&self) -> LightParams {
        LightParams {
            position: Vec3::new(3.0, 10.0, 5.0),
            color: Vec3::ONE,
            intensity: 0.6,
            ambient: if self.lighting { 1.0 } else { 0.0 },
        }
    }
}
