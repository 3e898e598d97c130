use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::vnode::{NodeKey, VirtualNode};

/// Reasons an attach request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeKey),
    #[error("no document is loaded")]
    NoRoot,
    #[error("node {child} cannot be attached inside its own subtree")]
    Cycle { child: NodeKey },
    #[error("the document root cannot be re-attached")]
    RootNotMovable,
}

#[derive(Debug, Default)]
struct DomState {
    root: Option<VirtualNode>,
    detached: Vec<VirtualNode>,
    revision: u64,
}

impl DomState {
    fn find(&self, key: NodeKey) -> Option<&VirtualNode> {
        self.root
            .as_ref()
            .and_then(|root| root.find(key))
            .or_else(|| self.detached.iter().find_map(|node| node.find(key)))
    }

    fn find_mut(&mut self, key: NodeKey) -> Option<&mut VirtualNode> {
        if let Some(node) = self.root.as_mut().and_then(|root| root.find_mut(key)) {
            return Some(node);
        }
        self.detached
            .iter_mut()
            .find_map(|node| node.find_mut(key))
    }

    /// Takes a node out of wherever it lives: the detached pool or the tree.
    fn take(&mut self, key: NodeKey) -> Option<VirtualNode> {
        if let Some(index) = self.detached.iter().position(|node| node.key() == key) {
            return Some(self.detached.remove(index));
        }
        if let Some(node) = self
            .detached
            .iter_mut()
            .find_map(|node| node.remove_descendant(key))
        {
            return Some(node);
        }
        self.root.as_mut()?.remove_descendant(key)
    }

    fn root_key(&self) -> Option<NodeKey> {
        self.root.as_ref().map(VirtualNode::key)
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Shared handle to the current virtual tree.
///
/// Clones refer to the same document. Nodes created by scripts live in a
/// detached pool until they are attached.
#[derive(Debug, Default)]
pub struct Dom {
    state: Arc<RwLock<DomState>>,
}

impl Clone for Dom {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Dom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a freshly parsed tree, discarding the previous one and every
    /// node that was never attached.
    pub fn replace_root(&self, root: VirtualNode) {
        let mut state = self.state.write();
        state.root = Some(root);
        state.detached.clear();
        state.touch();
    }

    /// Counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Runs `reader` against the current root.
    pub fn with_root<R>(&self, reader: impl FnOnce(Option<&VirtualNode>) -> R) -> R {
        reader(self.state.read().root.as_ref())
    }

    /// Returns a copy of the current tree.
    pub fn snapshot(&self) -> Option<VirtualNode> {
        self.state.read().root.clone()
    }

    pub fn node_count(&self) -> usize {
        self.with_root(|root| root.map_or(0, VirtualNode::node_count))
    }

    /// Creates an unattached node and returns its key.
    pub fn create_node(&self, tag: &str) -> NodeKey {
        let node = VirtualNode::new(tag);
        let key = node.key();
        let mut state = self.state.write();
        state.detached.push(node);
        state.touch();
        key
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.state.read().find(key).is_some()
    }

    pub fn is_attached(&self, key: NodeKey) -> bool {
        self.with_root(|root| root.is_some_and(|root| root.contains(key)))
    }

    pub fn tag(&self, key: NodeKey) -> Option<String> {
        self.state.read().find(key).map(|node| node.tag.clone())
    }

    pub fn attribute(&self, key: NodeKey, name: &str) -> Option<String> {
        self.state
            .read()
            .find(key)
            .and_then(|node| node.attribute(name))
            .map(str::to_string)
    }

    pub fn attributes(&self, key: NodeKey) -> Option<BTreeMap<String, String>> {
        self.state
            .read()
            .find(key)
            .map(|node| node.attributes.clone())
    }

    /// Applies a mutation to the requested node and marks the document changed.
    pub fn update<F, R>(&self, key: NodeKey, updater: F) -> Option<R>
    where
        F: FnOnce(&mut VirtualNode) -> R,
    {
        let mut state = self.state.write();
        let result = updater(state.find_mut(key)?);
        state.touch();
        Some(result)
    }

    pub fn set_attribute(&self, key: NodeKey, name: &str, value: &str) -> bool {
        self.update(key, |node| node.set_attribute(name, value))
            .is_some()
    }

    /// Attaches `child` to `parent`, or to the root when no parent is given.
    ///
    /// A node that already has a parent is moved.
    pub fn append_child(&self, child: NodeKey, parent: Option<NodeKey>) -> Result<(), DomError> {
        let mut state = self.state.write();
        let root = state.root_key();
        if root == Some(child) {
            return Err(DomError::RootNotMovable);
        }
        let moving = state.find(child).ok_or(DomError::UnknownNode(child))?;
        let parent = match parent {
            Some(parent) => {
                if moving.contains(parent) {
                    return Err(DomError::Cycle { child });
                }
                if state.find(parent).is_none() {
                    return Err(DomError::UnknownNode(parent));
                }
                parent
            }
            None => root.ok_or(DomError::NoRoot)?,
        };

        let node = state.take(child).ok_or(DomError::UnknownNode(child))?;
        match state.find_mut(parent) {
            Some(target) => target.append_child(node),
            None => {
                state.detached.push(node);
                return Err(DomError::UnknownNode(parent));
            }
        }
        state.touch();
        Ok(())
    }

    /// Removes an attached node (and its subtree) from its parent.
    pub fn remove(&self, key: NodeKey) -> Option<VirtualNode> {
        let mut state = self.state.write();
        let removed = state.root.as_mut()?.remove_descendant(key)?;
        state.touch();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded() -> (Dom, NodeKey, NodeKey) {
        let mut root = VirtualNode::new("space");
        let model = VirtualNode::new("model");
        let model_key = model.key();
        root.append_child(model);
        let root_key = root.key();
        let dom = Dom::new();
        dom.replace_root(root);
        (dom, root_key, model_key)
    }

    #[test]
    fn mutations_bump_the_revision() {
        let (dom, _, model) = loaded();
        let before = dom.revision();
        assert!(dom.set_attribute(model, "x", "1"));
        assert!(dom.revision() > before);
        assert_eq!(dom.attribute(model, "x").as_deref(), Some("1"));
    }

    #[test]
    fn unknown_keys_are_noops() {
        let (dom, _, _) = loaded();
        let revision = dom.revision();
        let unknown = NodeKey::from_raw(u64::MAX);
        assert!(!dom.set_attribute(unknown, "x", "1"));
        assert!(dom.remove(unknown).is_none());
        assert_eq!(dom.revision(), revision);
    }

    #[test]
    fn created_nodes_attach_to_root_by_default() {
        let (dom, root, _) = loaded();
        let node = dom.create_node("box");
        assert!(!dom.is_attached(node));
        dom.append_child(node, None).unwrap();
        assert!(dom.is_attached(node));
        let children = dom.with_root(|r| r.unwrap().children.len());
        assert_eq!(children, 2);
        assert_eq!(dom.with_root(|r| r.map(VirtualNode::key)), Some(root));
    }

    #[test]
    fn detached_parents_carry_their_children_when_attached() {
        let (dom, _, _) = loaded();
        let parent = dom.create_node("group");
        let child = dom.create_node("model");
        dom.append_child(child, Some(parent)).unwrap();
        assert!(!dom.is_attached(child));
        dom.append_child(parent, None).unwrap();
        assert!(dom.is_attached(child));
        assert_eq!(dom.node_count(), 4);
    }

    #[test]
    fn attaching_under_own_descendant_is_rejected() {
        let (dom, _, model) = loaded();
        let child = dom.create_node("box");
        dom.append_child(child, Some(model)).unwrap();
        assert_eq!(
            dom.append_child(model, Some(child)),
            Err(DomError::Cycle { child: model })
        );
        assert_eq!(dom.append_child(model, Some(model)), Err(DomError::Cycle { child: model }));
    }

    #[test]
    fn attached_nodes_are_moved_not_shared() {
        let (dom, _, model) = loaded();
        let group = dom.create_node("group");
        dom.append_child(group, None).unwrap();
        dom.append_child(model, Some(group)).unwrap();
        let count = dom.with_root(|root| {
            let root = root.unwrap();
            root.keys().iter().filter(|key| **key == model).count()
        });
        assert_eq!(count, 1);
        assert_eq!(dom.node_count(), 3);
    }

    #[test]
    fn append_without_root_fails() {
        let dom = Dom::new();
        let node = dom.create_node("box");
        assert_eq!(dom.append_child(node, None), Err(DomError::NoRoot));
        assert!(dom.contains(node));
    }

    #[test]
    fn replace_root_discards_detached_nodes() {
        let (dom, _, _) = loaded();
        let orphan = dom.create_node("box");
        dom.replace_root(VirtualNode::new("space"));
        assert!(!dom.contains(orphan));
    }

    #[test]
    fn root_cannot_be_moved_or_removed() {
        let (dom, root, _) = loaded();
        let group = dom.create_node("group");
        assert_eq!(dom.append_child(root, Some(group)), Err(DomError::RootNotMovable));
        assert!(dom.remove(root).is_none());
    }
}
