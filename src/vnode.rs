use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier correlating a virtual node with its render object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeKey(u64);

impl NodeKey {
    fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One markup element, independent of any rendering backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualNode {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<VirtualNode>,
    key: NodeKey,
}

impl VirtualNode {
    /// Creates a node with the next key from the process-wide counter.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            key: NodeKey::next(),
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn append_child(&mut self, child: VirtualNode) {
        self.children.push(child);
    }

    pub fn find(&self, key: NodeKey) -> Option<&VirtualNode> {
        if self.key == key {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(key))
    }

    pub fn find_mut(&mut self, key: NodeKey) -> Option<&mut VirtualNode> {
        if self.key == key {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(key))
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.find(key).is_some()
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(VirtualNode::node_count)
            .sum::<usize>()
    }

    /// Keys of this subtree in depth-first order.
    pub fn keys(&self) -> Vec<NodeKey> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, out: &mut Vec<NodeKey>) {
        out.push(self.key);
        for child in &self.children {
            child.collect_keys(out);
        }
    }

    /// Splices the first descendant matching `key` out of its parent.
    ///
    /// The search is depth-first; `self` is never removed.
    pub fn remove_descendant(&mut self, key: NodeKey) -> Option<VirtualNode> {
        for index in 0..self.children.len() {
            if self.children[index].key == key {
                return Some(self.children.remove(index));
            }
            if let Some(removed) = self.children[index].remove_descendant(key) {
                return Some(removed);
            }
        }
        None
    }

    /// Writes the tag/attribute structure back as markup.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out, 0);
        out
    }

    fn write_markup(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{indent}<{}", self.tag);
        for (name, value) in &self.attributes {
            let _ = write!(out, " {name}=\"{}\"", escape_attribute(value));
        }
        if self.children.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");
        for child in &self.children {
            child.write_markup(out, depth + 1);
        }
        let _ = writeln!(out, "{indent}</{}>", self.tag);
    }
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> VirtualNode {
        let mut root = VirtualNode::new("space");
        let mut group = VirtualNode::new("group");
        group.append_child(VirtualNode::new("model"));
        group.append_child(VirtualNode::new("model"));
        root.append_child(group);
        root.append_child(VirtualNode::new("box"));
        root
    }

    #[test]
    fn keys_increase_and_are_unique() {
        let first = VirtualNode::new("a");
        let second = VirtualNode::new("b");
        assert!(second.key() > first.key());
        let tree = sample_tree();
        let mut keys = tree.keys();
        keys.dedup();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn set_attribute_overwrites() {
        let mut node = VirtualNode::new("model");
        node.set_attribute("x", "1");
        node.set_attribute("x", "2");
        assert_eq!(node.attribute("x"), Some("2"));
        assert_eq!(node.attributes.len(), 1);
    }

    #[test]
    fn removing_a_subtree_shrinks_the_count_by_its_size() {
        let mut tree = sample_tree();
        let group_key = tree.children[0].key();
        let before = tree.node_count();
        let removed = tree.remove_descendant(group_key).unwrap();
        assert_eq!(tree.node_count(), before - removed.node_count());
        assert_eq!(removed.node_count(), 3);
        assert!(!tree.contains(group_key));
    }

    #[test]
    fn removing_unknown_key_is_a_noop() {
        let mut tree = sample_tree();
        assert!(tree.remove_descendant(NodeKey::from_raw(u64::MAX)).is_none());
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn root_is_never_removed_from_itself() {
        let mut tree = sample_tree();
        let key = tree.key();
        assert!(tree.remove_descendant(key).is_none());
    }

    #[test]
    fn markup_escapes_attribute_values() {
        let mut node = VirtualNode::new("model");
        node.set_attribute("src", "a&b\".glb");
        assert_eq!(node.to_markup(), "<model src=\"a&amp;b&quot;.glb\"/>\n");
    }
}
