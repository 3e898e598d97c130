//! Script-facing construction and mutation of virtual nodes.
//!
//! Every write goes straight to the document, which bumps its revision; the
//! scene host and inspector pick the change up on their next sync.

use std::collections::BTreeMap;

use crate::dom::{Dom, DomError};
use crate::projector::parse_number;
use crate::vnode::{NodeKey, VirtualNode};

/// Transform axis addressed by the position and rotation setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            "z" => Some(Self::Z),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        }
    }

    fn position_attribute(self) -> &'static str {
        self.name()
    }

    fn rotation_attribute(self) -> &'static str {
        match self {
            Self::X => "rotationX",
            Self::Y => "rotationY",
            Self::Z => "rotationZ",
        }
    }
}

/// Entry point handed to scripts.
#[derive(Debug, Clone)]
pub struct Facade {
    dom: Dom,
}

impl Facade {
    pub fn new(dom: Dom) -> Self {
        Self { dom }
    }

    /// Creates a new, unattached node.
    pub fn create_element(&self, tag: &str) -> ElementHandle {
        ElementHandle {
            key: self.dom.create_node(tag),
            dom: self.dom.clone(),
        }
    }

    /// Copy of the attached document, if one is loaded.
    pub fn snapshot(&self) -> Option<VirtualNode> {
        self.dom.snapshot()
    }

    /// Attaches `child` under `parent`, or under the document root.
    pub fn append_child(
        &self,
        child: &ElementHandle,
        parent: Option<&ElementHandle>,
    ) -> Result<(), DomError> {
        self.dom
            .append_child(child.key, parent.map(ElementHandle::key))
    }
}

/// Opaque reference to a node created through the façade.
#[derive(Debug, Clone)]
pub struct ElementHandle {
    dom: Dom,
    key: NodeKey,
}

impl ElementHandle {
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Tag of the node, or `None` once the node is gone from the document.
    pub fn tag(&self) -> Option<String> {
        self.dom.tag(self.key)
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.dom.attribute(self.key, name)
    }

    pub fn attributes(&self) -> Option<BTreeMap<String, String>> {
        self.dom.attributes(self.key)
    }

    pub fn set_attribute(&self, name: &str, value: &str) -> bool {
        self.dom.set_attribute(self.key, name, value)
    }

    pub fn src(&self) -> Option<String> {
        self.attribute("src")
    }

    pub fn set_src(&self, src: &str) -> bool {
        self.set_attribute("src", src)
    }

    pub fn position(&self, axis: Axis) -> Option<f64> {
        self.number(axis.position_attribute())
    }

    pub fn set_position(&self, axis: Axis, value: f64) -> bool {
        self.set_attribute(axis.position_attribute(), &value.to_string())
    }

    /// Rotation in degrees, the unit the projector reads.
    pub fn rotation(&self, axis: Axis) -> Option<f64> {
        self.number(axis.rotation_attribute())
    }

    /// Stores `degrees` verbatim in `rotationX/Y/Z`.
    pub fn set_rotation(&self, axis: Axis, degrees: f64) -> bool {
        self.set_attribute(axis.rotation_attribute(), &degrees.to_string())
    }

    fn number(&self, name: &str) -> Option<f64> {
        parse_number(&self.attribute(name)?)
    }
}
