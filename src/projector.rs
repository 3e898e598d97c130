//! Projection of the virtual tree into a render tree.

use std::str::FromStr;

use glam::Vec3;

use crate::assets::ModelRequest;
use crate::render_tree::{RenderKind, RenderObject};
use crate::vnode::VirtualNode;

/// Tag whose `src` attribute names a model file.
pub const MODEL_TAG: &str = "model";

/// Result of projecting a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub root: RenderObject,
    /// Model loads the projected tree is waiting on.
    pub models: Vec<ModelRequest>,
}

/// Projects `root` and everything below it.
pub fn project_tree(root: &VirtualNode) -> Projection {
    let mut models = Vec::new();
    let root = project_node(root, &mut models);
    Projection { root, models }
}

fn project_node(node: &VirtualNode, models: &mut Vec<ModelRequest>) -> RenderObject {
    let kind = if node.tag == MODEL_TAG {
        let src = node.attribute("src").filter(|src| !src.is_empty());
        if let Some(src) = src {
            models.push(ModelRequest {
                key: node.key(),
                src: src.to_string(),
            });
        }
        RenderKind::Model {
            src: src.map(str::to_string),
        }
    } else {
        RenderKind::Group
    };

    let mut object = RenderObject::new(Some(node.key()), kind);
    apply_transforms(&mut object, node);
    object.children = node
        .children
        .iter()
        .map(|child| project_node(child, models))
        .collect();
    object
}

/// Applies the transform attributes of `node` to `object`.
///
/// Attributes are read in a fixed order, so `px`/`py`/`pz` win over
/// `x`/`y`/`z`. Values that do not parse as numbers are skipped.
pub fn apply_transforms(object: &mut RenderObject, node: &VirtualNode) {
    let number = |name: &str| node.attribute(name).and_then(parse_number::<f32>);

    if let Some(scale) = number("scale") {
        object.scale = Vec3::splat(scale);
    }
    for names in [["x", "y", "z"], ["px", "py", "pz"]] {
        for (axis, name) in names.into_iter().enumerate() {
            if let Some(value) = number(name) {
                object.position[axis] = value;
            }
        }
    }
    for (axis, name) in ["rotationX", "rotationY", "rotationZ"].into_iter().enumerate() {
        if let Some(degrees) = number(name) {
            object.rotation[axis] = degrees.to_radians();
        }
    }
}

/// Reads the leading decimal number of an attribute value, ignoring leading
/// whitespace and any trailing text, so `"10px"` is `10`. Returns `None`
/// when the value does not start with a number.
pub(crate) fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    numeric_prefix(value.trim_start())?.parse().ok()
}

fn numeric_prefix(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let digits_from = |start: usize| {
        bytes
            .get(start..)
            .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
    };

    let sign = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    if text[sign..].starts_with("Infinity") {
        return Some(&text[..sign + "Infinity".len()]);
    }

    let integer = digits_from(sign);
    let mut end = sign + integer;
    let point = bytes.get(end) == Some(&b'.');
    let fraction = if point { digits_from(end + 1) } else { 0 };
    if integer == 0 && fraction == 0 {
        return None;
    }
    if point {
        end += 1 + fraction;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let digits = digits_from(exponent);
        if digits > 0 {
            end = exponent + digits;
        }
    }
    Some(&text[..end])
}
