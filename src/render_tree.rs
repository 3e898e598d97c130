use std::sync::Arc;

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::assets::Mesh;
use crate::vnode::NodeKey;

/// What a render object draws.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderKind {
    Group,
    /// Placeholder for a model; its children are replaced once the asset loads.
    Model { src: Option<String> },
    Mesh(Arc<Mesh>),
}

/// Node of the render tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderObject {
    /// Key of the virtual node this object was projected from. Loaded model
    /// content has none.
    pub key: Option<NodeKey>,
    pub kind: RenderKind,
    pub position: Vec3,
    /// Euler angles in radians, applied in XYZ order.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub children: Vec<RenderObject>,
}

impl RenderObject {
    pub fn new(key: Option<NodeKey>, kind: RenderKind) -> Self {
        Self {
            key,
            kind,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            children: Vec::new(),
        }
    }

    pub fn group(key: Option<NodeKey>) -> Self {
        Self::new(key, RenderKind::Group)
    }

    pub fn mesh(mesh: Arc<Mesh>) -> Self {
        Self::new(None, RenderKind::Mesh(mesh))
    }

    pub fn with_child(mut self, child: RenderObject) -> Self {
        self.children.push(child);
        self
    }

    pub fn local_matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z);
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }

    pub fn find(&self, key: NodeKey) -> Option<&RenderObject> {
        if self.key == Some(key) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(key))
    }

    pub fn find_mut(&mut self, key: NodeKey) -> Option<&mut RenderObject> {
        if self.key == Some(key) {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(key))
    }

    /// Correlation keys of this subtree in depth-first order.
    pub fn keys(&self) -> Vec<NodeKey> {
        let mut keys = Vec::new();
        self.visit(Mat4::IDENTITY, &mut |object, _| keys.extend(object.key));
        keys
    }

    pub fn object_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(RenderObject::object_count)
            .sum::<usize>()
    }

    /// World-space position of the object correlated with `key`.
    pub fn world_position(&self, key: NodeKey) -> Option<Vec3> {
        let mut found = None;
        self.visit(Mat4::IDENTITY, &mut |object, world| {
            if found.is_none() && object.key == Some(key) {
                found = Some(world.w_axis.truncate());
            }
        });
        found
    }

    /// Every mesh in the subtree with its world matrix.
    pub fn draw_list(&self) -> Vec<DrawItem> {
        let mut items = Vec::new();
        self.visit(Mat4::IDENTITY, &mut |object, world| {
            if let RenderKind::Mesh(mesh) = &object.kind {
                items.push(DrawItem {
                    world,
                    mesh: Arc::clone(mesh),
                });
            }
        });
        items
    }

    fn visit(&self, parent: Mat4, visitor: &mut dyn FnMut(&RenderObject, Mat4)) {
        let world = parent * self.local_matrix();
        visitor(self, world);
        for child in &self.children {
            child.visit(world, visitor);
        }
    }
}

/// Mesh instance ready for drawing.
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub world: Mat4,
    pub mesh: Arc<Mesh>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: u64) -> Option<NodeKey> {
        Some(NodeKey::from_raw(raw))
    }

    #[test]
    fn world_position_accumulates_parent_transforms() {
        let mut child = RenderObject::group(key(2));
        child.position = Vec3::new(1.0, 0.0, 0.0);
        let mut parent = RenderObject::group(key(1));
        parent.position = Vec3::new(0.0, 2.0, 0.0);
        parent.scale = Vec3::splat(3.0);
        let root = parent.with_child(child);

        let world = root.world_position(NodeKey::from_raw(2)).unwrap();
        assert!((world - Vec3::new(3.0, 2.0, 0.0)).length() < 1e-5);
        assert!(root.world_position(NodeKey::from_raw(9)).is_none());
    }

    #[test]
    fn draw_list_collects_meshes_only() {
        let mesh = Arc::new(Mesh::new("tri", vec![0.0; 18], vec![0, 1, 2]));
        let root = RenderObject::group(key(1))
            .with_child(RenderObject::new(key(2), RenderKind::Model { src: None }).with_child(RenderObject::mesh(Arc::clone(&mesh))));
        let items = root.draw_list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].mesh.name, "tri");
        assert_eq!(root.keys(), vec![NodeKey::from_raw(1), NodeKey::from_raw(2)]);
        assert_eq!(root.object_count(), 3);
    }
}
