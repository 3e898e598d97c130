use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::{EulerRot, Quat, Vec3};
use gltf::buffer::Data;
use gltf::mesh::Mode;

use super::Mesh;
use crate::render_tree::RenderObject;

/// Imports a `.gltf`/`.glb` file and converts its default scene into a render
/// subtree. Only triangle primitives are kept.
pub fn load_gltf(path: &Path) -> Result<RenderObject> {
    let (document, buffers, _images) =
        gltf::import(path).with_context(|| format!("unable to import {}", path.display()))?;
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| anyhow!("{} does not contain a scene", path.display()))?;

    let mut root = RenderObject::group(None);
    for node in scene.nodes() {
        root.children.push(convert_node(&node, &buffers)?);
    }
    Ok(root)
}

fn convert_node(node: &gltf::Node<'_>, buffers: &[Data]) -> Result<RenderObject> {
    let (translation, rotation, scale) = node.transform().decomposed();
    let (rx, ry, rz) = Quat::from_array(rotation).to_euler(EulerRot::XYZ);

    let mut object = RenderObject::group(None);
    object.position = Vec3::from(translation);
    object.rotation = Vec3::new(rx, ry, rz);
    object.scale = Vec3::from(scale);

    if let Some(mesh) = node.mesh() {
        let label = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh{}", mesh.index()));
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                continue;
            }
            let name = format!("{label}/{}", primitive.index());
            let data = read_primitive(&primitive, buffers, name)?;
            object.children.push(RenderObject::mesh(Arc::new(data)));
        }
    }
    for child in node.children() {
        object.children.push(convert_node(&child, buffers)?);
    }
    Ok(object)
}

fn read_primitive(primitive: &gltf::Primitive<'_>, buffers: &[Data], name: String) -> Result<Mesh> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| anyhow!("primitive {name} has no positions"))?
        .collect();
    let normals: Vec<[f32; 3]> = reader
        .read_normals()
        .map(|normals| normals.collect())
        .unwrap_or_default();
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };

    let mut vertices = Vec::with_capacity(positions.len() * 6);
    for (i, position) in positions.iter().enumerate() {
        let normal = normals.get(i).copied().unwrap_or([0.0; 3]);
        vertices.extend_from_slice(position);
        vertices.extend_from_slice(&normal);
    }

    let mut mesh = Mesh::new(name, vertices, indices);
    let [r, g, b, _] = primitive
        .material()
        .pbr_metallic_roughness()
        .base_color_factor();
    mesh.color = Vec3::new(r, g, b);
    if mesh.needs_normals() {
        mesh.compute_normals();
    }
    Ok(mesh)
}

/// One triangle in the XY plane, drawn twice: once indexed, once without
/// indices. No normals, no material. Node 0 is translated and holds node 1,
/// which carries the mesh with a 90° Z rotation and a uniform scale of 2.
#[cfg(test)]
pub(crate) const TRIANGLE_GLTF: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [
    { "name": "rig", "translation": [1.0, 2.0, 3.0], "children": [1] },
    { "name": "tri", "mesh": 0, "rotation": [0.0, 0.0, 0.70710677, 0.70710677], "scale": [2.0, 2.0, 2.0] }
  ],
  "meshes": [{
    "name": "tri",
    "primitives": [
      { "attributes": { "POSITION": 0 }, "indices": 1 },
      { "attributes": { "POSITION": 0 } }
    ]
  }],
  "buffers": [{
    "byteLength": 44,
    "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIAAAA="
  }],
  "bufferViews": [
    { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
    { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
  ],
  "accessors": [
    { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
    { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
  ]
}"#;

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;
    use std::fs;

    use super::*;
    use crate::render_tree::RenderKind;

    fn load_fixture() -> RenderObject {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.gltf");
        fs::write(&path, TRIANGLE_GLTF).unwrap();
        load_gltf(&path).unwrap()
    }

    fn mesh_of(object: &RenderObject) -> &Mesh {
        match &object.kind {
            RenderKind::Mesh(mesh) => mesh,
            other => panic!("expected a mesh, found {other:?}"),
        }
    }

    #[test]
    fn node_hierarchy_and_transforms_are_kept() {
        let root = load_fixture();
        assert_eq!(root.key, None);
        assert_eq!(root.children.len(), 1);

        let rig = &root.children[0];
        assert_eq!(rig.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(rig.scale, Vec3::ONE);
        assert_eq!(rig.children.len(), 1);

        let tri = &rig.children[0];
        assert_eq!(tri.scale, Vec3::splat(2.0));
        assert!(tri.rotation.x.abs() < 1e-5, "{:?}", tri.rotation);
        assert!(tri.rotation.y.abs() < 1e-5, "{:?}", tri.rotation);
        assert!((tri.rotation.z - FRAC_PI_2).abs() < 1e-5, "{:?}", tri.rotation);
    }

    #[test]
    fn triangle_primitives_become_meshes() {
        let root = load_fixture();
        let tri = &root.children[0].children[0];
        assert_eq!(tri.children.len(), 2);

        let indexed = mesh_of(&tri.children[0]);
        let unindexed = mesh_of(&tri.children[1]);
        assert_eq!(indexed.name, "tri/0");
        assert_eq!(unindexed.name, "tri/1");
        for mesh in [indexed, unindexed] {
            assert_eq!(mesh.vertex_count(), 3);
            assert_eq!(mesh.indices, vec![0, 1, 2]);
            assert_eq!(mesh.color, Vec3::ONE);
        }
    }

    #[test]
    fn missing_normals_are_generated() {
        let root = load_fixture();
        let mesh = mesh_of(&root.children[0].children[0].children[0]);
        assert!(!mesh.needs_normals());
        for vertex in mesh.vertices.chunks_exact(6) {
            let normal = Vec3::from_slice(&vertex[3..6]);
            assert!((normal - Vec3::Z).length() < 1e-5, "{normal:?}");
        }
    }

    #[test]
    fn meshes_are_placed_under_their_node_transforms() {
        let root = load_fixture();
        let items = root.draw_list();
        assert_eq!(items.len(), 2);
        let origin = items[0].world.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
        let corner = items[0].world.transform_point3(Vec3::X);
        assert!((corner - Vec3::new(1.0, 4.0, 3.0)).length() < 1e-5, "{corner:?}");
    }

    #[test]
    fn broken_files_report_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.gltf");
        fs::write(&path, "{ not json").unwrap();
        let err = load_gltf(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.gltf"), "{err:#}");
    }
}
