use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;

use super::Mesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Corner {
    position: usize,
    normal: Option<usize>,
}

/// Parses Wavefront OBJ text into a single mesh.
///
/// Only `v`, `vn` and `f` statements are read; polygons are fanned into
/// triangles and missing normals are generated from the faces.
pub fn parse_obj(name: &str, text: &str) -> Result<Mesh> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut triangles: Vec<[(i64, i64); 3]> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => positions
                .push(read_vec3(parts).with_context(|| format!("invalid vertex on line {line_no}"))?),
            Some("vn") => normals
                .push(read_vec3(parts).with_context(|| format!("invalid normal on line {line_no}"))?),
            Some("f") => {
                let polygon: Vec<(i64, i64)> = parts
                    .map(read_corner)
                    .collect::<Result<_>>()
                    .with_context(|| format!("invalid face on line {line_no}"))?;
                if polygon.len() < 3 {
                    bail!("face on line {line_no} has fewer than 3 corners");
                }
                for i in 1..polygon.len() - 1 {
                    triangles.push([polygon[0], polygon[i], polygon[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        bail!("OBJ data does not define any vertices");
    }

    let mut lookup: HashMap<Corner, u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut indices = Vec::with_capacity(triangles.len() * 3);
    for (position, normal) in triangles.into_iter().flatten() {
        let corner = Corner {
            position: resolve_index(position, positions.len())
                .ok_or_else(|| anyhow!("vertex index {position} is out of range"))?,
            normal: resolve_index(normal, normals.len()),
        };
        let index = *lookup.entry(corner).or_insert_with(|| {
            let p: Vec3 = positions[corner.position];
            let n = corner.normal.map_or(Vec3::ZERO, |i| normals[i]);
            vertices.extend_from_slice(&[p.x, p.y, p.z, n.x, n.y, n.z]);
            (vertices.len() / 6 - 1) as u32
        });
        indices.push(index);
    }

    let mut mesh = Mesh::new(name, vertices, indices);
    if mesh.needs_normals() {
        mesh.compute_normals();
    }
    Ok(mesh)
}

fn read_vec3<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let mut component = || -> Result<f32> {
        Ok(parts
            .next()
            .ok_or_else(|| anyhow!("missing vector component"))?
            .parse::<f32>()?)
    };
    Ok(Vec3::new(component()?, component()?, component()?))
}

/// Reads `v`, `v/vt`, `v//vn` or `v/vt/vn`; texture indices are ignored.
fn read_corner(token: &str) -> Result<(i64, i64)> {
    let mut fields = token.split('/');
    let position = fields
        .next()
        .ok_or_else(|| anyhow!("missing vertex index"))?
        .parse::<i64>()?;
    let normal = fields
        .nth(1)
        .filter(|field| !field.is_empty())
        .map(str::parse::<i64>)
        .transpose()?
        .unwrap_or(0);
    Ok((position, normal))
}

/// OBJ indices are 1-based; negative values count back from the end.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = match index {
        i if i > 0 => i - 1,
        i if i < 0 => len + i,
        _ => return None,
    };
    (0..len).contains(&resolved).then_some(resolved as usize)
}
