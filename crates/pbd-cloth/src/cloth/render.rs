//! CPU-side render mesh fed from simulated particle positions.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::topology::HalfEdgeMesh;

/// GPU-ready vertex record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RenderVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// xyz tangent, w handedness.
    pub tangent: [f32; 4],
}

/// Triangle mesh with one vertex per cloth particle.
///
/// Holds room for every particle of the actor, pooled spares included, so
/// tearing never reallocates. Indices reference local particle indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderMesh {
    pub vertices: Vec<RenderVertex>,
    pub indices: Vec<u32>,
}

impl RenderMesh {
    /// Mesh mirroring `topology`, padded with zeroed vertices up to `capacity`.
    pub fn from_topology(topology: &HalfEdgeMesh, capacity: usize) -> Self {
        let normals = topology.vertex_normals();
        let mut vertices = vec![RenderVertex::zeroed(); capacity.max(topology.vertex_count())];
        for (i, vertex) in topology.vertices().iter().enumerate() {
            vertices[i].position = vertex.position.to_array();
            vertices[i].normal = normals[i].to_array();
        }
        let indices = (0..topology.face_count())
            .flat_map(|f| topology.face_vertices(f).map(|v| v as u32))
            .collect();

        let mut mesh = Self { vertices, indices };
        mesh.recalculate_tangents();
        mesh
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Raw vertex bytes for upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn position(&self, vertex: usize) -> Vec3 {
        Vec3::from_array(self.vertices[vertex].position)
    }

    /// Area-weighted normals from the current positions and indices.
    pub fn recalculate_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a >= normals.len() || b >= normals.len() || c >= normals.len() {
                continue;
            }
            let pa = self.position(a);
            let n = (self.position(b) - pa).cross(self.position(c) - pa);
            normals[a] += n;
            normals[b] += n;
            normals[c] += n;
        }
        for (vertex, normal) in self.vertices.iter_mut().zip(normals) {
            vertex.normal = normal.normalize_or_zero().to_array();
        }
    }

    /// Tangents orthogonal to each normal. The mesh carries no UVs, so any
    /// orthonormal direction is as good as another.
    pub fn recalculate_tangents(&mut self) {
        for vertex in &mut self.vertices {
            let normal = Vec3::from_array(vertex.normal);
            let tangent = if normal.length_squared() > 0.0 {
                normal.any_orthonormal_vector().extend(1.0)
            } else {
                Vec4::new(1.0, 0.0, 0.0, 1.0)
            };
            vertex.tangent = tangent.to_array();
        }
    }

    /// Bounds of the vertices referenced by at least one triangle.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut points = self
            .indices
            .iter()
            .filter_map(|&i| self.vertices.get(i as usize))
            .map(|v| Vec3::from_array(v.position));
        let first = points.next()?;
        Some(points.fold((first, first), |(min, max), p| (min.min(p), max.max(p))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_grid_normals_face_forward() {
        let grid = HalfEdgeMesh::grid(3, 3, 1.0).unwrap();
        let mut mesh = RenderMesh::from_topology(&grid, 12);
        assert_eq!(mesh.vertices.len(), 12, "padded to capacity");
        assert_eq!(mesh.triangle_count(), 8);

        mesh.recalculate_normals();
        let n = Vec3::from_array(mesh.vertices[4].normal);
        assert_relative_eq!(n.z.abs(), 1.0, epsilon = 1e-5);
        // Unreferenced padding keeps a zero normal.
        assert_eq!(mesh.vertices[11].normal, [0.0; 3]);
    }

    #[test]
    fn test_tangents_orthogonal_to_normals() {
        let grid = HalfEdgeMesh::grid(2, 2, 0.5).unwrap();
        let mesh = RenderMesh::from_topology(&grid, 4);
        for v in &mesh.vertices {
            let n = Vec3::from_array(v.normal);
            let t = Vec4::from_array(v.tangent).truncate();
            assert_relative_eq!(n.dot(t), 0.0, epsilon = 1e-5);
        }
        assert_eq!(mesh.vertex_bytes().len(), 4 * std::mem::size_of::<RenderVertex>());
    }
}
