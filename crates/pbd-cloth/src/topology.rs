//! Half-edge triangle mesh with vertex splitting.
//!
//! Every face owns three half-edges. Each half-edge knows the vertex it
//! points to, the next half-edge around its face and its pair running the
//! opposite way. Boundary edges get a border half-edge (no face) as pair;
//! border half-edges are chained around each boundary vertex so that the
//! rotation `h -> next(pair(h))` visits every outgoing half-edge of a vertex,
//! boundary or not.
//!
//! ```text
//!          c
//!         / ^
//!     h2 /   \ h1        face (a, b, c):
//!       v  f  \            h0: c -> a
//!      a ----> b           h1: a -> b
//!         h0'              h2: b -> c
//! ```
//!
//! A face's half-edges end at its vertices in order, so the deformable
//! triangle of face `f` is `[end(h0), end(h1), end(h2)]` and patching
//! triangle slot `f * 3 + index_in_face` with a half-edge's end vertex keeps
//! the triangle buffer in sync with the mesh.

use std::collections::HashMap;

use glam::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ClothError, Result};
use crate::math::{signed_tetrahedron_volume, triangle_area};

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex {
    pub position: Vec3,
    /// One outgoing half-edge, `None` for isolated vertices.
    pub half_edge: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HalfEdge {
    /// Owning face, `None` for border half-edges.
    pub face: Option<usize>,
    pub end_vertex: usize,
    pub next: usize,
    pub pair: usize,
    /// Position of this half-edge within its face.
    pub index_in_face: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Face {
    pub half_edge: usize,
}

/// Outcome of a successful [`HalfEdgeMesh::split_vertex`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexSplit {
    /// Index of the vertex created by the split.
    pub new_vertex: usize,
    /// Existing half-edges whose endpoints or pair changed, sorted.
    pub updated_half_edges: Vec<usize>,
    /// Interior half-edge pairs separated by the cut. Each now borders a hole.
    pub severed: Vec<(usize, usize)>,
}

impl VertexSplit {
    /// The half-edge that was paired with `half_edge` before the cut.
    pub fn severed_partner(&self, half_edge: usize) -> Option<usize> {
        self.severed.iter().find_map(|&(a, b)| {
            if a == half_edge {
                Some(b)
            } else if b == half_edge {
                Some(a)
            } else {
                None
            }
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HalfEdgeMesh {
    vertices: Vec<Vertex>,
    half_edges: Vec<HalfEdge>,
    faces: Vec<Face>,
}

impl HalfEdgeMesh {
    /// Build a mesh from vertex positions and consistently wound triangles.
    ///
    /// Fails on out-of-range indices, degenerate triangles and edges shared by
    /// more than two faces or by two faces with the same winding.
    pub fn from_triangles(positions: Vec<Vec3>, triangles: &[[u32; 3]]) -> Result<Self> {
        let vertex_count = positions.len();
        let mut mesh = Self {
            vertices: positions
                .into_iter()
                .map(|position| Vertex {
                    position,
                    half_edge: None,
                })
                .collect(),
            half_edges: Vec::with_capacity(triangles.len() * 4),
            faces: Vec::with_capacity(triangles.len()),
        };

        let mut directed: HashMap<(usize, usize), usize> = HashMap::new();
        let mut starts = Vec::with_capacity(triangles.len() * 3);

        for (f, tri) in triangles.iter().enumerate() {
            let [a, b, c] = tri.map(|i| i as usize);
            if a >= vertex_count || b >= vertex_count || c >= vertex_count {
                return Err(ClothError::invalid_topology(format!(
                    "face {f} references a vertex out of range ({vertex_count} vertices)"
                )));
            }
            if a == b || b == c || a == c {
                return Err(ClothError::invalid_topology(format!(
                    "face {f} is degenerate ({a}, {b}, {c})"
                )));
            }

            let base = mesh.half_edges.len();
            for (k, (start, end)) in [(c, a), (a, b), (b, c)].into_iter().enumerate() {
                if directed.insert((start, end), base + k).is_some() {
                    return Err(ClothError::invalid_topology(format!(
                        "edge {start}->{end} is shared by two faces with the same winding"
                    )));
                }
                mesh.half_edges.push(HalfEdge {
                    face: Some(f),
                    end_vertex: end,
                    next: base + (k + 1) % 3,
                    pair: usize::MAX,
                    index_in_face: Some(k as u8),
                });
                starts.push(start);
            }
            mesh.faces.push(Face { half_edge: base });
        }

        let interior_count = mesh.half_edges.len();
        for h in 0..interior_count {
            if mesh.half_edges[h].pair != usize::MAX {
                continue;
            }
            let (start, end) = (starts[h], mesh.half_edges[h].end_vertex);
            match directed.get(&(end, start)) {
                Some(&p) => {
                    mesh.half_edges[h].pair = p;
                    mesh.half_edges[p].pair = h;
                }
                None => {
                    let border = mesh.half_edges.len();
                    mesh.half_edges.push(HalfEdge {
                        face: None,
                        end_vertex: start,
                        next: border,
                        pair: h,
                        index_in_face: None,
                    });
                    mesh.half_edges[h].pair = border;
                }
            }
        }

        let mut outgoing = vec![Vec::new(); vertex_count];
        for h in 0..mesh.half_edges.len() {
            outgoing[mesh.start_vertex(h)].push(h);
        }
        for (v, out) in outgoing.iter().enumerate() {
            mesh.relink_vertex(v, out);
        }

        Ok(mesh)
    }

    /// Flat grid of `columns × rows` vertices in the XY plane, hanging down
    /// from the origin, two triangles per quad.
    pub fn grid(columns: usize, rows: usize, spacing: f32) -> Result<Self> {
        if columns < 2 || rows < 2 {
            return Err(ClothError::invalid_topology(format!(
                "grid needs at least 2x2 vertices, got {columns}x{rows}"
            )));
        }
        let mut positions = Vec::with_capacity(columns * rows);
        for row in 0..rows {
            for col in 0..columns {
                positions.push(Vec3::new(col as f32 * spacing, -(row as f32) * spacing, 0.0));
            }
        }
        let mut triangles = Vec::with_capacity((columns - 1) * (rows - 1) * 2);
        for row in 0..rows - 1 {
            for col in 0..columns - 1 {
                let a = (row * columns + col) as u32;
                let b = a + 1;
                let c = a + columns as u32;
                let d = c + 1;
                triangles.push([a, c, b]);
                triangles.push([b, c, d]);
            }
        }
        Self::from_triangles(positions, &triangles)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn half_edge_count(&self) -> usize {
        self.half_edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn half_edges(&self) -> &[HalfEdge] {
        &self.half_edges
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn vertex(&self, index: usize) -> &Vertex {
        &self.vertices[index]
    }

    pub fn half_edge(&self, index: usize) -> &HalfEdge {
        &self.half_edges[index]
    }

    pub fn start_vertex(&self, half_edge: usize) -> usize {
        let h = &self.half_edges[half_edge];
        match h.face {
            None => self.half_edges[h.pair].end_vertex,
            Some(_) => {
                let prev = self.half_edges[h.next].next;
                self.half_edges[prev].end_vertex
            }
        }
    }

    pub fn face_half_edges(&self, face: usize) -> [usize; 3] {
        let h0 = self.faces[face].half_edge;
        let h1 = self.half_edges[h0].next;
        let h2 = self.half_edges[h1].next;
        [h0, h1, h2]
    }

    pub fn face_vertices(&self, face: usize) -> [usize; 3] {
        self.face_half_edges(face).map(|h| self.half_edges[h].end_vertex)
    }

    /// Half-edges leaving `vertex`, in rotation order.
    pub fn outgoing(&self, vertex: usize) -> Outgoing<'_> {
        let start = self.vertices[vertex].half_edge;
        Outgoing {
            mesh: self,
            start,
            current: start,
            remaining: self.half_edges.len(),
        }
    }

    pub fn neighbors(&self, vertex: usize) -> impl Iterator<Item = usize> + '_ {
        self.outgoing(vertex).map(|h| self.half_edges[h].end_vertex)
    }

    pub fn incident_faces(&self, vertex: usize) -> impl Iterator<Item = usize> + '_ {
        self.outgoing(vertex).filter_map(|h| self.half_edges[h].face)
    }

    /// One half-edge per undirected edge (the lower index of each pair).
    pub fn edge_list(&self) -> Vec<usize> {
        (0..self.half_edges.len())
            .filter(|&h| h < self.half_edges[h].pair)
            .collect()
    }

    pub fn face_area(&self, face: usize) -> f32 {
        let [a, b, c] = self.face_vertices(face);
        triangle_area(
            self.vertices[a].position,
            self.vertices[b].position,
            self.vertices[c].position,
        )
    }

    pub fn area(&self) -> f32 {
        (0..self.faces.len()).map(|f| self.face_area(f)).sum()
    }

    /// Enclosed volume. Only meaningful for closed meshes.
    pub fn volume(&self) -> f32 {
        let signed: f32 = (0..self.faces.len())
            .map(|f| {
                let [a, b, c] = self.face_vertices(f);
                signed_tetrahedron_volume(
                    self.vertices[a].position,
                    self.vertices[b].position,
                    self.vertices[c].position,
                )
            })
            .sum();
        signed.abs()
    }

    pub fn is_closed(&self) -> bool {
        !self.faces.is_empty() && self.half_edges.iter().all(|h| h.face.is_some())
    }

    /// Area-weighted vertex normals.
    pub fn vertex_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::ZERO; self.vertices.len()];
        for f in 0..self.faces.len() {
            let [a, b, c] = self.face_vertices(f);
            let pa = self.vertices[a].position;
            let n = (self.vertices[b].position - pa).cross(self.vertices[c].position - pa);
            normals[a] += n;
            normals[b] += n;
            normals[c] += n;
        }
        normals.iter_mut().for_each(|n| *n = n.normalize_or_zero());
        normals
    }

    /// Split `vertex` in two along a plane through `plane_point`.
    ///
    /// Incident faces whose centroid lies behind the plane (negative side of
    /// `plane_normal`) move to a new vertex appended at index
    /// `vertex_count()`. Edges between a moved and a kept face are cut and get
    /// border half-edges on both sides. `position` supplies the vertex
    /// positions used to classify faces.
    ///
    /// Returns `None` without touching the mesh if all incident faces fall on
    /// the same side.
    pub fn split_vertex(
        &mut self,
        vertex: usize,
        plane_point: Vec3,
        plane_normal: Vec3,
        position: impl Fn(usize) -> Vec3,
    ) -> Option<VertexSplit> {
        let outgoing: Vec<usize> = self.outgoing(vertex).collect();
        let incident: Vec<usize> = outgoing
            .iter()
            .filter_map(|&h| self.half_edges[h].face)
            .collect();
        let moved: Vec<usize> = incident
            .iter()
            .copied()
            .filter(|&f| {
                let [a, b, c] = self.face_vertices(f);
                let centroid = (position(a) + position(b) + position(c)) / 3.0;
                (centroid - plane_point).dot(plane_normal) < 0.0
            })
            .collect();
        if moved.is_empty() || moved.len() == incident.len() {
            return None;
        }

        let mut neighbors: Vec<usize> = outgoing
            .iter()
            .map(|&h| self.half_edges[h].end_vertex)
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        let mut candidates = outgoing.clone();
        for &n in &neighbors {
            candidates.extend(self.outgoing(n));
        }

        let new_vertex = self.vertices.len();
        self.vertices.push(Vertex {
            position: self.vertices[vertex].position,
            half_edge: None,
        });

        let mut updated = Vec::new();
        for &f in &moved {
            for h in self.face_half_edges(f) {
                if self.half_edges[h].end_vertex == vertex {
                    self.half_edges[h].end_vertex = new_vertex;
                    updated.push(h);
                    updated.push(self.half_edges[h].next);
                }
            }
        }

        let side = |face: Option<usize>| face.map(|f| moved.contains(&f));
        let mut severed = Vec::new();
        for &h in &outgoing {
            let p = self.half_edges[h].pair;
            match (side(self.half_edges[h].face), side(self.half_edges[p].face)) {
                // Border leaving the moved side: its start follows the pair.
                (None, Some(true)) => updated.push(h),
                (Some(true), None) => {
                    self.half_edges[p].end_vertex = new_vertex;
                    updated.push(p);
                }
                (Some(h_moved), Some(p_moved)) if h_moved != p_moved => {
                    let h_start = if h_moved { new_vertex } else { vertex };
                    let far = self.half_edges[h].end_vertex;
                    let border_h = self.half_edges.len();
                    let border_p = border_h + 1;
                    self.half_edges.push(HalfEdge {
                        face: None,
                        end_vertex: h_start,
                        next: border_h,
                        pair: h,
                        index_in_face: None,
                    });
                    self.half_edges.push(HalfEdge {
                        face: None,
                        end_vertex: far,
                        next: border_p,
                        pair: p,
                        index_in_face: None,
                    });
                    self.half_edges[h].pair = border_h;
                    self.half_edges[p].pair = border_p;
                    candidates.extend([border_h, border_p]);
                    severed.push((h, p));
                    updated.extend([h, p]);
                }
                _ => {}
            }
        }

        candidates.sort_unstable();
        candidates.dedup();
        let mut affected = neighbors;
        affected.extend([vertex, new_vertex]);
        for x in affected {
            let out: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&h| self.start_vertex(h) == x)
                .collect();
            self.relink_vertex(x, &out);
        }

        updated.sort_unstable();
        updated.dedup();
        Some(VertexSplit {
            new_vertex,
            updated_half_edges: updated,
            severed,
        })
    }

    /// Check the structural invariants of the mesh.
    pub fn validate(&self) -> Result<()> {
        let he_count = self.half_edges.len();
        for (i, h) in self.half_edges.iter().enumerate() {
            if h.pair >= he_count || h.next >= he_count || h.end_vertex >= self.vertices.len() {
                return Err(ClothError::invalid_topology(format!(
                    "half-edge {i} has an index out of range"
                )));
            }
            if self.half_edges[h.pair].pair != i {
                return Err(ClothError::invalid_topology(format!(
                    "half-edge {i} pair is not symmetric"
                )));
            }
            if self.start_vertex(h.pair) != h.end_vertex {
                return Err(ClothError::invalid_topology(format!(
                    "half-edge {i} and its pair do not share endpoints"
                )));
            }
            if self.start_vertex(h.next) != h.end_vertex {
                return Err(ClothError::invalid_topology(format!(
                    "half-edge {i} is not continued by its next half-edge"
                )));
            }
            if let Some(f) = h.face {
                let third = self.half_edges[self.half_edges[h.next].next].next;
                if f >= self.faces.len() || third != i {
                    return Err(ClothError::invalid_topology(format!(
                        "face of half-edge {i} is not a triangle"
                    )));
                }
            }
        }
        for (v, vertex) in self.vertices.iter().enumerate() {
            if let Some(h) = vertex.half_edge {
                if h >= he_count || self.start_vertex(h) != v {
                    return Err(ClothError::invalid_topology(format!(
                        "vertex {v} points at a half-edge that does not leave it"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Point `vertex` at one of `outgoing` and chain its border half-edges.
    ///
    /// Each boundary fan runs from an outgoing border half-edge through the
    /// faces to an incoming border half-edge; that incoming half-edge is
    /// continued by the outgoing border of the next fan.
    fn relink_vertex(&mut self, vertex: usize, outgoing: &[usize]) {
        let borders: Vec<usize> = outgoing
            .iter()
            .copied()
            .filter(|&h| self.half_edges[h].face.is_none())
            .collect();
        if borders.is_empty() {
            let keep = self.vertices[vertex]
                .half_edge
                .filter(|h| outgoing.contains(h));
            self.vertices[vertex].half_edge = keep.or_else(|| outgoing.first().copied());
            return;
        }

        let mut incoming = Vec::with_capacity(borders.len());
        for &border in &borders {
            let mut h = border;
            let mut steps = 0;
            let end = loop {
                let p = self.half_edges[h].pair;
                if self.half_edges[p].face.is_none() {
                    break Some(p);
                }
                h = self.half_edges[p].next;
                steps += 1;
                if steps > outgoing.len() {
                    break None;
                }
            };
            incoming.push(end);
        }
        for (i, end) in incoming.into_iter().enumerate() {
            if let Some(ib) = end {
                self.half_edges[ib].next = borders[(i + 1) % borders.len()];
            }
        }
        self.vertices[vertex].half_edge = Some(borders[0]);
    }
}

/// Iterator over the outgoing half-edges of a vertex.
pub struct Outgoing<'a> {
    mesh: &'a HalfEdgeMesh,
    start: Option<usize>,
    current: Option<usize>,
    remaining: usize,
}

impl Iterator for Outgoing<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let h = self.current?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let pair = self.mesh.half_edges[h].pair;
        let next = self.mesh.half_edges[pair].next;
        self.current = if Some(next) == self.start { None } else { Some(next) };
        Some(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> HalfEdgeMesh {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        HalfEdgeMesh::from_triangles(positions, &[[0, 1, 2], [0, 2, 3]]).unwrap()
    }

    #[test]
    fn test_quad_counts() {
        let mesh = quad();
        assert_eq!(mesh.face_count(), 2);
        // 6 face half-edges + 4 border half-edges
        assert_eq!(mesh.half_edge_count(), 10);
        assert_eq!(mesh.edge_list().len(), 5);
        assert!(!mesh.is_closed());
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_boundary_rotation_visits_all_neighbors() {
        let mesh = quad();
        let mut n: Vec<usize> = mesh.neighbors(0).collect();
        n.sort_unstable();
        assert_eq!(n, vec![1, 2, 3]);
        let mut n: Vec<usize> = mesh.neighbors(1).collect();
        n.sort_unstable();
        assert_eq!(n, vec![0, 2]);
    }

    #[test]
    fn test_face_vertices_keep_winding() {
        let mesh = quad();
        assert_eq!(mesh.face_vertices(0), [0, 1, 2]);
        assert_eq!(mesh.face_vertices(1), [0, 2, 3]);
    }

    #[test]
    fn test_same_winding_rejected() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
        let result = HalfEdgeMesh::from_triangles(positions, &[[0, 1, 2], [0, 1, 3]]);
        assert!(matches!(result, Err(ClothError::InvalidTopology(_))));
    }

    #[test]
    fn test_split_refused_when_one_sided() {
        let mut mesh = quad();
        let before = mesh.clone();
        let positions: Vec<Vec3> = mesh.vertices().iter().map(|v| v.position).collect();
        // Every face centroid lies in +x of the plane through vertex 0.
        let result = mesh.split_vertex(0, Vec3::ZERO, Vec3::X, |v| positions[v]);
        assert!(result.is_none());
        assert_eq!(mesh, before, "refused split must not modify the mesh");
    }

    #[test]
    fn test_split_shared_diagonal_vertex() {
        let mut mesh = quad();
        let positions: Vec<Vec3> = mesh.vertices().iter().map(|v| v.position).collect();
        // Plane through vertex 0 separating face 0 (below diagonal) from face 1.
        let normal = Vec3::new(1.0, -1.0, 0.0).normalize();
        let split = mesh
            .split_vertex(0, Vec3::ZERO, normal, |v| positions[v])
            .unwrap();
        assert_eq!(split.new_vertex, 4);
        assert_eq!(split.severed.len(), 1, "only the diagonal is cut");
        assert!(mesh.validate().is_ok(), "{:?}", mesh.validate());
        assert_eq!(mesh.face_vertices(0), [0, 1, 2]);
        assert_eq!(mesh.face_vertices(1), [4, 2, 3]);
    }
}
