//! Mesh sub-patch extraction and midpoint refinement.
//!
//! The scan carves the local mesh neighborhood out of the full mesh by
//! vertex selection, then refines it with one midpoint subdivision so the
//! aperture clipping and area sum see smaller triangles. Midpoint
//! subdivision splits each triangle 1-to-4 at its edge midpoints without
//! repositioning vertices, so it preserves the piecewise-linear surface and
//! its area exactly.

use hashbrown::HashMap;
use nalgebra::Point3;

use crate::types::Mesh;

/// Extract the sub-mesh spanned by the selected vertices.
///
/// Keeps exactly the triangles whose three corners are all selected, and
/// remaps vertex indices compactly. Unreferenced selected vertices are kept
/// so the patch vertex set mirrors the selection.
pub fn select_by_index(mesh: &Mesh, indices: &[usize]) -> Mesh {
    let mut remap: HashMap<u32, u32> = HashMap::with_capacity(indices.len());
    let mut vertices = Vec::with_capacity(indices.len());
    for &i in indices {
        if i >= mesh.vertices.len() {
            continue;
        }
        remap.entry(i as u32).or_insert_with(|| {
            vertices.push(mesh.vertices[i]);
            (vertices.len() - 1) as u32
        });
    }

    let faces = mesh
        .faces
        .iter()
        .filter_map(|&[a, b, c]| {
            match (remap.get(&a), remap.get(&b), remap.get(&c)) {
                (Some(&ra), Some(&rb), Some(&rc)) => Some([ra, rb, rc]),
                _ => None,
            }
        })
        .collect();

    Mesh { vertices, faces }
}

/// One iteration of midpoint subdivision: every triangle becomes four.
///
/// Edge midpoints are shared between adjacent triangles through a canonical
/// edge key, so the refined patch stays topologically welded.
pub fn midpoint_subdivide(mesh: &Mesh) -> Mesh {
    let mut vertices = mesh.vertices.clone();
    let mut edge_vertices: HashMap<(u32, u32), u32> = HashMap::new();
    let mut faces = Vec::with_capacity(mesh.faces.len() * 4);

    let mut midpoint = |v0: u32, v1: u32, vertices: &mut Vec<Point3<f64>>| -> u32 {
        let key = if v0 < v1 { (v0, v1) } else { (v1, v0) };
        *edge_vertices.entry(key).or_insert_with(|| {
            let p0 = vertices[v0 as usize];
            let p1 = vertices[v1 as usize];
            vertices.push(Point3::new(
                (p0.x + p1.x) / 2.0,
                (p0.y + p1.y) / 2.0,
                (p0.z + p1.z) / 2.0,
            ));
            (vertices.len() - 1) as u32
        })
    };

    for &[v0, v1, v2] in &mesh.faces {
        let e01 = midpoint(v0, v1, &mut vertices);
        let e12 = midpoint(v1, v2, &mut vertices);
        let e20 = midpoint(v2, v0, &mut vertices);

        faces.push([v0, e01, e20]);
        faces.push([e01, v1, e12]);
        faces.push([e20, e12, v2]);
        faces.push([e01, e12, e20]);
    }

    Mesh { vertices, faces }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    fn two_triangle_strip() -> Mesh {
        Mesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2], [1, 3, 2]],
        }
    }

    #[test]
    fn test_select_keeps_fully_contained_faces() {
        let mesh = two_triangle_strip();
        let patch = select_by_index(&mesh, &[0, 1, 2]);

        assert_eq!(patch.vertex_count(), 3);
        assert_eq!(patch.face_count(), 1);
        assert!(approx_eq(patch.surface_area(), 0.5));
    }

    #[test]
    fn test_select_remaps_indices() {
        let mesh = two_triangle_strip();
        let patch = select_by_index(&mesh, &[1, 2, 3]);

        assert_eq!(patch.vertex_count(), 3);
        assert_eq!(patch.face_count(), 1);
        for face in &patch.faces {
            for &v in face {
                assert!((v as usize) < patch.vertex_count());
            }
        }
    }

    #[test]
    fn test_select_ignores_out_of_range_and_duplicates() {
        let mesh = two_triangle_strip();
        let patch = select_by_index(&mesh, &[0, 0, 1, 99]);
        assert_eq!(patch.vertex_count(), 2);
        assert_eq!(patch.face_count(), 0);
    }

    #[test]
    fn test_subdivide_counts() {
        let mesh = two_triangle_strip();
        let refined = midpoint_subdivide(&mesh);

        // 2 triangles -> 8; 4 vertices + 5 unique edges -> 9.
        assert_eq!(refined.face_count(), 8);
        assert_eq!(refined.vertex_count(), 9);
    }

    #[test]
    fn test_subdivide_preserves_area() {
        let mesh = Mesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 1.0),
                Point3::new(0.0, 2.0, -0.5),
            ],
            faces: vec![[0, 1, 2]],
        };
        let refined = midpoint_subdivide(&mesh);
        assert!(approx_eq(mesh.surface_area(), refined.surface_area()));
    }

    #[test]
    fn test_subdivide_empty_mesh() {
        let refined = midpoint_subdivide(&Mesh::new());
        assert!(refined.is_empty());
    }
}
