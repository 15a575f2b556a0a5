//! Surface area of the bounded local evaluation domain.
//!
//! The spatial average divides by the conformal area of the surface patch
//! under the aperture, not by the nominal projected area. Three paths, in
//! order of preference:
//!
//! 1. A mesh sub-patch is available: analytic sum of triangle areas.
//! 2. Point cloud only: integrate the magnitude of the non-unit surface
//!    normals over the projected 2D domain; the magnitude is the local area
//!    element, so the integral captures surface tilt.
//! 3. Neither computable: fall back to the nominal projected area with a
//!    diagnostic warning. Never a hard failure.

use nalgebra::{Vector2, Vector3};
use tracing::warn;

use crate::integrate::{IntegrationParams, integrate};
use crate::types::Mesh;

/// The bounded local domain a spatial average is evaluated over.
#[derive(Debug, Clone)]
pub enum EvaluationDomain {
    /// In-aperture neighborhood in local tangential coordinates, paired
    /// with the surface normals at those samples.
    Cloud {
        coords: Vec<Vector2<f64>>,
        normals: Vec<Vector3<f64>>,
    },
    /// Subdivided mesh patch clipped to the aperture.
    Patch(Mesh),
}

/// Computes the area of a bounded mesh patch.
///
/// Behind a trait so unit tests can exercise the scan without depending on
/// real mesh geometry.
pub trait MeshAreaService: Send + Sync {
    /// Area of the patch, or `None` when the patch cannot support one.
    fn patch_area(&self, patch: &Mesh) -> Option<f64>;
}

/// Production adapter: analytic triangle-area sum, exact for the mesh's
/// piecewise-linear surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriangleSumArea;

impl MeshAreaService for TriangleSumArea {
    fn patch_area(&self, patch: &Mesh) -> Option<f64> {
        if patch.is_empty() {
            return None;
        }
        let area = patch.surface_area();
        (area > 0.0).then_some(area)
    }
}

/// Deterministic test double: reports a fixed area for any patch.
#[derive(Debug, Clone, Copy)]
pub struct FixedArea(pub f64);

impl MeshAreaService for FixedArea {
    fn patch_area(&self, _patch: &Mesh) -> Option<f64> {
        Some(self.0)
    }
}

/// Estimate the area of the evaluation domain.
///
/// `bbox` is the aperture rectangle in local tangential coordinates; the
/// point-cloud path integrates the area element over it. `projected_area`
/// is the nominal fallback.
pub fn estimate_area(
    domain: &EvaluationDomain,
    bbox: Option<[f64; 4]>,
    projected_area: f64,
    service: &dyn MeshAreaService,
    params: &IntegrationParams,
) -> f64 {
    match domain {
        EvaluationDomain::Patch(patch) => service.patch_area(patch).unwrap_or_else(|| {
            warn!(
                target: "pspd::area",
                faces = patch.face_count(),
                "Mesh patch under the aperture has no usable area; \
                 falling back to the projected area"
            );
            projected_area
        }),
        EvaluationDomain::Cloud { coords, normals } => {
            let magnitudes: Vec<f64> = normals.iter().map(|n| n.norm()).collect();
            match integrate(coords, &magnitudes, bbox, params) {
                Ok(area) if area.is_finite() && area > 0.0 => area,
                Ok(area) => {
                    warn!(
                        target: "pspd::area",
                        area = area,
                        samples = coords.len(),
                        "Area-element integral is not positive; \
                         falling back to the projected area"
                    );
                    projected_area
                }
                Err(e) => {
                    warn!(
                        target: "pspd::area",
                        error = %e,
                        samples = coords.len(),
                        "Area-element integration failed; \
                         falling back to the projected area"
                    );
                    projected_area
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn unit_square_mesh() -> Mesh {
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
    fn test_mesh_patch_area_is_triangle_sum() {
        let domain = EvaluationDomain::Patch(unit_square_mesh());
        let area = estimate_area(
            &domain,
            None,
            0.5,
            &TriangleSumArea,
            &IntegrationParams::default(),
        );
        assert!((area - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_empty_patch_falls_back_to_projected() {
        let domain = EvaluationDomain::Patch(Mesh::new());
        let area = estimate_area(
            &domain,
            None,
            0.25,
            &TriangleSumArea,
            &IntegrationParams::default(),
        );
        assert!((area - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_cloud_area_of_flat_patch_matches_box() {
        // Unit normals on a flat patch: the area element is 1 everywhere,
        // so the integral equals the box area.
        let bbox = [0.0, 2.0, 0.0, 1.0];
        let mut coords = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                coords.push(Vector2::new(
                    2.0 * i as f64 / 3.0,
                    j as f64 / 3.0,
                ));
            }
        }
        let normals = vec![Vector3::new(0.0, 0.0, 1.0); coords.len()];
        let domain = EvaluationDomain::Cloud { coords, normals };

        let area = estimate_area(
            &domain,
            Some(bbox),
            0.1,
            &TriangleSumArea,
            &IntegrationParams::default(),
        );
        assert!((area - 2.0).abs() < 1e-3, "got {area}");
    }

    #[test]
    fn test_tilted_patch_has_larger_area() {
        // Area element 2.0 everywhere: a 60-degree tilt doubles the area.
        let bbox = [0.0, 1.0, 0.0, 1.0];
        let mut coords = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                coords.push(Vector2::new(i as f64 / 3.0, j as f64 / 3.0));
            }
        }
        let normals = vec![Vector3::new(0.0, 0.0, 2.0); coords.len()];
        let domain = EvaluationDomain::Cloud { coords, normals };

        let area = estimate_area(
            &domain,
            Some(bbox),
            0.1,
            &TriangleSumArea,
            &IntegrationParams::default(),
        );
        assert!((area - 2.0).abs() < 1e-3, "got {area}");
    }

    #[test]
    fn test_empty_cloud_falls_back_to_projected() {
        let domain = EvaluationDomain::Cloud {
            coords: Vec::new(),
            normals: Vec::new(),
        };
        let area = estimate_area(
            &domain,
            None,
            0.04,
            &TriangleSumArea,
            &IntegrationParams::default(),
        );
        assert!((area - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_area_double() {
        let domain = EvaluationDomain::Patch(unit_square_mesh());
        let area = estimate_area(
            &domain,
            None,
            0.5,
            &FixedArea(7.0),
            &IntegrationParams::default(),
        );
        assert!((area - 7.0).abs() < 1e-12);
    }
}
