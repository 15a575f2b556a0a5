//! Hidden-point removal via spherical flip and convex hull.
//!
//! Determines which points of a cloud are directly visible from a viewpoint
//! without reconstructing the surface (Katz et al., ACM TOG 26(3), 2007):
//! translate the viewpoint to the origin, reflect every point about a
//! sphere of radius `R = max(r) * 10^p`, and take the 3D convex hull of the
//! flipped set plus the origin. Hull vertices (minus the origin) are the
//! visible points.
//!
//! Larger `p` approximates true unoccluded visibility more closely; `p = 0`
//! degenerates to the convex hull of the raw cloud.

use nalgebra::Point3;
use tracing::debug;

use crate::error::{PspdError, PspdResult};
use crate::spatial::SpatialIndex;

/// Default exponent for the spherical-flip radius.
pub const DEFAULT_FLIP_EXPONENT: f64 = std::f64::consts::PI;

/// Return the indices of points directly visible from `viewpoint`,
/// in ascending order.
///
/// Points coincident with the viewpoint have no defined flip direction and
/// are excluded up front. Fails with `DegenerateGeometry` when the flipped
/// set admits no 3D convex hull (fewer than four points, or all coplanar).
pub fn remove_hidden_points(
    points: &[Point3<f64>],
    viewpoint: &Point3<f64>,
    flip_exponent: f64,
) -> PspdResult<Vec<usize>> {
    // Translate so the viewpoint is the origin; drop zero-radius points
    // before flipping to avoid dividing by zero.
    let mut kept: Vec<usize> = Vec::with_capacity(points.len());
    let mut translated = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        let d = p - viewpoint;
        let r = d.norm();
        if r > 0.0 {
            kept.push(i);
            translated.push((d, r));
        }
    }

    if translated.is_empty() {
        return Err(PspdError::degenerate(
            "no points distinct from the viewpoint",
        ));
    }

    let max_r = translated
        .iter()
        .map(|&(_, r)| r)
        .fold(f64::NEG_INFINITY, f64::max);
    let big_r = max_r * 10f64.powf(flip_exponent);

    // Spherical flip: x' = x + 2 (R - r) x / r.
    let mut flipped: Vec<Point3<f64>> = translated
        .iter()
        .map(|&(d, r)| Point3::from(d + 2.0 * (big_r - r) * (d / r)))
        .collect();

    let origin_slot = flipped.len();
    flipped.push(Point3::origin());

    let (hull_vertices, _) = parry3d_f64::transformation::try_convex_hull(&flipped)
        .map_err(|e| PspdError::degenerate(format!("convex hull failed: {e:?}")))?;

    // Map hull vertices back to cloud indices by nearest flipped point;
    // the hull may renormalize coordinates, so exact matching is not an
    // option. Coincident flipped points collapse onto one index.
    let lookup = SpatialIndex::build(&flipped);
    let mut visible: Vec<usize> = hull_vertices
        .iter()
        .filter_map(|v| {
            let slot = *lookup.k_query(v, 1).first()?;
            (slot != origin_slot).then(|| kept[slot])
        })
        .collect();
    visible.sort_unstable();
    visible.dedup();

    debug!(
        target: "pspd::visibility",
        total = points.len(),
        visible = visible.len(),
        flip_exponent = flip_exponent,
        "Hidden point removal"
    );

    Ok(visible)
}
