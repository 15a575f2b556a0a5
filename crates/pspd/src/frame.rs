//! Local orthonormal frames from neighborhood covariance.
//!
//! Each scan iteration projects its neighborhood into a basis aligned with
//! the local surface: the two dominant-variance directions span the
//! tangential plane, the least-variance direction is the local height axis.
//! The basis comes from the eigendecomposition of the neighborhood scatter
//! matrix, so the sign of each axis is arbitrary; nothing downstream may
//! depend on it.

use nalgebra::{Matrix3, Point3, Vector3};

/// An orthonormal basis and centroid for one neighborhood.
///
/// Columns of `basis` are ordered by descending variance: tangential-u,
/// tangential-v, height. Valid for a single scan iteration.
#[derive(Debug, Clone)]
pub struct LocalFrame {
    /// Orthonormal basis, one principal direction per column.
    pub basis: Matrix3<f64>,
    /// Neighborhood centroid; the origin of the local frame.
    pub centroid: Point3<f64>,
    /// Scatter eigenvalues in descending order.
    pub eigenvalues: Vector3<f64>,
}

impl LocalFrame {
    /// Fit a frame to a neighborhood.
    ///
    /// A fully degenerate neighborhood (empty, or a single repeated point)
    /// yields the identity basis centered at the centroid, matching the
    /// behavior of an eigendecomposition of the zero matrix. Use
    /// [`LocalFrame::is_rank_deficient`] when the caller requires a
    /// well-defined tangent plane.
    pub fn fit(points: &[Point3<f64>]) -> Self {
        if points.is_empty() {
            return Self {
                basis: Matrix3::identity(),
                centroid: Point3::origin(),
                eigenvalues: Vector3::zeros(),
            };
        }

        let centroid: Vector3<f64> = points
            .iter()
            .map(|p| p.coords)
            .fold(Vector3::zeros(), |acc, v| acc + v)
            / points.len() as f64;

        let mut scatter = Matrix3::zeros();
        for p in points {
            let d = p.coords - centroid;
            scatter += d * d.transpose();
        }

        let eig = scatter.symmetric_eigen();

        // Order principal directions by descending variance.
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

        let mut basis = Matrix3::zeros();
        let mut eigenvalues = Vector3::zeros();
        for (col, &src) in order.iter().enumerate() {
            basis.set_column(col, &eig.eigenvectors.column(src).into_owned());
            eigenvalues[col] = eig.eigenvalues[src];
        }

        Self {
            basis,
            centroid: Point3::from(centroid),
            eigenvalues,
        }
    }

    /// Project a world-space point into the local frame.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.basis.transpose() * (p - self.centroid)
    }

    /// Rotate a local-frame vector back into world space.
    #[inline]
    pub fn unproject(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.basis * v
    }

    /// True when the neighborhood cannot define a tangent plane.
    ///
    /// Collinear neighborhoods have a vanishing second eigenvalue; duplicate
    /// point sets have a vanishing first.
    pub fn is_rank_deficient(&self) -> bool {
        const REL_TOL: f64 = 1e-12;
        let largest = self.eigenvalues[0];
        largest <= f64::MIN_POSITIVE || self.eigenvalues[1] <= REL_TOL * largest
    }
}
