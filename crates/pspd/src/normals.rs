//! Surface normal estimation from local polynomial height fits.
//!
//! For every cloud point, the estimator gathers the k nearest neighbors,
//! builds a principal-component frame, fits a 2D polynomial height function
//! `z = f(u, v)` by (optionally kernel-weighted) least squares, and takes
//! the analytic gradient at the query point:
//!
//! ```text
//! n = basis * (-df/du, -df/dv, 1)
//! ```
//!
//! Non-unit normals carry the local area element `sqrt(1 + f_u^2 + f_v^2)`
//! in their magnitude, which the surface-area estimator integrates when no
//! mesh is available. Sign consistency across the cloud is a separate pass,
//! [`orient_normals`], which propagates orientation over a Riemannian
//! neighbor graph (Hoppe et al., SIGGRAPH 1992).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector, Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{PspdError, PspdResult};
use crate::frame::LocalFrame;
use crate::spatial::SpatialIndex;

/// Supported kernel names, for error messages and docs.
pub const KERNEL_NAMES: &str = "linear, truncated, inverse, gaussian, multiquadric, \
     inverse-quadric, inverse-multiquadric, thin-plate-spline, rbf, cosine";

/// Distance kernel weighting neighbors in the moving-least-squares fit.
///
/// Each kernel is a closed-form function of the Euclidean distance between
/// the query point and a neighbor, scaled by `gamma`. `Cosine` is the odd
/// one out: it compares the directions of the two position vectors instead
/// of their separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightKernel {
    /// `max(1 - gamma * d, 0)`
    Linear,
    /// `max(1 - gamma * d^2, 0)`
    Truncated,
    /// `1 / (d + eps)^gamma`
    Inverse,
    /// `exp(-(gamma * d)^2)`
    Gaussian,
    /// `sqrt(1 + (gamma * d)^2)`
    Multiquadric,
    /// `1 / (1 + (gamma * d)^2)`
    InverseQuadric,
    /// `1 / sqrt(1 + (gamma * d)^2)`
    InverseMultiquadric,
    /// `d^2 * ln(d)`
    ThinPlateSpline,
    /// `exp(-d^2 / (2 * gamma^2))`
    Rbf,
    /// Direction cosine between the two position vectors.
    Cosine,
}

impl FromStr for WeightKernel {
    type Err = PspdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "linear" => Ok(WeightKernel::Linear),
            "truncated" => Ok(WeightKernel::Truncated),
            "inverse" => Ok(WeightKernel::Inverse),
            "gaussian" => Ok(WeightKernel::Gaussian),
            "multiquadric" => Ok(WeightKernel::Multiquadric),
            "inverse-quadric" => Ok(WeightKernel::InverseQuadric),
            "inverse-multiquadric" => Ok(WeightKernel::InverseMultiquadric),
            "thin-plate-spline" => Ok(WeightKernel::ThinPlateSpline),
            "rbf" => Ok(WeightKernel::Rbf),
            "cosine" => Ok(WeightKernel::Cosine),
            _ => Err(PspdError::UnsupportedMethod {
                name: s.to_string(),
                supported: KERNEL_NAMES,
            }),
        }
    }
}

impl WeightKernel {
    /// Evaluate the kernel for a query point and one neighbor.
    pub fn weight(&self, query: &Point3<f64>, neighbor: &Point3<f64>, gamma: f64) -> f64 {
        let d = (neighbor - query).norm();
        match self {
            WeightKernel::Linear => (1.0 - gamma * d).max(0.0),
            WeightKernel::Truncated => (1.0 - gamma * d * d).max(0.0),
            WeightKernel::Inverse => 1.0 / (d + 1e-12).powf(gamma),
            WeightKernel::Gaussian => (-(gamma * d).powi(2)).exp(),
            WeightKernel::Multiquadric => (1.0 + (gamma * d).powi(2)).sqrt(),
            WeightKernel::InverseQuadric => 1.0 / (1.0 + (gamma * d).powi(2)),
            WeightKernel::InverseMultiquadric => 1.0 / (1.0 + (gamma * d).powi(2)).sqrt(),
            WeightKernel::ThinPlateSpline => {
                if d <= 1e-12 {
                    0.0
                } else {
                    d * d * d.ln()
                }
            }
            WeightKernel::Rbf => (-d * d / (2.0 * gamma * gamma)).exp(),
            WeightKernel::Cosine => {
                let np = neighbor.coords.norm() * query.coords.norm();
                if np <= f64::MIN_POSITIVE {
                    0.0
                } else {
                    neighbor.coords.dot(&query.coords) / np
                }
            }
        }
    }
}

/// Parameters for normal estimation.
#[derive(Debug, Clone)]
pub struct NormalParams {
    /// Neighborhood size. `None` derives `clamp(round(2 ln N), 5, 30)`.
    pub k: Option<usize>,
    /// Degree of the polynomial height function per axis. Default: 1.
    pub degree: usize,
    /// Normalize the result to unit length. Default: true.
    pub unit: bool,
    /// Optional distance kernel for the weighted fit.
    pub kernel: Option<WeightKernel>,
    /// Kernel scale parameter. Default: 1.0.
    pub gamma: f64,
    /// Propagate a globally consistent sign after estimation.
    pub orient: bool,
}

impl Default for NormalParams {
    fn default() -> Self {
        Self {
            k: None,
            degree: 1,
            unit: true,
            kernel: None,
            gamma: 1.0,
            orient: false,
        }
    }
}

impl NormalParams {
    /// Params producing oriented, non-unit normals whose magnitude carries
    /// the local area element. This is what the engine needs for surface
    /// area estimation over a bare point cloud.
    pub fn for_surface_area() -> Self {
        Self {
            unit: false,
            orient: true,
            ..Default::default()
        }
    }

    /// Set an explicit neighborhood size.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Set a weighting kernel and its scale.
    pub fn with_kernel(mut self, kernel: WeightKernel, gamma: f64) -> Self {
        self.kernel = Some(kernel);
        self.gamma = gamma;
        self
    }
}

/// Default neighborhood size for a cloud of `n` points.
pub fn default_k(n: usize) -> usize {
    let k = (2.0 * (n as f64).ln()).round() as usize;
    k.clamp(5, 30)
}

/// Estimate a normal per point using the production orientation adapter.
pub fn estimate_normals(
    points: &[Point3<f64>],
    params: &NormalParams,
) -> PspdResult<Vec<Vector3<f64>>> {
    estimate_normals_with(points, params, &TangentPlanePropagation)
}

/// Estimate a normal per point, orienting through the supplied service.
pub fn estimate_normals_with(
    points: &[Point3<f64>],
    params: &NormalParams,
    orienter: &dyn NormalOrientationService,
) -> PspdResult<Vec<Vector3<f64>>> {
    let n = points.len();
    let k = params.k.unwrap_or_else(|| default_k(n)).min(n);
    let terms = (params.degree + 1) * (params.degree + 1);
    if k < terms {
        return Err(PspdError::degenerate(format!(
            "{k} neighbors cannot determine a degree-{} fit ({terms} coefficients)",
            params.degree
        )));
    }

    debug!(
        target: "pspd::normals",
        points = n,
        k = k,
        degree = params.degree,
        "Estimating normals"
    );

    let index = SpatialIndex::build(points);

    let mut normals: Vec<Vector3<f64>> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let idx = index.k_query(p, k);
            let nbhd: Vec<Point3<f64>> = idx.iter().map(|&j| points[j]).collect();

            let frame = LocalFrame::fit(&nbhd);
            if frame.is_rank_deficient() {
                return Err(PspdError::degenerate(format!(
                    "neighborhood of point {i} is collinear or duplicated"
                )));
            }

            let local: Vec<Vector3<f64>> = nbhd.iter().map(|q| frame.project(q)).collect();
            let weights: Vec<f64> = match params.kernel {
                Some(kernel) => nbhd
                    .iter()
                    .map(|q| kernel.weight(p, q, params.gamma))
                    .collect(),
                None => vec![1.0; nbhd.len()],
            };

            let coeffs = polyfit2d(&local, &weights, params.degree)?;

            // Analytic gradient of the height function at the query's own
            // tangential coordinates.
            let pt = frame.project(p);
            let (fu, fv) = poly_gradient(&coeffs, pt.x, pt.y);

            let mut normal = frame.unproject(&Vector3::new(-fu, -fv, 1.0));
            if params.unit {
                normal /= normal.norm();
            }
            Ok(normal)
        })
        .collect::<PspdResult<Vec<_>>>()?;

    if params.orient {
        orienter.orient(points, &mut normals, k);
    }

    Ok(normals)
}

/// Weighted least-squares fit of a tensor-product polynomial height
/// function to local coordinates `(u, v, z)`.
///
/// Returns the coefficient matrix `c` with `c[(j, k)]` multiplying
/// `u^j * v^k`. Singular values below `m * eps` relative to the largest are
/// discarded, mirroring the conventional relative condition of the fit.
fn polyfit2d(
    local: &[Vector3<f64>],
    weights: &[f64],
    degree: usize,
) -> PspdResult<DMatrix<f64>> {
    let m = local.len();
    let d1 = degree + 1;
    let terms = d1 * d1;
    if m < terms {
        return Err(PspdError::degenerate(format!(
            "{m} samples cannot determine a degree-{degree} fit ({terms} coefficients)"
        )));
    }

    let mut a = DMatrix::zeros(m, terms);
    let mut b = DVector::zeros(m);
    for (row, (q, &w)) in local.iter().zip(weights).enumerate() {
        let mut u_pow = 1.0;
        for j in 0..d1 {
            let mut v_pow = 1.0;
            for k in 0..d1 {
                a[(row, j * d1 + k)] = w * u_pow * v_pow;
                v_pow *= q.y;
            }
            u_pow *= q.x;
        }
        b[row] = w * q.z;
    }

    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.max();
    let eps = max_sv * m as f64 * f64::EPSILON;
    let coef = svd
        .solve(&b, eps)
        .map_err(|_| PspdError::degenerate("height-function fit did not converge"))?;

    Ok(DMatrix::from_fn(d1, d1, |j, k| coef[j * d1 + k]))
}

/// Analytic partial derivatives of the fitted height function at `(u, v)`.
fn poly_gradient(coeffs: &DMatrix<f64>, u: f64, v: f64) -> (f64, f64) {
    let d1 = coeffs.nrows();
    let mut fu = 0.0;
    let mut fv = 0.0;
    for j in 0..d1 {
        for k in 0..d1 {
            let c = coeffs[(j, k)];
            if j > 0 {
                fu += c * j as f64 * u.powi(j as i32 - 1) * v.powi(k as i32);
            }
            if k > 0 {
                fv += c * k as f64 * u.powi(j as i32) * v.powi(k as i32 - 1);
            }
        }
    }
    (fu, fv)
}

// ============================================================================
// Orientation
// ============================================================================

/// Makes per-point normal signs globally consistent.
///
/// Implementations may only flip signs: output normals differ from input
/// normals by a factor of -1 or not at all.
pub trait NormalOrientationService: Send + Sync {
    /// Orient `normals` in place over the k-nearest-neighbor graph of
    /// `points`.
    fn orient(&self, points: &[Point3<f64>], normals: &mut [Vector3<f64>], k: usize);
}

/// Production orientation: consistent-tangent-plane propagation.
///
/// Builds the Riemannian k-NN graph, takes a minimum spanning tree with
/// edge cost `1 - |n_i . n_j|`, roots each connected component at its
/// highest point with that normal forced upward, and flips normals along
/// tree edges so neighboring normals agree (Hoppe et al., 1992).
#[derive(Debug, Clone, Copy, Default)]
pub struct TangentPlanePropagation;

impl NormalOrientationService for TangentPlanePropagation {
    fn orient(&self, points: &[Point3<f64>], normals: &mut [Vector3<f64>], k: usize) {
        let n = points.len();
        if n == 0 {
            return;
        }
        let k = k.min(n);

        let index = SpatialIndex::build(points);
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, p) in points.iter().enumerate() {
            for j in index.k_query(p, k + 1) {
                if j != i {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }

        let unit: Vec<Vector3<f64>> = normals
            .iter()
            .map(|v| {
                let norm = v.norm();
                if norm > f64::MIN_POSITIVE {
                    v / norm
                } else {
                    Vector3::zeros()
                }
            })
            .collect();

        let mut visited = vec![false; n];
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| points[b].z.total_cmp(&points[a].z));

        for &seed in &order {
            if visited[seed] {
                continue;
            }
            // Root of this component: force the normal upward.
            if normals[seed].z < 0.0 {
                normals[seed] = -normals[seed];
            }
            visited[seed] = true;

            // Prim's algorithm over the Riemannian graph; propagation edge
            // by edge keeps neighboring normals on the same side.
            let mut heap: BinaryHeap<Reverse<MstEdge>> = BinaryHeap::new();
            push_edges(&mut heap, seed, &adjacency, &unit);

            while let Some(Reverse(edge)) = heap.pop() {
                if visited[edge.to] {
                    continue;
                }
                visited[edge.to] = true;

                let aligned = {
                    let sign_from = if normals[edge.from].dot(&unit[edge.from]) < 0.0 {
                        -1.0
                    } else {
                        1.0
                    };
                    sign_from * unit[edge.from].dot(&unit[edge.to])
                };
                if aligned < 0.0 {
                    normals[edge.to] = -normals[edge.to];
                }

                push_edges(&mut heap, edge.to, &adjacency, &unit);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MstEdge {
    cost: f64,
    from: usize,
    to: usize,
}

impl Eq for MstEdge {}

impl Ord for MstEdge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.from.cmp(&other.from))
            .then_with(|| self.to.cmp(&other.to))
    }
}

impl PartialOrd for MstEdge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn push_edges(
    heap: &mut BinaryHeap<Reverse<MstEdge>>,
    from: usize,
    adjacency: &[Vec<usize>],
    unit: &[Vector3<f64>],
) {
    for &to in &adjacency[from] {
        let cost = 1.0 - unit[from].dot(&unit[to]).abs();
        heap.push(Reverse(MstEdge { cost, from, to }));
    }
}

/// Deterministic test double: flips every normal into the upper hemisphere.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpwardOrientation;

impl NormalOrientationService for UpwardOrientation {
    fn orient(&self, _points: &[Point3<f64>], normals: &mut [Vector3<f64>], _k: usize) {
        for n in normals.iter_mut() {
            if n.z < 0.0 {
                *n = -*n;
            }
        }
    }
}

/// Orient normals with the production propagation adapter.
///
/// Returns a copy; magnitudes and directions-up-to-sign are preserved.
pub fn orient_normals(
    points: &[Point3<f64>],
    normals: &[Vector3<f64>],
    k: usize,
) -> Vec<Vector3<f64>> {
    let mut oriented = normals.to_vec();
    TangentPlanePropagation.orient(points, &mut oriented, k);
    oriented
}
