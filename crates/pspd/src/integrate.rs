//! Bivariate surface fitting and double integration over scattered samples.
//!
//! The spatial average needs the double integral of a field that is only
//! known at scattered 2D sample locations. The integrator fits a smoothing
//! bivariate surface (a least-squares tensor-product polynomial over
//! bounding-box-normalized coordinates, with a small Tikhonov term on the
//! non-constant coefficients) and integrates it over the box either in
//! closed form or by adaptive quadrature.
//!
//! Both methods integrate the same freshly fitted surface; they must agree
//! to quadrature tolerance.

use std::str::FromStr;

use nalgebra::{DMatrix, DVector, Vector2};

use crate::error::{PspdError, PspdResult};

/// Supported method names, for error messages and docs.
pub const METHOD_NAMES: &str = "closed-form, quadrature";

/// How the fitted surface is integrated over the bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// Exact double integral of the fitted polynomial (fast; default).
    #[default]
    ClosedForm,
    /// Nested adaptive Simpson quadrature evaluating the fitted surface.
    /// Slower; useful as a cross-check of the closed form.
    Quadrature,
}

impl FromStr for IntegrationMethod {
    type Err = PspdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "closed-form" => Ok(IntegrationMethod::ClosedForm),
            "quadrature" | "gauss" => Ok(IntegrationMethod::Quadrature),
            _ => Err(PspdError::UnsupportedMethod {
                name: s.to_string(),
                supported: METHOD_NAMES,
            }),
        }
    }
}

/// Degree selection for the fitted surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitDegree {
    /// Use the largest degree `d <= max` with `(d+1)^2` coefficients
    /// determined by the sample count. Sparse apertures degrade to
    /// low-order fits instead of failing.
    Auto(usize),
    /// Require exactly this degree; insufficient samples fail with
    /// `DegenerateGeometry`.
    Exact(usize),
}

impl Default for FitDegree {
    fn default() -> Self {
        FitDegree::Auto(3)
    }
}

/// Parameters for surface fitting and integration.
#[derive(Debug, Clone)]
pub struct IntegrationParams {
    /// Integration method. Default: closed form.
    pub method: IntegrationMethod,
    /// Polynomial degree per axis. Default: `Auto(3)`.
    pub degree: FitDegree,
    /// Tikhonov weight on non-constant coefficients. Constants are always
    /// reproduced exactly. Default: 1e-6.
    pub smoothing: f64,
    /// Absolute tolerance of the quadrature method. Default: 1e-9.
    pub tolerance: f64,
}

impl Default for IntegrationParams {
    fn default() -> Self {
        Self {
            method: IntegrationMethod::default(),
            degree: FitDegree::default(),
            smoothing: 1e-6,
            tolerance: 1e-9,
        }
    }
}

impl IntegrationParams {
    /// Params using the quadrature method.
    pub fn quadrature() -> Self {
        Self {
            method: IntegrationMethod::Quadrature,
            ..Default::default()
        }
    }
}

/// A smoothing bivariate surface fitted to scattered samples.
///
/// Coordinates are normalized to `[-1, 1]` over the bounding box before the
/// Vandermonde expansion; `coeffs[(j, k)]` multiplies `t^j * s^k` in
/// normalized coordinates.
#[derive(Debug, Clone)]
pub struct FittedSurface {
    coeffs: DMatrix<f64>,
    bbox: [f64; 4],
}

impl FittedSurface {
    /// Fit a surface through scattered `(x, y) -> value` samples.
    ///
    /// `bbox` is `[xmin, xmax, ymin, ymax]` and defaults to the samples'
    /// own bounding rectangle.
    pub fn fit(
        points: &[Vector2<f64>],
        values: &[f64],
        bbox: Option<[f64; 4]>,
        params: &IntegrationParams,
    ) -> PspdResult<Self> {
        let m = points.len();
        if m == 0 {
            return Err(PspdError::degenerate("no samples to fit a surface to"));
        }
        if values.len() != m {
            return Err(PspdError::FieldLengthMismatch {
                what: "integrand samples",
                expected: m,
                actual: values.len(),
            });
        }

        let bbox = bbox.unwrap_or_else(|| {
            let (mut x0, mut x1, mut y0, mut y1) =
                (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
            for p in points {
                x0 = x0.min(p.x);
                x1 = x1.max(p.x);
                y0 = y0.min(p.y);
                y1 = y1.max(p.y);
            }
            [x0, x1, y0, y1]
        });

        let degree = match params.degree {
            FitDegree::Auto(max) => {
                let mut d = 0;
                while d < max && (d + 2) * (d + 2) <= m {
                    d += 1;
                }
                d
            }
            FitDegree::Exact(d) => {
                if (d + 1) * (d + 1) > m {
                    return Err(PspdError::degenerate(format!(
                        "{m} samples cannot determine a degree-{d} surface \
                         ({} coefficients)",
                        (d + 1) * (d + 1)
                    )));
                }
                d
            }
        };

        let d1 = degree + 1;
        let terms = d1 * d1;

        // Rows: one per sample, then one Tikhonov row per non-constant
        // coefficient so sparse neighborhoods stay well-posed while
        // constants pass through untouched.
        let ridge_rows = terms - 1;
        let mut a = DMatrix::zeros(m + ridge_rows, terms);
        let mut b = DVector::zeros(m + ridge_rows);

        for (row, (p, &z)) in points.iter().zip(values).enumerate() {
            let (t, s) = normalize(p.x, p.y, &bbox);
            let mut t_pow = 1.0;
            for j in 0..d1 {
                let mut s_pow = 1.0;
                for k in 0..d1 {
                    a[(row, j * d1 + k)] = t_pow * s_pow;
                    s_pow *= s;
                }
                t_pow *= t;
            }
            b[row] = z;
        }
        for c in 1..terms {
            a[(m + c - 1, c)] = params.smoothing;
        }

        let svd = a.svd(true, true);
        let max_sv = svd.singular_values.max();
        let eps = max_sv * m as f64 * f64::EPSILON;
        let coef = svd
            .solve(&b, eps)
            .map_err(|_| PspdError::degenerate("surface fit did not converge"))?;

        Ok(Self {
            coeffs: DMatrix::from_fn(d1, d1, |j, k| coef[j * d1 + k]),
            bbox,
        })
    }

    /// The integration domain `[xmin, xmax, ymin, ymax]`.
    pub fn bbox(&self) -> [f64; 4] {
        self.bbox
    }

    /// Evaluate the fitted surface at `(x, y)`.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let (t, s) = normalize(x, y, &self.bbox);
        let d1 = self.coeffs.nrows();

        // Horner in t of Horner-in-s rows.
        let mut acc = 0.0;
        for j in (0..d1).rev() {
            let mut row = 0.0;
            for k in (0..d1).rev() {
                row = row * s + self.coeffs[(j, k)];
            }
            acc = acc * t + row;
        }
        acc
    }

    /// Exact double integral of the fitted polynomial over the box.
    ///
    /// In normalized coordinates odd monomials vanish and even ones
    /// integrate to `2/(n+1)`; the box half-widths supply the Jacobian.
    pub fn integral(&self) -> f64 {
        let [x0, x1, y0, y1] = self.bbox;
        let hx = (x1 - x0) / 2.0;
        let hy = (y1 - y0) / 2.0;

        let d1 = self.coeffs.nrows();
        let mut sum = 0.0;
        for j in (0..d1).step_by(2) {
            for k in (0..d1).step_by(2) {
                sum += self.coeffs[(j, k)] * (2.0 / (j as f64 + 1.0)) * (2.0 / (k as f64 + 1.0));
            }
        }
        sum * hx * hy
    }

    /// Double integral by nested adaptive Simpson quadrature of the fitted
    /// surface.
    pub fn integral_quadrature(&self, tolerance: f64) -> f64 {
        let [x0, x1, y0, y1] = self.bbox;
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }
        let inner_tol = tolerance / (x1 - x0).max(1.0);
        let g = |x: f64| adaptive_simpson(&|y| self.evaluate(x, y), y0, y1, inner_tol);
        adaptive_simpson(&g, x0, x1, tolerance)
    }
}

#[inline]
fn normalize(x: f64, y: f64, bbox: &[f64; 4]) -> (f64, f64) {
    let hx = (bbox[1] - bbox[0]) / 2.0;
    let hy = (bbox[3] - bbox[2]) / 2.0;
    let cx = (bbox[1] + bbox[0]) / 2.0;
    let cy = (bbox[3] + bbox[2]) / 2.0;
    let t = if hx > 0.0 { (x - cx) / hx } else { 0.0 };
    let s = if hy > 0.0 { (y - cy) / hy } else { 0.0 };
    (t, s)
}

/// Fit a smoothing surface to the samples and integrate it over the box.
///
/// This is the one-call form used by the scan: fit, then integrate with
/// the configured method.
pub fn integrate(
    points: &[Vector2<f64>],
    values: &[f64],
    bbox: Option<[f64; 4]>,
    params: &IntegrationParams,
) -> PspdResult<f64> {
    let surface = FittedSurface::fit(points, values, bbox, params)?;
    Ok(match params.method {
        IntegrationMethod::ClosedForm => surface.integral(),
        IntegrationMethod::Quadrature => surface.integral_quadrature(params.tolerance),
    })
}

/// Adaptive Simpson quadrature with interval bisection.
fn adaptive_simpson(f: &dyn Fn(f64) -> f64, a: f64, b: f64, tolerance: f64) -> f64 {
    let fa = f(a);
    let fb = f(b);
    let m = (a + b) / 2.0;
    let fm = f(m);
    let whole = simpson(a, b, fa, fm, fb);
    simpson_step(f, a, b, fa, fm, fb, whole, tolerance, 20)
}

#[inline]
fn simpson(a: f64, b: f64, fa: f64, fm: f64, fb: f64) -> f64 {
    (b - a) / 6.0 * (fa + 4.0 * fm + fb)
}

#[allow(clippy::too_many_arguments)]
fn simpson_step(
    f: &dyn Fn(f64) -> f64,
    a: f64,
    b: f64,
    fa: f64,
    fm: f64,
    fb: f64,
    whole: f64,
    tolerance: f64,
    depth: u32,
) -> f64 {
    let m = (a + b) / 2.0;
    let lm = (a + m) / 2.0;
    let rm = (m + b) / 2.0;
    let flm = f(lm);
    let frm = f(rm);
    let left = simpson(a, m, fa, flm, fm);
    let right = simpson(m, b, fm, frm, fb);
    let delta = left + right - whole;

    if depth == 0 || delta.abs() <= 15.0 * tolerance {
        left + right + delta / 15.0
    } else {
        simpson_step(f, a, m, fa, flm, fm, left, tolerance / 2.0, depth - 1)
            + simpson_step(f, m, b, fm, frm, fb, right, tolerance / 2.0, depth - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Regular grid over [x0,x1] x [y0,y1].
    fn grid(n: usize, bbox: [f64; 4]) -> Vec<Vector2<f64>> {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let x = bbox[0] + (bbox[1] - bbox[0]) * i as f64 / (n - 1) as f64;
                let y = bbox[2] + (bbox[3] - bbox[2]) * j as f64 / (n - 1) as f64;
                points.push(Vector2::new(x, y));
            }
        }
        points
    }

    #[test]
    fn test_constant_over_2x2_box() {
        let bbox = [-1.0, 1.0, -1.0, 1.0];
        let points = grid(5, bbox);
        let values = vec![1.0; points.len()];

        let result =
            integrate(&points, &values, Some(bbox), &IntegrationParams::default()).unwrap();
        assert!((result - 4.0).abs() < 1e-3, "got {result}");
    }

    #[test]
    fn test_quadratic_matches_analytic_integral() {
        // f(x, y) = x^2 + x*y + 2 over [0,2] x [0,1]:
        // integral = 8/3 + 1 + 4 = 7.6666...
        let bbox = [0.0, 2.0, 0.0, 1.0];
        let points = grid(6, bbox);
        let values: Vec<f64> = points.iter().map(|p| p.x * p.x + p.x * p.y + 2.0).collect();

        let result =
            integrate(&points, &values, Some(bbox), &IntegrationParams::default()).unwrap();
        let analytic = 8.0 / 3.0 + 1.0 + 4.0;
        assert!((result - analytic).abs() < 1e-3, "got {result}");
    }

    #[test]
    fn test_quadrature_agrees_with_closed_form() {
        let bbox = [0.0, 1.0, 0.0, 1.0];
        let points = grid(5, bbox);
        let values: Vec<f64> = points.iter().map(|p| 1.0 + p.x * p.y).collect();

        let surface =
            FittedSurface::fit(&points, &values, Some(bbox), &IntegrationParams::default())
                .unwrap();
        let closed = surface.integral();
        let quad = surface.integral_quadrature(1e-9);
        assert!((closed - quad).abs() < 1e-6, "closed {closed}, quad {quad}");
    }

    #[test]
    fn test_single_sample_degrades_to_constant() {
        let bbox = [0.0, 0.1, 0.0, 0.1];
        let points = vec![Vector2::new(0.05, 0.05)];
        let values = vec![10.0];

        let result =
            integrate(&points, &values, Some(bbox), &IntegrationParams::default()).unwrap();
        assert!((result - 10.0 * 0.01).abs() < 1e-6, "got {result}");
    }

    #[test]
    fn test_default_bbox_is_sample_bounds() {
        let points = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(2.0, 0.0),
            Vector2::new(0.0, 3.0),
            Vector2::new(2.0, 3.0),
        ];
        let values = vec![1.0; 4];
        let surface =
            FittedSurface::fit(&points, &values, None, &IntegrationParams::default()).unwrap();
        assert_eq!(surface.bbox(), [0.0, 2.0, 0.0, 3.0]);
        assert!((surface.integral() - 6.0).abs() < 1e-3);
    }

    #[test]
    fn test_exact_degree_requires_samples() {
        let points = vec![Vector2::new(0.0, 0.0), Vector2::new(1.0, 1.0)];
        let values = vec![1.0, 2.0];
        let params = IntegrationParams {
            degree: FitDegree::Exact(3),
            ..Default::default()
        };
        let err = integrate(&points, &values, None, &params).unwrap_err();
        assert!(err.is_degenerate_geometry());
    }

    #[test]
    fn test_empty_samples_fail() {
        let err = integrate(&[], &[], None, &IntegrationParams::default()).unwrap_err();
        assert!(err.is_degenerate_geometry());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(
            "closed-form".parse::<IntegrationMethod>().unwrap(),
            IntegrationMethod::ClosedForm
        );
        assert_eq!(
            "gauss".parse::<IntegrationMethod>().unwrap(),
            IntegrationMethod::Quadrature
        );
        let err = "monte-carlo".parse::<IntegrationMethod>().unwrap_err();
        assert!(matches!(err, PspdError::UnsupportedMethod { .. }));
    }
}
