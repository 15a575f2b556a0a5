//! End-to-end tests composing the full pipeline.

use nalgebra::{Point3, Vector3};
use pspd::{
    DEFAULT_FLIP_EXPONENT, EngineOptions, FieldSamples, FindParams, IntegrationMethod,
    NormalParams, PspdEngine, PspdError, WeightKernel, remove_hidden_points,
};

/// Deterministic quasi-uniform sampling of the unit sphere.
fn fibonacci_sphere(n: usize) -> Vec<Point3<f64>> {
    let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).sqrt();
            let theta = golden * i as f64;
            Point3::new(r * theta.cos(), r * theta.sin(), z)
        })
        .collect()
}

fn plane_grid(n: usize, spacing: f64) -> Vec<Point3<f64>> {
    let mut points = Vec::new();
    for i in 0..n {
        for j in 0..n {
            points.push(Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0));
        }
    }
    points
}

// ============================================================================
// Sphere end-to-end
// ============================================================================

#[test]
fn sphere_constant_field_peak_near_field_value() {
    let points = fibonacci_sphere(1000);
    let n = points.len();
    let field = FieldSamples::Scalar(vec![10.0; n]);

    let mut engine = PspdEngine::new(points, field, EngineOptions::default()).unwrap();
    engine.find(&FindParams::new(0.01)).unwrap();

    let results = engine.results().unwrap();
    assert_eq!(results.len(), n, "one record per visible point");

    for (i, &area) in results.areas.iter().enumerate() {
        assert!(area > 0.0, "record {i} has non-positive area {area}");
        assert!(area.is_finite());
    }

    let peak = engine.peak().unwrap();
    assert!(
        (peak.spatial_average - 10.0).abs() / 10.0 < 0.05,
        "peak {} not within 5% of 10.0",
        peak.spatial_average
    );
    assert_eq!(engine.degenerate_count().unwrap(), 0);
}

#[test]
fn sphere_peak_equals_max_of_full_results() {
    let points = fibonacci_sphere(300);
    let field = FieldSamples::Scalar(vec![10.0; 300]);

    let mut engine = PspdEngine::new(points, field, EngineOptions::default()).unwrap();
    engine.find(&FindParams::new(0.05)).unwrap();

    let results = engine.results().unwrap();
    let max = results
        .averages
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let peak = engine.peak().unwrap();

    assert!((peak.spatial_average - max).abs() < 1e-12);
    assert!((results.averages[peak.index] - peak.spatial_average).abs() < 1e-12);
}

#[test]
fn sphere_scan_with_viewpoint_restricts_to_visible() {
    let points = fibonacci_sphere(500);
    let n = points.len();
    let field = FieldSamples::Scalar(vec![10.0; n]);

    let mut engine = PspdEngine::new(points.clone(), field, EngineOptions::default()).unwrap();
    // The smallest flip radius is the conservative end of the scale; with a
    // cloud this sparse it is the one that meaningfully culls the far side.
    let params = FindParams::new(0.05)
        .with_viewpoint(Point3::new(0.0, 0.0, 3.0))
        .with_flip_exponent(0.0);
    engine.find(&params).unwrap();

    let (indices, subset) = engine.points(false).unwrap();
    assert!(!indices.is_empty());
    assert!(indices.len() < n, "some far-side points must be hidden");
    assert_eq!(subset.len(), indices.len());
    assert_eq!(engine.results().unwrap().len(), indices.len());

    // Visible points skew toward the viewpoint side of the sphere.
    let mean_z: f64 =
        subset.iter().map(|p| p.z).sum::<f64>() / subset.len() as f64;
    assert!(mean_z > 0.0, "visible hemisphere should face the viewpoint");

    let (_, full) = engine.points(true).unwrap();
    assert_eq!(full.len(), n);
}

// ============================================================================
// Hidden-point removal properties
// ============================================================================

#[test]
fn hidden_point_removal_output_is_subset() {
    let points = fibonacci_sphere(400);
    let viewpoint = Point3::new(0.0, 0.0, 4.0);

    let visible =
        remove_hidden_points(&points, &viewpoint, DEFAULT_FLIP_EXPONENT).unwrap();
    assert!(!visible.is_empty());
    assert!(visible.len() <= points.len());
    for window in visible.windows(2) {
        assert!(window[0] < window[1], "indices must be strictly ascending");
    }
    for &i in &visible {
        assert!(i < points.len());
    }
}

#[test]
fn hidden_point_removal_zero_exponent_culls_the_far_side() {
    let points = fibonacci_sphere(200);
    let viewpoint = Point3::new(0.0, 0.0, 4.0);

    let visible = remove_hidden_points(&points, &viewpoint, 0.0).unwrap();
    assert!(!visible.is_empty());
    assert!(visible.len() < points.len(), "far side must be hidden");

    // The surviving points face the viewpoint.
    let mean_z: f64 = visible.iter().map(|&i| points[i].z).sum::<f64>() / visible.len() as f64;
    assert!(mean_z > 0.2, "mean z {mean_z} should face the viewpoint");
}

#[test]
fn hidden_point_removal_grows_with_exponent() {
    // A larger flip radius flattens the flipped cloud onto a sphere, so
    // more points reach the hull; on a sampling this sparse a generous
    // exponent admits everything.
    let points = fibonacci_sphere(400);
    let viewpoint = Point3::new(0.0, 0.0, 4.0);

    let conservative = remove_hidden_points(&points, &viewpoint, 0.0).unwrap();
    let generous = remove_hidden_points(&points, &viewpoint, 4.0).unwrap();

    assert!(conservative.len() <= generous.len());
    assert!(conservative.len() < points.len());
}

// ============================================================================
// Normal estimation properties
// ============================================================================

#[test]
fn oriented_planar_normals_match_plus_z() {
    // Scattered (low-discrepancy) planar samples, not a regular grid.
    let points: Vec<Point3<f64>> = (0..80)
        .map(|i| {
            let x = (i as f64 * 0.754_877_666_2).fract() * 3.0;
            let y = (i as f64 * 0.569_840_290_9).fract() * 3.0;
            Point3::new(x, y, 0.0)
        })
        .collect();
    let params = NormalParams {
        orient: true,
        ..Default::default()
    };
    let normals = pspd::estimate_normals(&points, &params).unwrap();

    for n in &normals {
        let cos = n.dot(&Vector3::new(0.0, 0.0, 1.0));
        assert!(cos > 0.999_999, "normal {n:?} deviates from +z");
    }
}

#[test]
fn kernel_weighted_estimation_accepts_all_kernel_names() {
    let points = plane_grid(6, 0.5);
    for name in [
        "linear",
        "truncated",
        "inverse",
        "gaussian",
        "multiquadric",
        "inverse-quadric",
        "inverse-multiquadric",
        "thin-plate-spline",
        "rbf",
        "cosine",
    ] {
        let kernel: WeightKernel = name.parse().unwrap();
        let params = NormalParams::default().with_kernel(kernel, 1.0);
        let normals = pspd::estimate_normals(&points, &params)
            .unwrap_or_else(|e| panic!("kernel {name} failed: {e}"));
        assert_eq!(normals.len(), points.len());
    }
}

// ============================================================================
// Negative paths
// ============================================================================

#[test]
fn construction_with_five_points_is_rejected() {
    let points: Vec<Point3<f64>> = (0..5)
        .map(|i| Point3::new(i as f64, 0.0, 0.0))
        .collect();
    let field = FieldSamples::Scalar(vec![1.0; 5]);

    let err = PspdEngine::new(points, field, EngineOptions::default()).unwrap_err();
    assert!(err.is_invalid_input());
}

#[test]
fn negative_projected_area_is_rejected() {
    let points = fibonacci_sphere(50);
    let field = FieldSamples::Scalar(vec![1.0; 50]);
    let mut engine = PspdEngine::new(points, field, EngineOptions::default()).unwrap();

    let err = engine.find(&FindParams::new(-1.0)).unwrap_err();
    assert!(err.is_invalid_input());
}

#[test]
fn results_before_find_are_not_ready() {
    let points = fibonacci_sphere(50);
    let field = FieldSamples::Scalar(vec![1.0; 50]);
    let engine = PspdEngine::new(points, field, EngineOptions::default()).unwrap();

    assert!(matches!(
        engine.results().unwrap_err(),
        PspdError::NotReady { .. }
    ));
    assert!(matches!(
        engine.peak().unwrap_err(),
        PspdError::NotReady { .. }
    ));
}

#[test]
fn unknown_method_names_are_unsupported() {
    assert!(matches!(
        "simpson-39".parse::<IntegrationMethod>().unwrap_err(),
        PspdError::UnsupportedMethod { .. }
    ));
    assert!(matches!(
        "wendland".parse::<WeightKernel>().unwrap_err(),
        PspdError::UnsupportedMethod { .. }
    ));
}

// ============================================================================
// Cross-checks
// ============================================================================

#[test]
fn quadrature_scan_agrees_with_closed_form_scan() {
    let points = fibonacci_sphere(200);
    let field = FieldSamples::Scalar(vec![10.0; 200]);

    let mut closed = PspdEngine::new(
        points.clone(),
        field.clone(),
        EngineOptions::default(),
    )
    .unwrap();
    closed.find(&FindParams::new(0.05)).unwrap();

    let mut options = EngineOptions::default();
    options.integration.method = IntegrationMethod::Quadrature;
    let mut quad = PspdEngine::new(points, field, options).unwrap();
    quad.find(&FindParams::new(0.05)).unwrap();

    let a = closed.peak().unwrap();
    let b = quad.peak().unwrap();
    assert!(
        (a.spatial_average - b.spatial_average).abs() < 1e-6,
        "closed {} vs quadrature {}",
        a.spatial_average,
        b.spatial_average
    );
}

#[test]
fn supplied_normals_match_estimated_scan() {
    // Supplying the exact outward sphere normals should land close to the
    // self-estimated run.
    let points = fibonacci_sphere(300);
    let normals: Vec<Vector3<f64>> = points.iter().map(|p| p.coords).collect();
    let field = FieldSamples::Scalar(vec![10.0; 300]);

    let mut supplied = PspdEngine::new(
        points.clone(),
        field.clone(),
        EngineOptions::default().with_normals(normals),
    )
    .unwrap();
    supplied.find(&FindParams::new(0.02)).unwrap();

    let mut estimated = PspdEngine::new(points, field, EngineOptions::default()).unwrap();
    estimated.find(&FindParams::new(0.02)).unwrap();

    let a = supplied.peak().unwrap().spatial_average;
    let b = estimated.peak().unwrap().spatial_average;
    assert!((a - b).abs() / b < 0.05, "supplied {a} vs estimated {b}");
}
