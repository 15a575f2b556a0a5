//! The per-point scan producing the peak spatially-averaged value.
//!
//! [`PspdEngine`] composes the crate: it validates the inputs once, derives
//! normals when they are needed, and drives the scan that evaluates the
//! spatially-averaged field under a square aperture slid across every
//! visible point of the cloud. The engine moves through three states:
//!
//! ```text
//! Constructed -> NormalsReady -> Found
//! ```
//!
//! Construction performs validation, field projection, and any lazy normal
//! estimation. [`PspdEngine::find`] is the sole transition into `Found`;
//! result queries before it fail with `NotReady`.
//!
//! Each scan iteration reads only shared immutable state and produces the
//! record at its own index, so the scan parallelizes without locks. A
//! degenerate point is handled by the configured [`DegeneratePolicy`]:
//! skipped with a diagnostic (its slot records NaN and is ignored by peak
//! selection) or propagated as a scan-level failure.

use std::sync::Arc;

use nalgebra::{Point3, Vector2, Vector3};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::area::{EvaluationDomain, MeshAreaService, TriangleSumArea, estimate_area};
use crate::error::{PspdError, PspdResult};
use crate::frame::LocalFrame;
use crate::integrate::{IntegrationParams, integrate};
use crate::normals::{
    NormalOrientationService, NormalParams, TangentPlanePropagation, estimate_normals_with,
};
use crate::patch::{midpoint_subdivide, select_by_index};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::spatial::SpatialIndex;
use crate::tracing_ext::{OperationTimer, log_scan_summary};
use crate::types::{FieldSamples, Mesh};
use crate::visibility::{DEFAULT_FLIP_EXPONENT, remove_hidden_points};

/// How the scan treats a point whose local computation degenerates.
///
/// Either way the choice is deterministic: a degenerate point never
/// silently contributes a wrong value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// Log the point, record NaN in its slot, and continue. The slot keeps
    /// the result set index-aligned with the visible subset; peak selection
    /// skips it. Default.
    #[default]
    SkipAndLog,
    /// Fail the whole `find` call with the point's error.
    Propagate,
}

/// Construction options for [`PspdEngine`].
pub struct EngineOptions {
    /// Per-point normals of cloud length. When absent they are estimated
    /// lazily (non-unit, oriented) the first time they are needed.
    pub normals: Option<Vec<Vector3<f64>>>,
    /// Optional triangle mesh refining surface-area estimates.
    pub mesh: Option<Mesh>,
    /// Parameters for lazy normal estimation.
    pub normal_params: NormalParams,
    /// Surface fitting and integration parameters for the scan.
    pub integration: IntegrationParams,
    /// Policy for degenerate scan points.
    pub degenerate_policy: DegeneratePolicy,
    /// Normal sign orientation adapter.
    pub orienter: Arc<dyn NormalOrientationService>,
    /// Mesh patch area adapter.
    pub area_service: Arc<dyn MeshAreaService>,
    /// Progress hook spanning the scan; return `false` to cancel.
    pub progress: Option<ProgressCallback>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            normals: None,
            mesh: None,
            normal_params: NormalParams::for_surface_area(),
            integration: IntegrationParams::default(),
            degenerate_policy: DegeneratePolicy::default(),
            orienter: Arc::new(TangentPlanePropagation),
            area_service: Arc::new(TriangleSumArea),
            progress: None,
        }
    }
}

impl EngineOptions {
    /// Attach a mesh.
    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.mesh = Some(mesh);
        self
    }

    /// Supply precomputed normals.
    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Set the degenerate-point policy.
    pub fn with_degenerate_policy(mut self, policy: DegeneratePolicy) -> Self {
        self.degenerate_policy = policy;
        self
    }
}

/// Parameters of one `find` call.
#[derive(Debug, Clone)]
pub struct FindParams {
    /// Area of the square aperture's projection, in squared cloud units.
    pub projected_area: f64,
    /// Restrict the scan to points visible from here.
    pub viewpoint: Option<Point3<f64>>,
    /// Spherical-flip exponent for hidden-point removal. Default: pi.
    pub flip_exponent: f64,
}

impl FindParams {
    /// Scan every point with the given aperture area.
    pub fn new(projected_area: f64) -> Self {
        Self {
            projected_area,
            viewpoint: None,
            flip_exponent: DEFAULT_FLIP_EXPONENT,
        }
    }

    /// Restrict the scan to points visible from `viewpoint`.
    pub fn with_viewpoint(mut self, viewpoint: Point3<f64>) -> Self {
        self.viewpoint = Some(viewpoint);
        self
    }

    /// Override the spherical-flip exponent.
    pub fn with_flip_exponent(mut self, flip_exponent: f64) -> Self {
        self.flip_exponent = flip_exponent;
        self
    }
}

/// One scan result, the audit trail of a single aperture evaluation.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    /// Position in the result set (and in the visible subset).
    pub index: usize,
    /// The scanned point.
    pub query_point: Point3<f64>,
    /// Cloud indices of the in-aperture neighborhood.
    pub neighborhood: Vec<usize>,
    /// The bounded evaluation domain the area came from.
    pub domain: EvaluationDomain,
    /// Conformal surface area under the aperture.
    pub area: f64,
    /// In-aperture normal-projected field samples.
    pub samples: Vec<f64>,
    /// The spatially-averaged field value. NaN for a skipped point.
    pub spatial_average: f64,
}

/// Scan results as a struct of arrays, index-aligned with the visible
/// subset.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub query_points: Vec<Point3<f64>>,
    pub neighborhoods: Vec<Vec<usize>>,
    pub domains: Vec<EvaluationDomain>,
    pub areas: Vec<f64>,
    pub samples: Vec<Vec<f64>>,
    pub averages: Vec<f64>,
}

impl ResultSet {
    fn with_capacity(n: usize) -> Self {
        Self {
            query_points: Vec::with_capacity(n),
            neighborhoods: Vec::with_capacity(n),
            domains: Vec::with_capacity(n),
            areas: Vec::with_capacity(n),
            samples: Vec::with_capacity(n),
            averages: Vec::with_capacity(n),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.averages.len()
    }

    /// Check if the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }

    /// Owned view of one record.
    pub fn record(&self, index: usize) -> Option<ResultRecord> {
        if index >= self.len() {
            return None;
        }
        Some(ResultRecord {
            index,
            query_point: self.query_points[index],
            neighborhood: self.neighborhoods[index].clone(),
            domain: self.domains[index].clone(),
            area: self.areas[index],
            samples: self.samples[index].clone(),
            spatial_average: self.averages[index],
        })
    }

    /// Index of the record with the maximal spatially-averaged value,
    /// skipping degenerate (NaN) slots. Recomputed on demand.
    pub fn peak_index(&self) -> Option<usize> {
        self.averages
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    }
}

/// Surface representation chosen once at construction; drives which area
/// path the scan takes.
enum SurfaceDomain {
    PointsOnly {
        normals: Vec<Vector3<f64>>,
    },
    WithMesh {
        mesh: Mesh,
        normals: Option<Vec<Vector3<f64>>>,
    },
}

struct ScanState {
    visible: Vec<usize>,
    results: ResultSet,
    degenerate: usize,
}

struct Slot {
    query_point: Point3<f64>,
    neighborhood: Vec<usize>,
    domain: EvaluationDomain,
    area: f64,
    samples: Vec<f64>,
    spatial_average: f64,
}

impl Slot {
    fn degenerate(query_point: Point3<f64>) -> Self {
        Self {
            query_point,
            neighborhood: Vec::new(),
            domain: EvaluationDomain::Cloud {
                coords: Vec::new(),
                normals: Vec::new(),
            },
            area: f64::NAN,
            samples: Vec::new(),
            spatial_average: f64::NAN,
        }
    }
}

/// Detector for the peak spatially-averaged power density over a sampled
/// surface.
///
/// # Example
///
/// ```ignore
/// use pspd::{EngineOptions, FieldSamples, FindParams, PspdEngine};
///
/// let engine = PspdEngine::new(points, FieldSamples::Scalar(density), EngineOptions::default())?;
/// let mut engine = engine;
/// engine.find(&FindParams::new(0.0004))?; // 4 cm^2 aperture
/// let peak = engine.peak()?;
/// println!("peak {:.3} at {:?}", peak.spatial_average, peak.query_point);
/// ```
pub struct PspdEngine {
    points: Vec<Point3<f64>>,
    field_normal: Vec<f64>,
    domain: SurfaceDomain,
    integration: IntegrationParams,
    degenerate_policy: DegeneratePolicy,
    area_service: Arc<dyn MeshAreaService>,
    progress: Option<ProgressCallback>,
    scan: Option<ScanState>,
}

impl std::fmt::Debug for PspdEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PspdEngine")
            .field("points", &self.points.len())
            .field("field_normal", &self.field_normal.len())
            .field("integration", &self.integration)
            .field("degenerate_policy", &self.degenerate_policy)
            .field("area_service", &"<dyn MeshAreaService>")
            .field("progress", &self.progress.is_some())
            .field("scan", &self.scan.is_some())
            .finish()
    }
}

impl PspdEngine {
    /// Validate inputs and build an engine.
    ///
    /// Fails with `InvalidInput` when the cloud has 10 or fewer points or
    /// when a per-point array does not match the cloud length. A vector
    /// field is projected onto the normal field here; normals are estimated
    /// at most once when neither supplied nor derivable from a mesh-free
    /// construction.
    pub fn new(
        points: Vec<Point3<f64>>,
        field: FieldSamples,
        options: EngineOptions,
    ) -> PspdResult<Self> {
        let n = points.len();
        if n <= 10 {
            return Err(PspdError::InvalidPointCount { count: n });
        }
        if field.len() != n {
            return Err(PspdError::FieldLengthMismatch {
                what: "power density",
                expected: n,
                actual: field.len(),
            });
        }

        let EngineOptions {
            normals,
            mesh,
            normal_params,
            integration,
            degenerate_policy,
            orienter,
            area_service,
            progress,
        } = options;

        if let Some(supplied) = &normals
            && supplied.len() != n
        {
            return Err(PspdError::FieldLengthMismatch {
                what: "normals",
                expected: n,
                actual: supplied.len(),
            });
        }

        // Normals are needed to project a vector field onto the surface and
        // to estimate area over a bare cloud. Compute them at most once.
        let needs_normals = matches!(field, FieldSamples::Vector(_)) || mesh.is_none();
        let normals = match normals {
            Some(supplied) => Some(supplied),
            None if needs_normals => {
                let _timer = OperationTimer::with_points("estimate_normals", n);
                info!(
                    target: "pspd::engine",
                    points = n,
                    "Estimating surface normals"
                );
                Some(estimate_normals_with(
                    &points,
                    &normal_params,
                    orienter.as_ref(),
                )?)
            }
            None => None,
        };

        let field_normal = match field {
            FieldSamples::Scalar(values) => values,
            FieldSamples::Vector(vectors) => {
                let normal_field = normals
                    .as_deref()
                    .ok_or_else(|| PspdError::degenerate("no normals to project the field onto"))?;
                vectors
                    .iter()
                    .zip(normal_field)
                    .map(|(f, normal)| f.dot(normal))
                    .collect()
            }
        };

        let domain = match mesh {
            Some(mesh) => SurfaceDomain::WithMesh { mesh, normals },
            None => SurfaceDomain::PointsOnly {
                normals: normals
                    .ok_or_else(|| PspdError::degenerate("point-cloud mode requires normals"))?,
            },
        };

        Ok(Self {
            points,
            field_normal,
            domain,
            integration,
            degenerate_policy,
            area_service,
            progress,
            scan: None,
        })
    }

    /// Number of cloud points.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// The normal field, when one was supplied or estimated.
    pub fn normals(&self) -> Option<&[Vector3<f64>]> {
        match &self.domain {
            SurfaceDomain::PointsOnly { normals } => Some(normals),
            SurfaceDomain::WithMesh { normals, .. } => normals.as_deref(),
        }
    }

    /// The attached mesh, if any.
    pub fn mesh(&self) -> Option<&Mesh> {
        match &self.domain {
            SurfaceDomain::WithMesh { mesh, .. } => Some(mesh),
            SurfaceDomain::PointsOnly { .. } => None,
        }
    }

    /// Run the scan. The sole transition into the `Found` state.
    ///
    /// Scans every visible point with a square aperture of
    /// `projected_area`, appending one result record per point. Fails with
    /// `InvalidInput` on a non-positive area, `Cancelled` when the progress
    /// hook requests it, and per-point errors according to the degenerate
    /// policy.
    pub fn find(&mut self, params: &FindParams) -> PspdResult<()> {
        let projected_area = params.projected_area;
        if !projected_area.is_finite() || projected_area <= 0.0 {
            return Err(PspdError::InvalidProjectedArea {
                value: projected_area,
            });
        }

        let _timer = OperationTimer::with_points("pspd_scan", self.points.len());

        let side = projected_area.sqrt();
        // Radius of the circle circumscribing the aperture square.
        let rc = std::f64::consts::SQRT_2 / 2.0 * side;

        let cloud_index = SpatialIndex::build(&self.points);
        let vertex_index = match &self.domain {
            SurfaceDomain::WithMesh { mesh, .. } => Some(SpatialIndex::build(&mesh.vertices)),
            SurfaceDomain::PointsOnly { .. } => None,
        };

        let visible = match params.viewpoint {
            Some(viewpoint) => {
                remove_hidden_points(&self.points, &viewpoint, params.flip_exponent)?
            }
            None => (0..self.points.len()).collect(),
        };

        info!(
            target: "pspd::engine",
            visible = visible.len(),
            total = self.points.len(),
            aperture_side = format!("{side:.6}"),
            "Scanning visible points"
        );

        let tracker = ProgressTracker::new(visible.len() as u64);

        let outcomes = visible
            .par_iter()
            .map(|&i| {
                if tracker.is_cancelled() {
                    return Err(PspdError::Cancelled {
                        completed: tracker.current(),
                        total: tracker.total(),
                    });
                }

                let outcome = match self.step(
                    i,
                    rc,
                    side,
                    projected_area,
                    &cloud_index,
                    vertex_index.as_ref(),
                ) {
                    Ok(slot) => Ok(slot),
                    Err(e)
                        if e.is_degenerate_geometry()
                            && self.degenerate_policy == DegeneratePolicy::SkipAndLog =>
                    {
                        warn!(
                            target: "pspd::engine",
                            point = i,
                            error = %e,
                            "Skipping degenerate scan point"
                        );
                        Ok(Slot::degenerate(self.points[i]))
                    }
                    Err(e) => Err(e),
                };

                tracker.increment();
                if let Some(callback) = &self.progress {
                    tracker.report(callback, "scanning");
                    if tracker.is_cancelled() {
                        return Err(PspdError::Cancelled {
                            completed: tracker.current(),
                            total: tracker.total(),
                        });
                    }
                }
                outcome
            })
            .collect::<PspdResult<Vec<Slot>>>()?;

        let mut results = ResultSet::with_capacity(outcomes.len());
        let mut degenerate = 0;
        for slot in outcomes {
            if slot.spatial_average.is_nan() {
                degenerate += 1;
            }
            results.query_points.push(slot.query_point);
            results.neighborhoods.push(slot.neighborhood);
            results.domains.push(slot.domain);
            results.areas.push(slot.area);
            results.samples.push(slot.samples);
            results.averages.push(slot.spatial_average);
        }

        let peak = results.peak_index().map(|i| results.averages[i]);
        log_scan_summary(visible.len(), degenerate, peak);

        self.scan = Some(ScanState {
            visible,
            results,
            degenerate,
        });
        Ok(())
    }

    /// Evaluate one aperture placement.
    fn step(
        &self,
        i: usize,
        rc: f64,
        side: f64,
        projected_area: f64,
        cloud_index: &SpatialIndex,
        vertex_index: Option<&SpatialIndex>,
    ) -> PspdResult<Slot> {
        let p = self.points[i];

        let ind = cloud_index.radius_query(&p, rc);
        if ind.is_empty() {
            return Err(PspdError::degenerate(format!(
                "point {i} has no neighbors within the aperture radius"
            )));
        }
        let nbh: Vec<Point3<f64>> = ind.iter().map(|&j| self.points[j]).collect();

        // Local frame at the neighborhood centroid; tangential plane spans
        // the two dominant-variance directions.
        let frame = LocalFrame::fit(&nbh);
        let pt = frame.project(&p);

        // Axis-aligned aperture square centered at the projected query.
        let bbox = [
            pt.x - side / 2.0,
            pt.x + side / 2.0,
            pt.y - side / 2.0,
            pt.y + side / 2.0,
        ];
        let inside = |l: &Vector3<f64>| {
            l.x >= bbox[0] && l.x <= bbox[1] && l.y >= bbox[2] && l.y <= bbox[3]
        };

        let local: Vec<Vector3<f64>> = nbh.iter().map(|q| frame.project(q)).collect();
        // The query point sits at the box center, so this is never empty.
        let in_box: Vec<usize> = (0..local.len()).filter(|&s| inside(&local[s])).collect();

        let coords: Vec<Vector2<f64>> = in_box
            .iter()
            .map(|&s| Vector2::new(local[s].x, local[s].y))
            .collect();
        let samples: Vec<f64> = in_box.iter().map(|&s| self.field_normal[ind[s]]).collect();
        let neighborhood: Vec<usize> = in_box.iter().map(|&s| ind[s]).collect();

        let domain = match (&self.domain, vertex_index) {
            (SurfaceDomain::WithMesh { mesh, .. }, Some(vindex)) => {
                // Mesh neighborhood, refined once for area accuracy, then
                // clipped to the aperture through the same frame.
                let vind = vindex.radius_query(&p, rc);
                let patch = midpoint_subdivide(&select_by_index(mesh, &vind));
                let keep: Vec<usize> = patch
                    .vertices
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| inside(&frame.project(v)))
                    .map(|(idx, _)| idx)
                    .collect();
                EvaluationDomain::Patch(select_by_index(&patch, &keep))
            }
            (SurfaceDomain::PointsOnly { normals }, _) => EvaluationDomain::Cloud {
                coords: coords.clone(),
                normals: in_box.iter().map(|&s| normals[ind[s]]).collect(),
            },
            (SurfaceDomain::WithMesh { .. }, None) => {
                return Err(PspdError::degenerate("mesh vertex index missing"));
            }
        };

        let area = estimate_area(
            &domain,
            Some(bbox),
            projected_area,
            self.area_service.as_ref(),
            &self.integration,
        );
        let integral = integrate(&coords, &samples, Some(bbox), &self.integration)?;

        Ok(Slot {
            query_point: p,
            neighborhood,
            domain,
            area,
            samples,
            spatial_average: integral / area,
        })
    }

    fn state(&self, query: &'static str) -> PspdResult<&ScanState> {
        self.scan.as_ref().ok_or(PspdError::NotReady { query })
    }

    /// The record with the maximal spatially-averaged value.
    pub fn peak(&self) -> PspdResult<ResultRecord> {
        let state = self.state("peak")?;
        let index = state.results.peak_index().ok_or_else(|| {
            PspdError::degenerate("every scan point was degenerate; no peak exists")
        })?;
        state
            .results
            .record(index)
            .ok_or_else(|| PspdError::degenerate("peak index out of range"))
    }

    /// The full result set, index-aligned with the visible subset.
    pub fn results(&self) -> PspdResult<&ResultSet> {
        Ok(&self.state("results")?.results)
    }

    /// The scanned indices and points.
    ///
    /// With `include_hidden = false` returns the visible indices and the
    /// visible subset; with `true`, the visible indices and the full cloud.
    pub fn points(&self, include_hidden: bool) -> PspdResult<(Vec<usize>, Vec<Point3<f64>>)> {
        let state = self.state("points")?;
        let subset = if include_hidden {
            self.points.clone()
        } else {
            state.visible.iter().map(|&i| self.points[i]).collect()
        };
        Ok((state.visible.clone(), subset))
    }

    /// Number of scan points skipped as degenerate.
    pub fn degenerate_count(&self) -> PspdResult<usize> {
        Ok(self.state("degenerate_count")?.degenerate)
    }
}
