//! Peak spatially-averaged power density over scanned 3D surfaces.
//!
//! This crate locates the position and magnitude of the peak
//! spatially-averaged scalar field value on an irregular surface sampled as
//! a point cloud, optionally paired with a triangle mesh. The problem
//! arises in electromagnetic-exposure assessment, where absorbed or
//! incident power density must be averaged over a square aperture of fixed
//! projected area slid across the evaluation surface.
//!
//! # Pipeline
//!
//! For every visible point of the cloud, the engine:
//!
//! 1. gathers the neighborhood inside the circle circumscribing the
//!    aperture (KD-tree radius query),
//! 2. builds a principal-component local frame separating tangential from
//!    height directions,
//! 3. clips the neighborhood (and mesh patch, when present) to the square
//!    aperture in the tangential plane,
//! 4. estimates the conformal surface area under the aperture — analytic
//!    triangle sums on a mesh patch, integral of the normal magnitude
//!    otherwise,
//! 5. fits a smoothing bivariate surface to the in-aperture field samples
//!    and divides its double integral by the area.
//!
//! The record set is index-aligned with the visible subset and auditable:
//! every intermediate (neighborhood, evaluation domain, area, samples)
//! is kept per point.
//!
//! # Quick start
//!
//! ```ignore
//! use pspd::{EngineOptions, FieldSamples, FindParams, PspdEngine};
//!
//! // points: Vec<nalgebra::Point3<f64>> sampling the surface
//! // density: Vec<f64>, one normal-projected sample per point
//! let mut engine = PspdEngine::new(
//!     points,
//!     FieldSamples::Scalar(density),
//!     EngineOptions::default(),
//! )?;
//!
//! // 4 cm^2 aperture, restricted to points visible from the source side.
//! let params = FindParams::new(0.0004)
//!     .with_viewpoint(nalgebra::Point3::new(0.0, 0.0, 0.5));
//! engine.find(&params)?;
//!
//! let peak = engine.peak()?;
//! println!("peak {:.3} W/m^2 at {:?}", peak.spatial_average, peak.query_point);
//! ```
//!
//! # Surface normals
//!
//! When normals are not supplied and no mesh is attached, the engine
//! estimates them once at construction: a weighted least-squares polynomial
//! height fit per neighborhood, with sign consistency propagated over a
//! Riemannian neighbor graph. Non-unit normals carry the local area element
//! in their magnitude and feed the point-cloud area path. See
//! [`normals::estimate_normals`] to run the estimator standalone.
//!
//! # Errors
//!
//! Operations return [`PspdResult`]. Input-shape violations surface
//! eagerly as `InvalidInput`-class errors (`PSPD-1xxx`); per-point
//! geometric degeneracies inside the scan follow the configured
//! [`DegeneratePolicy`] instead of silently corrupting the result set.
//!
//! # Units
//!
//! The crate is unit-agnostic but consistent: aperture areas are squared
//! cloud units, densities are field units; the averaged result keeps the
//! field's units.

mod error;
mod types;

pub mod area;
pub mod engine;
pub mod frame;
pub mod integrate;
pub mod normals;
pub mod patch;
pub mod progress;
pub mod spatial;
pub mod tracing_ext;
pub mod visibility;

// Re-export core types at crate root
pub use error::{ErrorCode, PspdError, PspdResult};
pub use types::{FieldSamples, Mesh, Triangle};

pub use area::{EvaluationDomain, FixedArea, MeshAreaService, TriangleSumArea};
pub use engine::{
    DegeneratePolicy, EngineOptions, FindParams, PspdEngine, ResultRecord, ResultSet,
};
pub use frame::LocalFrame;
pub use integrate::{
    FitDegree, FittedSurface, IntegrationMethod, IntegrationParams, METHOD_NAMES, integrate,
};
pub use normals::{
    KERNEL_NAMES, NormalOrientationService, NormalParams, TangentPlanePropagation,
    UpwardOrientation, WeightKernel, default_k, estimate_normals, estimate_normals_with,
    orient_normals,
};
pub use patch::{midpoint_subdivide, select_by_index};
pub use progress::{Progress, ProgressCallback, ProgressTracker};
pub use spatial::SpatialIndex;
pub use tracing_ext::OperationTimer;
pub use visibility::{DEFAULT_FLIP_EXPONENT, remove_hidden_points};
