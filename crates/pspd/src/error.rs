//! Error types for exposure-assessment operations with rich diagnostics.
//!
//! This module provides error handling with:
//! - Machine-readable error codes for programmatic handling
//! - Rich context (which input, what shape, what value)
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `PSPD-XXXX`:
//! - `PSPD-1xxx`: Input validation errors (shapes, sizes, parameter ranges)
//! - `PSPD-2xxx`: Geometry errors (degenerate neighborhoods, failed fits)
//! - `PSPD-3xxx`: Engine state errors (queries before a scan, cancellation)
//! - `PSPD-4xxx`: Method errors (unknown integration modes or kernels)

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for exposure-assessment operations.
pub type PspdResult<T> = Result<T, PspdError>;

/// Machine-readable error codes.
///
/// Codes follow the pattern `PSPD-XXXX` where:
/// - 1xxx = input validation errors
/// - 2xxx = geometry errors
/// - 3xxx = engine state errors
/// - 4xxx = method errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// PSPD-1001: Too few points in the cloud
    InvalidPointCount = 1001,
    /// PSPD-1002: Field length does not match the point count
    FieldLengthMismatch = 1002,
    /// PSPD-1003: Projected aperture area is not a positive finite number
    InvalidProjectedArea = 1003,
    /// PSPD-2001: Local geometry too degenerate for the requested fit
    DegenerateGeometry = 2001,
    /// PSPD-3001: Results queried before a scan produced them
    NotReady = 3001,
    /// PSPD-3002: Scan cancelled through the progress hook
    Cancelled = 3002,
    /// PSPD-4001: Unknown integration method or weighting kernel
    UnsupportedMethod = 4001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `PSPD-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPointCount => "PSPD-1001",
            ErrorCode::FieldLengthMismatch => "PSPD-1002",
            ErrorCode::InvalidProjectedArea => "PSPD-1003",
            ErrorCode::DegenerateGeometry => "PSPD-2001",
            ErrorCode::NotReady => "PSPD-3001",
            ErrorCode::Cancelled => "PSPD-3002",
            ErrorCode::UnsupportedMethod => "PSPD-4001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during exposure-assessment operations.
#[derive(Debug, Error, Diagnostic)]
pub enum PspdError {
    /// The point cloud is too small for a meaningful scan.
    #[error("point cloud has {count} points, but more than 10 are required")]
    #[diagnostic(
        code(pspd::input::point_count),
        help("Supply a denser sampling of the surface; a scan over so few points is meaningless.")
    )]
    InvalidPointCount { count: usize },

    /// A per-point array does not match the point cloud length.
    #[error("{what} has length {actual}, expected {expected}")]
    #[diagnostic(
        code(pspd::input::length_mismatch),
        help("Every per-point array must have exactly one entry per cloud point.")
    )]
    FieldLengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The aperture area is not a positive finite number.
    #[error("projected aperture area must be positive and finite, got {value}")]
    #[diagnostic(
        code(pspd::input::projected_area),
        help("The aperture area is in squared cloud units; typical values are 0.0001 to 0.0004 m^2.")
    )]
    InvalidProjectedArea { value: f64 },

    /// The local geometry cannot support the requested computation.
    #[error("degenerate geometry: {details}")]
    #[diagnostic(
        code(pspd::geometry::degenerate),
        help(
            "Collinear or duplicated samples cannot define a tangent plane or a surface fit. \
             Increase the neighborhood size or clean the input cloud."
        )
    )]
    DegenerateGeometry { details: String },

    /// Results were queried before the scan ran.
    #[error("`{query}` called before `find` produced results")]
    #[diagnostic(
        code(pspd::state::not_ready),
        help("Call `find` with a projected aperture area first.")
    )]
    NotReady { query: &'static str },

    /// The scan was cancelled through the progress hook.
    #[error("scan cancelled after {completed} of {total} points")]
    #[diagnostic(code(pspd::state::cancelled))]
    Cancelled { completed: u64, total: u64 },

    /// An integration method or weighting kernel name was not recognized.
    #[error("unsupported method {name:?}; supported: {supported}")]
    #[diagnostic(code(pspd::method::unsupported))]
    UnsupportedMethod {
        name: String,
        supported: &'static str,
    },
}

impl PspdError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PspdError::InvalidPointCount { .. } => ErrorCode::InvalidPointCount,
            PspdError::FieldLengthMismatch { .. } => ErrorCode::FieldLengthMismatch,
            PspdError::InvalidProjectedArea { .. } => ErrorCode::InvalidProjectedArea,
            PspdError::DegenerateGeometry { .. } => ErrorCode::DegenerateGeometry,
            PspdError::NotReady { .. } => ErrorCode::NotReady,
            PspdError::Cancelled { .. } => ErrorCode::Cancelled,
            PspdError::UnsupportedMethod { .. } => ErrorCode::UnsupportedMethod,
        }
    }

    /// True for eager input-validation failures (PSPD-1xxx).
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            PspdError::InvalidPointCount { .. }
                | PspdError::FieldLengthMismatch { .. }
                | PspdError::InvalidProjectedArea { .. }
        )
    }

    /// True for per-point geometric failures (PSPD-2xxx).
    pub fn is_degenerate_geometry(&self) -> bool {
        matches!(self, PspdError::DegenerateGeometry { .. })
    }

    /// Create a degenerate-geometry error from a detail message.
    pub fn degenerate(details: impl Into<String>) -> Self {
        PspdError::DegenerateGeometry {
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings() {
        assert_eq!(ErrorCode::InvalidPointCount.as_str(), "PSPD-1001");
        assert_eq!(ErrorCode::DegenerateGeometry.as_str(), "PSPD-2001");
        assert_eq!(ErrorCode::NotReady.as_str(), "PSPD-3001");
        assert_eq!(ErrorCode::UnsupportedMethod.as_str(), "PSPD-4001");
    }

    #[test]
    fn test_error_to_code() {
        let err = PspdError::InvalidPointCount { count: 5 };
        assert_eq!(err.code(), ErrorCode::InvalidPointCount);
        assert!(err.is_invalid_input());

        let err = PspdError::degenerate("collinear neighborhood");
        assert_eq!(err.code(), ErrorCode::DegenerateGeometry);
        assert!(err.is_degenerate_geometry());
        assert!(!err.is_invalid_input());
    }

    #[test]
    fn test_display_carries_context() {
        let err = PspdError::FieldLengthMismatch {
            what: "power density",
            expected: 100,
            actual: 99,
        };
        let msg = err.to_string();
        assert!(msg.contains("power density"));
        assert!(msg.contains("100"));
        assert!(msg.contains("99"));
    }
}
