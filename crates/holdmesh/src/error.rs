//! Error types for the hold reconstruction pipeline.
//!
//! Every failure carries:
//! - A machine-readable error code (`HOLD-XXXX`)
//! - Context about what went wrong (path, operation, parameter name)
//! - A recovery suggestion
//! - Terminal rendering via miette
//!
//! # Error Codes
//!
//! - `HOLD-1xxx`: I/O errors (reading, writing, parsing)
//! - `HOLD-2xxx`: Geometry and validation errors
//! - `HOLD-3xxx`: Processing failures (reconstruction, booleans, hole filling)
//! - `HOLD-4xxx`: Format and configuration errors
//!
//! Data-quality problems (an empty cluster, a cloud without colors) are not
//! errors: they are reported as `tracing` warnings and processing continues.
//! Registration non-convergence is reported through
//! [`RegistrationStatus`](crate::registration::RegistrationStatus).
//!
//! # Example
//!
//! ```
//! use holdmesh::{ErrorCode, HoldError};
//!
//! let err = HoldError::geometry("convex hull", "only 2 points kept");
//! assert_eq!(err.code(), ErrorCode::Geometry);
//! assert_eq!(err.code().as_str(), "HOLD-2003");
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type HoldResult<T> = Result<T, HoldError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// HOLD-1001: Failed to read file
    IoRead = 1001,
    /// HOLD-1002: Failed to write file
    IoWrite = 1002,
    /// HOLD-1003: Failed to parse file contents
    ParseError = 1003,

    // Geometry and validation errors (2xxx)
    /// HOLD-2001: Point cloud has no points
    EmptyCloud = 2001,
    /// HOLD-2002: Mesh has no vertices or faces
    EmptyMesh = 2002,
    /// HOLD-2003: Degenerate input to a geometric routine
    Geometry = 2003,
    /// HOLD-2004: Face references a vertex that doesn't exist
    InvalidVertexIndex = 2004,
    /// HOLD-2005: Parameter outside its valid range
    InvalidParameter = 2005,

    // Processing errors (3xxx)
    /// HOLD-3001: Surface reconstruction failed
    ReconstructionFailed = 3001,
    /// HOLD-3002: Hole filling failed
    HoleFillFailed = 3002,
    /// HOLD-3003: Boolean operation failed
    BooleanFailed = 3003,

    // Format and configuration errors (4xxx)
    /// HOLD-4001: Unsupported file format
    UnsupportedFormat = 4001,
    /// HOLD-4002: Invalid pipeline configuration
    InvalidConfig = 4002,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `HOLD-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "HOLD-1001",
            ErrorCode::IoWrite => "HOLD-1002",
            ErrorCode::ParseError => "HOLD-1003",
            ErrorCode::EmptyCloud => "HOLD-2001",
            ErrorCode::EmptyMesh => "HOLD-2002",
            ErrorCode::Geometry => "HOLD-2003",
            ErrorCode::InvalidVertexIndex => "HOLD-2004",
            ErrorCode::InvalidParameter => "HOLD-2005",
            ErrorCode::ReconstructionFailed => "HOLD-3001",
            ErrorCode::HoleFillFailed => "HOLD-3002",
            ErrorCode::BooleanFailed => "HOLD-3003",
            ErrorCode::UnsupportedFormat => "HOLD-4001",
            ErrorCode::InvalidConfig => "HOLD-4002",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for pipeline errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check the input data for the listed properties.
    CheckInput { checks: Vec<String> },
    /// Adjust the listed parameters.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Use a different file format.
    UseDifferentFormat { suggested: Vec<String> },
    /// Repair the mesh before retrying.
    RepairMesh { operations: Vec<String> },
    /// Free-form advice.
    ManualIntervention { description: String },
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Try using a different format: {}", suggested.join(", "))
            }
            RecoverySuggestion::RepairMesh { operations } => {
                write!(f, "Repair the mesh first: {}", operations.join(", "))
            }
            RecoverySuggestion::ManualIntervention { description } => {
                write!(f, "{}", description)
            }
        }
    }
}

/// Errors produced by the reconstruction pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum HoldError {
    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(hold::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(hold::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a file.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(
        code(hold::parse::error),
        help("The file may be truncated or use an unexpected PLY layout. Re-export it from the scanner software.")
    )]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported file format: {extension:?}")]
    #[diagnostic(code(hold::format::unsupported), help("Supported format: PLY"))]
    UnsupportedFormat { extension: Option<String> },

    /// Point cloud without points.
    #[error("point cloud is empty: {details}")]
    #[diagnostic(
        code(hold::validation::empty_cloud),
        help("Check that the scan was exported with its vertices and that the segment is populated.")
    )]
    EmptyCloud { details: String },

    /// Mesh without vertices or faces.
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(hold::validation::empty_mesh),
        help("The mesh must have at least one vertex and one face.")
    )]
    EmptyMesh { details: String },

    /// Degenerate input to a geometric routine.
    #[error("degenerate geometry in {operation}: {details}")]
    #[diagnostic(
        code(hold::geometry::degenerate),
        help("The input does not span enough dimensions for this operation. Check the corner points or the number of points kept.")
    )]
    Geometry {
        operation: &'static str,
        details: String,
    },

    /// Face index out of range.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(hold::validation::vertex_index),
        help("Load the mesh with MeshReadMode::PostProcess to drop invalid faces.")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Parameter outside its valid range.
    #[error("invalid parameter `{name}`: {details}")]
    #[diagnostic(code(hold::validation::parameter))]
    InvalidParameter { name: &'static str, details: String },

    /// Surface reconstruction failed for one cloud.
    #[error("surface reconstruction failed: {details}")]
    #[diagnostic(
        code(hold::reconstruct::failed),
        help("The cluster may be too sparse. Try a lower octree depth or a smaller density quantile.")
    )]
    ReconstructionFailed { details: String },

    /// Hole filling failed.
    #[error("hole filling failed: {details}")]
    #[diagnostic(code(hold::refine::hole_fill))]
    HoleFillFailed { details: String },

    /// Boolean operation failed.
    #[error("boolean {operation} failed: {details}")]
    #[diagnostic(
        code(hold::refine::boolean),
        help("Boolean operations need watertight, manifold operands.")
    )]
    BooleanFailed { operation: String, details: String },

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {details}")]
    #[diagnostic(
        code(hold::config::invalid),
        help("Print the defaults with `holdmesh config` and compare.")
    )]
    InvalidConfig { details: String },
}

impl HoldError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HoldError::IoRead { .. } => ErrorCode::IoRead,
            HoldError::IoWrite { .. } => ErrorCode::IoWrite,
            HoldError::ParseError { .. } => ErrorCode::ParseError,
            HoldError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            HoldError::EmptyCloud { .. } => ErrorCode::EmptyCloud,
            HoldError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            HoldError::Geometry { .. } => ErrorCode::Geometry,
            HoldError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            HoldError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            HoldError::ReconstructionFailed { .. } => ErrorCode::ReconstructionFailed,
            HoldError::HoleFillFailed { .. } => ErrorCode::HoleFillFailed,
            HoldError::BooleanFailed { .. } => ErrorCode::BooleanFailed,
            HoldError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            HoldError::IoRead { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            HoldError::IoWrite { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            HoldError::ParseError { .. } => RecoverySuggestion::ManualIntervention {
                description: "Re-export the file as PLY from the capture software".into(),
            },
            HoldError::UnsupportedFormat { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec!["PLY".into()],
            },
            HoldError::EmptyCloud { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["scan has points".into(), "lattice covers the scan".into()],
            },
            HoldError::EmptyMesh { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["mesh has faces".into()],
            },
            HoldError::Geometry { .. } => RecoverySuggestion::CheckInput {
                checks: vec![
                    "corner points are distinct and not collinear".into(),
                    "clip plane leaves at least 3 points".into(),
                ],
            },
            HoldError::InvalidVertexIndex { .. } => RecoverySuggestion::RepairMesh {
                operations: vec!["load with MeshReadMode::PostProcess".into()],
            },
            HoldError::InvalidParameter { name, .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![((*name).to_string(), "use the documented range".into())],
            },
            HoldError::ReconstructionFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("depth".into(), "try a lower value".into()),
                    ("density_quantile".into(), "try a lower value".into()),
                ],
            },
            HoldError::HoleFillFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("max_hole_edges".into(), "try a smaller value".into())],
            },
            HoldError::BooleanFailed { .. } => RecoverySuggestion::RepairMesh {
                operations: vec!["fill holes".into(), "check the wall mesh is closed".into()],
            },
            HoldError::InvalidConfig { .. } => RecoverySuggestion::ManualIntervention {
                description: "Compare the configuration against `holdmesh config`".into(),
            },
        }
    }

    /// Whether the error aborts a whole run rather than a single cluster.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HoldError::InvalidConfig { .. } | HoldError::InvalidParameter { .. }
        )
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HoldError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HoldError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        HoldError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an EmptyCloud error.
    pub fn empty_cloud(details: impl Into<String>) -> Self {
        HoldError::EmptyCloud {
            details: details.into(),
        }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        HoldError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create a Geometry error.
    pub fn geometry(operation: &'static str, details: impl Into<String>) -> Self {
        HoldError::Geometry {
            operation,
            details: details.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: &'static str, details: impl Into<String>) -> Self {
        HoldError::InvalidParameter {
            name,
            details: details.into(),
        }
    }

    /// Create a ReconstructionFailed error.
    pub fn reconstruction_failed(details: impl Into<String>) -> Self {
        HoldError::ReconstructionFailed {
            details: details.into(),
        }
    }

    /// Create a HoleFillFailed error.
    pub fn hole_fill_failed(details: impl Into<String>) -> Self {
        HoldError::HoleFillFailed {
            details: details.into(),
        }
    }

    /// Create a BooleanFailed error.
    pub fn boolean_failed(operation: impl Into<String>, details: impl Into<String>) -> Self {
        HoldError::BooleanFailed {
            operation: operation.into(),
            details: details.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(details: impl Into<String>) -> Self {
        HoldError::InvalidConfig {
            details: details.into(),
        }
    }

    /// Create an UnsupportedFormat error from a path.
    pub fn unsupported_format(path: &std::path::Path) -> Self {
        HoldError::UnsupportedFormat {
            extension: path.extension().and_then(|e| e.to_str()).map(String::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = HoldError::invalid_parameter("grid_spacing", "must be positive");
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
        assert_eq!(err.code().as_str(), "HOLD-2005");

        let err = HoldError::boolean_failed("union", "operand is open");
        assert_eq!(err.code().to_string(), "HOLD-3003");
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = HoldError::invalid_parameter("depth", "too deep");
        match err.recovery_suggestion() {
            RecoverySuggestion::AdjustParameters { parameters } => {
                assert_eq!(parameters[0].0, "depth");
            }
            other => panic!("Expected AdjustParameters suggestion, got {:?}", other),
        }
    }

    #[test]
    fn test_structural_errors() {
        assert!(HoldError::invalid_config("bad quantile").is_structural());
        assert!(!HoldError::reconstruction_failed("empty density").is_structural());
        assert!(!HoldError::geometry("convex hull", "2 points").is_structural());
    }

    #[test]
    fn test_error_display() {
        let err = HoldError::InvalidVertexIndex {
            face_index: 5,
            vertex_index: 100,
            vertex_count: 50,
        };
        let display = format!("{}", err);
        assert!(display.contains("face 5"));
        assert!(display.contains("vertex 100"));
        assert!(display.contains("50 vertices"));

        let err = HoldError::geometry("lattice", "p2 equals p1");
        assert_eq!(
            err.to_string(),
            "degenerate geometry in lattice: p2 equals p1"
        );
    }

    #[test]
    fn test_unsupported_format_from_path() {
        let err = HoldError::unsupported_format(std::path::Path::new("scan.e57"));
        match err {
            HoldError::UnsupportedFormat { extension } => {
                assert_eq!(extension.as_deref(), Some("e57"));
            }
            _ => panic!("Expected UnsupportedFormat"),
        }
    }
}
