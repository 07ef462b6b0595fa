//! Tracing helpers for pipeline stages.
//!
//! The library only emits events; installing a subscriber is up to the
//! application:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=holdmesh=debug for per-cluster detail
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: data-quality issues and per-cluster failures
//! - **INFO**: stage summaries and timing
//! - **DEBUG**: per-cluster and per-iteration state
//! - **TRACE**: detailed state dumps

use std::time::Instant;
use tracing::{Span, debug, info, trace};

use crate::pointcloud::PointCloud;
use crate::types::Mesh;

/// A performance timer that logs its duration on drop.
///
/// ```rust,ignore
/// fn expensive_stage() {
///     let _timer = OperationTimer::new("expensive_stage");
///     // ...
/// } // logs elapsed_ms here
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Start timing `name`.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("hold_operation", operation = name);
        debug!(target: "holdmesh::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Start timing `name` for one named cluster.
    pub fn for_cluster(name: &'static str, cluster: &str) -> Self {
        let span = tracing::info_span!("hold_operation", operation = name, cluster = cluster);
        debug!(
            target: "holdmesh::timing",
            operation = name,
            cluster = cluster,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Milliseconds since the timer started.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        info!(
            target: "holdmesh::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Operation completed"
        );
    }
}

/// Log point cloud statistics at debug level.
pub fn log_cloud_stats(cloud: &PointCloud, context: &str) {
    let (min_bounds, max_bounds) = cloud.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "holdmesh::state",
        context = context,
        points = cloud.len(),
        has_colors = cloud.has_colors(),
        has_normals = cloud.has_normals(),
        dimensions = format!("{:.3} x {:.3} x {:.3}", dims.x, dims.y, dims.z),
        "Cloud state"
    );
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "holdmesh::state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        dimensions = format!("{:.3} x {:.3} x {:.3}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
    trace!(
        target: "holdmesh::state",
        context = context,
        has_colors = mesh.has_colors(),
        area = format!("{:.6}", mesh.surface_area()),
        signed_volume = format!("{:.6}", mesh.signed_volume()),
        "Detailed mesh state"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_operation");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_log_stats_on_empty_inputs() {
        log_mesh_stats(&Mesh::new(), "test");
        log_cloud_stats(&PointCloud::default(), "test");
        let _timer = OperationTimer::for_cluster("test", "A1");
    }
}
