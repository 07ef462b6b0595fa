//! Pipeline configuration.
//!
//! A [`PipelineConfig`] gathers the parameters of every stage so a whole run
//! can be described in one file. Every section is optional; missing fields
//! take their defaults.
//!
//! # Example TOML
//!
//! ```toml
//! threads = 8
//!
//! [lattice]
//! origin = [0.0, 0.0, 0.0]
//! edge_u = [2.0, 0.0, 0.0]
//! edge_v = [0.0, 3.4, 0.0]
//! rows = 18
//! cols = 11
//!
//! [clip]
//! grid_spacing = 0.005
//!
//! [reconstruct]
//! density_quantile = 0.05
//!
//! [reconstruct.poisson]
//! depth = 7
//!
//! [registration]
//! coplanarity_weight = 0.2
//! seed = 7
//! ```

use std::path::Path;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::clip::ClipParams;
use crate::condition::ConditionParams;
use crate::error::{HoldError, HoldResult};
use crate::lattice::{AnchorLattice, BOARD_COLS, BOARD_ROWS, generate_lattice};
use crate::layout::StageLayout;
use crate::reconstruct::ReconstructParams;
use crate::refine::RefineParams;
use crate::registration::RegistrationParams;
use crate::segment::SegmenterParams;

/// Three board corners and a grid size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    /// Corner of the first anchor.
    pub origin: [f64; 3],
    /// Corner reached by stepping across the columns.
    pub edge_u: [f64; 3],
    /// Corner reached by stepping across the rows.
    pub edge_v: [f64; 3],
    pub rows: usize,
    pub cols: usize,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            origin: [0.0, 0.0, 0.0],
            edge_u: [1.0, 0.0, 0.0],
            edge_v: [0.0, 1.0, 0.0],
            rows: BOARD_ROWS,
            cols: BOARD_COLS,
        }
    }
}

impl LatticeConfig {
    pub fn generate(&self) -> HoldResult<AnchorLattice> {
        generate_lattice(
            Point3::from(self.origin),
            Point3::from(self.edge_u),
            Point3::from(self.edge_v),
            self.rows,
            self.cols,
        )
    }
}

/// Configuration of a full pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for per-cluster stages. None uses all cores.
    pub threads: Option<usize>,

    /// Lattice from corners. When absent the lattice is read from a file.
    pub lattice: Option<LatticeConfig>,

    pub segment: SegmenterParams,
    pub clip: ClipParams,
    pub condition: ConditionParams,
    pub reconstruct: ReconstructParams,
    pub refine: RefineParams,
    pub registration: RegistrationParams,
    pub layout: StageLayout,
}

impl PipelineConfig {
    pub fn from_toml(toml_str: &str) -> HoldResult<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| HoldError::invalid_config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> HoldResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| HoldError::io_read(path, e))?;
        Self::from_toml(&contents)
    }

    pub fn to_toml(&self) -> HoldResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HoldError::invalid_config(format!("TOML serialize error: {e}")))
    }

    pub fn save_toml(&self, path: impl AsRef<Path>) -> HoldResult<()> {
        let path = path.as_ref();
        let toml_str = self.to_toml()?;
        std::fs::write(path, toml_str).map_err(|e| HoldError::io_write(path, e))
    }

    pub fn from_json(json_str: &str) -> HoldResult<Self> {
        let config: Self = serde_json::from_str(json_str)
            .map_err(|e| HoldError::invalid_config(format!("JSON parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> HoldResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| HoldError::invalid_config(format!("JSON serialize error: {e}")))
    }

    /// Load a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> HoldResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => {
                let contents =
                    std::fs::read_to_string(path).map_err(|e| HoldError::io_read(path, e))?;
                Self::from_json(&contents)
            }
            _ => Err(HoldError::unsupported_format(path)),
        }
    }

    /// Check every section, failing on the first bad value.
    pub fn validate(&self) -> HoldResult<()> {
        if self.threads == Some(0) {
            return Err(HoldError::invalid_config("threads must be at least 1"));
        }
        if let Some(lattice) = &self.lattice {
            if lattice.rows < 2 || lattice.cols < 2 {
                return Err(HoldError::invalid_config(format!(
                    "lattice must be at least 2x2, got {}x{}",
                    lattice.rows, lattice.cols
                )));
            }
            if lattice.cols > 26 {
                return Err(HoldError::invalid_config(format!(
                    "lattice has {} columns, names support at most 26",
                    lattice.cols
                )));
            }
        }

        let clip = &self.clip;
        if !(clip.grid_spacing > 0.0 && clip.grid_spacing.is_finite()) {
            return Err(HoldError::invalid_config(format!(
                "clip.grid_spacing must be positive, got {}",
                clip.grid_spacing
            )));
        }
        if clip.max_backing_points == 0 {
            return Err(HoldError::invalid_config("clip.max_backing_points must be at least 1"));
        }

        let condition = &self.condition;
        if !(condition.normal_radius > 0.0) {
            return Err(HoldError::invalid_config("condition.normal_radius must be positive"));
        }
        if condition.max_neighbors < 3 || condition.orientation_neighbors == 0 {
            return Err(HoldError::invalid_config(
                "condition needs max_neighbors >= 3 and orientation_neighbors >= 1",
            ));
        }
        if condition.outlier_neighbors == 0 || !(condition.outlier_std_ratio > 0.0) {
            return Err(HoldError::invalid_config(
                "condition outlier filter needs neighbours >= 1 and a positive std ratio",
            ));
        }

        let reconstruct = &self.reconstruct;
        reconstruct
            .poisson
            .validate()
            .map_err(|e| HoldError::invalid_config(format!("reconstruct.poisson: {e}")))?;
        if !(0.0..1.0).contains(&reconstruct.density_quantile) {
            return Err(HoldError::invalid_config(format!(
                "reconstruct.density_quantile must be in [0, 1), got {}",
                reconstruct.density_quantile
            )));
        }
        if reconstruct.ball_radii.iter().any(|r| !(*r > 0.0)) {
            return Err(HoldError::invalid_config("reconstruct.ball_radii must be positive"));
        }

        if self.refine.max_hole_edges < 3 {
            return Err(HoldError::invalid_config("refine.max_hole_edges must be at least 3"));
        }
        if !(self.refine.plane_tolerance >= 0.0) {
            return Err(HoldError::invalid_config("refine.plane_tolerance must not be negative"));
        }

        self.registration
            .validate()
            .map_err(|e| HoldError::invalid_config(format!("registration: {e}")))?;
        Ok(())
    }
}
