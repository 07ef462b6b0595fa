//! On-disk layout of a pipeline work directory.
//!
//! Every stage writes one PLY file per cluster into its own directory under
//! a common root, named after the cluster:
//!
//! ```text
//! <root>/holds/A18.ply      segmented clouds
//! <root>/clipped/A18.ply    clipped clouds with backing points
//! <root>/poisson/A18.ply    reconstructed meshes
//! <root>/refined/A18.ply    refined meshes
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HoldError, HoldResult};

/// A pipeline stage with per-cluster output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Segmented,
    Clipped,
    Reconstructed,
    Refined,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Segmented,
        Stage::Clipped,
        Stage::Reconstructed,
        Stage::Refined,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Segmented => "segment",
            Stage::Clipped => "clip",
            Stage::Reconstructed => "reconstruct",
            Stage::Refined => "refine",
        }
    }
}

/// Directory names for each stage, relative to the work directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageLayout {
    pub segmented: String,
    pub clipped: String,
    pub reconstructed: String,
    pub refined: String,
}

impl Default for StageLayout {
    fn default() -> Self {
        Self {
            segmented: "holds".to_string(),
            clipped: "clipped".to_string(),
            reconstructed: "poisson".to_string(),
            refined: "refined".to_string(),
        }
    }
}

impl StageLayout {
    pub fn dir_name(&self, stage: Stage) -> &str {
        match stage {
            Stage::Segmented => &self.segmented,
            Stage::Clipped => &self.clipped,
            Stage::Reconstructed => &self.reconstructed,
            Stage::Refined => &self.refined,
        }
    }

    pub fn stage_dir(&self, root: &Path, stage: Stage) -> PathBuf {
        root.join(self.dir_name(stage))
    }

    /// `<root>/<stage dir>/<name>.ply`.
    pub fn path(&self, root: &Path, stage: Stage, name: &str) -> PathBuf {
        self.stage_dir(root, stage).join(format!("{name}.ply"))
    }

    /// Create every stage directory under `root`.
    pub fn ensure_dirs(&self, root: &Path) -> HoldResult<()> {
        for stage in Stage::ALL {
            let dir = self.stage_dir(root, stage);
            std::fs::create_dir_all(&dir).map_err(|e| HoldError::io_write(&dir, e))?;
        }
        Ok(())
    }
}

/// `<stem>_moved.<ext>` next to `path`.
pub fn moved_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem}_moved.{}", ext.to_string_lossy()),
        None => format!("{stem}_moved"),
    };
    path.with_file_name(file_name)
}

/// Stems of the `*.ply` files in `dir`, sorted.
pub fn cluster_names_in(dir: &Path) -> HoldResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| HoldError::io_read(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| HoldError::io_read(dir, e))?.path();
        let is_ply = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("ply"));
        if is_ply
            && path.is_file()
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stage_paths() {
        let layout = StageLayout::default();
        let root = Path::new("/work");
        assert_eq!(
            layout.path(root, Stage::Segmented, "K1"),
            PathBuf::from("/work/holds/K1.ply")
        );
        assert_eq!(
            layout.path(root, Stage::Reconstructed, "A18"),
            PathBuf::from("/work/poisson/A18.ply")
        );
    }

    #[test]
    fn test_moved_path() {
        assert_eq!(
            moved_path(Path::new("unregistered/lowdown.ply")),
            PathBuf::from("unregistered/lowdown_moved.ply")
        );
        assert_eq!(moved_path(Path::new("scan")), PathBuf::from("scan_moved"));
    }

    #[test]
    fn test_cluster_names_sorted() {
        let dir = tempdir().unwrap();
        for name in ["B2.ply", "A10.ply", "A2.PLY", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.ply")).unwrap();

        let names = cluster_names_in(dir.path()).unwrap();
        assert_eq!(names, vec!["A10", "A2", "B2"]);
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempdir().unwrap();
        let layout = StageLayout::default();
        layout.ensure_dirs(dir.path()).unwrap();
        for stage in Stage::ALL {
            assert!(layout.stage_dir(dir.path(), stage).is_dir());
        }
    }
}
