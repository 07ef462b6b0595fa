//! End-to-end checks of the holdmesh binary.

use std::process::Command;

use holdmesh::PipelineConfig;
use holdmesh::io::load_point_cloud;
use tempfile::tempdir;

fn holdmesh() -> Command {
    Command::new(env!("CARGO_BIN_EXE_holdmesh"))
}

#[test]
fn config_prints_loadable_toml() {
    let out = holdmesh().arg("config").output().unwrap();
    assert!(out.status.success());

    let toml = String::from_utf8(out.stdout).unwrap();
    let config = PipelineConfig::from_toml(&toml).unwrap();
    assert_eq!(config, PipelineConfig::default());
}

#[test]
fn lattice_writes_anchor_cloud() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lattice.ply");
    let out = holdmesh()
        .args([
            "--format",
            "json",
            "lattice",
            "--origin=-1,0,0",
            "--edge-u",
            "1,0,0",
            "--edge-v",
            "-1,2,0",
            "--rows",
            "3",
            "--cols",
            "2",
            "-o",
        ])
        .arg(&path)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["anchors"], 6);
    assert_eq!(load_point_cloud(&path).unwrap().len(), 6);
}

#[test]
fn missing_lattice_fails_with_code() {
    let dir = tempdir().unwrap();
    let out = holdmesh()
        .arg("segment")
        .arg(dir.path().join("scan.ply"))
        .arg("-o")
        .arg(dir.path().join("holds"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("HOLD-"));
}
