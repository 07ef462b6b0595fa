//! PLY file I/O for point clouds and meshes.
//!
//! Scans and meshes move between pipeline stages as PLY files. Reading
//! accepts ASCII and binary files with float or 8-bit colours; writing
//! always produces binary little-endian PLY with 8-bit colours.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HoldError, HoldResult};
use crate::pointcloud::PointCloud;
use crate::types::{Mesh, Rgb, Vertex};

/// How strictly [`load_mesh`] treats malformed geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshReadMode {
    /// Reject out-of-range indices and non-finite coordinates.
    #[default]
    Strict,
    /// Drop invalid and degenerate faces, merge exact duplicate vertices
    /// and remove unreferenced ones.
    PostProcess,
}

fn check_ply_extension(path: &Path) -> HoldResult<()> {
    let is_ply = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ply"));
    if is_ply {
        Ok(())
    } else {
        Err(HoldError::unsupported_format(path))
    }
}

fn read_ply(path: &Path) -> HoldResult<Ply<DefaultElement>> {
    check_ply_extension(path)?;
    let file = File::open(path).map_err(|e| HoldError::io_read(path, e))?;
    let mut reader = BufReader::new(file);
    Parser::<DefaultElement>::new()
        .read_ply(&mut reader)
        .map_err(|e| HoldError::parse_error(path, format!("PLY parse error: {e}")))
}

fn write_ply(mut ply: Ply<DefaultElement>, path: &Path) -> HoldResult<()> {
    check_ply_extension(path)?;
    ply.make_consistent().map_err(|e| {
        HoldError::io_write(path, std::io::Error::other(format!("PLY consistency error: {e:?}")))
    })?;

    let file = File::create(path).map_err(|e| HoldError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    Writer::new()
        .write_ply(&mut writer, &mut ply)
        .map_err(|e| HoldError::io_write(path, e))?;
    writer.flush().map_err(|e| HoldError::io_write(path, e))
}

fn scalar(prop: Option<&Property>) -> Option<f64> {
    match prop? {
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        Property::Int(v) => Some(*v as f64),
        Property::UInt(v) => Some(*v as f64),
        Property::Short(v) => Some(*v as f64),
        Property::UShort(v) => Some(*v as f64),
        Property::Char(v) => Some(*v as f64),
        Property::UChar(v) => Some(*v as f64),
        _ => None,
    }
}

/// Colour channel in [0, 1] for integer properties, raw for float ones.
fn channel(prop: Option<&Property>) -> Option<f64> {
    match prop? {
        Property::UChar(v) => Some(*v as f64 / 255.0),
        Property::UShort(v) => Some(*v as f64 / 65535.0),
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        other => scalar(Some(other)).map(|v| v / 255.0),
    }
}

fn face_indices(prop: Option<&Property>) -> Option<Vec<i64>> {
    Some(match prop? {
        Property::ListInt(v) => v.iter().map(|&i| i as i64).collect(),
        Property::ListUInt(v) => v.iter().map(|&i| i as i64).collect(),
        Property::ListShort(v) => v.iter().map(|&i| i as i64).collect(),
        Property::ListUShort(v) => v.iter().map(|&i| i as i64).collect(),
        Property::ListChar(v) => v.iter().map(|&i| i as i64).collect(),
        Property::ListUChar(v) => v.iter().map(|&i| i as i64).collect(),
        _ => return None,
    })
}

struct RawVertex {
    position: Point3<f64>,
    normal: Option<Vector3<f64>>,
    color: Option<Rgb>,
}

fn read_vertices(ply: &Ply<DefaultElement>, path: &Path) -> HoldResult<Vec<RawVertex>> {
    let Some(elements) = ply.payload.get("vertex") else {
        return Ok(Vec::new());
    };

    elements
        .iter()
        .enumerate()
        .map(|(i, element)| {
            let coord = |name: &str| {
                scalar(element.get(name)).ok_or_else(|| {
                    HoldError::parse_error(path, format!("vertex {i}: missing or invalid property '{name}'"))
                })
            };
            let position = Point3::new(coord("x")?, coord("y")?, coord("z")?);

            let normal = match (
                scalar(element.get("nx")),
                scalar(element.get("ny")),
                scalar(element.get("nz")),
            ) {
                (Some(x), Some(y), Some(z)) => Some(Vector3::new(x, y, z)),
                _ => None,
            };
            let color = match (
                channel(element.get("red")),
                channel(element.get("green")),
                channel(element.get("blue")),
            ) {
                (Some(r), Some(g), Some(b)) => Some(Rgb::new(r, g, b)),
                _ => None,
            };

            Ok(RawVertex {
                position,
                normal,
                color,
            })
        })
        .collect()
}

/// Load a point cloud from a PLY file.
///
/// Colours and normals are kept only when every vertex carries them.
/// Float colours in the 0-255 range are rescaled to [0, 1].
pub fn load_point_cloud(path: &Path) -> HoldResult<PointCloud> {
    let ply = read_ply(path)?;
    let raw = read_vertices(&ply, path)?;
    if raw.is_empty() {
        return Err(HoldError::empty_cloud(format!("{} has no vertices", path.display())));
    }

    let colors: Option<Vec<Rgb>> = raw.iter().map(|v| v.color).collect();
    let normals: Option<Vec<Vector3<f64>>> = raw.iter().map(|v| v.normal).collect();
    let points: Vec<Point3<f64>> = raw.into_iter().map(|v| v.position).collect();

    let mut cloud = match colors {
        Some(colors) => PointCloud::with_colors(points, colors)?,
        None => PointCloud::new(points),
    };
    if let Some(normals) = normals {
        cloud.set_normals(normals)?;
    }
    if cloud.normalize_colors() {
        debug!(path = %path.display(), "Rescaled 0-255 float colours");
    }

    info!(
        path = %path.display(),
        points = cloud.len(),
        colors = cloud.has_colors(),
        normals = cloud.has_normals(),
        "Loaded point cloud"
    );
    Ok(cloud)
}

fn float_property(def: &mut ElementDef, name: &str) {
    def.properties
        .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::Float)));
}

fn uchar_property(def: &mut ElementDef, name: &str) {
    def.properties
        .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::UChar)));
}

fn vertex_def(count: usize, normals: bool, colors: bool) -> ElementDef {
    let mut def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        float_property(&mut def, name);
    }
    if normals {
        for name in ["nx", "ny", "nz"] {
            float_property(&mut def, name);
        }
    }
    if colors {
        for name in ["red", "green", "blue"] {
            uchar_property(&mut def, name);
        }
    }
    def.count = count;
    def
}

fn vertex_element(
    position: &Point3<f64>,
    normal: Option<Option<Vector3<f64>>>,
    color: Option<Option<Rgb>>,
) -> DefaultElement {
    let mut element = DefaultElement::new();
    element.insert("x".to_string(), Property::Float(position.x as f32));
    element.insert("y".to_string(), Property::Float(position.y as f32));
    element.insert("z".to_string(), Property::Float(position.z as f32));
    if let Some(normal) = normal {
        let n = normal.unwrap_or_else(Vector3::zeros);
        element.insert("nx".to_string(), Property::Float(n.x as f32));
        element.insert("ny".to_string(), Property::Float(n.y as f32));
        element.insert("nz".to_string(), Property::Float(n.z as f32));
    }
    if let Some(color) = color {
        let [r, g, b] = color.unwrap_or(Rgb::WHITE).to_u8();
        element.insert("red".to_string(), Property::UChar(r));
        element.insert("green".to_string(), Property::UChar(g));
        element.insert("blue".to_string(), Property::UChar(b));
    }
    element
}

/// Save a point cloud as binary PLY.
///
/// Colours given in 0-255 are divided by 255 before being written as
/// 8-bit channels.
pub fn save_point_cloud(cloud: &PointCloud, path: &Path) -> HoldResult<()> {
    let mut normalized;
    let cloud = if cloud.has_colors() {
        normalized = cloud.clone();
        normalized.normalize_colors();
        &normalized
    } else {
        cloud
    };

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;
    ply.header
        .elements
        .add(vertex_def(cloud.len(), cloud.has_normals(), cloud.has_colors()));

    let payload: Vec<DefaultElement> = (0..cloud.len())
        .map(|i| {
            vertex_element(
                &cloud.points[i],
                cloud.has_normals().then(|| cloud.normal(i)),
                cloud.has_colors().then(|| cloud.color(i)),
            )
        })
        .collect();
    ply.payload.insert("vertex".to_string(), payload);

    write_ply(ply, path)?;
    debug!(path = %path.display(), points = cloud.len(), "Saved point cloud");
    Ok(())
}

/// Load a triangle mesh from a PLY file.
///
/// Polygons are fan-triangulated. See [`MeshReadMode`] for how invalid
/// geometry is handled.
pub fn load_mesh(path: &Path, mode: MeshReadMode) -> HoldResult<Mesh> {
    let ply = read_ply(path)?;
    let raw = read_vertices(&ply, path)?;

    let mut mesh = Mesh::with_capacity(raw.len(), 0);
    for v in raw {
        mesh.vertices.push(Vertex {
            position: v.position,
            normal: v.normal,
            color: v.color,
        });
    }

    let vertex_count = mesh.vertices.len() as i64;
    let mut dropped = 0usize;
    for (face_index, element) in ply.payload.get("face").into_iter().flatten().enumerate() {
        let Some(indices) =
            face_indices(element.get("vertex_indices").or_else(|| element.get("vertex_index")))
        else {
            continue;
        };

        if let Some(&bad) = indices.iter().find(|&&i| i < 0 || i >= vertex_count) {
            match mode {
                MeshReadMode::Strict => {
                    return Err(HoldError::parse_error(
                        path,
                        format!("face {face_index} references vertex {bad}, mesh has {vertex_count}"),
                    ));
                }
                MeshReadMode::PostProcess => {
                    dropped += 1;
                    continue;
                }
            }
        }

        for i in 1..indices.len().saturating_sub(1) {
            mesh.faces
                .push([indices[0] as u32, indices[i] as u32, indices[i + 1] as u32]);
        }
    }

    if mesh.vertices.is_empty() || mesh.faces.is_empty() {
        return Err(HoldError::empty_mesh(format!(
            "{} has no vertices or faces",
            path.display()
        )));
    }

    match mode {
        MeshReadMode::Strict => {
            if let Some(i) = mesh.vertices.iter().position(|v| !all_finite(&v.position)) {
                return Err(HoldError::parse_error(
                    path,
                    format!("vertex {i} has a non-finite coordinate"),
                ));
            }
        }
        MeshReadMode::PostProcess => {
            let report = post_process(&mut mesh);
            if dropped + report.faces_removed > 0 || report.vertices_merged > 0 {
                warn!(
                    path = %path.display(),
                    invalid_faces = dropped,
                    degenerate_faces = report.faces_removed,
                    merged_vertices = report.vertices_merged,
                    "Cleaned mesh on load"
                );
            }
            if mesh.faces.is_empty() {
                return Err(HoldError::empty_mesh(format!(
                    "{} has no valid faces",
                    path.display()
                )));
            }
        }
    }

    info!(
        path = %path.display(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Loaded mesh"
    );
    Ok(mesh)
}

fn all_finite(p: &Point3<f64>) -> bool {
    p.iter().all(|c| c.is_finite())
}

#[derive(Debug, Default)]
struct PostProcessReport {
    faces_removed: usize,
    vertices_merged: usize,
}

fn post_process(mesh: &mut Mesh) -> PostProcessReport {
    let mut report = PostProcessReport::default();

    let before = mesh.faces.len();
    let vertices = &mesh.vertices;
    mesh.faces
        .retain(|f| f.iter().all(|&i| all_finite(&vertices[i as usize].position)));

    // Exact duplicate positions collapse onto the first occurrence.
    let mut first: HashMap<[u64; 3], u32> = HashMap::new();
    let remap: Vec<u32> = mesh
        .vertices
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let key = [
                v.position.x.to_bits(),
                v.position.y.to_bits(),
                v.position.z.to_bits(),
            ];
            *first.entry(key).or_insert(i as u32)
        })
        .collect();
    report.vertices_merged = remap
        .iter()
        .enumerate()
        .filter(|&(i, &r)| i as u32 != r)
        .count();
    for face in &mut mesh.faces {
        for v in face.iter_mut() {
            *v = remap[*v as usize];
        }
    }

    mesh.remove_degenerate_faces(0.0);
    report.faces_removed = before - mesh.faces.len();
    mesh.remove_unreferenced_vertices();
    report
}

/// Save a mesh as binary PLY, with normals and colours when present.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> HoldResult<()> {
    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());
    let has_colors = mesh.has_colors();

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;
    ply.header
        .elements
        .add(vertex_def(mesh.vertex_count(), has_normals, has_colors));

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.face_count();
    ply.header.elements.add(face_def);

    let vertices: Vec<DefaultElement> = mesh
        .vertices
        .iter()
        .map(|v| {
            vertex_element(
                &v.position,
                has_normals.then_some(v.normal),
                has_colors.then_some(v.color),
            )
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let faces: Vec<DefaultElement> = mesh
        .faces
        .iter()
        .map(|f| {
            let mut element = DefaultElement::new();
            element.insert(
                "vertex_indices".to_string(),
                Property::ListInt(vec![f[0] as i32, f[1] as i32, f[2] as i32]),
            );
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces);

    write_ply(ply, path)?;
    debug!(
        path = %path.display(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Saved mesh"
    );
    Ok(())
}
