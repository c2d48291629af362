//! STL ingestion and voxelisation of the computational domain.
//!
//! Both ASCII and binary STL are accepted, including files with several
//! concatenated solids. Voxelisation samples the centre of each cell and
//! classifies it with the generalised winding number, which is robust to
//! the slivers and near-degenerate triangles survey meshes tend to carry.

use std::f64::consts::PI;
use std::fs;
use std::io;
use std::path::Path;

use ndarray::Array3;
use thiserror::Error;

use crate::field::{CellIndex, CellSize, bottom_cells, top_cells};

#[derive(Debug, Error)]
pub enum StlError {
    #[error("failed to read STL file: {0}")]
    Io(#[from] io::Error),
    #[error("binary STL data ended mid-record")]
    Truncated,
    #[error("malformed ASCII STL at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("STL contains no triangles")]
    Empty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StlFormat {
    Ascii,
    Binary,
}

/// Length unit the STL coordinates are expressed in. Millimetre meshes are
/// rescaled to metres at load so every downstream computation shares one
/// unit system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthUnit {
    Millimetres,
    Metres,
}

/// One `solid` record: facet normals as stored, vertices as (triangle,
/// corner) triples.
pub struct StlSolid {
    pub name: String,
    pub normals: Vec<[f64; 3]>,
    pub triangles: Vec<[[f64; 3]; 3]>,
}

pub struct StlMesh {
    pub solids: Vec<StlSolid>,
}

impl StlMesh {
    pub fn read(
        path: impl AsRef<Path>,
        unit: LengthUnit,
        format: StlFormat,
    ) -> Result<Self, StlError> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes, unit, format)
    }

    pub fn parse(bytes: &[u8], unit: LengthUnit, format: StlFormat) -> Result<Self, StlError> {
        let mut mesh = match format {
            StlFormat::Ascii => parse_ascii(bytes)?,
            StlFormat::Binary => parse_binary(bytes)?,
        };
        if mesh.solids.iter().all(|s| s.triangles.is_empty()) {
            return Err(StlError::Empty);
        }
        if unit == LengthUnit::Millimetres {
            for solid in &mut mesh.solids {
                for tri in &mut solid.triangles {
                    for vertex in tri {
                        for coord in vertex {
                            *coord /= 1000.0;
                        }
                    }
                }
            }
        }
        Ok(mesh)
    }

    fn triangles(&self) -> impl Iterator<Item = &[[f64; 3]; 3]> {
        self.solids.iter().flat_map(|s| s.triangles.iter())
    }

    /// Axis-aligned bounding box over every vertex, as (min, max) per axis.
    pub fn bounds(&self) -> [(f64, f64); 3] {
        let mut bounds = [(f64::INFINITY, f64::NEG_INFINITY); 3];
        for tri in self.triangles() {
            for vertex in tri {
                for (axis, b) in bounds.iter_mut().enumerate() {
                    b.0 = b.0.min(vertex[axis]);
                    b.1 = b.1.max(vertex[axis]);
                }
            }
        }
        bounds
    }

    /// Point-in-solid test by the generalised winding number: the summed
    /// van Oosterom-Strackee half solid angles reach 2*pi for points
    /// enclosed by an outward-oriented surface.
    pub fn contains(&self, point: [f64; 3]) -> bool {
        let mut winding = 0.0;
        for tri in self.triangles() {
            let a_v = sub(tri[0], point);
            let b_v = sub(tri[1], point);
            let c_v = sub(tri[2], point);
            let a = norm(a_v);
            let b = norm(b_v);
            let c = norm(c_v);
            let numer = det(a_v, b_v, c_v);
            let denom =
                a * b * c + c * dot(a_v, b_v) + a * dot(b_v, c_v) + b * dot(c_v, a_v);
            winding += numer.atan2(denom);
        }
        winding >= 2.0 * PI - 1e-10
    }
}

/// Voxelise the mesh interior on a lattice of the given cell size anchored
/// at the bounding-box minimum. Returns the mask together with the
/// topography-following top-cell and bottom-cell lists.
pub fn voxelise(
    mesh: &StlMesh,
    cell: CellSize,
) -> (Array3<bool>, Vec<CellIndex>, Vec<CellIndex>) {
    let [x_range, y_range, z_range] = mesh.bounds();
    let shape = (
        ((x_range.1 - x_range.0) / cell.dx) as usize,
        ((y_range.1 - y_range.0) / cell.dy) as usize,
        ((z_range.1 - z_range.0) / cell.dz) as usize,
    );
    let voxel = Array3::from_shape_fn(shape, |(i, j, k)| {
        let x = (i as f64 + 0.5) * cell.dx + x_range.0;
        let y = (j as f64 + 0.5) * cell.dy + y_range.0;
        let z = (k as f64 + 0.5) * cell.dz + z_range.0;
        mesh.contains([x, y, z])
    });
    let top = top_cells(&voxel);
    let bottom = bottom_cells(&voxel);
    (voxel, top, bottom)
}

fn parse_ascii(bytes: &[u8]) -> Result<StlMesh, StlError> {
    let text = String::from_utf8_lossy(bytes);
    let mut solids: Vec<StlSolid> = Vec::new();
    let mut pending: Vec<[f64; 3]> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(&"solid") => {
                solids.push(StlSolid {
                    name: tokens.get(1).unwrap_or(&"").to_string(),
                    normals: Vec::new(),
                    triangles: Vec::new(),
                });
            }
            Some(&"facet") => {
                let solid = solids.last_mut().ok_or(StlError::Malformed {
                    line: line_no,
                    reason: "facet outside of a solid".into(),
                })?;
                solid.normals.push(parse_triplet(&tokens, 2, line_no)?);
            }
            Some(&"vertex") => {
                let solid = solids.last_mut().ok_or(StlError::Malformed {
                    line: line_no,
                    reason: "vertex outside of a solid".into(),
                })?;
                pending.push(parse_triplet(&tokens, 1, line_no)?);
                if pending.len() == 3 {
                    solid.triangles.push([pending[0], pending[1], pending[2]]);
                    pending.clear();
                }
            }
            _ => {} // outer loop / endloop / endfacet / endsolid / blank
        }
    }
    if !pending.is_empty() {
        return Err(StlError::Malformed {
            line: 0,
            reason: "dangling vertices: triangle has fewer than three corners".into(),
        });
    }
    Ok(StlMesh { solids })
}

fn parse_triplet(tokens: &[&str], from: usize, line: usize) -> Result<[f64; 3], StlError> {
    let mut out = [0.0; 3];
    for (slot, out_c) in out.iter_mut().enumerate() {
        let token = tokens.get(from + slot).ok_or(StlError::Malformed {
            line,
            reason: "expected three coordinates".into(),
        })?;
        *out_c = token.parse().map_err(|_| StlError::Malformed {
            line,
            reason: format!("not a number: {token}"),
        })?;
    }
    Ok(out)
}

fn parse_binary(bytes: &[u8]) -> Result<StlMesh, StlError> {
    // Per solid: 80-byte name, u32 LE triangle count, then per triangle
    // 12 bytes facet normal + 36 bytes vertices + 2-byte attribute suffix.
    let mut solids = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        if bytes.len() - offset < 84 {
            return Err(StlError::Truncated);
        }
        let name = String::from_utf8_lossy(&bytes[offset..offset + 80])
            .trim_end_matches(['\0', ' '])
            .to_string();
        offset += 80;
        let count = u32::from_le_bytes(
            bytes[offset..offset + 4].try_into().expect("4-byte slice"),
        ) as usize;
        offset += 4;

        let mut solid = StlSolid {
            name,
            normals: Vec::with_capacity(count),
            triangles: Vec::with_capacity(count),
        };
        for _ in 0..count {
            if bytes.len() - offset < 50 {
                return Err(StlError::Truncated);
            }
            solid.normals.push(read_vec3(&bytes[offset..]));
            solid.triangles.push([
                read_vec3(&bytes[offset + 12..]),
                read_vec3(&bytes[offset + 24..]),
                read_vec3(&bytes[offset + 36..]),
            ]);
            offset += 50; // trailing 2 attribute bytes skipped
        }
        solids.push(solid);
    }
    Ok(StlMesh { solids })
}

fn read_vec3(bytes: &[u8]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (slot, out_c) in out.iter_mut().enumerate() {
        let at = slot * 4;
        *out_c = f32::from_le_bytes(bytes[at..at + 4].try_into().expect("4-byte slice")) as f64;
    }
    out
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

fn det(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> f64 {
    a[0] * (b[1] * c[2] - b[2] * c[1]) - a[1] * (b[0] * c[2] - b[2] * c[0])
        + a[2] * (b[0] * c[1] - b[1] * c[0])
}
