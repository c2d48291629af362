//! Legacy ASCII VTK export of the voxel lattice and any per-cell scalar
//! fields, for inspection in ParaView and friends.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ndarray::Array3;
use thiserror::Error;

use crate::field::CellSize;

#[derive(Debug, Error)]
pub enum VtkError {
    #[error("failed to write VTK file: {0}")]
    Io(#[from] io::Error),
    #[error("scalar field {name:?} has shape {found:?}, grid is {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
}

/// Write a STRUCTURED_GRID dataset with the given scalar fields attached as
/// POINT_DATA. Points run x-fastest, z-slowest; magnitudes below 1e-20 are
/// rounded to zero so denormal noise does not bloat the file.
pub fn write_vtk(
    path: impl AsRef<Path>,
    shape: (usize, usize, usize),
    size: CellSize,
    scalars: &[(&str, &Array3<f64>)],
) -> Result<(), VtkError> {
    for (name, values) in scalars {
        if values.dim() != shape {
            return Err(VtkError::ShapeMismatch {
                name: (*name).to_string(),
                expected: shape,
                found: values.dim(),
            });
        }
    }

    let (nx, ny, nz) = shape;
    let points = nx * ny * nz;
    let mut file = BufWriter::new(File::create(path)?);

    write!(file, "# vtk DataFile Version 2.0\nnumpyVTK\nASCII\n")?;
    write!(file, "DATASET STRUCTURED_GRID\n")?;
    write!(file, "DIMENSIONS {nx} {ny} {nz}\n")?;
    write!(file, "POINTS {points} float\n")?;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                writeln!(
                    file,
                    "{} {} {}",
                    i as f64 * size.dx,
                    j as f64 * size.dy,
                    k as f64 * size.dz
                )?;
            }
        }
    }

    if !scalars.is_empty() {
        write!(file, "POINT_DATA {points}\n")?;
        for (name, values) in scalars {
            write!(file, "SCALARS {name} float\n")?;
            write!(file, "LOOKUP_TABLE default\n")?;
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        let v = values[[i, j, k]];
                        let v = if v.abs() < 1e-20 { 0.0 } else { v };
                        writeln!(file, "{v}")?;
                    }
                }
            }
        }
    }
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn writes_the_legacy_header_and_rounds_tiny_scalars() {
        let path = std::env::temp_dir().join("vadose_vtk_writer_test.vtk");
        let mut head = Array3::from_elem((2, 1, 2), -0.5);
        head[[0, 0, 0]] = 1e-30;
        write_vtk(
            &path,
            (2, 1, 2),
            CellSize {
                dx: 0.1,
                dy: 0.1,
                dz: 0.1,
            },
            &[("head", &head)],
        )
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# vtk DataFile Version 2.0");
        assert_eq!(lines[1], "numpyVTK");
        assert_eq!(lines[2], "ASCII");
        assert_eq!(lines[3], "DATASET STRUCTURED_GRID");
        assert_eq!(lines[4], "DIMENSIONS 2 1 2");
        assert_eq!(lines[5], "POINTS 4 float");
        assert_eq!(lines[6], "0 0 0");
        assert!(text.contains("POINT_DATA 4"));
        assert!(text.contains("SCALARS head float"));
        assert!(text.contains("LOOKUP_TABLE default"));
        // the 1e-30 entry is the first scalar value, rounded to zero
        let data_start = lines.iter().position(|l| *l == "LOOKUP_TABLE default").unwrap();
        assert_eq!(lines[data_start + 1], "0");
        assert_eq!(lines[data_start + 2], "-0.5");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn scalar_shape_must_match_the_grid() {
        let path = std::env::temp_dir().join("vadose_vtk_shape_test.vtk");
        let wrong = Array3::zeros((1, 1, 1));
        let result = write_vtk(
            &path,
            (2, 1, 2),
            CellSize {
                dx: 0.1,
                dy: 0.1,
                dz: 0.1,
            },
            &[("head", &wrong)],
        );
        assert!(matches!(result, Err(VtkError::ShapeMismatch { .. })));
    }
}
