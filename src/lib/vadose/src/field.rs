use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vangenuchten as vg;

/// (ix, iy, iz) index of one voxel.
pub type CellIndex = [usize; 3];

/// Cell edge lengths [m].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CellSize {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

/// Root water-stress response, one parameterisation active per field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RootStress {
    /// Piecewise-linear Feddes breakpoints [m], a0 > a1 > a2 > a3 per cell.
    Feddes {
        a0: Array3<f64>,
        a1: Array3<f64>,
        a2: Array3<f64>,
        a3: Array3<f64>,
    },
    /// S-shaped response: h50 [m] and shape exponent p per cell.
    SShaped { h50: Array3<f64>, p: Array3<f64> },
}

/// Root density distribution [1/m] plus its stress response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RootUptake {
    pub density: Array3<f64>,
    pub stress: RootStress,
}

/// Initial state and hydraulic parameter distributions handed to
/// [`Field::new`]. All arrays share the voxel shape; `m` defaults to
/// 1 - 1/n and `l` to 0.5 when not supplied.
pub struct FieldParams {
    /// Matric potential [m]
    pub h: Array3<f64>,
    /// Saturated conductivity [m/s]
    pub k: Array3<f64>,
    /// Saturated water content [dimensionless]
    pub theta_s: Array3<f64>,
    /// Residual water content [dimensionless]
    pub theta_r: Array3<f64>,
    /// van Genuchten alpha [1/m]
    pub alpha: Array3<f64>,
    /// van Genuchten n [dimensionless]
    pub n: Array3<f64>,
    pub m: Option<Array3<f64>>,
    pub l: Option<Array3<f64>>,
    pub root: Option<RootUptake>,
}

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("field array shape {found:?} does not match voxel shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("voxel mask contains no active cells")]
    EmptyMask,
    #[error("top-cell list does not enumerate the highest active cell of every column")]
    BadTopCells,
    #[error("bottom-cell list does not enumerate the lowest active cell of every column")]
    BadBottomCells,
}

/// Complete simulation state at one time: the voxel mask, the matric
/// potential distribution and the per-cell hydraulic parameters.
///
/// Void cells (mask false) carry an f64 NaN sentinel in every physical
/// array. All consumers branch on the mask; the sentinel exists so exported
/// arrays are self-describing, not because anything downstream relies on
/// NaN propagation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Field {
    pub voxel: Array3<bool>,
    pub top_cells: Vec<CellIndex>,
    pub bottom_cells: Vec<CellIndex>,
    pub size: CellSize,
    /// Matric potential [m], <= 0 in active cells, mutated in place by the
    /// solver drivers.
    pub h: Array3<f64>,
    /// Saturated conductivity [m/s]
    pub k: Array3<f64>,
    pub theta_s: Array3<f64>,
    pub theta_r: Array3<f64>,
    pub alpha: Array3<f64>,
    pub n: Array3<f64>,
    pub m: Array3<f64>,
    pub l: Array3<f64>,
    pub root: Option<RootUptake>,
    /// Latched by the solver when an iteration diverged. A dead field is
    /// excluded from likelihood computations and refused by the drivers.
    pub dead_flag: bool,
}

impl Field {
    pub fn new(
        voxel: Array3<bool>,
        top_cells: Vec<CellIndex>,
        bottom_cells: Vec<CellIndex>,
        size: CellSize,
        params: FieldParams,
    ) -> Result<Self, FieldError> {
        let shape = voxel.dim();
        if !voxel.iter().any(|&a| a) {
            return Err(FieldError::EmptyMask);
        }
        for arr in [
            &params.h,
            &params.k,
            &params.theta_s,
            &params.theta_r,
            &params.alpha,
            &params.n,
        ] {
            check_shape(shape, arr)?;
        }
        if let Some(m) = &params.m {
            check_shape(shape, m)?;
        }
        if let Some(l) = &params.l {
            check_shape(shape, l)?;
        }
        if let Some(root) = &params.root {
            check_shape(shape, &root.density)?;
            match &root.stress {
                RootStress::Feddes { a0, a1, a2, a3 } => {
                    for arr in [a0, a1, a2, a3] {
                        check_shape(shape, arr)?;
                    }
                }
                RootStress::SShaped { h50, p } => {
                    check_shape(shape, h50)?;
                    check_shape(shape, p)?;
                }
            }
        }

        if !same_cells(&top_cells, &top_cells_of(&voxel)) {
            return Err(FieldError::BadTopCells);
        }
        if !same_cells(&bottom_cells, &bottom_cells_of(&voxel)) {
            return Err(FieldError::BadBottomCells);
        }

        let m = match params.m {
            Some(m) => masked(&voxel, &m),
            None => {
                let mut m = params.n.mapv(|n| 1.0 - 1.0 / n);
                void_fill(&voxel, &mut m);
                m
            }
        };
        let l = match params.l {
            Some(l) => masked(&voxel, &l),
            None => masked(&voxel, &Array3::from_elem(shape, 0.5)),
        };
        let root = params.root.map(|mut root| {
            void_fill(&voxel, &mut root.density);
            match &mut root.stress {
                RootStress::Feddes { a0, a1, a2, a3 } => {
                    void_fill(&voxel, a0);
                    void_fill(&voxel, a1);
                    void_fill(&voxel, a2);
                    void_fill(&voxel, a3);
                }
                RootStress::SShaped { h50, p } => {
                    void_fill(&voxel, h50);
                    void_fill(&voxel, p);
                }
            }
            root
        });

        Ok(Field {
            h: masked(&voxel, &params.h),
            k: masked(&voxel, &params.k),
            theta_s: masked(&voxel, &params.theta_s),
            theta_r: masked(&voxel, &params.theta_r),
            alpha: masked(&voxel, &params.alpha),
            n: masked(&voxel, &params.n),
            m,
            l,
            root,
            voxel,
            top_cells,
            bottom_cells,
            size,
            dead_flag: false,
        })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.voxel.dim()
    }

    /// Matric potential [m] with `ghost` substituted in void cells.
    pub fn head(&self, ghost: f64) -> Array3<f64> {
        self.derived(ghost, |s, idx| s.h[idx])
    }

    /// Effective saturation [dimensionless] with `ghost` in void cells.
    pub fn saturation(&self, ghost: f64) -> Array3<f64> {
        self.derived(ghost, |s, idx| {
            vg::effective_saturation(s.h[idx], s.alpha[idx], s.n[idx], s.m[idx])
        })
    }

    /// Unsaturated conductivity [m/s] with `ghost` in void cells.
    pub fn conductivity(&self, ghost: f64) -> Array3<f64> {
        self.derived(ghost, |s, idx| {
            vg::conductivity(s.h[idx], s.k[idx], s.alpha[idx], s.n[idx], s.m[idx], s.l[idx])
        })
    }

    /// Specific moisture capacity [1/m] with `ghost` in void cells.
    pub fn capacity(&self, ghost: f64) -> Array3<f64> {
        self.derived(ghost, |s, idx| {
            vg::moisture_capacity(s.alpha[idx], s.n[idx], s.theta_s[idx], s.theta_r[idx], s.h[idx])
        })
    }

    /// Water content [dimensionless] with `ghost` in void cells.
    pub fn water_content(&self, ghost: f64) -> Array3<f64> {
        self.derived(ghost, |s, idx| {
            vg::water_content(
                s.h[idx],
                s.alpha[idx],
                s.n[idx],
                s.m[idx],
                s.theta_s[idx],
                s.theta_r[idx],
            )
        })
    }

    /// Plant-uptake sink term S [1/s]: -F(h) * Tp * B elementwise, with the
    /// transpiration map Tp [m/s] broadcast down each column. Identically
    /// zero in active cells when no root distribution or no Tp is present.
    pub fn sink(&self, tp: Option<&Array2<f64>>, ghost: f64) -> Array3<f64> {
        match (&self.root, tp) {
            (Some(root), Some(tp)) => self.derived(ghost, |s, idx| {
                let f = match &root.stress {
                    RootStress::Feddes { a0, a1, a2, a3 } => {
                        vg::feddes_stress(s.h[idx], a0[idx], a1[idx], a2[idx], a3[idx])
                    }
                    RootStress::SShaped { h50, p } => {
                        vg::s_shaped_stress(s.h[idx], h50[idx], p[idx])
                    }
                };
                -f * tp[[idx[0], idx[1]]] * root.density[idx]
            }),
            _ => self.derived(ghost, |_, _| 0.0),
        }
    }

    /// Ponding is disallowed: pull every active h above zero back to zero.
    pub fn clamp_ponding(&mut self) {
        self.h.zip_mut_with(&self.voxel, |h, &active| {
            if active && *h > 0.0 {
                *h = 0.0;
            }
        });
    }

    /// Deep copy for ensemble resampling. Every array is duplicated; a
    /// divergence latch does not survive replication.
    pub fn replicate(&self) -> Field {
        let mut copy = self.clone();
        copy.dead_flag = false;
        copy
    }

    fn derived(&self, ghost: f64, f: impl Fn(&Field, CellIndex) -> f64) -> Array3<f64> {
        Array3::from_shape_fn(self.shape(), |(i, j, k)| {
            if self.voxel[[i, j, k]] {
                f(self, [i, j, k])
            } else {
                ghost
            }
        })
    }
}

fn check_shape(expected: (usize, usize, usize), arr: &Array3<f64>) -> Result<(), FieldError> {
    if arr.dim() != expected {
        return Err(FieldError::ShapeMismatch {
            expected,
            found: arr.dim(),
        });
    }
    Ok(())
}

fn masked(voxel: &Array3<bool>, values: &Array3<f64>) -> Array3<f64> {
    let mut out = values.clone();
    void_fill(voxel, &mut out);
    out
}

fn void_fill(voxel: &Array3<bool>, values: &mut Array3<f64>) {
    values.zip_mut_with(voxel, |v, &active| {
        if !active {
            *v = f64::NAN;
        }
    });
}

fn same_cells(given: &[CellIndex], derived: &[CellIndex]) -> bool {
    let mut a: Vec<CellIndex> = given.to_vec();
    let mut b: Vec<CellIndex> = derived.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

fn top_cells_of(voxel: &Array3<bool>) -> Vec<CellIndex> {
    let (nx, ny, nz) = voxel.dim();
    let mut cells = Vec::new();
    for i in 0..nx {
        for j in 0..ny {
            for k in (0..nz).rev() {
                if voxel[[i, j, k]] {
                    cells.push([i, j, k]);
                    break;
                }
            }
        }
    }
    cells
}

fn bottom_cells_of(voxel: &Array3<bool>) -> Vec<CellIndex> {
    let (nx, ny, nz) = voxel.dim();
    let mut cells = Vec::new();
    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                if voxel[[i, j, k]] {
                    cells.push([i, j, k]);
                    break;
                }
            }
        }
    }
    cells
}

/// Highest active cell of every column that has one.
pub fn top_cells(voxel: &Array3<bool>) -> Vec<CellIndex> {
    top_cells_of(voxel)
}

/// Lowest active cell of every column that has one (the free-drainage
/// surface).
pub fn bottom_cells(voxel: &Array3<bool>) -> Vec<CellIndex> {
    bottom_cells_of(voxel)
}
