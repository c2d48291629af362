//! Relaxed Jacobi kernel for the Richards equation on the voxel mask.
//!
//! Discretises `div(K grad(h + z)) - S = d(theta)/dt` (or the steady form
//! with a zero time derivative) with a seven-point finite-volume stencil,
//! arithmetic-mean face conductivities and face-centred differences. The
//! conductivity, capacity and sink arrays are evaluated once per driver call
//! from the entry state; the sweeps update h only, and the nonlinearity is
//! carried across calls by the outer time stepping.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::Field;

/// Sweep budget for [`run_steady`] when no override is given.
pub const STEADY_SWEEPS: usize = 1000;
/// Sweep budget per time step for [`run_unsteady`] when no override is given.
pub const UNSTEADY_SWEEPS: usize = 20;

/// Any active h below this after a sweep block marks the field dead.
const DIVERGENCE_LIMIT: f64 = -1e100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopBoundary {
    /// Prescribed surface flux q [m/s] into each top cell.
    Flux,
    /// Prescribed head h = 0 in a ghost cell above each top cell.
    Zero,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BottomBoundary {
    /// Unit-gradient outflow at the lowest active cell of every column.
    Free,
    /// Prescribed head h = 0 in a ghost cell below each bottom cell.
    Zero,
}

/// Boundary configuration and iteration tuning for one driver call.
#[derive(Clone, Copy)]
pub struct SolveControls<'a> {
    pub top: TopBoundary,
    pub bottom: BottomBoundary,
    /// Surface flux map q [m/s], shape (Nx, Ny). Required when `top` is
    /// [`TopBoundary::Flux`]; positive values wet the column.
    pub surface_flux: Option<&'a ndarray::Array2<f64>>,
    /// Transpiration map Tp [m/s], shape (Nx, Ny), feeding the root sink.
    pub transpiration: Option<&'a ndarray::Array2<f64>>,
    /// Sweep-count override; the driver default applies when `None`.
    pub iterations: Option<usize>,
    /// Relaxation factor for the Jacobi blend.
    pub relaxation: f64,
}

impl Default for SolveControls<'_> {
    fn default() -> Self {
        SolveControls {
            top: TopBoundary::Flux,
            bottom: BottomBoundary::Free,
            surface_flux: None,
            transpiration: None,
            iterations: None,
            relaxation: 0.9,
        }
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("field is dead; replicate or rebuild it before solving again")]
    DeadField,
    #[error("top boundary is flux-controlled but no surface flux map was supplied")]
    MissingSurfaceFlux,
    #[error("surface flux map shape {found:?} does not match the column grid {expected:?}")]
    SurfaceFluxShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("transpiration map shape {found:?} does not match the column grid {expected:?}")]
    TranspirationShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),
}

/// Steady solve: relax h in place over a fixed sweep budget.
///
/// Divergence is never surfaced as an error; it latches `field.dead_flag`
/// after the sweep block. Only configuration mistakes return `Err`.
pub fn run_steady(field: &mut Field, controls: &SolveControls) -> Result<(), SolverError> {
    solve(field, None, controls)
}

/// One backward-Euler time step of size `dt` [s], relaxed in place.
pub fn run_unsteady(field: &mut Field, dt: f64, controls: &SolveControls) -> Result<(), SolverError> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(SolverError::InvalidTimeStep(dt));
    }
    solve(field, Some(dt), controls)
}

fn solve(field: &mut Field, dt: Option<f64>, controls: &SolveControls) -> Result<(), SolverError> {
    if field.dead_flag {
        return Err(SolverError::DeadField);
    }
    let (nx, ny, nz) = field.shape();

    let q_flux = match controls.top {
        TopBoundary::Flux => {
            let q = controls.surface_flux.ok_or(SolverError::MissingSurfaceFlux)?;
            if q.dim() != (nx, ny) {
                return Err(SolverError::SurfaceFluxShape {
                    expected: (nx, ny),
                    found: q.dim(),
                });
            }
            Some(q)
        }
        TopBoundary::Zero => None,
    };
    if let Some(tp) = controls.transpiration {
        if tp.dim() != (nx, ny) {
            return Err(SolverError::TranspirationShape {
                expected: (nx, ny),
                found: tp.dim(),
            });
        }
    }

    let sweeps = controls
        .iterations
        .unwrap_or(if dt.is_some() { UNSTEADY_SWEEPS } else { STEADY_SWEEPS });
    let lr = controls.relaxation;
    let CellSizes { dx2, dy2, dz2, dz } = CellSizes::of(field);

    // Coefficient fields are lagged at the entry state for the whole call.
    let cond = field.conductivity(f64::NAN);
    let sink = field.sink(controls.transpiration, f64::NAN);
    let accumulation = dt.map(|dt| (field.capacity(f64::NAN), field.h.clone(), dt));

    let mut is_top = Array3::from_elem((nx, ny, nz), false);
    for &[i, j, k] in &field.top_cells {
        is_top[[i, j, k]] = true;
    }
    let mut is_bottom = Array3::from_elem((nx, ny, nz), false);
    for &[i, j, k] in &field.bottom_cells {
        is_bottom[[i, j, k]] = true;
    }

    let top_zero = controls.top == TopBoundary::Zero;
    let bottom_zero = controls.bottom == BottomBoundary::Zero;

    let mut h_next = Array3::zeros((nx, ny, nz));

    for _ in 0..sweeps {
        for ((i, j, k), &active) in field.voxel.indexed_iter() {
            if !active {
                continue;
            }
            let c = (i, j, k);

            let (a_right, s_right) = lateral_face(field, &cond, c, neighbour(i + 1 < nx, (i + 1, j, k)), dx2);
            let (a_left, s_left) = lateral_face(field, &cond, c, neighbour(i > 0, (i.wrapping_sub(1), j, k)), dx2);
            let (a_front, s_front) = lateral_face(field, &cond, c, neighbour(j + 1 < ny, (i, j + 1, k)), dy2);
            let (a_back, s_back) = lateral_face(field, &cond, c, neighbour(j > 0, (i, j.wrapping_sub(1), k)), dy2);

            // Upper face: active neighbour, Dirichlet ghost above a top
            // cell, or inactive. The ghost carries h = 0 and the local
            // saturated k, and feeds the same a/s/b channels an interior
            // face would.
            let up = neighbour(k + 1 < nz, (i, j, k + 1));
            let (a_up, s_up, mut b_up) = match up {
                Some(n) if field.voxel[n] => {
                    let kf = (cond[n] + cond[c]) / 2.0;
                    let a = kf / dz2;
                    (a, a * field.h[n], kf / dz)
                }
                _ if top_zero && is_top[[i, j, k]] => {
                    let kf = (field.k[c] + cond[c]) / 2.0;
                    (kf / dz2, 0.0, kf / dz)
                }
                _ => (0.0, 0.0, 0.0),
            };
            if let Some(q) = q_flux {
                if is_top[[i, j, k]] {
                    // surface flux enters through the gravity channel only
                    b_up = q[[i, j]] / dz;
                }
            }

            let down = neighbour(k > 0, (i, j, k.wrapping_sub(1)));
            let (a_down, s_down, mut b_down) = match down {
                Some(n) if field.voxel[n] => {
                    let kf = (cond[n] + cond[c]) / 2.0;
                    let a = kf / dz2;
                    (a, a * field.h[n], -kf / dz)
                }
                _ if bottom_zero && is_bottom[[i, j, k]] => {
                    let kf = (field.k[c] + cond[c]) / 2.0;
                    (kf / dz2, 0.0, -kf / dz)
                }
                _ => (0.0, 0.0, 0.0),
            };
            if is_bottom[[i, j, k]] {
                // free drainage: unit hydraulic gradient through the lowest
                // active cell, using the local unsaturated conductivity
                b_down = -cond[c] / dz;
            }

            let flux_sum =
                s_right + s_left + s_front + s_back + s_up + s_down + sink[c] + b_up + b_down;
            h_next[c] = match &accumulation {
                None => {
                    let a_i = a_right + a_left + a_front + a_back + a_up + a_down;
                    flux_sum / a_i
                }
                Some((cw, h_before, dt)) => {
                    let storage = cw[c] / dt;
                    let a_i = storage + a_right + a_left + a_front + a_back + a_up + a_down;
                    (storage * h_before[c] + flux_sum) / a_i
                }
            };
        }

        // Jacobi blend from the pre-sweep state, then the ponding clamp.
        let voxel = &field.voxel;
        for ((i, j, k), &active) in voxel.indexed_iter() {
            if !active {
                continue;
            }
            let blended = (1.0 - lr) * field.h[[i, j, k]] + lr * h_next[[i, j, k]];
            field.h[[i, j, k]] = if blended > 0.0 { 0.0 } else { blended };
        }
    }

    let diverged = field
        .voxel
        .indexed_iter()
        .any(|(idx, &active)| active && !(field.h[idx].is_finite() && field.h[idx] >= DIVERGENCE_LIMIT));
    if diverged {
        field.dead_flag = true;
        log::warn!("richards solve diverged; field marked dead");
    }
    Ok(())
}

struct CellSizes {
    dx2: f64,
    dy2: f64,
    dz2: f64,
    dz: f64,
}

impl CellSizes {
    fn of(field: &Field) -> Self {
        CellSizes {
            dx2: field.size.dx * field.size.dx,
            dy2: field.size.dy * field.size.dy,
            dz2: field.size.dz * field.size.dz,
            dz: field.size.dz,
        }
    }
}

fn neighbour(in_bounds: bool, idx: (usize, usize, usize)) -> Option<(usize, usize, usize)> {
    in_bounds.then_some(idx)
}

/// Face coefficient and neighbour contribution for one lateral direction.
/// A face with a void or out-of-bounds endpoint contributes nothing.
fn lateral_face(
    field: &Field,
    cond: &Array3<f64>,
    c: (usize, usize, usize),
    nb: Option<(usize, usize, usize)>,
    d2: f64,
) -> (f64, f64) {
    match nb {
        Some(n) if field.voxel[n] => {
            let kf = (cond[n] + cond[c]) / 2.0;
            let a = kf / d2;
            (a, a * field.h[n])
        }
        _ => (0.0, 0.0),
    }
}
