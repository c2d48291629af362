//! End-to-end behaviour of the solver and the assimilation operators on
//! small columns: wetting fronts, drainage, hydrostatic flux balance,
//! discrete mass balance, and the degenerate resampling cases with known
//! closed-form outcomes.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, Array3};
use rand::SeedableRng;
use rand::rngs::StdRng;

use vadose::{
    BlxAlpha, BottomBoundary, CellSize, Ensemble, Field, FieldParams, HeadMode, Individual,
    IndividualModel, MergingParticleFilter, ParticleFilter, RootStress, RootUptake, SolveControls,
    bottom_cells, run_steady, run_unsteady, top_cells,
};

const DZ: f64 = 0.1;

fn column(nz: usize, h0: f64, soil: [f64; 5], root: Option<RootUptake>) -> Field {
    let [k, theta_s, theta_r, alpha, n] = soil;
    let voxel = Array3::from_elem((1, 1, nz), true);
    let shape = voxel.dim();
    Field::new(
        voxel.clone(),
        top_cells(&voxel),
        bottom_cells(&voxel),
        CellSize {
            dx: DZ,
            dy: DZ,
            dz: DZ,
        },
        FieldParams {
            h: Array3::from_elem(shape, h0),
            k: Array3::from_elem(shape, k),
            theta_s: Array3::from_elem(shape, theta_s),
            theta_r: Array3::from_elem(shape, theta_r),
            alpha: Array3::from_elem(shape, alpha),
            n: Array3::from_elem(shape, n),
            m: None,
            l: None,
            root,
        },
    )
    .unwrap()
}

const SAND: [f64; 5] = [8.25e-5, 0.43, 0.045, 14.5, 2.68];
const LOAM: [f64; 5] = [2.9e-6, 0.43, 0.078, 3.6, 1.56];

#[test]
fn wetting_front_descends_from_the_surface() {
    let mut field = column(10, -1.0, SAND, None);
    let theta_before: f64 = field.water_content(0.0).sum();

    let q = Array2::from_elem((1, 1), 1e-6);
    let controls = SolveControls {
        surface_flux: Some(&q),
        ..Default::default()
    };
    for _ in 0..100 {
        run_unsteady(&mut field, 60.0, &controls).unwrap();
    }

    assert!(!field.dead_flag);
    // ponding invariant
    assert!(field.h.iter().all(|&h| h <= 0.0));
    // the top cell wets first and hardest
    let top = field.h[[0, 0, 9]];
    assert!(top > -0.9, "top cell barely wetted: {top}");
    for k in 0..9 {
        assert!(top >= field.h[[0, 0, k]], "top cell is not the wettest");
    }
    // the front has not reached the bottom, which only drains
    assert!(field.h[[0, 0, 0]] <= -0.999);
    // net infiltration raised the water inventory
    let theta_after: f64 = field.water_content(0.0).sum();
    assert!(theta_after > theta_before);
}

#[test]
fn steady_drainage_stays_bounded_and_settles() {
    let q = Array2::from_elem((1, 1), 0.0);
    let controls = SolveControls {
        surface_flux: Some(&q),
        iterations: Some(2000),
        ..Default::default()
    };
    let mut field = column(10, -5.0, SAND, None);
    run_steady(&mut field, &controls).unwrap();
    assert!(!field.dead_flag);
    assert!(field.h.iter().all(|&h| h.is_finite()));
    // free drainage with no recharge only dries the column
    assert!(field.h.iter().all(|&h| h < -5.0));

    // one further sweep moves the profile only marginally
    let before = field.h.clone();
    let one_sweep = SolveControls {
        iterations: Some(1),
        ..controls
    };
    run_steady(&mut field, &one_sweep).unwrap();
    let max_step = field
        .h
        .iter()
        .zip(before.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f64, f64::max);
    assert!(max_step < 0.05, "profile still moving by {max_step} m/sweep");
}

#[test]
fn void_cells_are_bitwise_untouched() {
    let mut voxel = Array3::from_elem((2, 2, 5), true);
    voxel[[0, 0, 2]] = false;
    voxel[[1, 1, 4]] = false;
    let shape = voxel.dim();
    let mut field = Field::new(
        voxel.clone(),
        top_cells(&voxel),
        bottom_cells(&voxel),
        CellSize {
            dx: DZ,
            dy: DZ,
            dz: DZ,
        },
        FieldParams {
            h: Array3::from_elem(shape, -1.0),
            k: Array3::from_elem(shape, SAND[0]),
            theta_s: Array3::from_elem(shape, SAND[1]),
            theta_r: Array3::from_elem(shape, SAND[2]),
            alpha: Array3::from_elem(shape, SAND[3]),
            n: Array3::from_elem(shape, SAND[4]),
            m: None,
            l: None,
            root: None,
        },
    )
    .unwrap();

    let void_bits: Vec<(usize, u64)> = field
        .h
        .iter()
        .enumerate()
        .filter(|(_, h)| h.is_nan())
        .map(|(i, h)| (i, h.to_bits()))
        .collect();
    assert_eq!(void_bits.len(), 2);

    let q = Array2::from_elem((2, 2), 1e-7);
    let controls = SolveControls {
        surface_flux: Some(&q),
        ..Default::default()
    };
    for _ in 0..10 {
        run_unsteady(&mut field, 60.0, &controls).unwrap();
    }
    assert!(!field.dead_flag);
    for (i, bits) in void_bits {
        let h = field.h.iter().nth(i).copied().unwrap();
        assert_eq!(h.to_bits(), bits, "void sentinel was rewritten");
    }
}

#[test]
fn hydrostatic_equilibrium_balances_every_interior_face() {
    // Dirichlet bottom anchors the column; at the fixed point the flux
    // K (dh/dz + 1) vanishes on each interior face.
    let q = Array2::from_elem((1, 1), 0.0);
    let controls = SolveControls {
        bottom: BottomBoundary::Zero,
        surface_flux: Some(&q),
        iterations: Some(3000),
        ..Default::default()
    };
    let mut field = column(10, -0.01, SAND, None);
    run_steady(&mut field, &controls).unwrap();
    assert!(!field.dead_flag);

    for k in 0..9 {
        let gradient = (field.h[[0, 0, k + 1]] - field.h[[0, 0, k]]) / DZ + 1.0;
        assert!(
            gradient.abs() < 1e-6,
            "face {k} unbalanced: dh/dz + 1 = {gradient}"
        );
    }
}

#[test]
fn unsteady_step_closes_the_discrete_water_balance() {
    let shape = (1, 1, 10);
    let root = RootUptake {
        density: Array3::from_elem(shape, 1.0),
        stress: RootStress::Feddes {
            a0: Array3::from_elem(shape, -0.1),
            a1: Array3::from_elem(shape, -0.5),
            a2: Array3::from_elem(shape, -3.0),
            a3: Array3::from_elem(shape, -8.0),
        },
    };
    let mut field = column(10, -2.0, LOAM, Some(root));
    let before = field.clone();

    let dt = 1.0;
    let q = Array2::from_elem((1, 1), 0.0);
    let tp = Array2::from_elem((1, 1), 1e-7);
    let controls = SolveControls {
        surface_flux: Some(&q),
        transpiration: Some(&tp),
        ..Default::default()
    };
    run_unsteady(&mut field, dt, &controls).unwrap();
    assert!(!field.dead_flag);

    // per-cell backward-Euler identity at the converged sweep fixed point:
    // Cw/dt (h_new - h_old) = sum_faces a (h_nb - h_c) + b_up + b_down + S
    let cond = before.conductivity(f64::NAN);
    let cw = before.capacity(f64::NAN);
    let sink = before.sink(Some(&tp), f64::NAN);
    let nz = 10;
    for k in 0..nz {
        let c = [0, 0, k];
        let lhs = cw[c] / dt * (field.h[c] - before.h[c]);
        let mut rhs = sink[c];
        if k + 1 < nz {
            let kf = (cond[[0, 0, k + 1]] + cond[c]) / 2.0;
            rhs += kf / (DZ * DZ) * (field.h[[0, 0, k + 1]] - field.h[c]);
            rhs += kf / DZ; // gravity through the upper face
        }
        if k > 0 {
            let kf = (cond[[0, 0, k - 1]] + cond[c]) / 2.0;
            rhs += kf / (DZ * DZ) * (field.h[[0, 0, k - 1]] - field.h[c]);
            rhs -= kf / DZ;
        } else {
            rhs -= cond[c] / DZ; // free drainage at the column foot
        }
        assert!(
            (lhs - rhs).abs() < 1e-12,
            "cell {k}: balance residual {}",
            lhs - rhs
        );
    }

    // summed over the column, interior fluxes cancel: the water inventory
    // changes by the sink integral plus the bottom drainage, per step
    let theta_old: f64 = before.water_content(0.0).sum();
    let theta_new: f64 = field.water_content(0.0).sum();
    let sink_total: f64 = (0..nz).map(|k| sink[[0, 0, k]]).sum();
    let expected = dt * (sink_total - cond[[0, 0, 0]] / DZ);
    let got = theta_new - theta_old;
    assert!(
        (got - expected).abs() < 1e-3 * expected.abs(),
        "water balance off: got {got}, expected {expected}"
    );
}

/// Installs params = [k, alpha] uniformly over a short column and observes
/// the head of its top cell.
struct ColumnModel;

impl IndividualModel for ColumnModel {
    fn install(&self, params: &DVector<f64>, h: Array3<f64>) -> Field {
        let voxel = Array3::from_elem((1, 1, 3), true);
        let shape = voxel.dim();
        Field::new(
            voxel.clone(),
            top_cells(&voxel),
            bottom_cells(&voxel),
            CellSize {
                dx: DZ,
                dy: DZ,
                dz: DZ,
            },
            FieldParams {
                h,
                k: Array3::from_elem(shape, params[0]),
                theta_s: Array3::from_elem(shape, 0.43),
                theta_r: Array3::from_elem(shape, 0.045),
                alpha: Array3::from_elem(shape, params[1]),
                n: Array3::from_elem(shape, 2.68),
                m: None,
                l: None,
                root: None,
            },
        )
        .unwrap()
    }

    fn observe(&self, field: &Field) -> DVector<f64> {
        DVector::from_vec(vec![field.h[[0, 0, 2]]])
    }
}

fn member(params: [f64; 2], h: f64, mode: HeadMode) -> Individual {
    let model = Arc::new(ColumnModel);
    let params = DVector::from_vec(params.to_vec());
    let field = model.install(&params, Array3::from_elem((1, 1, 3), h));
    Individual::new(model, params, field, None, mode)
}

#[test]
fn particle_filter_collapses_onto_the_matching_member() {
    let members = vec![
        member([1.0, 14.5], -1.0, HeadMode::Coupled),
        member([2.0, 10.0], -1001.0, HeadMode::Coupled),
        member([3.0, 12.0], -1001.0, HeadMode::Coupled),
        member([4.0, 16.0], -1001.0, HeadMode::Coupled),
    ];
    let mut ensemble = Ensemble::new(members).unwrap();

    let y = DVector::from_vec(vec![-1.0]);
    let r = DMatrix::identity(1, 1);
    let mut rng = StdRng::seed_from_u64(1);
    ensemble.resample(&ParticleFilter, &y, &r, &mut rng).unwrap();

    assert_eq!(ensemble.len(), 4);
    for m in ensemble.members() {
        assert_eq!(m.params[0], 1.0);
        assert_eq!(m.params[1], 14.5);
        assert_eq!(m.field.h[[0, 0, 0]], -1.0);
    }
}

#[test]
fn merging_identical_members_is_the_identity() {
    let members = vec![
        member([2.0, 14.5], -1.5, HeadMode::Coupled),
        member([2.0, 14.5], -1.5, HeadMode::Coupled),
    ];
    let mut ensemble = Ensemble::new(members).unwrap();

    let y = DVector::from_vec(vec![-1.5]);
    let r = DMatrix::identity(1, 1);
    let mut rng = StdRng::seed_from_u64(2);
    ensemble
        .resample(&MergingParticleFilter::default(), &y, &r, &mut rng)
        .unwrap();

    for m in ensemble.members() {
        assert!((m.params[0] - 2.0).abs() < 1e-12);
        assert!((m.params[1] - 14.5).abs() < 1e-12);
        assert!((m.field.h[[0, 0, 1]] + 1.5).abs() < 1e-12);
        assert!(m.field.h.iter().all(|&h| h <= 0.0));
    }
}

#[test]
fn blx_children_stay_inside_the_widened_span() {
    let p1 = [1.0, 10.0];
    let p2 = [3.0, 20.0];
    let members = vec![
        member(p1, -1.0, HeadMode::Coupled),
        member(p2, -3.0, HeadMode::Coupled),
    ];
    let mut ensemble = Ensemble::new(members).unwrap();

    // equal likelihoods: observe both members at the same distance from y
    let y = DVector::from_vec(vec![-2.0]);
    let r = DMatrix::identity(1, 1);
    let mut rng = StdRng::seed_from_u64(3);
    ensemble
        .resample(&BlxAlpha { alpha: 0.5, crossover_head: true }, &y, &r, &mut rng)
        .unwrap();

    // with alpha = 0.5 every child coordinate lies within [min - d, max + d]
    for m in ensemble.members() {
        for c in 0..2 {
            let (lo, hi) = if p1[c] < p2[c] {
                (p1[c], p2[c])
            } else {
                (p2[c], p1[c])
            };
            let d = hi - lo;
            assert!(
                m.params[c] >= lo - d && m.params[c] <= hi + d,
                "param {c} escaped: {}",
                m.params[c]
            );
        }
        // heads -1 and -3: span [-5, 1], clamped to ponding limit 0
        assert!(m.field.h.iter().all(|&h| (-5.0..=0.0).contains(&h)));
    }
}

#[test]
fn blx_without_head_crossover_inherits_a_parent_profile() {
    let members = vec![
        member([1.0, 10.0], -1.0, HeadMode::Inherited),
        member([3.0, 20.0], -3.0, HeadMode::Inherited),
    ];
    let mut ensemble = Ensemble::new(members).unwrap();

    let y = DVector::from_vec(vec![-2.0]);
    let r = DMatrix::identity(1, 1);
    let mut rng = StdRng::seed_from_u64(4);
    ensemble
        .resample(&BlxAlpha { alpha: 0.5, crossover_head: false }, &y, &r, &mut rng)
        .unwrap();

    for m in ensemble.members() {
        let h = m.field.h[[0, 0, 0]];
        assert!(h == -1.0 || h == -3.0, "head {h} is not a parent profile");
    }
}

#[test]
fn merging_filter_roughly_preserves_ensemble_moments() {
    let n = 256;
    let members: Vec<Individual> = (0..n)
        .map(|i| member([i as f64, 1.0], -1.0, HeadMode::Coupled))
        .collect();
    let mut ensemble = Ensemble::new(members).unwrap();

    let mean_before = ensemble.mean().params[0];
    let var_before = ensemble.var().params[0];

    // identical observations give uniform weights
    let y = DVector::from_vec(vec![-1.0]);
    let r = DMatrix::identity(1, 1);
    let mut rng = StdRng::seed_from_u64(5);
    ensemble
        .resample(&MergingParticleFilter::default(), &y, &r, &mut rng)
        .unwrap();

    let mean_after = ensemble.mean().params[0];
    let var_after = ensemble.var().params[0];

    assert!(
        (mean_after - mean_before).abs() < 30.0,
        "mean drifted from {mean_before} to {mean_after}"
    );
    assert!(
        var_after > 0.4 * var_before && var_after < 2.0 * var_before,
        "variance moved from {var_before} to {var_after}"
    );
}
