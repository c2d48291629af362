// File: `src/lib/vadose/src/lib.rs`
//
// UNIT SYSTEM: SI UNITS (CONSISTENT THROUGHOUT)
// =============================================
// Matric potential h: meter (m), <= 0 in active cells
// Hydraulic conductivity (saturated k and unsaturated K): m/s
// Water content theta: dimensionless [0, 1]
// van Genuchten alpha: 1/m; n, m, l: dimensionless
// Cell size dx, dy, dz: meter (m)
// Time: second (s)
// Surface flux q, evaporation E, transpiration Tp: m/s
// Root density B: 1/m (integrates to 1 over a column)
//
// CONVERSIONS AT THE ADAPTER BOUNDARY:
// - Carsel samplers: Ks cm/h -> m/s (/ 3.6e5), alpha 1/cm -> 1/m (* 100)
// - ET model: ET0 mm/day -> m/s (/ 1000 / 86400)
// - STL ingestion: optional mm -> m (/ 1000)

pub mod carsel;
pub mod ensemble;
pub mod etmodel;
pub mod field;
pub mod individual;
pub mod solver;
pub mod stl;
pub mod vangenuchten;
pub mod vtk;

pub use carsel::{SoilSample, SoilTexture};
pub use ensemble::{
    BlxAlpha, Ensemble, EnsembleError, MergingParticleFilter, ParticleFilter, Recombinator,
};
pub use etmodel::{DayPhase, EtcModule, KcCurve};
pub use field::{
    CellIndex, CellSize, Field, FieldError, FieldParams, RootStress, RootUptake, bottom_cells,
    top_cells,
};
pub use individual::{HeadMode, Individual, IndividualModel};
pub use solver::{
    BottomBoundary, SolveControls, SolverError, TopBoundary, run_steady, run_unsteady,
};
pub use stl::{LengthUnit, StlError, StlFormat, StlMesh, voxelise};
pub use vtk::{VtkError, write_vtk};
