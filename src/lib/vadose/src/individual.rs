//! One ensemble member: a parameter vector under inference, the Field it
//! installs into, and an optional crop-coefficient module.
//!
//! The problem-specific pieces are injected as a capability set
//! ([`IndividualModel`]) rather than inherited: how parameters map onto the
//! field, what a sensor would read off it, and which parameter combinations
//! are admissible.

use std::ops::{Add, Mul, Sub};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use ndarray::Array3;

use crate::etmodel::EtcModule;
use crate::field::Field;

/// Problem-specific capabilities of an ensemble member.
pub trait IndividualModel: Send + Sync {
    /// Reconstruct the Field from a parameter vector and a head array.
    fn install(&self, params: &DVector<f64>, h: Array3<f64>) -> Field;

    /// Extract the sensor-equivalent output from the Field.
    fn observe(&self, field: &Field) -> DVector<f64>;

    /// Admissibility of a parameter/field combination; inadmissible members
    /// get likelihood zero.
    fn check_constraints(&self, _params: &DVector<f64>, _field: &Field) -> bool {
        true
    }

    /// Crop-coefficient module for a fresh member, when the problem has one.
    fn build_etc(&self, _params: &DVector<f64>) -> Option<EtcModule> {
        None
    }
}

/// Whether arithmetic couples the head field or inherits it from the left
/// operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadMode {
    /// Scalar and element-wise operators act on `params` and on h.
    Coupled,
    /// Operators act on `params` only; h passes through unchanged.
    Inherited,
}

#[derive(Clone)]
pub struct Individual {
    pub params: DVector<f64>,
    pub field: Field,
    pub etc: Option<EtcModule>,
    model: Arc<dyn IndividualModel>,
    head_mode: HeadMode,
}

impl Individual {
    pub fn new(
        model: Arc<dyn IndividualModel>,
        params: DVector<f64>,
        field: Field,
        etc: Option<EtcModule>,
        head_mode: HeadMode,
    ) -> Self {
        Individual {
            params,
            field,
            etc,
            model,
            head_mode,
        }
    }

    pub fn head_mode(&self) -> HeadMode {
        self.head_mode
    }

    /// Deep copy for resampling; a divergence latch on the field does not
    /// survive.
    pub fn replicate(&self) -> Individual {
        Individual {
            params: self.params.clone(),
            field: self.field.replicate(),
            etc: self.etc.clone(),
            model: Arc::clone(&self.model),
            head_mode: self.head_mode,
        }
    }

    /// Fresh member from a parameter vector and head array, re-running
    /// `install` so parameter-derived fields stay consistent.
    pub fn rebuild(&self, params: DVector<f64>, h: Array3<f64>) -> Individual {
        let field = self.model.install(&params, h);
        let etc = self.model.build_etc(&params);
        Individual {
            params,
            field,
            etc,
            model: Arc::clone(&self.model),
            head_mode: self.head_mode,
        }
    }

    pub fn observe(&self) -> DVector<f64> {
        self.model.observe(&self.field)
    }

    /// Scalar multiple.
    pub fn scale(&self, val: f64) -> Individual {
        let params = &self.params * val;
        let h = match self.head_mode {
            HeadMode::Coupled => self.field.head(f64::NAN) * val,
            HeadMode::Inherited => self.field.head(f64::NAN),
        };
        self.rebuild(params, h)
    }

    /// Scalar quotient.
    pub fn divide(&self, val: f64) -> Individual {
        let params = &self.params / val;
        let h = match self.head_mode {
            HeadMode::Coupled => self.field.head(f64::NAN) / val,
            HeadMode::Inherited => self.field.head(f64::NAN),
        };
        self.rebuild(params, h)
    }

    /// Gaussian observation likelihood exp(-1/2 (y-h)' R^-1 (y-h)).
    ///
    /// A dead field, a failed constraint check, or any arithmetic fault
    /// (dimension mismatch, singular R, non-finite quadratic form) yields 0,
    /// so one broken member never aborts an ensemble step.
    pub fn likelihood(&self, y: &DVector<f64>, r: &DMatrix<f64>) -> f64 {
        if self.field.dead_flag || !self.model.check_constraints(&self.params, &self.field) {
            return 0.0;
        }
        let observed = self.observe();
        if observed.len() != y.len() || r.nrows() != y.len() || r.ncols() != y.len() {
            return 0.0;
        }
        let Some(r_inv) = r.clone().try_inverse() else {
            return 0.0;
        };
        let d = y - &observed;
        let quad = (d.transpose() * r_inv * &d)[(0, 0)];
        let likelihood = (-0.5 * quad).exp();
        if likelihood.is_finite() { likelihood } else { 0.0 }
    }
}

impl Add<&Individual> for &Individual {
    type Output = Individual;

    fn add(self, rhs: &Individual) -> Individual {
        let params = &self.params + &rhs.params;
        let h = match self.head_mode {
            HeadMode::Coupled => self.field.head(f64::NAN) + &rhs.field.head(f64::NAN),
            HeadMode::Inherited => self.field.head(f64::NAN),
        };
        self.rebuild(params, h)
    }
}

impl Sub<&Individual> for &Individual {
    type Output = Individual;

    fn sub(self, rhs: &Individual) -> Individual {
        let params = &self.params - &rhs.params;
        let h = match self.head_mode {
            HeadMode::Coupled => self.field.head(f64::NAN) - &rhs.field.head(f64::NAN),
            HeadMode::Inherited => self.field.head(f64::NAN),
        };
        self.rebuild(params, h)
    }
}

/// Element-wise product, mirroring the scalar operators.
impl Mul<&Individual> for &Individual {
    type Output = Individual;

    fn mul(self, rhs: &Individual) -> Individual {
        let params = self.params.component_mul(&rhs.params);
        let h = match self.head_mode {
            HeadMode::Coupled => self.field.head(f64::NAN) * &rhs.field.head(f64::NAN),
            HeadMode::Inherited => self.field.head(f64::NAN),
        };
        self.rebuild(params, h)
    }
}
