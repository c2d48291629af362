//! Ensembles of [`Individual`]s and the resampling operators over them.
//!
//! Every operator shares the same weight-and-draw prelude (likelihood
//! evaluation, uniform fallback, categorical draws from one injected random
//! stream) and differs only in how drawn parents are recombined, so the
//! variants implement a common [`Recombinator`] trait.

use nalgebra::{DMatrix, DVector};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::{Rng, RngCore};
use thiserror::Error;

use crate::individual::Individual;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("ensemble must contain at least one individual")]
    Empty,
    #[error("BLX-alpha crossover requires an even ensemble, got {0} individuals")]
    OddEnsemble(usize),
    #[error("resampling weights could not form a categorical distribution")]
    DegenerateWeights,
}

/// Ordered collection of ensemble members. The member list is rebuilt on
/// every resampling step; in between, callers drive each member's forward
/// model through `members_mut`.
pub struct Ensemble {
    members: Vec<Individual>,
}

impl Ensemble {
    pub fn new(members: Vec<Individual>) -> Result<Self, EnsembleError> {
        if members.is_empty() {
            return Err(EnsembleError::Empty);
        }
        Ok(Ensemble { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Individual] {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut [Individual] {
        &mut self.members
    }

    /// Normalised resampling weights from the member likelihoods. When every
    /// likelihood collapses to zero the weights fall back to uniform, so a
    /// fully failed ensemble is rejuvenated instead of aborted.
    pub fn weights(&self, y: &DVector<f64>, r: &DMatrix<f64>) -> Vec<f64> {
        let likelihoods: Vec<f64> = self.members.iter().map(|m| m.likelihood(y, r)).collect();
        let total: f64 = likelihoods.iter().sum();
        if total == 0.0 {
            log::debug!("all likelihoods are zero; falling back to uniform weights");
            let n = self.members.len() as f64;
            return vec![1.0 / n; self.members.len()];
        }
        likelihoods.iter().map(|l| l / total).collect()
    }

    /// `count` indices drawn with replacement from the categorical
    /// distribution over `weights`, in draw order from a single stream.
    pub fn draw_indices(
        &self,
        weights: &[f64],
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, EnsembleError> {
        let dist = WeightedIndex::new(weights.iter().copied())
            .map_err(|_| EnsembleError::DegenerateWeights)?;
        Ok((0..count).map(|_| dist.sample(rng)).collect())
    }

    /// One assimilation step: weight the members against the observation
    /// `y` with covariance `r`, then rebuild the member list through the
    /// given recombinator.
    pub fn resample(
        &mut self,
        op: &dyn Recombinator,
        y: &DVector<f64>,
        r: &DMatrix<f64>,
        rng: &mut dyn RngCore,
    ) -> Result<(), EnsembleError> {
        let weights = self.weights(y, r);
        let next = op.recombine(self, &weights, rng)?;
        self.members = next;
        Ok(())
    }

    /// Ensemble mean through Individual arithmetic.
    pub fn mean(&self) -> Individual {
        let n = self.members.len() as f64;
        let mut acc = self.members[0].divide(n);
        for member in &self.members[1..] {
            acc = &acc + &member.divide(n);
        }
        acc
    }

    /// Ensemble variance through Individual arithmetic: sum of squared
    /// deviations from the mean, divided by N.
    pub fn var(&self) -> Individual {
        let n = self.members.len() as f64;
        let mean = self.mean();
        let first = &self.members[0] - &mean;
        let mut acc = &first * &first.divide(n);
        for member in &self.members[1..] {
            let dev = member - &mean;
            acc = &acc + &(&dev * &dev.divide(n));
        }
        acc
    }

    /// Per-coordinate mean of the member observations.
    pub fn observe_mean(&self) -> DVector<f64> {
        let n = self.members.len() as f64;
        let mut acc = self.members[0].observe();
        for member in &self.members[1..] {
            acc += member.observe();
        }
        acc / n
    }

    /// Per-coordinate mean squared deviation of the member observations.
    pub fn observe_var(&self) -> DVector<f64> {
        let n = self.members.len() as f64;
        let mean = self.observe_mean();
        let mut acc = DVector::zeros(mean.len());
        for member in &self.members {
            let dev = member.observe() - &mean;
            acc += dev.component_mul(&dev);
        }
        acc / n
    }
}

/// Per-variant recombination behind the shared weight-and-draw prelude.
pub trait Recombinator {
    fn recombine(
        &self,
        parents: &Ensemble,
        weights: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Individual>, EnsembleError>;
}

/// Plain particle filter: the new ensemble is a deep copy of each drawn
/// member, in draw order.
pub struct ParticleFilter;

impl Recombinator for ParticleFilter {
    fn recombine(
        &self,
        parents: &Ensemble,
        weights: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Individual>, EnsembleError> {
        let indices = parents.draw_indices(weights, parents.len(), rng)?;
        Ok(indices
            .into_iter()
            .map(|i| parents.members()[i].replicate())
            .collect())
    }
}

/// Merging particle filter: 3N draws recombined in weighted triples.
///
/// The default weights (3/4, (sqrt(13)+1)/8, -(sqrt(13)-1)/8) satisfy both
/// sum(a) = 1 and sum(a^2) = 1, preserving the first two ensemble moments
/// under the merge.
pub struct MergingParticleFilter {
    pub merge_weights: [f64; 3],
}

impl Default for MergingParticleFilter {
    fn default() -> Self {
        let root13 = 13.0f64.sqrt();
        MergingParticleFilter {
            merge_weights: [3.0 / 4.0, (root13 + 1.0) / 8.0, -(root13 - 1.0) / 8.0],
        }
    }
}

impl Recombinator for MergingParticleFilter {
    fn recombine(
        &self,
        parents: &Ensemble,
        weights: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Individual>, EnsembleError> {
        let [a1, a2, a3] = self.merge_weights;
        let indices = parents.draw_indices(weights, 3 * parents.len(), rng)?;
        let mut next = Vec::with_capacity(parents.len());
        for triple in indices.chunks_exact(3) {
            let first = parents.members()[triple[0]].scale(a1);
            let second = parents.members()[triple[1]].scale(a2);
            let third = parents.members()[triple[2]].scale(a3);
            let mut merged = &(&first + &second) + &third;
            merged.field.clamp_ponding();
            next.push(merged);
        }
        Ok(next)
    }
}

/// BLX-alpha crossover: N draws paired sequentially, children sampled
/// uniformly on the alpha-widened span of each parent coordinate.
pub struct BlxAlpha {
    pub alpha: f64,
    /// When false, children inherit their respective parent's head and the
    /// crossover touches `params` only.
    pub crossover_head: bool,
}

impl Default for BlxAlpha {
    fn default() -> Self {
        BlxAlpha {
            alpha: 0.5,
            crossover_head: true,
        }
    }
}

impl BlxAlpha {
    fn cross_params(
        &self,
        p1: &DVector<f64>,
        p2: &DVector<f64>,
        rng: &mut dyn RngCore,
    ) -> DVector<f64> {
        DVector::from_fn(p1.len(), |c, _| blend(p1[c], p2[c], self.alpha, rng.random::<f64>()))
    }
}

fn blend(c1: f64, c2: f64, alpha: f64, u: f64) -> f64 {
    let d = (c1 - c2).abs();
    let mid = 0.5 * (c1 + c2);
    let lo = mid - (0.5 + alpha) * d;
    let hi = mid + (0.5 + alpha) * d;
    lo + (hi - lo) * u
}

impl Recombinator for BlxAlpha {
    fn recombine(
        &self,
        parents: &Ensemble,
        weights: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Individual>, EnsembleError> {
        if parents.len() % 2 != 0 {
            return Err(EnsembleError::OddEnsemble(parents.len()));
        }
        let indices = parents.draw_indices(weights, parents.len(), rng)?;
        let mut next = Vec::with_capacity(parents.len());
        for pair in indices.chunks_exact(2) {
            let p1 = &parents.members()[pair[0]];
            let p2 = &parents.members()[pair[1]];

            let child1_params = self.cross_params(&p1.params, &p2.params, rng);
            let child2_params = self.cross_params(&p1.params, &p2.params, rng);

            if self.crossover_head {
                let h1 = p1.field.head(f64::NAN);
                let h2 = p2.field.head(f64::NAN);
                let shape = h1.dim();
                let child1_h = ndarray::Array3::from_shape_fn(shape, |idx| {
                    blend(h1[idx], h2[idx], self.alpha, rng.random::<f64>())
                });
                let child2_h = ndarray::Array3::from_shape_fn(shape, |idx| {
                    blend(h1[idx], h2[idx], self.alpha, rng.random::<f64>())
                });
                let mut child1 = p1.rebuild(child1_params, child1_h);
                let mut child2 = p2.rebuild(child2_params, child2_h);
                child1.field.clamp_ponding();
                child2.field.clamp_ponding();
                next.push(child1);
                next.push(child2);
            } else {
                next.push(p1.rebuild(child1_params, p1.field.head(f64::NAN)));
                next.push(p2.rebuild(child2_params, p2.field.head(f64::NAN)));
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::HeadMode;
    use crate::individual::tests::toy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_merge_weights_preserve_two_moments() {
        let a = MergingParticleFilter::default().merge_weights;
        let sum: f64 = a.iter().sum();
        let sum_sq: f64 = a.iter().map(|x| x * x).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((sum_sq - 1.0).abs() < 1e-12);
    }

    #[test]
    fn all_dead_members_fall_back_to_uniform_weights() {
        let mut members = vec![
            toy([1.0, 2.0], -1.0, HeadMode::Coupled),
            toy([2.0, 3.0], -2.0, HeadMode::Coupled),
        ];
        for m in &mut members {
            m.field.dead_flag = true;
        }
        let ensemble = Ensemble::new(members).unwrap();
        let w = ensemble.weights(
            &DVector::from_vec(vec![-1.0]),
            &DMatrix::identity(1, 1),
        );
        assert_eq!(w, vec![0.5, 0.5]);
    }

    #[test]
    fn mean_and_var_through_individual_arithmetic() {
        let members = vec![
            toy([2.0, 4.0], -1.0, HeadMode::Coupled),
            toy([-2.0, -4.0], -3.0, HeadMode::Coupled),
        ];
        let ensemble = Ensemble::new(members).unwrap();

        let mean = ensemble.mean();
        assert!(mean.params[0].abs() < 1e-12);
        assert!((mean.field.h[[0, 0, 0]] + 2.0).abs() < 1e-12);

        let var = ensemble.var();
        assert!((var.params[0] - 4.0).abs() < 1e-12);
        assert!((var.params[1] - 16.0).abs() < 1e-12);
        // head deviations are +-1 around the mean
        assert!((var.field.h[[0, 0, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn observation_statistics() {
        let members = vec![
            toy([1.0, 2.0], -1.0, HeadMode::Coupled),
            toy([1.0, 2.0], -3.0, HeadMode::Coupled),
        ];
        let ensemble = Ensemble::new(members).unwrap();
        let mean = ensemble.observe_mean();
        assert!((mean[0] + 2.0).abs() < 1e-12);
        let var = ensemble.observe_var();
        assert!((var[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn odd_ensembles_are_rejected_by_blx() {
        let members = vec![
            toy([1.0, 2.0], -1.0, HeadMode::Coupled),
            toy([2.0, 3.0], -2.0, HeadMode::Coupled),
            toy([3.0, 4.0], -3.0, HeadMode::Coupled),
        ];
        let mut ensemble = Ensemble::new(members).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let result = ensemble.resample(
            &BlxAlpha::default(),
            &DVector::from_vec(vec![-1.0]),
            &DMatrix::identity(1, 1),
            &mut rng,
        );
        assert!(matches!(result, Err(EnsembleError::OddEnsemble(3))));
    }

    #[test]
    fn empty_ensembles_are_rejected() {
        assert!(matches!(Ensemble::new(vec![]), Err(EnsembleError::Empty)));
    }
}
