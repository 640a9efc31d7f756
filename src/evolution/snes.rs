//! Separable NES: independent Gaussian per dimension.

use rand_chacha::ChaCha8Rng;

use crate::error::Result;
use crate::kernel::{insert_values, SquareMatrix};

use super::state::{NesState, Pending};
use super::utilities::snes_sigma_lrate;
use super::{OptimizerKind, SearchStrategy, StrategyFactor, StrategySnapshot};

#[derive(Clone, Debug)]
pub struct Snes {
    state: NesState,
    sigma: Vec<f64>,
}

impl Snes {
    pub(crate) fn new(state: NesState, sigma: Vec<f64>) -> Self {
        debug_assert_eq!(state.ndims(), sigma.len());
        Self { state, sigma }
    }

    fn sigma_lrate(&self) -> f64 {
        self.state
            .sigma_lrate
            .unwrap_or_else(|| snes_sigma_lrate(self.state.ndims()))
    }
}

impl SearchStrategy for Snes {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Snes
    }

    fn ndims(&self) -> usize {
        self.state.ndims()
    }

    fn population_size(&self) -> usize {
        self.state.popsize()
    }

    fn mean(&self) -> &[f64] {
        &self.state.mean
    }

    fn covariance(&self) -> SquareMatrix {
        let n = self.sigma.len();
        let mut cov = SquareMatrix::zeros(n);
        for (i, s) in self.sigma.iter().enumerate() {
            cov.set(i, i, s * s);
        }
        cov
    }

    fn covariance_diagonal(&self) -> Vec<f64> {
        self.sigma.iter().map(|s| s * s).collect()
    }

    fn sample_population(&mut self) -> Vec<Vec<f64>> {
        let z = self.state.draw_normals();
        let x: Vec<Vec<f64>> = z
            .iter()
            .map(|zi| {
                self.state
                    .mean
                    .iter()
                    .zip(&self.sigma)
                    .zip(zi)
                    .map(|((m, s), z)| m + s * z)
                    .collect()
            })
            .collect();
        self.state.pending = Some(Pending { z, x: x.clone() });
        x
    }

    fn tell(&mut self, fitnesses: &[f64]) -> Result<()> {
        let (pending, utils) = self.state.take_pending(fitnesses)?;
        let ndims = self.state.ndims();
        let eta_mu = self.state.mean_lrate;
        let eta_sigma = self.sigma_lrate();

        let mut grad_mu = vec![0.0; ndims];
        let mut grad_sigma = vec![0.0; ndims];
        for (u, z) in utils.iter().zip(&pending.z) {
            for d in 0..ndims {
                grad_mu[d] += u * z[d];
                grad_sigma[d] += u * (z[d] * z[d] - 1.0);
            }
        }

        for d in 0..ndims {
            self.state.mean[d] += eta_mu * self.sigma[d] * grad_mu[d];
            self.sigma[d] *= (0.5 * eta_sigma * grad_sigma[d]).exp();
        }

        self.state.record(fitnesses, &pending.x);
        Ok(())
    }

    fn best(&self) -> Option<(f64, &[f64])> {
        self.state.best.as_ref().map(|(f, x)| (*f, x.as_slice()))
    }

    fn last_fitnesses(&self) -> &[f64] {
        &self.state.last_fitnesses
    }

    fn generation(&self) -> u64 {
        self.state.generation
    }

    fn grow(&mut self, offset: usize, count: usize) -> Result<()> {
        self.state.grow(offset, count)?;
        self.sigma = insert_values(&self.sigma, offset, count, 1.0);
        Ok(())
    }

    fn rng(&self) -> &ChaCha8Rng {
        &self.state.rng
    }

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            kind: OptimizerKind::Snes,
            mean: self.state.mean.clone(),
            factor: StrategyFactor::Diagonal(self.sigma.clone()),
            rng: self.state.rng.clone(),
            best: self.state.best.clone(),
            last_fitnesses: self.state.last_fitnesses.clone(),
            generation: self.state.generation,
        }
    }
}
