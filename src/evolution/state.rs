//! Bookkeeping shared by every NES variant: mean, random stream, pending
//! population, best individual and generation counter.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, UlerlError};
use crate::kernel::insert_values;

use super::utilities::{default_population_size, shaped_utilities};

/// A sampled population awaiting its fitnesses.
#[derive(Clone, Debug)]
pub(crate) struct Pending {
    /// Standard-normal draws, one per individual
    pub z: Vec<Vec<f64>>,
    /// Genotypes handed out for evaluation
    pub x: Vec<Vec<f64>>,
}

#[derive(Clone, Debug)]
pub(crate) struct NesState {
    pub mean: Vec<f64>,
    pub rng: ChaCha8Rng,
    pub mean_lrate: f64,
    pub sigma_lrate: Option<f64>,
    popsize_override: Option<usize>,
    popsize: usize,
    pub pending: Option<Pending>,
    pub best: Option<(f64, Vec<f64>)>,
    pub last_fitnesses: Vec<f64>,
    pub generation: u64,
}

impl NesState {
    pub fn new(
        mean: Vec<f64>,
        rng: ChaCha8Rng,
        mean_lrate: f64,
        sigma_lrate: Option<f64>,
        popsize_override: Option<usize>,
    ) -> Self {
        let popsize = popsize_override.unwrap_or_else(|| default_population_size(mean.len()));
        Self {
            mean,
            rng,
            mean_lrate,
            sigma_lrate,
            popsize_override,
            popsize,
            pending: None,
            best: None,
            last_fitnesses: Vec::new(),
            generation: 0,
        }
    }

    pub fn ndims(&self) -> usize {
        self.mean.len()
    }

    pub fn popsize(&self) -> usize {
        self.popsize
    }

    /// `popsize` vectors of `ndims` standard-normal draws.
    pub fn draw_normals(&mut self) -> Vec<Vec<f64>> {
        let ndims = self.ndims();
        (0..self.popsize)
            .map(|_| {
                (0..ndims)
                    .map(|_| self.rng.sample::<f64, _>(StandardNormal))
                    .collect()
            })
            .collect()
    }

    /// Take the pending population, check the fitness count, and return
    /// the shaped utilities alongside it.
    pub fn take_pending(&mut self, fitnesses: &[f64]) -> Result<(Pending, Vec<f64>)> {
        let pending = self.pending.take().ok_or_else(|| {
            UlerlError::Config("fitnesses told without a sampled population".into())
        })?;
        if fitnesses.len() != pending.x.len() {
            let expected = pending.x.len();
            self.pending = Some(pending);
            return Err(UlerlError::ShapeMismatch {
                expected,
                got: fitnesses.len(),
            });
        }
        Ok((pending, shaped_utilities(fitnesses)))
    }

    /// Record a finished generation: best so far and last fitnesses.
    ///
    /// Only finite fitnesses can become the best.
    pub fn record(&mut self, fitnesses: &[f64], population: &[Vec<f64>]) {
        let champion = fitnesses
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_finite())
            .fold(None::<(usize, f64)>, |acc, (i, &f)| match acc {
                Some((_, bf)) if bf >= f => acc,
                _ => Some((i, f)),
            });
        if let Some((i, f)) = champion {
            let improves = self.best.as_ref().map_or(true, |(bf, _)| f > *bf);
            if improves {
                self.best = Some((f, population[i].clone()));
            }
        }
        self.last_fitnesses = fitnesses.to_vec();
        self.generation += 1;
    }

    /// Insert `count` zero dimensions at `offset` in the mean and the best
    /// individual. The random stream is untouched.
    pub fn grow(&mut self, offset: usize, count: usize) -> Result<()> {
        if self.pending.is_some() {
            return Err(UlerlError::Config(
                "cannot resize while a sampled population is being evaluated".into(),
            ));
        }
        if offset > self.ndims() {
            return Err(UlerlError::ShapeMismatch {
                expected: self.ndims(),
                got: offset,
            });
        }
        self.mean = insert_values(&self.mean, offset, count, 0.0);
        if let Some((_, best)) = self.best.as_mut() {
            *best = insert_values(best, offset, count, 0.0);
        }
        if self.popsize_override.is_none() {
            self.popsize = default_population_size(self.mean.len());
        }
        Ok(())
    }
}
