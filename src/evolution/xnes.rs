//! Exponential NES over one or more independent blocks.
//!
//! Each block keeps a square-root factor `A` of its covariance `A Aᵀ`,
//! updated multiplicatively through the matrix exponential. A single
//! block spanning every dimension is plain xNES; one block per
//! controller layer is BDNES.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UlerlError};
use crate::kernel::SquareMatrix;

use super::state::{NesState, Pending};
use super::utilities::xnes_factor_lrate;
use super::{OptimizerKind, SearchStrategy, StrategyFactor, StrategySnapshot};

/// Square-root covariance factor for dimensions `offset..offset + factor.n()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub offset: usize,
    pub factor: SquareMatrix,
}

impl Block {
    pub fn end(&self) -> usize {
        self.offset + self.factor.n()
    }
}

#[derive(Clone, Debug)]
pub struct Xnes {
    kind: OptimizerKind,
    state: NesState,
    blocks: Vec<Block>,
}

impl Xnes {
    /// Blocks must tile `0..ndims` in order.
    pub(crate) fn new(kind: OptimizerKind, state: NesState, blocks: Vec<Block>) -> Result<Self> {
        let mut next = 0;
        for block in &blocks {
            if block.offset != next {
                return Err(UlerlError::ResizeInconsistency {
                    mean: state.ndims(),
                    covariance: next,
                    controller: block.offset,
                });
            }
            next = block.end();
        }
        if next != state.ndims() {
            return Err(UlerlError::ResizeInconsistency {
                mean: state.ndims(),
                covariance: next,
                controller: state.ndims(),
            });
        }
        Ok(Self {
            kind,
            state,
            blocks,
        })
    }

    fn factor_lrate(&self, block_dims: usize) -> f64 {
        self.state
            .sigma_lrate
            .unwrap_or_else(|| xnes_factor_lrate(block_dims))
    }
}

impl SearchStrategy for Xnes {
    fn kind(&self) -> OptimizerKind {
        self.kind
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
        let n = self.ndims();
        let mut cov = SquareMatrix::zeros(n);
        for block in &self.blocks {
            let gram = block.factor.gram();
            for i in 0..gram.n() {
                for j in 0..gram.n() {
                    cov.set(block.offset + i, block.offset + j, gram.get(i, j));
                }
            }
        }
        cov
    }

    fn covariance_diagonal(&self) -> Vec<f64> {
        self.blocks
            .iter()
            .flat_map(|block| {
                let a = &block.factor;
                (0..a.n()).map(move |i| a.row(i).iter().map(|v| v * v).sum::<f64>())
            })
            .collect()
    }

    fn sample_population(&mut self) -> Vec<Vec<f64>> {
        let z = self.state.draw_normals();
        let x: Vec<Vec<f64>> = z
            .iter()
            .map(|zi| {
                let mut xi = self.state.mean.clone();
                for block in &self.blocks {
                    let range = block.offset..block.end();
                    let step = block.factor.mul_vec(&zi[range.clone()]);
                    for (x, s) in xi[range].iter_mut().zip(step) {
                        *x += s;
                    }
                }
                xi
            })
            .collect();
        self.state.pending = Some(Pending { z, x: x.clone() });
        x
    }

    fn tell(&mut self, fitnesses: &[f64]) -> Result<()> {
        let (pending, utils) = self.state.take_pending(fitnesses)?;
        let eta_mu = self.state.mean_lrate;

        let mut updated = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let n = block.factor.n();
            let range = block.offset..block.end();

            // Natural gradients in local coordinates.
            let mut grad_delta = vec![0.0; n];
            let mut grad_m = SquareMatrix::zeros(n);
            for (u, z) in utils.iter().zip(&pending.z) {
                let zb = &z[range.clone()];
                for i in 0..n {
                    grad_delta[i] += u * zb[i];
                    for j in 0..n {
                        let outer = zb[i] * zb[j] - if i == j { 1.0 } else { 0.0 };
                        grad_m.set(i, j, grad_m.get(i, j) + u * outer);
                    }
                }
            }

            let step = block.factor.mul_vec(&grad_delta);
            for (m, s) in self.state.mean[range].iter_mut().zip(step) {
                *m += eta_mu * s;
            }

            let eta_a = self.factor_lrate(n);
            let factor = block.factor.matmul(&grad_m.scaled(0.5 * eta_a).expm());
            updated.push(factor);
        }
        for (block, factor) in self.blocks.iter_mut().zip(updated) {
            block.factor = factor;
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

    /// The block containing `offset` (the earlier one on a boundary) gets
    /// the new dimensions with unit diagonal; later blocks shift.
    fn grow(&mut self, offset: usize, count: usize) -> Result<()> {
        let target = self
            .blocks
            .iter()
            .position(|b| b.offset <= offset && offset <= b.end())
            .ok_or(UlerlError::ShapeMismatch {
                expected: self.ndims(),
                got: offset,
            })?;
        self.state.grow(offset, count)?;

        let block = &mut self.blocks[target];
        block.factor = block.factor.insert(offset - block.offset, count, 1.0);
        for later in &mut self.blocks[target + 1..] {
            later.offset += count;
        }
        Ok(())
    }

    fn rng(&self) -> &ChaCha8Rng {
        &self.state.rng
    }

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            kind: self.kind,
            mean: self.state.mean.clone(),
            factor: StrategyFactor::Blocks(self.blocks.clone()),
            rng: self.state.rng.clone(),
            best: self.state.best.clone(),
            last_fitnesses: self.state.last_fitnesses.clone(),
            generation: self.state.generation,
        }
    }
}
