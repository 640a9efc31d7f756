//! Dimensionality Adapter: grows the controller input and the search
//! distribution together when the codebook grows.
//!
//! The insertion offset is always taken from the controller layout
//! *before* the resize. New weights sit at the end of the first layer's
//! block, so every old weight keeps its position relative to the unit it
//! feeds, and the mean and covariance entries for old weights are copied
//! unchanged.

use tracing::info;

use crate::error::{Result, UlerlError};
use crate::kernel::Controller;

use super::SearchStrategy;

/// What one resize did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeReport {
    pub old_ncentrs: usize,
    pub new_ncentrs: usize,
    /// Position of the first inserted weight
    pub offset: usize,
    /// Number of weights inserted
    pub inserted: usize,
    /// Search dimensions after the resize
    pub ndims: usize,
}

/// Tracks the codebook size the controller and optimizer were last sized for.
#[derive(Clone, Debug)]
pub struct DimensionalityAdapter {
    last_ncentrs: usize,
}

impl DimensionalityAdapter {
    pub fn new(ncentrs: usize) -> Self {
        Self {
            last_ncentrs: ncentrs,
        }
    }

    pub fn last_ncentrs(&self) -> usize {
        self.last_ncentrs
    }

    /// Bring `controller` and `strategy` in line with `ncentrs`.
    ///
    /// Returns `None` when the size is unchanged. Must be called between
    /// generations, with no sampled population outstanding.
    pub fn sync(
        &mut self,
        ncentrs: usize,
        controller: &mut Controller,
        strategy: &mut dyn SearchStrategy,
    ) -> Result<Option<ResizeReport>> {
        if ncentrs == self.last_ncentrs {
            return Ok(None);
        }
        if ncentrs < self.last_ncentrs {
            return Err(UlerlError::Shrink {
                old: self.last_ncentrs,
                new: ncentrs,
            });
        }
        check_consistency(controller, strategy)?;
        if controller.layout().ninputs() != self.last_ncentrs {
            return Err(UlerlError::ShapeMismatch {
                expected: self.last_ncentrs,
                got: controller.layout().ninputs(),
            });
        }

        let old_layout = controller.layout().clone();
        let delta = ncentrs - self.last_ncentrs;
        let offset = old_layout.input_block_end();
        let inserted = delta * old_layout.input_fan_out();

        strategy.grow(offset, inserted)?;
        *controller = controller.grow_inputs(ncentrs)?;
        check_consistency(controller, strategy)?;

        let report = ResizeReport {
            old_ncentrs: self.last_ncentrs,
            new_ncentrs: ncentrs,
            offset,
            inserted,
            ndims: strategy.ndims(),
        };
        info!(
            old = report.old_ncentrs,
            new = report.new_ncentrs,
            offset,
            inserted,
            ndims = report.ndims,
            "resized controller and search distribution"
        );
        self.last_ncentrs = ncentrs;
        Ok(Some(report))
    }
}

/// Mean, covariance and controller must agree on the number of weights.
pub fn check_consistency(controller: &Controller, strategy: &dyn SearchStrategy) -> Result<()> {
    let mean = strategy.mean().len();
    let covariance = strategy.covariance_diagonal().len();
    let ctrl = controller.nweights();
    if mean == covariance && covariance == ctrl {
        Ok(())
    } else {
        Err(UlerlError::ResizeInconsistency {
            mean,
            covariance,
            controller: ctrl,
        })
    }
}
