//! Controller network: the genotype carrier.
//!
//! # Weight layout
//!
//! The flat weight vector is a sequence of per-layer blocks. Block `l`
//! is a row-major `(rows × cols)` matrix where `cols` is the layer's
//! output width and the rows are the layer's inputs in this order:
//!
//! 1. the bias unit,
//! 2. the layer's own previous outputs (recurrent networks only),
//! 3. the layer's inputs proper.
//!
//! Inputs come last on purpose. Growing the network input by `Δ` appends
//! `Δ` rows to the end of block 0, i.e. `Δ * cols(0)` weights inserted at
//! [`NetworkLayout::input_block_end`] of the *old* layout, without moving
//! any existing weight relative to the unit it feeds.

use serde::{Deserialize, Serialize};

use crate::error::{Result, UlerlError};
use crate::kernel::linalg::insert_values;

/// Activation applied to every layer output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Logistic,
    Tanh,
    Relu,
    Identity,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Logistic => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
            Activation::Identity => x,
        }
    }
}

/// Feed-forward or recurrent wiring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    FeedForward,
    /// Each layer also receives its own outputs from the previous activation
    #[default]
    Recurrent,
}

/// Layer sizes `[inputs, hidden..., outputs]` plus wiring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLayout {
    kind: NetworkKind,
    sizes: Vec<usize>,
}

impl NetworkLayout {
    pub fn new(kind: NetworkKind, sizes: Vec<usize>) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(UlerlError::Config(format!(
                "network needs at least an input and an output layer, got sizes {:?}",
                sizes
            )));
        }
        if sizes.iter().any(|&s| s == 0) {
            return Err(UlerlError::Config(format!(
                "network layer sizes must be positive, got {:?}",
                sizes
            )));
        }
        Ok(Self { kind, sizes })
    }

    /// `[ninputs, hidden..., noutputs]`
    pub fn from_parts(
        kind: NetworkKind,
        ninputs: usize,
        hidden: &[usize],
        noutputs: usize,
    ) -> Result<Self> {
        let mut sizes = Vec::with_capacity(hidden.len() + 2);
        sizes.push(ninputs);
        sizes.extend_from_slice(hidden);
        sizes.push(noutputs);
        Self::new(kind, sizes)
    }

    pub fn kind(&self) -> NetworkKind {
        self.kind
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn ninputs(&self) -> usize {
        self.sizes[0]
    }

    pub fn noutputs(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn nlayers(&self) -> usize {
        self.sizes.len() - 1
    }

    /// `(rows, cols)` of weight block `layer`.
    pub fn layer_shape(&self, layer: usize) -> (usize, usize) {
        let cols = self.sizes[layer + 1];
        let recurrent = match self.kind {
            NetworkKind::Recurrent => cols,
            NetworkKind::FeedForward => 0,
        };
        (1 + recurrent + self.sizes[layer], cols)
    }

    pub fn nweights_per_layer(&self) -> Vec<usize> {
        (0..self.nlayers())
            .map(|l| {
                let (rows, cols) = self.layer_shape(l);
                rows * cols
            })
            .collect()
    }

    pub fn nweights(&self) -> usize {
        self.nweights_per_layer().iter().sum()
    }

    /// Start offset of every weight block.
    pub fn layer_offsets(&self) -> Vec<usize> {
        self.nweights_per_layer()
            .iter()
            .scan(0, |acc, &n| {
                let start = *acc;
                *acc += n;
                Some(start)
            })
            .collect()
    }

    /// Offset right after the last weight of block 0, where new input rows go.
    pub fn input_block_end(&self) -> usize {
        self.nweights_per_layer()[0]
    }

    /// Output width of the first layer: weights added per new input.
    pub fn input_fan_out(&self) -> usize {
        self.sizes[1]
    }

    /// Same layout with a different input width.
    pub fn with_inputs(&self, ninputs: usize) -> Result<Self> {
        let mut sizes = self.sizes.clone();
        sizes[0] = ninputs;
        Self::new(self.kind, sizes)
    }
}

/// Neural network controller.
///
/// Holds its weights and, for recurrent wiring, the previous output of
/// every layer. Loading weights resets that state.
#[derive(Clone, Debug)]
pub struct Controller {
    layout: NetworkLayout,
    activation: Activation,
    weights: Vec<f64>,
    state: Vec<Vec<f64>>,
}

impl Controller {
    /// New controller with all weights at zero.
    pub fn new(layout: NetworkLayout, activation: Activation) -> Self {
        let weights = vec![0.0; layout.nweights()];
        let state = Self::zero_state(&layout);
        Self {
            layout,
            activation,
            weights,
            state,
        }
    }

    /// Controller with the given weights.
    pub fn with_weights(
        layout: NetworkLayout,
        activation: Activation,
        weights: &[f64],
    ) -> Result<Self> {
        let mut controller = Self::new(layout, activation);
        controller.load_weights(weights)?;
        Ok(controller)
    }

    fn zero_state(layout: &NetworkLayout) -> Vec<Vec<f64>> {
        layout.sizes()[1..].iter().map(|&n| vec![0.0; n]).collect()
    }

    pub fn layout(&self) -> &NetworkLayout {
        &self.layout
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn nweights(&self) -> usize {
        self.weights.len()
    }

    /// Replace all weights and clear the recurrent state.
    pub fn load_weights(&mut self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.weights.len() {
            return Err(UlerlError::ShapeMismatch {
                expected: self.weights.len(),
                got: weights.len(),
            });
        }
        self.weights.copy_from_slice(weights);
        self.reset_state();
        Ok(())
    }

    pub fn reset_state(&mut self) {
        for layer in &mut self.state {
            layer.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// Forward pass. Returns the output layer.
    pub fn activate(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        if input.len() != self.layout.ninputs() {
            return Err(UlerlError::ShapeMismatch {
                expected: self.layout.ninputs(),
                got: input.len(),
            });
        }

        let offsets = self.layout.layer_offsets();
        let recurrent = self.layout.kind() == NetworkKind::Recurrent;
        let mut current = input.to_vec();

        for layer in 0..self.layout.nlayers() {
            let (rows, cols) = self.layout.layer_shape(layer);
            let block = &self.weights[offsets[layer]..offsets[layer] + rows * cols];

            // Bias row first, then recurrent rows, then input rows.
            let mut out = block[..cols].to_vec();
            let mut row = 1;
            if recurrent {
                for &prev in &self.state[layer] {
                    accumulate_row(&mut out, &block[row * cols..(row + 1) * cols], prev);
                    row += 1;
                }
            }
            for &x in &current {
                accumulate_row(&mut out, &block[row * cols..(row + 1) * cols], x);
                row += 1;
            }
            debug_assert_eq!(row, rows);

            for v in &mut out {
                *v = self.activation.apply(*v);
            }
            if recurrent {
                self.state[layer].copy_from_slice(&out);
            }
            current = out;
        }

        Ok(current)
    }

    /// Rebuild for `ninputs` inputs.
    ///
    /// Existing weights keep feeding the same units; the rows for new
    /// inputs are zero, so the grown controller behaves exactly like the
    /// old one until the optimizer loads new weights.
    pub fn grow_inputs(&self, ninputs: usize) -> Result<Self> {
        let old = self.layout.ninputs();
        if ninputs < old {
            return Err(UlerlError::Shrink { old, new: ninputs });
        }
        let layout = self.layout.with_inputs(ninputs)?;
        let inserted = (ninputs - old) * self.layout.input_fan_out();
        let weights = insert_values(&self.weights, self.layout.input_block_end(), inserted, 0.0);
        Self::with_weights(layout, self.activation, &weights)
    }
}

#[inline]
fn accumulate_row(out: &mut [f64], row: &[f64], x: f64) {
    if x == 0.0 {
        return;
    }
    for (o, w) in out.iter_mut().zip(row) {
        *o += w * x;
    }
}
