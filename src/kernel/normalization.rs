//! Feature scaling between value ranges, and the shape arithmetic of
//! stride downsampling.

use crate::error::{Result, UlerlError};

/// Linearly map `values` from the `from` range onto the `to` range.
///
/// Values outside `from` map outside `to`; nothing is clamped.
pub fn feature_scaling(values: &[f64], from: (f64, f64), to: (f64, f64)) -> Vec<f64> {
    let (from_lo, from_hi) = from;
    let (to_lo, to_hi) = to;
    let scale = (to_hi - to_lo) / (from_hi - from_lo);
    values
        .iter()
        .map(|&v| (v - from_lo) * scale + to_lo)
        .collect()
}

/// Shape of a `(rows, cols)` frame after keeping every `factors[axis]`-th
/// row and column.
///
/// Partial strides at the far edge are dropped, so the result is
/// `(rows / factors[0], cols / factors[1])`.
pub fn downsampled_shape(shape: (usize, usize), factors: [usize; 2]) -> Result<(usize, usize)> {
    if factors.iter().any(|&f| f < 1) {
        return Err(UlerlError::Config(format!(
            "Only downward scaling: downsample factors must be >= 1, got {:?}",
            factors
        )));
    }
    let out = (shape.0 / factors[0], shape.1 / factors[1]);
    if out.0 == 0 || out.1 == 0 {
        return Err(UlerlError::Config(format!(
            "downsampling {:?} by {:?} leaves an empty observation",
            shape, factors
        )));
    }
    Ok(out)
}
