//! Rank-based fitness shaping and the default NES hyperparameters.

/// Default population size for `ndims` search dimensions: `4 + floor(3 ln d)`.
pub fn default_population_size(ndims: usize) -> usize {
    4 + (3.0 * (ndims.max(1) as f64).ln()).floor() as usize
}

/// Utility of each rank, best rank first.
///
/// `u_i = max(0, ln(λ/2 + 1) - ln i) / Σ_j max(0, ln(λ/2 + 1) - ln j) - 1/λ`
/// for `i = 1..=λ`. Utilities sum to zero.
pub fn rank_utilities(popsize: usize) -> Vec<f64> {
    let lambda = popsize as f64;
    let log_half = (lambda / 2.0 + 1.0).ln();
    let raw: Vec<f64> = (1..=popsize)
        .map(|i| (log_half - (i as f64).ln()).max(0.0))
        .collect();
    let total: f64 = raw.iter().sum();
    raw.iter().map(|r| r / total - 1.0 / lambda).collect()
}

/// Indices of `fitnesses` from best to worst (maximization).
///
/// NaN ranks with negative infinity; ties keep input order.
pub fn ranking(fitnesses: &[f64]) -> Vec<usize> {
    let key = |f: f64| if f.is_nan() { f64::NEG_INFINITY } else { f };
    let mut order: Vec<usize> = (0..fitnesses.len()).collect();
    order.sort_by(|&a, &b| key(fitnesses[b]).total_cmp(&key(fitnesses[a])));
    order
}

/// Utility of every individual, in population order.
pub fn shaped_utilities(fitnesses: &[f64]) -> Vec<f64> {
    let utils = rank_utilities(fitnesses.len());
    let mut shaped = vec![0.0; fitnesses.len()];
    for (rank, idx) in ranking(fitnesses).into_iter().enumerate() {
        shaped[idx] = utils[rank];
    }
    shaped
}

/// SNES sigma learning rate: `(3 + ln d) / (5 √d)`.
pub fn snes_sigma_lrate(ndims: usize) -> f64 {
    let d = ndims.max(1) as f64;
    (3.0 + d.ln()) / (5.0 * d.sqrt())
}

/// xNES factor learning rate: `0.6 (3 + ln d) / (d √d)`.
pub fn xnes_factor_lrate(ndims: usize) -> f64 {
    let d = ndims.max(1) as f64;
    0.6 * (3.0 + d.ln()) / (d * d.sqrt())
}
