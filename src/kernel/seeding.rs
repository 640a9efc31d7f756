//! Deterministic per-component random streams.
//!
//! Every component draws from its own ChaCha8 stream, seeded from
//! SHA-256(run seed || component name). Adding a component never shifts
//! the numbers another component sees.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Derive a 64-bit seed for `component` from the run seed.
pub fn derive_seed(run_seed: u64, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(run_seed.to_le_bytes());
    hasher.update(component.as_bytes());
    let hash = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(bytes)
}

/// ChaCha8 stream for `component`.
pub fn component_rng(run_seed: u64, component: &str) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(derive_seed(run_seed, component))
}
