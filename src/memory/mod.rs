//! Memory layer: the observation compressor and its codebook.
//!
//! This module provides:
//!
//! - [`CodebookStore`]: ordered prototypes with usage counts. Indices are
//!   stable identities; prototypes are only ever appended.
//!
//! - [`Code`] / [`Encoding`]: an observation expressed against the
//!   codebook, as an index, a dense weight vector or sparse weights.
//!
//! - [`Compressor`]: encodes observations, scores their novelty as
//!   reconstruction error, and trains the codebook between generations
//!   from a curated buffer of novel observations.
//!
//! # Usage
//!
//! ```rust
//! use ulerl::config::CompressorConfig;
//! use ulerl::memory::Compressor;
//!
//! let config = CompressorConfig { obs_range: (0.0, 1.0), ..Default::default() };
//! let compr = Compressor::new(&config, (4, 4), 7).unwrap();
//!
//! let obs = vec![0.5; 16];
//! let code = compr.encode(&obs).unwrap();
//! assert_eq!(code.len(), compr.ncentrs());
//! ```

pub mod code;
pub mod codebook;
pub mod compressor;

pub use code::{Code, Encoding};
pub use codebook::{CodebookSnapshot, CodebookStore};
pub use compressor::{Compressor, FixedUpdate, GrowingUpdate, TrainReport, UpdateRule};
