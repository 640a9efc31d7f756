//! Kernel layer: numeric primitives shared by every other layer.
//!
//! - Similarity and reconstruction-error measures ([`SimilarityMeasure`], [`NoveltyMetric`])
//! - Feature scaling between value ranges ([`feature_scaling`])
//! - Flat row-major square matrices with exact splicing ([`SquareMatrix`])
//! - Deterministic per-component random streams ([`component_rng`])
//! - The controller network and its weight layout ([`Controller`], [`NetworkLayout`])
//!
//! This layer has no dependencies on [`memory`](crate::memory),
//! [`evolution`](crate::evolution) or [`rollout`](crate::rollout).
//!
//! # Example
//!
//! ```rust
//! use ulerl::kernel::{Activation, Controller, NetworkKind, NetworkLayout};
//!
//! let layout = NetworkLayout::from_parts(NetworkKind::FeedForward, 4, &[], 3).unwrap();
//! let mut net = Controller::new(layout, Activation::Logistic);
//! let out = net.activate(&[0.0, 1.0, 0.0, 0.0]).unwrap();
//! assert_eq!(out, vec![0.5; 3]);
//! ```

pub mod linalg;
pub mod network;
pub mod normalization;
pub mod seeding;
pub mod similarity;

pub use linalg::{insert_values, SquareMatrix};
pub use network::{Activation, Controller, NetworkKind, NetworkLayout};
pub use normalization::{downsampled_shape, feature_scaling};
pub use seeding::{component_rng, derive_seed};
pub use similarity::{NoveltyMetric, SimilarityMeasure};
