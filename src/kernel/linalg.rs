//! Flat row-major square matrices.
//!
//! Storage is a single `Vec<f64>` of `n * n` entries, row `i` at
//! `data[i * n .. (i + 1) * n]`. Resizing never edits a live buffer:
//! [`SquareMatrix::insert`] builds a new buffer and copies the old rows
//! and columns to explicitly computed offsets.

use serde::{Deserialize, Serialize};

/// Dense square matrix with row-major flat storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SquareMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SquareMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    pub fn identity(n: usize) -> Self {
        Self::scaled_identity(n, 1.0)
    }

    /// `value * I`
    pub fn scaled_identity(n: usize, value: f64) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.data[i * n + i] = value;
        }
        m
    }

    /// Build from row-major data. Returns `None` when `data.len() != n * n`.
    pub fn from_data(n: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() != n * n {
            return None;
        }
        Some(Self { n, data })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.n + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.n..(row + 1) * self.n]
    }

    pub fn matmul(&self, other: &Self) -> Self {
        assert_eq!(self.n, other.n, "Dimension mismatch in matmul");
        let n = self.n;
        let mut out = Self::zeros(n);
        for i in 0..n {
            for k in 0..n {
                let a = self.data[i * n + k];
                if a == 0.0 {
                    continue;
                }
                let other_row = &other.data[k * n..(k + 1) * n];
                let out_row = &mut out.data[i * n..(i + 1) * n];
                for (o, &b) in out_row.iter_mut().zip(other_row) {
                    *o += a * b;
                }
            }
        }
        out
    }

    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.n, v.len(), "Dimension mismatch in mul_vec");
        (0..self.n)
            .map(|i| self.row(i).iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// `A * A^T`: the covariance represented by a square-root factor `A`.
    pub fn gram(&self) -> Self {
        let n = self.n;
        let mut out = Self::zeros(n);
        for i in 0..n {
            for j in 0..=i {
                let v: f64 = self.row(i).iter().zip(self.row(j)).map(|(a, b)| a * b).sum();
                out.data[i * n + j] = v;
                out.data[j * n + i] = v;
            }
        }
        out
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            n: self.n,
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    fn add_assign(&mut self, other: &Self) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
    }

    /// Maximum absolute row sum.
    pub fn norm_inf(&self) -> f64 {
        (0..self.n)
            .map(|i| self.row(i).iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    /// Matrix exponential by scaling and squaring with a Taylor series.
    pub fn expm(&self) -> Self {
        let n = self.n;
        let norm = self.norm_inf();
        let squarings = if norm > 0.5 {
            (norm / 0.5).log2().ceil() as u32
        } else {
            0
        };
        let scaled = self.scaled(1.0 / f64::powi(2.0, squarings as i32));

        let mut result = Self::identity(n);
        let mut term = Self::identity(n);
        for k in 1..=30 {
            term = term.matmul(&scaled).scaled(1.0 / k as f64);
            result.add_assign(&term);
            if term.norm_inf() < 1e-16 {
                break;
            }
        }
        for _ in 0..squarings {
            result = result.matmul(&result);
        }
        result
    }

    /// Insert `count` rows and columns starting at `offset`.
    ///
    /// New entries are zero except their diagonal, which is set to
    /// `diagonal`. Every old entry `(i, j)` lands at
    /// `(shift(i), shift(j))` with `shift(x) = x` below `offset` and
    /// `x + count` at or above it, so the old matrix is recovered exactly
    /// by [`SquareMatrix::remove`].
    pub fn insert(&self, offset: usize, count: usize, diagonal: f64) -> Self {
        assert!(offset <= self.n, "Insert offset {} past size {}", offset, self.n);
        let old_n = self.n;
        let new_n = old_n + count;
        let shift = |x: usize| if x < offset { x } else { x + count };

        let mut out = Self::zeros(new_n);
        for i in 0..old_n {
            let dst = shift(i) * new_n;
            let src = &self.data[i * old_n..(i + 1) * old_n];
            out.data[dst..dst + offset].copy_from_slice(&src[..offset]);
            out.data[dst + offset + count..dst + new_n].copy_from_slice(&src[offset..]);
        }
        for k in offset..offset + count {
            out.data[k * new_n + k] = diagonal;
        }
        out
    }

    /// Drop `count` rows and columns starting at `offset`.
    pub fn remove(&self, offset: usize, count: usize) -> Self {
        assert!(offset + count <= self.n, "Remove range past size {}", self.n);
        let old_n = self.n;
        let new_n = old_n - count;
        let keep = |x: usize| x < offset || x >= offset + count;

        let mut data = Vec::with_capacity(new_n * new_n);
        for i in (0..old_n).filter(|&i| keep(i)) {
            data.extend(
                self.row(i)
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| keep(*j))
                    .map(|(_, v)| *v),
            );
        }
        Self { n: new_n, data }
    }
}

/// Insert `count` copies of `value` into `values` at `offset`, producing a new buffer.
pub fn insert_values(values: &[f64], offset: usize, count: usize, value: f64) -> Vec<f64> {
    assert!(offset <= values.len(), "Insert offset {} past length {}", offset, values.len());
    let mut out = Vec::with_capacity(values.len() + count);
    out.extend_from_slice(&values[..offset]);
    out.extend(std::iter::repeat(value).take(count));
    out.extend_from_slice(&values[offset..]);
    out
}
