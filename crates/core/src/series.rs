//! Index-aligned numeric series.
//!
//! `Series` is the value a node holds: an ordered map from integer index
//! points to f64 samples. Binary arithmetic aligns operands on the union
//! of their index sets and yields NaN wherever either side has no point,
//! so a partial update is visible as a gap rather than silently dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An ordered sequence of (index, value) samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Series {
    points: BTreeMap<i64, f64>,
}

impl Series {
    /// Create an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional construction: values take indices 0..n.
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            points: values
                .iter()
                .copied()
                .enumerate()
                .map(|(i, v)| (i as i64, v))
                .collect(),
        }
    }

    /// Explicit index construction.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, f64)>,
    {
        Self {
            points: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, index: i64) -> Option<f64> {
        self.points.get(&index).copied()
    }

    pub fn insert(&mut self, index: i64, value: f64) {
        self.points.insert(index, value);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate samples in index order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.points.iter().map(|(k, v)| (*k, *v))
    }

    /// Pointwise equality: identical index sets and values, with NaN
    /// equal to NaN. This is the equality consulted by the engine's
    /// equal-check suppression policy, not `PartialEq`.
    pub fn pointwise_eq(&self, other: &Series) -> bool {
        if self.points.len() != other.points.len() {
            return false;
        }
        self.points
            .iter()
            .zip(other.points.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && (va == vb || (va.is_nan() && vb.is_nan())))
    }

    /// Union-aligned binary operation. A missing point on either side
    /// enters `f` as NaN.
    pub fn zip_with<F>(&self, other: &Series, f: F) -> Series
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut points = BTreeMap::new();
        for &k in self.points.keys().chain(other.points.keys()) {
            let a = self.points.get(&k).copied().unwrap_or(f64::NAN);
            let b = other.points.get(&k).copied().unwrap_or(f64::NAN);
            points.insert(k, f(a, b));
        }
        Series { points }
    }

    /// Apply `f` to every sample.
    pub fn map<F>(&self, f: F) -> Series
    where
        F: Fn(f64) -> f64,
    {
        Series {
            points: self.points.iter().map(|(k, v)| (*k, f(*v))).collect(),
        }
    }

    /// Self's samples win; gaps and NaN samples are filled from `other`.
    pub fn combine_first(&self, other: &Series) -> Series {
        let mut points = other.points.clone();
        for (&k, &v) in &self.points {
            if v.is_nan() {
                points.entry(k).or_insert(v);
            } else {
                points.insert(k, v);
            }
        }
        Series { points }
    }

    /// Elementwise minimum over the union of indices. Where only one
    /// side has a point, that point is taken as-is.
    pub fn minimum(&self, other: &Series) -> Series {
        self.merge_with(other, f64::min)
    }

    /// Elementwise maximum over the union of indices. Where only one
    /// side has a point, that point is taken as-is.
    pub fn maximum(&self, other: &Series) -> Series {
        self.merge_with(other, f64::max)
    }

    fn merge_with(&self, other: &Series, f: fn(f64, f64) -> f64) -> Series {
        let mut points = BTreeMap::new();
        for &k in self.points.keys().chain(other.points.keys()) {
            let v = match (self.points.get(&k), other.points.get(&k)) {
                (Some(&a), Some(&b)) => f(a, b),
                (Some(&a), None) => a,
                (None, Some(&b)) => b,
                (None, None) => unreachable!(),
            };
            points.insert(k, v);
        }
        Series { points }
    }
}
