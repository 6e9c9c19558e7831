//! Parameter spaces and samplings of parameter spaces.
use crate::error::CrbError;
use nalgebra::DVector;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A point `mu` in a parameter space.
pub type Parameter = DVector<f64>;

/// An axis-aligned box `[min_0, max_0] x ... x [min_{d-1}, max_{d-1}]` of admissible parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    min: Parameter,
    max: Parameter,
}

/// How points are drawn from a [`ParameterSpace`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingKind {
    /// Independent uniform draws in each coordinate.
    Random,
    /// A tensor grid with equal spacing in each coordinate.
    Equidistributed,
    /// A tensor grid with equal spacing of `log(mu_i)` in each coordinate.
    LogEquidistributed,
}

impl ParameterSpace {
    pub fn new(min: Parameter, max: Parameter) -> Result<Self, CrbError> {
        if min.len() != max.len() {
            return Err(CrbError::InvalidParameterSpace(format!(
                "min has dimension {} but max has dimension {}",
                min.len(),
                max.len()
            )));
        }
        if min.is_empty() {
            return Err(CrbError::InvalidParameterSpace("dimension must be at least one".to_string()));
        }
        for (i, (a, b)) in min.iter().zip(max.iter()).enumerate() {
            if !a.is_finite() || !b.is_finite() || a > b {
                return Err(CrbError::InvalidParameterSpace(format!(
                    "invalid bounds [{}, {}] in coordinate {}",
                    a, b, i
                )));
            }
        }
        Ok(Self { min, max })
    }

    pub fn dimension(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &Parameter {
        &self.min
    }

    pub fn max(&self) -> &Parameter {
        &self.max
    }

    pub fn contains(&self, mu: &Parameter) -> bool {
        mu.len() == self.dimension()
            && mu
                .iter()
                .zip(self.min.iter().zip(self.max.iter()))
                .all(|(x, (a, b))| a <= x && x <= b)
    }

    /// Draws a sampling of (at most) `size` points.
    ///
    /// Grid samplings use `n = floor(size^(1/d))` points per coordinate, so they contain `n^d`
    /// points, with the first coordinate varying fastest. A single grid point per coordinate
    /// is placed at the midpoint (or the geometric mean, for logarithmic grids).
    pub fn sample<R: Rng + ?Sized>(&self, kind: SamplingKind, size: usize, rng: &mut R) -> Result<Sampling, CrbError> {
        if size == 0 {
            return Err(CrbError::InvalidSampling("cannot draw an empty sampling".to_string()));
        }

        match kind {
            SamplingKind::Random => {
                let points = (0..size)
                    .map(|_| {
                        Parameter::from_fn(self.dimension(), |i, _| {
                            let t: f64 = rng.gen();
                            self.min[i] + t * (self.max[i] - self.min[i])
                        })
                    })
                    .collect();
                Ok(Sampling::from_points(points))
            }
            SamplingKind::Equidistributed => Ok(self.grid(size, |a, b, t| a + t * (b - a))),
            SamplingKind::LogEquidistributed => {
                if let Some(i) = self.min.iter().position(|&a| a <= 0.0) {
                    return Err(CrbError::InvalidSampling(format!(
                        "logarithmic sampling requires positive bounds, but coordinate {} has minimum {}",
                        i, self.min[i]
                    )));
                }
                Ok(self.grid(size, |a, b, t| (a.ln() + t * (b.ln() - a.ln())).exp()))
            }
        }
    }

    fn grid(&self, size: usize, interpolate: impl Fn(f64, f64, f64) -> f64) -> Sampling {
        let d = self.dimension();
        let n = points_per_coordinate(size, d);
        let coordinate = |i: usize, k: usize| {
            let t = if n == 1 { 0.5 } else { k as f64 / (n - 1) as f64 };
            interpolate(self.min[i], self.max[i], t)
        };

        let total = n.pow(d as u32);
        let points = (0..total)
            .map(|linear_index| {
                Parameter::from_fn(d, |i, _| {
                    let k = (linear_index / n.pow(i as u32)) % n;
                    coordinate(i, k)
                })
            })
            .collect();
        Sampling::from_points(points)
    }
}

/// Largest `n >= 1` such that `n^d <= size`.
fn points_per_coordinate(size: usize, d: usize) -> usize {
    let mut n = ((size as f64).powf(1.0 / d as f64).floor() as usize).max(1);
    while n > 1 && n.checked_pow(d as u32).map_or(true, |total| total > size) {
        n -= 1;
    }
    while (n + 1).checked_pow(d as u32).map_or(false, |total| total <= size) {
        n += 1;
    }
    n
}

/// An ordered set of parameters.
///
/// A sampling obtained through [`Sampling::complement`] remembers, for each of its points, the
/// index of the same point in the super-sampling it was taken from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    points: Vec<Parameter>,
    super_indices: Option<Vec<usize>>,
}

impl Sampling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<Parameter>) -> Self {
        Self {
            points,
            super_indices: None,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn at(&self, index: usize) -> &Parameter {
        &self.points[index]
    }

    pub fn points(&self) -> &[Parameter] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.points.iter()
    }

    /// Appends a point.
    ///
    /// Any relation to a super-sampling is dropped.
    pub fn push(&mut self, mu: Parameter) {
        self.super_indices = None;
        self.points.push(mu);
    }

    pub fn contains(&self, mu: &Parameter) -> bool {
        self.points.iter().any(|p| p == mu)
    }

    /// The point with the smallest Euclidean norm together with its index.
    ///
    /// Ties resolve to the first such point.
    pub fn min(&self) -> Option<(Parameter, usize)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in self.points.iter().enumerate() {
            let norm = p.norm();
            if best.map_or(true, |(_, best_norm)| norm < best_norm) {
                best = Some((i, norm));
            }
        }
        best.map(|(i, _)| (self.points[i].clone(), i))
    }

    /// The point with the largest Euclidean norm together with its index.
    ///
    /// Ties resolve to the first such point.
    pub fn max(&self) -> Option<(Parameter, usize)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in self.points.iter().enumerate() {
            let norm = p.norm();
            if best.map_or(true, |(_, best_norm)| norm > best_norm) {
                best = Some((i, norm));
            }
        }
        best.map(|(i, _)| (self.points[i].clone(), i))
    }

    /// Returns the points of `super_sampling` that are not in `self`, in super-sampling order.
    ///
    /// Points are compared for exact equality, and every point in `self` cancels at most one
    /// occurrence in `super_sampling`.
    pub fn complement(&self, super_sampling: &Sampling) -> Sampling {
        let mut consumed = vec![false; self.points.len()];
        let mut points = Vec::new();
        let mut super_indices = Vec::new();

        for (index, candidate) in super_sampling.points.iter().enumerate() {
            let matched = self
                .points
                .iter()
                .enumerate()
                .position(|(k, p)| !consumed[k] && p == candidate);
            match matched {
                Some(k) => consumed[k] = true,
                None => {
                    points.push(candidate.clone());
                    super_indices.push(index);
                }
            }
        }

        Sampling {
            points,
            super_indices: Some(super_indices),
        }
    }

    /// Maps an index in this sampling to the index of the same point in the super-sampling it
    /// was obtained from.
    ///
    /// Returns `None` if this sampling has no super-sampling or the index is out of bounds.
    pub fn index_in_super_sampling(&self, index: usize) -> Option<usize> {
        self.super_indices
            .as_ref()
            .and_then(|indices| indices.get(index).copied())
    }
}
