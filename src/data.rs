use itertools::Itertools;
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{
  error::{FitError, FitResult},
  internal::real,
  scalar::Real,
};


/// Parameters of the synthetic spiral used throughout the crate's
/// examples and tests.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiralConfig<R: Real> {
  /// Number of samples, uniformly spaced in time.
  pub samples: usize,
  /// Final time of the sampled window `[0, t_final]`.
  pub t_final: R,
  /// Noise scale; each coordinate gets an independent `Uniform(0, noise)` draw.
  pub noise: R,
}

impl<R: Real> Default for SpiralConfig<R> {
  fn default() -> Self {
    Self {
      samples: 60,
      t_final: real(4.0),
      noise: real(0.1),
    }
  }
}


/// An ordered sequence of timestamped planar samples.
///
/// Immutable once constructed. Sample times are strictly increasing;
/// the constructor rejects anything else.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory<R: Real> {
  times: Vec<R>,
  states: Vec<[R; 2]>,
}

impl<R: Real> Trajectory<R> {
  pub fn new(times: Vec<R>, states: Vec<[R; 2]>) -> FitResult<Self> {
    if times.is_empty() {
      return Err(FitError::InvalidInput { what: "trajectory must contain at least one sample".into() });
    }
    if times.len() != states.len() {
      return Err(FitError::InvalidInput {
        what: format!("{} sample times for {} states", times.len(), states.len()),
      });
    }
    if !times.iter().tuple_windows().all(|(a, b)| b > a) {
      return Err(FitError::InvalidInput { what: "sample times must be strictly increasing".into() });
    }
    Ok(Self { times, states })
  }

  /// Noisy samples of the spiral `((1+t)cos t, (1+t)sin t)` on a
  /// uniform time grid over `[0, t_final]`.
  ///
  /// Deterministic for a seeded generator. A zero noise scale yields
  /// the exact curve.

  pub fn spiral(config: &SpiralConfig<R>, rng: &mut impl Rng) -> FitResult<Self> {
    if config.samples < 2 {
      return Err(FitError::InvalidInput { what: "spiral needs at least two samples".into() });
    }
    if config.noise < R::zero() || config.t_final <= R::zero() {
      return Err(FitError::InvalidInput { what: "noise scale must be non-negative and final time positive".into() });
    }
    let n = config.samples;
    let dt = config.t_final / real(n as f64 - 1.0);
    let mut times = Vec::with_capacity(n);
    let mut states = Vec::with_capacity(n);
    for i in 0..n {
      let t = dt * real(i as f64);
      let radius = R::one() + t;
      let mut point = [radius * t.cos(), radius * t.sin()];
      if config.noise > R::zero() {
        for coord in point.iter_mut() {
          *coord += rng.gen_range(R::zero(), config.noise);
        }
      }
      times.push(t);
      states.push(point);
    }
    Self::new(times, states)
  }

  pub fn len(&self) -> usize {
    self.times.len()
  }

  pub fn is_empty(&self) -> bool {
    self.times.is_empty()
  }

  pub fn times(&self) -> &[R] {
    &self.times
  }

  pub fn states(&self) -> &[[R; 2]] {
    &self.states
  }

  /// Initial condition used by the prediction function.
  pub fn u0(&self) -> [R; 2] {
    self.states[0]
  }

  pub fn t_final(&self) -> R {
    *self.times.last().unwrap()
  }

  pub fn point(&self, i: usize) -> (R, [R; 2]) {
    (self.times[i], self.states[i])
  }
}
