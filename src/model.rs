use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{
  internal::real,
  scalar::Real,
};


/// Right-hand side of the fitted ODE.
///
/// Implementations are pure functions of the state and a flat
/// parameter vector. Besides the forward evaluation they provide
/// vector-Jacobian products, the reverse-mode hook consumed by the
/// adjoint pass during training.

pub trait Dynamics<R: Real> {
  /// Dimension of the state vector.
  fn dim(&self) -> usize;

  /// Length of the flat parameter vector.
  fn num_params(&self) -> usize;

  /// Compute `dx/dt` at `x` into `out`.
  fn eval(&self, x: &[R], params: &[R], out: &mut [R]);

  /// Accumulate `v^T df/dx` into `x_bar` and `v^T df/dp` into `p_bar`.
  fn vjp(&self, x: &[R], params: &[R], v: &[R], x_bar: &mut [R], p_bar: &mut [R]);
}


/// Two affine layers with a tanh between them, the classic neural ODE
/// right-hand side. Parameters live outside the struct, flattened as
/// `[w1 | b1 | w2 | b2]` with row-major weights.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mlp {
  input: usize,
  hidden: usize,
  output: usize,
}

impl Mlp {
  pub fn new(input: usize, hidden: usize, output: usize) -> Self {
    Self { input, hidden, output }
  }

  /// The 2 -> 20 -> 2 network used for planar trajectory fitting.
  pub fn planar() -> Self {
    Self::new(2, 20, 2)
  }

  pub fn input(&self) -> usize {
    self.input
  }

  pub fn hidden(&self) -> usize {
    self.hidden
  }

  pub fn output(&self) -> usize {
    self.output
  }

  pub fn param_len(&self) -> usize {
    self.input * self.hidden + self.hidden + self.hidden * self.output + self.output
  }

  // Offsets of b1, w2 and b2 within the flat parameter vector.
  fn offsets(&self) -> (usize, usize, usize) {
    let b1 = self.input * self.hidden;
    let w2 = b1 + self.hidden;
    let b2 = w2 + self.hidden * self.output;
    (b1, w2, b2)
  }

  /// Fresh parameters with Glorot-uniform weights and zero biases.

  pub fn init_params<R: Real>(&self, rng: &mut impl Rng) -> Vec<R> {
    let mut params = vec![R::zero(); self.param_len()];
    let (b1, w2, b2) = self.offsets();
    let limit1: R = real((6.0 / (self.input + self.hidden) as f64).sqrt());
    let limit2: R = real((6.0 / (self.hidden + self.output) as f64).sqrt());
    for p in params[..b1].iter_mut() {
      *p = rng.gen_range(-limit1, limit1);
    }
    for p in params[w2..b2].iter_mut() {
      *p = rng.gen_range(-limit2, limit2);
    }
    params
  }
}

impl<R: Real> Dynamics<R> for Mlp {
  fn dim(&self) -> usize {
    self.input
  }

  fn num_params(&self) -> usize {
    self.param_len()
  }

  fn eval(&self, x: &[R], params: &[R], out: &mut [R]) {
    debug_assert_eq!(x.len(), self.input);
    debug_assert_eq!(params.len(), self.param_len());
    debug_assert_eq!(out.len(), self.output);
    let (b1, w2, b2) = self.offsets();
    out.copy_from_slice(&params[b2..b2 + self.output]);
    for j in 0..self.hidden {
      let mut pre = params[b1 + j];
      for i in 0..self.input {
        pre += x[i] * params[i * self.hidden + j];
      }
      let h = pre.tanh();
      for k in 0..self.output {
        out[k] += h * params[w2 + j * self.output + k];
      }
    }
  }

  fn vjp(&self, x: &[R], params: &[R], v: &[R], x_bar: &mut [R], p_bar: &mut [R]) {
    debug_assert_eq!(v.len(), self.output);
    debug_assert_eq!(x_bar.len(), self.input);
    debug_assert_eq!(p_bar.len(), self.param_len());
    let (b1, w2, b2) = self.offsets();
    for k in 0..self.output {
      p_bar[b2 + k] += v[k];
    }
    for j in 0..self.hidden {
      // Recompute the hidden activation rather than caching it;
      // the layer is small enough that storage would cost more.
      let mut pre = params[b1 + j];
      for i in 0..self.input {
        pre += x[i] * params[i * self.hidden + j];
      }
      let h = pre.tanh();
      let mut h_bar = R::zero();
      for k in 0..self.output {
        let w = w2 + j * self.output + k;
        p_bar[w] += h * v[k];
        h_bar += params[w] * v[k];
      }
      let pre_bar = h_bar * (R::one() - h * h);
      p_bar[b1 + j] += pre_bar;
      for i in 0..self.input {
        p_bar[i * self.hidden + j] += x[i] * pre_bar;
        x_bar[i] += params[i * self.hidden + j] * pre_bar;
      }
    }
  }
}


#[cfg(test)]
mod tests {
  use rand::{rngs::StdRng, SeedableRng};

  use super::*;

  fn eval_vec(model: &Mlp, x: &[f64], params: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; model.output()];
    model.eval(x, params, &mut out);
    out
  }

  #[test]
  fn param_layout() {
    let model = Mlp::planar();
    assert_eq!(model.param_len(), 2 * 20 + 20 + 20 * 2 + 2);
    assert_eq!(Dynamics::<f64>::num_params(&model), 102);
    assert_eq!(Dynamics::<f64>::dim(&model), 2);
  }

  #[test]
  fn init_params_are_reproducible() {
    let model = Mlp::planar();
    let a: Vec<f64> = model.init_params(&mut StdRng::seed_from_u64(1));
    let b: Vec<f64> = model.init_params(&mut StdRng::seed_from_u64(1));
    assert_eq!(a, b);
    // Biases start at zero
    let (b1, w2, _) = (40, 60, 100);
    assert!(a[b1..w2].iter().all(|&p| p == 0.0));
  }

  #[test]
  fn eval_matches_hand_computation() {
    // 1 -> 1 -> 1 network: f(x) = w2 * tanh(w1 * x + b1) + b2
    let model = Mlp::new(1, 1, 1);
    let params = [0.7, 0.2, -1.3, 0.4]; // w1, b1, w2, b2
    let x = [0.5];
    let expected = -1.3 * (0.7 * 0.5 + 0.2f64).tanh() + 0.4;
    let out = eval_vec(&model, &x, &params);
    assert!((out[0] - expected).abs() < 1e-12);
  }

  // Compare the hand-derived vjp against central finite differences,
  // for both the state and the parameters.
  #[test]
  fn vjp_matches_finite_differences() {
    let model = Mlp::new(2, 5, 2);
    let mut rng = StdRng::seed_from_u64(11);
    let params: Vec<f64> = model.init_params(&mut rng);
    let x = [0.3, -1.1];
    let v = [0.8, -0.25];
    let eps = 1e-6;

    let mut x_bar = vec![0.0; 2];
    let mut p_bar = vec![0.0; params.len()];
    model.vjp(&x, &params, &v, &mut x_bar, &mut p_bar);

    let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(p, q)| p * q).sum::<f64>();
    for i in 0..x.len() {
      let mut plus = x.to_vec();
      let mut minus = x.to_vec();
      plus[i] += eps;
      minus[i] -= eps;
      let fd = (dot(&eval_vec(&model, &plus, &params), &v)
        - dot(&eval_vec(&model, &minus, &params), &v)) / (2.0 * eps);
      assert!((x_bar[i] - fd).abs() < 1e-7, "x_bar[{i}]: {} vs {}", x_bar[i], fd);
    }
    for i in 0..params.len() {
      let mut plus = params.clone();
      let mut minus = params.clone();
      plus[i] += eps;
      minus[i] -= eps;
      let fd = (dot(&eval_vec(&model, &x, &plus), &v)
        - dot(&eval_vec(&model, &x, &minus), &v)) / (2.0 * eps);
      assert!((p_bar[i] - fd).abs() < 1e-7, "p_bar[{i}]: {} vs {}", p_bar[i], fd);
    }
  }
}
