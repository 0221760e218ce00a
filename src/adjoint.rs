//! Sum-of-squares data-fit objective with gradients computed by the
//! adjoint sensitivity method.
//!
//! The backward pass integrates the augmented state `[x | lambda | g]`
//! from the last sample time to the first, where `lambda` carries
//! `dloss/dx(t)` and `g` accumulates the parameter gradient. At every
//! sample time the partial `2 (pred - data)` is injected into
//! `lambda`, and `x` is pinned back to the stored forward solution.

use tracing::trace;

use crate::{
  data::Trajectory,
  error::FitResult,
  internal::real,
  model::Dynamics,
  scalar::Real,
  solve::{advance, solve, SolveOptions},
};


/// A single evaluation of the objective.

#[derive(Debug, Clone)]
pub struct Evaluation<R: Real> {
  pub loss: R,
  pub grad: Vec<R>,
  pub prediction: Vec<Vec<R>>,
}


/// Predicted states at the trajectory's sample times, integrating the
/// dynamics from the trajectory's first sample.

pub fn predict<R: Real>(
  dynamics: &impl Dynamics<R>,
  params: &[R],
  data: &Trajectory<R>,
  opts: &SolveOptions<R>,
) -> FitResult<Vec<Vec<R>>> {
  solve(dynamics, params, &data.u0(), data.times(), opts)
}

fn sum_squares<R: Real>(data: &Trajectory<R>, prediction: &[Vec<R>]) -> R {
  data.states()
    .iter()
    .zip(prediction)
    .map(|(d, p)| {
      d.iter()
        .zip(p)
        .map(|(a, b)| {
          let r = *a - *b;
          r * r
        })
        .sum::<R>()
    })
    .sum()
}


/// Objective value without the adjoint pass, for callers that do not
/// need gradients.

pub fn loss_only<R: Real>(
  dynamics: &impl Dynamics<R>,
  params: &[R],
  data: &Trajectory<R>,
  opts: &SolveOptions<R>,
) -> FitResult<R> {
  let prediction = predict(dynamics, params, data, opts)?;
  Ok(sum_squares(data, &prediction))
}


/// Objective value, parameter gradient and the prediction that
/// produced them.

pub fn loss_and_grad<R: Real>(
  dynamics: &impl Dynamics<R>,
  params: &[R],
  data: &Trajectory<R>,
  opts: &SolveOptions<R>,
) -> FitResult<Evaluation<R>> {
  let prediction = predict(dynamics, params, data, opts)?;
  let loss = sum_squares(data, &prediction);

  let dim = dynamics.dim();
  let np = params.len();
  let n = data.len();
  let two = real::<R>(2.0);

  // Augmented state: forward state, adjoint, parameter gradient.
  let mut z = vec![R::zero(); dim + dim + np];
  z[..dim].copy_from_slice(&prediction[n - 1]);
  for d in 0..dim {
    z[dim + d] = two * (prediction[n - 1][d] - data.states()[n - 1][d]);
  }

  let mut steps = 0usize;
  let mut aug = |_t: R, state: &[R], dz: &mut [R]| {
    let (x, rest) = state.split_at(dim);
    let (lambda, _) = rest.split_at(dim);
    let (dx, drest) = dz.split_at_mut(dim);
    let (dl, dg) = drest.split_at_mut(dim);
    dynamics.eval(x, params, dx);
    for v in dl.iter_mut() {
      *v = R::zero();
    }
    for v in dg.iter_mut() {
      *v = R::zero();
    }
    dynamics.vjp(x, params, lambda, dl, dg);
    for v in dl.iter_mut() {
      *v = -*v;
    }
    for v in dg.iter_mut() {
      *v = -*v;
    }
  };

  for i in (1..n).rev() {
    advance(&mut aug, &mut z, data.times()[i], data.times()[i - 1], opts, &mut steps)?;
    let idx = i - 1;
    z[..dim].copy_from_slice(&prediction[idx]);
    if idx > 0 {
      for d in 0..dim {
        z[dim + d] += two * (prediction[idx][d] - data.states()[idx][d]);
      }
    }
  }
  trace!(steps, "adjoint pass finished");

  Ok(Evaluation {
    loss,
    grad: z[2 * dim..].to_vec(),
    prediction,
  })
}


#[cfg(test)]
mod tests {
  use rand::{rngs::StdRng, SeedableRng};

  use crate::{
    data::{SpiralConfig, Trajectory},
    model::Mlp,
  };

  use super::*;

  fn small_setup() -> (Mlp, Vec<f64>, Trajectory<f64>) {
    let model = Mlp::new(2, 4, 2);
    let mut rng = StdRng::seed_from_u64(5);
    let params = model.init_params(&mut rng);
    let config = SpiralConfig { samples: 8, t_final: 1.0, noise: 0.05 };
    let data = Trajectory::spiral(&config, &mut rng).unwrap();
    (model, params, data)
  }

  #[test]
  fn prediction_starts_at_u0() {
    let (model, params, data) = small_setup();
    let prediction = predict(&model, &params, &data, &SolveOptions::default()).unwrap();
    assert_eq!(prediction.len(), data.len());
    let u0 = data.u0();
    assert!((prediction[0][0] - u0[0]).abs() < 1e-5);
    assert!((prediction[0][1] - u0[1]).abs() < 1e-5);
  }

  #[test]
  fn default_spiral_prediction_shape() {
    let model = Mlp::planar();
    let mut rng = StdRng::seed_from_u64(2);
    let params: Vec<f64> = model.init_params(&mut rng);
    let data = Trajectory::spiral(&SpiralConfig::default(), &mut rng).unwrap();
    let prediction = predict(&model, &params, &data, &SolveOptions::default()).unwrap();
    assert_eq!(prediction.len(), 60);
    assert!(prediction.iter().all(|p| p.len() == 2));
  }

  #[test]
  fn loss_is_non_negative_and_zero_only_on_exact_match() {
    let (model, params, data) = small_setup();
    let loss = loss_only(&model, &params, &data, &SolveOptions::default()).unwrap();
    assert!(loss > 0.0);

    // A trajectory built from the prediction itself has zero loss.
    let prediction = predict(&model, &params, &data, &SolveOptions::default()).unwrap();
    let states: Vec<[f64; 2]> = prediction.iter().map(|p| [p[0], p[1]]).collect();
    let matched = Trajectory::new(data.times().to_vec(), states).unwrap();
    let zero = loss_only(&model, &params, &matched, &SolveOptions::default()).unwrap();
    assert_eq!(zero, 0.0);
  }

  // Adjoint gradient against central finite differences. Tight solver
  // tolerances keep the integration error well below the comparison
  // threshold.
  #[test]
  fn gradient_matches_finite_differences() {
    let (model, params, data) = small_setup();
    let opts = SolveOptions { rtol: 1e-10, atol: 1e-10, ..Default::default() };
    let eval = loss_and_grad(&model, &params, &data, &opts).unwrap();
    assert_eq!(eval.grad.len(), params.len());

    let eps = 1e-5;
    for i in 0..params.len() {
      let mut plus = params.clone();
      let mut minus = params.clone();
      plus[i] += eps;
      minus[i] -= eps;
      let lp = loss_only(&model, &plus, &data, &opts).unwrap();
      let lm = loss_only(&model, &minus, &data, &opts).unwrap();
      let fd = (lp - lm) / (2.0 * eps);
      let tol = 1e-4 * fd.abs().max(1.0);
      assert!(
        (eval.grad[i] - fd).abs() < tol,
        "grad[{i}]: adjoint {} vs fd {}",
        eval.grad[i],
        fd
      );
    }
  }

  #[test]
  fn loss_and_grad_agree_with_loss_only() {
    let (model, params, data) = small_setup();
    let opts = SolveOptions::default();
    let eval = loss_and_grad(&model, &params, &data, &opts).unwrap();
    let loss = loss_only(&model, &params, &data, &opts).unwrap();
    assert_eq!(eval.loss, loss);
  }
}
