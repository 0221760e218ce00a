//! Two-phase training loop: a coarse ADAM phase followed by an LBFGS
//! refinement started from the coarse result. Phase chaining is
//! caller-driven; each phase is an independent call.

use tracing::{debug, info};

use crate::{
  adjoint::{loss_and_grad, loss_only, Evaluation},
  data::Trajectory,
  error::{FitError, FitResult},
  internal::real,
  model::Dynamics,
  optimize::{Adam, Lbfgs, LbfgsStep, Objective, Optimizer},
  scalar::Real,
  solve::SolveOptions,
};


/// Knobs shared by both training phases.

#[derive(Debug, Clone)]
pub struct TrainOptions<R: Real> {
  /// Iteration cap. Zero means "evaluate once, change nothing".
  pub max_iters: usize,
  /// Callback cadence; the callback fires on every `callback_every`-th
  /// iteration. Zero disables the callback.
  pub callback_every: usize,
  /// LBFGS only: accept the last trial step when the line search runs
  /// out of trials.
  pub allow_increase: bool,
  /// LBFGS only: stop once the gradient infinity norm drops below this.
  pub grad_tol: R,
  pub solve: SolveOptions<R>,
}

impl<R: Real> Default for TrainOptions<R> {
  fn default() -> Self {
    Self {
      max_iters: 600,
      callback_every: 3,
      allow_increase: true,
      grad_tol: real(1e-8),
      solve: SolveOptions::default(),
    }
  }
}


/// Snapshot handed to the per-iteration callback.
///
/// The callback is side-effecting only; returning `true` asks the
/// loop to stop after the current iteration.

#[derive(Debug)]
pub struct TrainEvent<'a, R: Real> {
  /// 1-based iteration within the current phase. Owned by the loop,
  /// never ambient state.
  pub iteration: usize,
  pub loss: R,
  pub params: &'a [R],
  pub prediction: &'a [Vec<R>],
}


/// Final state of a training phase.

#[derive(Debug, Clone)]
pub struct FitReport<R: Real> {
  pub params: Vec<R>,
  /// Loss at the returned parameters.
  pub loss: R,
  /// Loss at the parameters the phase started from.
  pub initial_loss: R,
  pub iterations: usize,
  pub stopped_by_callback: bool,
  /// LBFGS only: the optimizer's own stopping rule fired.
  pub converged: bool,
}

fn check_finite<R: Real>(loss: R, iteration: usize) -> FitResult<()> {
  if loss.is_finite() {
    Ok(())
  } else {
    Err(FitError::Divergence {
      iteration,
      loss: loss.to_f64().unwrap_or(f64::NAN),
    })
  }
}

fn fire_callback<R: Real, F>(
  callback: &mut F,
  every: usize,
  iteration: usize,
  current: &Evaluation<R>,
  params: &[R],
) -> bool
where
  F: FnMut(&TrainEvent<R>) -> bool,
{
  if every == 0 || iteration % every != 0 {
    return false;
  }
  callback(&TrainEvent {
    iteration,
    loss: current.loss,
    params,
    prediction: &current.prediction,
  })
}


/// Coarse phase: ADAM with a fixed iteration budget.
///
/// Each iteration evaluates the objective and its adjoint gradient,
/// applies the update, and fires the callback on its cadence. A
/// non-finite loss aborts with [FitError::Divergence].

pub fn fit_adam<R, D, F>(
  dynamics: &D,
  params: Vec<R>,
  data: &Trajectory<R>,
  learning_rate: R,
  opts: &TrainOptions<R>,
  mut callback: F,
) -> FitResult<FitReport<R>>
where
  R: Real,
  D: Dynamics<R>,
  F: FnMut(&TrainEvent<R>) -> bool,
{
  let mut params = params;
  let mut optimizer = Optimizer::new(learning_rate, Adam::default());

  let mut current = loss_and_grad(dynamics, &params, data, &opts.solve)?;
  check_finite(current.loss, 0)?;
  let initial_loss = current.loss;
  info!(max_iters = opts.max_iters, "starting ADAM phase, loss = {:?}", initial_loss);

  let mut iterations = 0;
  let mut stopped_by_callback = false;
  for iteration in 1..=opts.max_iters {
    optimizer.minimize(&mut params, &current.grad);
    current = loss_and_grad(dynamics, &params, data, &opts.solve)?;
    check_finite(current.loss, iteration)?;
    debug!(iteration, "loss = {:?}", current.loss);
    iterations = iteration;
    if fire_callback(&mut callback, opts.callback_every, iteration, &current, &params) {
      stopped_by_callback = true;
      break;
    }
  }

  info!(iterations, "ADAM phase done, loss = {:?}", current.loss);
  Ok(FitReport {
    params,
    loss: current.loss,
    initial_loss,
    iterations,
    stopped_by_callback,
    converged: false,
  })
}


struct OdeObjective<'a, R: Real, D: Dynamics<R>> {
  dynamics: &'a D,
  data: &'a Trajectory<R>,
  opts: &'a SolveOptions<R>,
}

impl<R: Real, D: Dynamics<R>> Objective<R> for OdeObjective<'_, R, D> {
  fn value(&mut self, params: &[R]) -> FitResult<R> {
    loss_only(self.dynamics, params, self.data, self.opts)
  }

  fn value_grad(&mut self, params: &[R]) -> FitResult<(R, Vec<R>)> {
    let eval = loss_and_grad(self.dynamics, params, self.data, self.opts)?;
    Ok((eval.loss, eval.grad))
  }
}


/// Refinement phase: LBFGS from the coarse phase's parameters.
///
/// Line-search evaluations inside a step do not tick the iteration
/// counter or the callback cadence.

pub fn fit_lbfgs<R, D, F>(
  dynamics: &D,
  params: Vec<R>,
  data: &Trajectory<R>,
  opts: &TrainOptions<R>,
  mut callback: F,
) -> FitResult<FitReport<R>>
where
  R: Real,
  D: Dynamics<R>,
  F: FnMut(&TrainEvent<R>) -> bool,
{
  let mut params = params;
  let mut objective = OdeObjective { dynamics, data, opts: &opts.solve };
  let mut lbfgs = Lbfgs::new();
  lbfgs.grad_tol = opts.grad_tol;
  lbfgs.allow_increase = opts.allow_increase;

  let mut current = loss_and_grad(dynamics, &params, data, &opts.solve)?;
  check_finite(current.loss, 0)?;
  let initial_loss = current.loss;
  info!(max_iters = opts.max_iters, "starting LBFGS phase, loss = {:?}", initial_loss);

  let mut iterations = 0;
  let mut stopped_by_callback = false;
  let mut converged = false;
  for iteration in 1..=opts.max_iters {
    match lbfgs.step(&mut objective, &mut params, current.loss, &current.grad)? {
      LbfgsStep::Converged => {
        debug!(iteration, "gradient below tolerance");
        converged = true;
        break;
      }
      LbfgsStep::Exhausted => {
        debug!(iteration, "line search exhausted");
        converged = true;
        break;
      }
      LbfgsStep::Advanced => {}
    }
    current = loss_and_grad(dynamics, &params, data, &opts.solve)?;
    check_finite(current.loss, iteration)?;
    debug!(iteration, "loss = {:?}", current.loss);
    iterations = iteration;
    if fire_callback(&mut callback, opts.callback_every, iteration, &current, &params) {
      stopped_by_callback = true;
      break;
    }
  }

  info!(iterations, converged, "LBFGS phase done, loss = {:?}", current.loss);
  Ok(FitReport {
    params,
    loss: current.loss,
    initial_loss,
    iterations,
    stopped_by_callback,
    converged,
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

  fn tiny_setup(seed: u64) -> (Mlp, Vec<f64>, Trajectory<f64>) {
    let model = Mlp::new(2, 6, 2);
    let mut rng = StdRng::seed_from_u64(seed);
    let params = model.init_params(&mut rng);
    let config = SpiralConfig { samples: 12, t_final: 1.5, noise: 0.05 };
    let data = Trajectory::spiral(&config, &mut rng).unwrap();
    (model, params, data)
  }

  fn never_stop(_: &TrainEvent<f64>) -> bool {
    false
  }

  #[test]
  fn zero_iterations_leaves_params_unchanged() {
    let (model, params, data) = tiny_setup(1);
    let opts = TrainOptions { max_iters: 0, ..Default::default() };
    let report = fit_adam(&model, params.clone(), &data, 0.05, &opts, never_stop).unwrap();
    assert_eq!(report.params, params);
    assert_eq!(report.iterations, 0);
    assert_eq!(report.loss, report.initial_loss);
  }

  #[test]
  fn adam_makes_progress_on_spiral() {
    let (model, params, data) = tiny_setup(2);
    let opts = TrainOptions { max_iters: 60, ..Default::default() };
    let report = fit_adam(&model, params, &data, 0.05, &opts, never_stop).unwrap();
    assert_eq!(report.iterations, 60);
    assert!(
      report.loss < report.initial_loss,
      "no improvement: {} -> {}",
      report.initial_loss,
      report.loss
    );
  }

  #[test]
  fn callback_fires_on_cadence() {
    let (model, params, data) = tiny_setup(3);
    let opts = TrainOptions { max_iters: 10, callback_every: 3, ..Default::default() };
    let mut calls = vec![];
    let report = fit_adam(&model, params, &data, 0.05, &opts, |event| {
      calls.push(event.iteration);
      false
    })
    .unwrap();
    assert_eq!(calls, vec![3, 6, 9]);
    assert_eq!(calls.len(), opts.max_iters / 3);
    assert!(!report.stopped_by_callback);
  }

  #[test]
  fn zero_cadence_disables_callback() {
    let (model, params, data) = tiny_setup(3);
    let opts = TrainOptions { max_iters: 6, callback_every: 0, ..Default::default() };
    let mut calls = 0;
    fit_adam(&model, params, &data, 0.05, &opts, |_| {
      calls += 1;
      true
    })
    .unwrap();
    assert_eq!(calls, 0);
  }

  #[test]
  fn callback_stop_is_honored() {
    let (model, params, data) = tiny_setup(4);
    let opts = TrainOptions { max_iters: 50, callback_every: 3, ..Default::default() };
    let report = fit_adam(&model, params, &data, 0.05, &opts, |_| true).unwrap();
    assert!(report.stopped_by_callback);
    assert_eq!(report.iterations, 3);
  }

  #[test]
  fn lbfgs_continues_from_adam() {
    let (model, params, data) = tiny_setup(5);
    let opts = TrainOptions { max_iters: 40, ..Default::default() };
    let phase1 = fit_adam(&model, params, &data, 0.05, &opts, never_stop).unwrap();

    let opts2 = TrainOptions { max_iters: 15, allow_increase: false, ..Default::default() };
    let phase2 = fit_lbfgs(&model, phase1.params, &data, &opts2, never_stop).unwrap();
    // Phase 2's first evaluation sees exactly what phase 1 left behind.
    assert!((phase2.initial_loss - phase1.loss).abs() < 1e-12);
    assert!(phase2.loss <= phase2.initial_loss);
  }

  #[test]
  fn non_finite_loss_is_divergence() {
    // Constant huge derivative: integration succeeds, but the squared
    // residuals overflow to infinity.
    struct Blowup;

    impl Dynamics<f64> for Blowup {
      fn dim(&self) -> usize {
        2
      }

      fn num_params(&self) -> usize {
        1
      }

      fn eval(&self, _x: &[f64], _params: &[f64], out: &mut [f64]) {
        out[0] = 1e200;
        out[1] = 1e200;
      }

      fn vjp(&self, _x: &[f64], _p: &[f64], _v: &[f64], _xb: &mut [f64], _pb: &mut [f64]) {}
    }

    let config = SpiralConfig { samples: 4, t_final: 1.0, noise: 0.0 };
    let data = Trajectory::spiral(&config, &mut StdRng::seed_from_u64(0)).unwrap();
    let opts = TrainOptions { max_iters: 5, ..Default::default() };
    let result = fit_adam(&Blowup, vec![0.0], &data, 0.05, &opts, never_stop);
    assert!(matches!(result, Err(FitError::Divergence { .. })));
  }
}
