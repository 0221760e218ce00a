use std::collections::VecDeque;

use crate::{
  error::FitResult,
  internal::{dot, inf_norm, real},
  scalar::Real,
};


/// An optimization strategy to be used with [Optimizer].

pub trait Strategy<R: Real> {
  /// Write the parameter change for this step into `delta`.
  fn update(&mut self, grad: &[R], rate: R, step: usize, delta: &mut [R]);
}


/// Generic first-order optimizer over a flat parameter vector,
/// allowing for several optimization [strategies](Strategy) to be used.

#[derive(Debug)]
pub struct Optimizer<R: Real, S: Strategy<R>> {
  strategy: S,
  pub learning_rate: R,
  step: usize,
  delta: Vec<R>,
}

impl<R: Real, S: Strategy<R>> Optimizer<R, S> {
  pub fn new(learning_rate: R, strategy: S) -> Self {
    Self { strategy, learning_rate, step: 1, delta: vec![] }
  }

  pub fn minimize(&mut self, params: &mut [R], grad: &[R]) {
    if self.delta.len() != grad.len() {
      self.delta = vec![R::zero(); grad.len()];
    }
    self.strategy.update(grad, self.learning_rate, self.step, &mut self.delta);
    for (param, change) in params.iter_mut().zip(&self.delta) {
      *param += *change;
    }
    self.step += 1;
  }
}


/// Plain gradient descent.

#[derive(Debug, Clone, Default)]
pub struct Sgd;

impl<R: Real> Strategy<R> for Sgd {
  fn update(&mut self, grad: &[R], rate: R, _step: usize, delta: &mut [R]) {
    for (d, g) in delta.iter_mut().zip(grad) {
      *d = *g * -rate;
    }
  }
}


/// Adaptive Movement Estimation strategy (ADAM)

#[derive(Debug, Clone)]
pub struct Adam<R: Real> {
  pub beta1: R,
  pub beta2: R,
  pub epsilon: R,
  m: Vec<R>,
  v: Vec<R>,
}

impl<R: Real> Adam<R> {
  pub fn new(beta1: R, beta2: R) -> Self {
    Self {
      beta1,
      beta2,
      epsilon: real(1e-8),
      m: vec![],
      v: vec![],
    }
  }
}

impl<R: Real> Default for Adam<R> {
  fn default() -> Self {
    Self::new(real(0.9), real(0.999))
  }
}

impl<R: Real> Strategy<R> for Adam<R> {
  fn update(&mut self, grad: &[R], rate: R, step: usize, delta: &mut [R]) {
    if self.m.len() != grad.len() {
      self.m = vec![R::zero(); grad.len()];
      self.v = vec![R::zero(); grad.len()];
    }
    let one = R::one();
    let step = real::<R>(step as f64);
    for i in 0..grad.len() {
      let g = grad[i];
      self.m[i] = self.m[i] * self.beta1 + g * (one - self.beta1);
      self.v[i] = self.v[i] * self.beta2 + g * g * (one - self.beta2);
      let mt = self.m[i] / (one - self.beta1.powf(step));
      let vt = self.v[i] / (one - self.beta2.powf(step));
      delta[i] = mt * -rate / (vt.sqrt() + self.epsilon);
    }
  }
}


/// Differentiable objective driven by [Lbfgs] line searches.

pub trait Objective<R: Real> {
  fn value(&mut self, params: &[R]) -> FitResult<R>;
  fn value_grad(&mut self, params: &[R]) -> FitResult<(R, Vec<R>)>;
}


/// Outcome of a single quasi-Newton step.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbfgsStep {
  /// Parameters moved; the loss decreased or an increase was allowed.
  Advanced,
  /// Gradient norm fell below tolerance; parameters untouched.
  Converged,
  /// No acceptable step found and increases are disallowed.
  Exhausted,
}


/// Limited-memory BFGS with a weak-Wolfe bisection line search.
///
/// The line search shrinks the step on an Armijo failure and extends
/// it on a curvature failure, so every accepted step yields a
/// curvature pair with positive `s . y` and the inverse-Hessian
/// history keeps refreshing on non-convex objectives.
/// `allow_increase` controls whether an iteration whose search ran
/// out of trials keeps the last trial step anyway or reports
/// [LbfgsStep::Exhausted].

pub struct Lbfgs<R: Real> {
  pub history: usize,
  pub grad_tol: R,
  pub allow_increase: bool,
  pub max_trials: usize,
  pub armijo: R,
  pub wolfe: R,
  s: VecDeque<Vec<R>>,
  y: VecDeque<Vec<R>>,
  rho: VecDeque<R>,
  prev: Option<(Vec<R>, Vec<R>)>,
}

impl<R: Real> Lbfgs<R> {
  pub fn new() -> Self {
    Self {
      history: 10,
      grad_tol: real(1e-8),
      allow_increase: true,
      max_trials: 20,
      armijo: real(1e-4),
      wolfe: real(0.9),
      s: VecDeque::new(),
      y: VecDeque::new(),
      rho: VecDeque::new(),
      prev: None,
    }
  }

  /// Take one step from `params`, given the objective value and
  /// gradient already evaluated there. Extra line-search evaluations
  /// happen through `objective`.

  pub fn step(
    &mut self,
    objective: &mut impl Objective<R>,
    params: &mut [R],
    loss: R,
    grad: &[R],
  ) -> FitResult<LbfgsStep> {
    if inf_norm(grad) <= self.grad_tol {
      return Ok(LbfgsStep::Converged);
    }

    // Curvature pair from the previous accepted step.
    if let Some((prev_params, prev_grad)) = self.prev.take() {
      let s: Vec<R> = params.iter().zip(&prev_params).map(|(a, b)| *a - *b).collect();
      let y: Vec<R> = grad.iter().zip(&prev_grad).map(|(a, b)| *a - *b).collect();
      let sy = dot(&s, &y);
      if sy > R::zero() {
        self.s.push_back(s);
        self.y.push_back(y);
        self.rho.push_back(R::one() / sy);
        while self.s.len() > self.history {
          self.s.pop_front();
          self.y.pop_front();
          self.rho.pop_front();
        }
      }
    }

    // Two-loop recursion for the search direction -q.
    let m = self.s.len();
    let mut q = grad.to_vec();
    let mut alpha = vec![R::zero(); m];
    for idx in (0..m).rev() {
      alpha[idx] = self.rho[idx] * dot(&self.s[idx], &q);
      for (qi, yi) in q.iter_mut().zip(&self.y[idx]) {
        *qi -= alpha[idx] * *yi;
      }
    }
    if m > 0 {
      let gamma = dot(&self.s[m - 1], &self.y[m - 1]) / dot(&self.y[m - 1], &self.y[m - 1]);
      for qi in q.iter_mut() {
        *qi *= gamma;
      }
    }
    for idx in 0..m {
      let beta = self.rho[idx] * dot(&self.y[idx], &q);
      for (qi, si) in q.iter_mut().zip(&self.s[idx]) {
        *qi += (alpha[idx] - beta) * *si;
      }
    }

    let mut descent = -dot(&q, grad);
    if descent >= R::zero() {
      // Stale curvature produced an ascent direction; steepest descent instead.
      q = grad.to_vec();
      descent = -dot(grad, grad);
    }

    // Weak-Wolfe bisection: Armijo failure caps the step from above,
    // a curvature failure raises it from below.
    let base = params.to_vec();
    let mut t = R::one();
    let mut lo = R::zero();
    let mut hi = R::infinity();
    let mut accepted = false;
    for _ in 0..self.max_trials {
      for (p, (b, qi)) in params.iter_mut().zip(base.iter().zip(&q)) {
        *p = *b - t * *qi;
      }
      let (trial, trial_grad) = objective.value_grad(params)?;
      if !(trial <= loss + self.armijo * t * descent) {
        hi = t;
      } else if -dot(&q, &trial_grad) < self.wolfe * descent {
        lo = t;
      } else {
        accepted = true;
        break;
      }
      t = if hi.is_finite() { (lo + hi) * real(0.5) } else { t * real(2.0) };
    }

    if !accepted && !self.allow_increase {
      params.copy_from_slice(&base);
      return Ok(LbfgsStep::Exhausted);
    }

    // On a failed search with allow_increase, params hold the last
    // trial step.
    self.prev = Some((base, grad.to_vec()));
    Ok(LbfgsStep::Advanced)
  }
}

impl<R: Real> Default for Lbfgs<R> {
  fn default() -> Self {
    Self::new()
  }
}
