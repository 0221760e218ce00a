use itertools::Itertools;
use serde::{Serialize, Deserialize};
use tracing::trace;

use crate::{
  error::{FitError, FitResult},
  internal::real,
  model::Dynamics,
  scalar::Real,
};


/// Tolerances and budget for the adaptive stepper.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions<R: Real> {
  pub rtol: R,
  pub atol: R,
  /// Total accepted-or-rejected step budget for one solve.
  pub max_steps: usize,
  /// Step size to try first; `None` guesses from the span.
  pub initial_step: Option<R>,
}

impl<R: Real> Default for SolveOptions<R> {
  fn default() -> Self {
    Self {
      rtol: real(1e-6),
      atol: real(1e-6),
      max_steps: 100_000,
      initial_step: None,
    }
  }
}


// Dormand-Prince 5(4) tableau. Stage seven evaluates at the candidate
// solution and only feeds the embedded error estimate.
const A: [[f64; 5]; 5] = [
  [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
  [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
  [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0],
  [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0, 0.0],
  [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0],
];
const C: [f64; 5] = [1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0];
const B: [f64; 6] = [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0];
const B_HAT: [f64; 7] = [
  5179.0 / 57600.0,
  0.0,
  7571.0 / 16695.0,
  393.0 / 640.0,
  -92097.0 / 339200.0,
  187.0 / 2100.0,
  1.0 / 40.0,
];


/// Advance `y` from `t0` to `t1` with embedded error control.
///
/// Handles both time directions; the adjoint pass integrates backward
/// through the same code path. `steps_used` is shared across segments
/// so the budget covers a whole solve.

pub(crate) fn advance<R, F>(
  f: &mut F,
  y: &mut [R],
  t0: R,
  t1: R,
  opts: &SolveOptions<R>,
  steps_used: &mut usize,
) -> FitResult<()>
where
  R: Real,
  F: FnMut(R, &[R], &mut [R]),
{
  let span = t1 - t0;
  if span == R::zero() {
    return Ok(());
  }

  let n = y.len();
  let dt_min = span.abs() * real(1e-12);
  let mut t = t0;
  let mut dt = opts.initial_step
    .map(|h| h.abs() * span.signum())
    .unwrap_or(span / real(100.0));

  let mut k = vec![vec![R::zero(); n]; 7];
  let mut y_stage = vec![R::zero(); n];
  let mut y_next = vec![R::zero(); n];

  loop {
    let remaining = t1 - t;
    if remaining.abs() <= dt_min {
      break;
    }
    if dt.abs() > remaining.abs() {
      dt = remaining;
    }
    if *steps_used >= opts.max_steps {
      return Err(FitError::Integration {
        t: t.to_f64().unwrap_or(f64::NAN),
        what: format!("step budget of {} exhausted", opts.max_steps),
      });
    }
    *steps_used += 1;

    f(t, y, &mut k[0]);
    for s in 1..6 {
      for i in 0..n {
        let mut acc = y[i];
        for (j, kj) in k.iter().enumerate().take(s) {
          let a = A[s - 1][j];
          if a != 0.0 {
            acc += dt * real(a) * kj[i];
          }
        }
        y_stage[i] = acc;
      }
      let tc = t + dt * real(C[s - 1]);
      f(tc, &y_stage, &mut k[s]);
    }
    for i in 0..n {
      let mut acc = y[i];
      for (j, kj) in k.iter().enumerate().take(6) {
        let b = B[j];
        if b != 0.0 {
          acc += dt * real(b) * kj[i];
        }
      }
      y_next[i] = acc;
    }
    f(t + dt, &y_next, &mut k[6]);

    // Scaled RMS of the difference between the fifth-order solution
    // and the embedded fourth-order one.
    let mut err_sq = R::zero();
    for i in 0..n {
      let mut low = y[i];
      for (j, kj) in k.iter().enumerate() {
        let b = B_HAT[j];
        if b != 0.0 {
          low += dt * real(b) * kj[i];
        }
      }
      let scale = opts.atol + opts.rtol * y[i].abs().max(y_next[i].abs());
      let ratio = (y_next[i] - low) / scale;
      err_sq += ratio * ratio;
    }
    let err = (err_sq / real(n as f64)).sqrt();

    if err <= R::one() {
      t = t + dt;
      y.copy_from_slice(&y_next);
      let grow = if err > R::zero() {
        (real::<R>(0.9) * err.powf(real(-0.2))).min(real(5.0))
      } else {
        real(5.0)
      };
      dt = dt * grow;
    } else {
      dt = dt * (real::<R>(0.9) * err.powf(real(-0.25))).max(real(0.1));
      if dt.abs() < dt_min {
        return Err(FitError::Integration {
          t: t.to_f64().unwrap_or(f64::NAN),
          what: "step size underflow".into(),
        });
      }
    }
  }
  Ok(())
}


/// Integrate `dx/dt = dynamics(x, params)` from `u0`, recording the
/// state exactly at each requested time.
///
/// The first requested time is where `u0` lives; it is returned
/// verbatim. Output length always equals `times.len()`.

pub fn solve<R: Real>(
  dynamics: &impl Dynamics<R>,
  params: &[R],
  u0: &[R],
  times: &[R],
  opts: &SolveOptions<R>,
) -> FitResult<Vec<Vec<R>>> {
  if times.is_empty() {
    return Err(FitError::InvalidInput { what: "no sample times requested".into() });
  }
  if !times.iter().tuple_windows().all(|(a, b)| b > a) {
    return Err(FitError::InvalidInput { what: "sample times must be strictly increasing".into() });
  }
  if u0.len() != dynamics.dim() {
    return Err(FitError::InvalidInput {
      what: format!("initial condition has {} entries, dynamics expects {}", u0.len(), dynamics.dim()),
    });
  }
  if params.len() != dynamics.num_params() {
    return Err(FitError::InvalidInput {
      what: format!("{} parameters supplied, dynamics expects {}", params.len(), dynamics.num_params()),
    });
  }

  let mut out = Vec::with_capacity(times.len());
  let mut y = u0.to_vec();
  out.push(y.clone());
  let mut steps = 0usize;
  let mut f = |_t: R, state: &[R], dy: &mut [R]| dynamics.eval(state, params, dy);
  for (&a, &b) in times.iter().tuple_windows() {
    advance(&mut f, &mut y, a, b, opts, &mut steps)?;
    out.push(y.clone());
  }
  trace!(steps, "forward solve finished");
  Ok(out)
}
