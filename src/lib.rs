//! Fitting neural ODE dynamics to sampled trajectories.
//! Small. Few dependencies. CPU only.
//!
//! A feed-forward network defines the instantaneous derivative of a
//! continuous-time state. Predictions come from integrating that
//! derivative with an adaptive Dormand-Prince stepper, and parameter
//! gradients from the adjoint sensitivity method, so the whole
//! solve is differentiable end to end.
//!
//! # Features
//!
//! - **Adaptive integration** — Embedded 5(4) error control with
//! configurable tolerances; states recorded exactly at the sample
//! times, in either time direction.
//!
//! - **Adjoint gradients** — Loss gradients with respect to all
//! network parameters without differentiating through individual
//! solver steps.
//!
//! - **Two-phase training** — A coarse ADAM phase and an LBFGS
//! refinement, with a cadenced, stoppable progress callback.
//!
//! - **Persistence** — Trained parameters round-trip through compact
//! [postcard] checkpoints.
//!
//! # Examples
//!
//! Fitting the noisy spiral the crate's demo is built around:
//! ```
//! use rand::{rngs::StdRng, SeedableRng};
//! use odefit::{fit_adam, Mlp, SpiralConfig, Trajectory, TrainOptions};
//!
//! fn main() -> odefit::FitResult<()> {
//!   let mut rng = StdRng::seed_from_u64(42);
//!   let config = SpiralConfig { samples: 12, t_final: 1.5, ..Default::default() };
//!   let data = Trajectory::<f64>::spiral(&config, &mut rng)?;
//!
//!   let model = Mlp::new(2, 8, 2);
//!   let params = model.init_params(&mut rng);
//!
//!   let opts = TrainOptions { max_iters: 10, ..Default::default() };
//!   let report = fit_adam(&model, params, &data, 0.05, &opts, |_| false)?;
//!   assert_eq!(report.iterations, 10);
//!   Ok(())
//! }
//! ```
//!
//! ## More examples
//! Check the `/demos` folder for the full two-phase training run.

mod internal;

mod adjoint;
mod checkpoint;
mod data;
mod model;
mod plot;
mod train;

pub mod error;
pub mod optimize;
pub mod scalar;
pub mod solve;

pub use adjoint::{loss_and_grad, loss_only, predict, Evaluation};
pub use checkpoint::Checkpoint;
pub use data::{SpiralConfig, Trajectory};
pub use error::{FitError, FitResult};
pub use model::{Dynamics, Mlp};
pub use plot::{scatter_overlay, PlotCallback};
pub use solve::{solve, SolveOptions};
pub use train::{fit_adam, fit_lbfgs, FitReport, TrainEvent, TrainOptions};
