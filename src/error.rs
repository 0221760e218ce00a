//! Error types for integration and training.

use thiserror::Error;


/// Failures surfaced by the solver, the training loop and their
/// side channels. None of these are recovered from internally; every
/// failure aborts the current run and reaches the caller.

#[derive(Error, Debug)]
pub enum FitError {
  /// Adaptive stepping could not meet the requested tolerances
  /// within its step budget.
  #[error("integration failed at t = {t}: {what}")]
  Integration { t: f64, what: String },

  /// The loss became non-finite during training.
  #[error("optimizer diverged at iteration {iteration} with loss {loss}")]
  Divergence { iteration: usize, loss: f64 },

  #[error("invalid input: {what}")]
  InvalidInput { what: String },

  #[error("checkpoint error: {what}")]
  Checkpoint { what: String },

  /// Plot backend failure. Produced only by the visualization side
  /// channel, never by the training mathematics.
  #[error("render error: {0}")]
  Render(String),
}

pub type FitResult<T> = Result<T, FitError>;
