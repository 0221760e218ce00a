// Fits a two-layer network as the dynamics of a noisy planar spiral:
// a coarse ADAM phase, then LBFGS refinement from its result. Progress
// frames land in ./frames, the final overlay in ./fit.svg, and the
// trained parameters in ./spiral.ckpt.

use std::path::Path;

use rand::{rngs::StdRng, SeedableRng};

use odefit::{
  fit_adam, fit_lbfgs, predict, scatter_overlay, Checkpoint, FitResult, Mlp, PlotCallback,
  SpiralConfig, Trajectory, TrainOptions,
};

fn main() -> FitResult<()> {
  tracing_subscriber::fmt::init();

  let mut rng = StdRng::seed_from_u64(42);
  let data = Trajectory::<f64>::spiral(&SpiralConfig::default(), &mut rng)?;

  let model = Mlp::planar();
  let params = model.init_params(&mut rng);

  let mut plotter = PlotCallback::new("frames", &data)?;

  // Phase 1: coarse. Fixed budget, no stopping rule beyond the cap.
  let opts = TrainOptions { max_iters: 600, ..Default::default() };
  let phase1 = fit_adam(&model, params, &data, 0.05, &opts, |event| plotter.on_event(event))?;
  println!(
    "ADAM:  {} iterations, loss {:.6} -> {:.6}",
    phase1.iterations, phase1.initial_loss, phase1.loss
  );

  // Phase 2: refine from phase 1's parameters. The line search may
  // transiently increase the loss; that is allowed here.
  let opts = TrainOptions { max_iters: 200, ..Default::default() };
  let phase2 = fit_lbfgs(&model, phase1.params, &data, &opts, |event| plotter.on_event(event))?;
  println!(
    "LBFGS: {} iterations, loss {:.6} -> {:.6} (converged: {})",
    phase2.iterations, phase2.initial_loss, phase2.loss, phase2.converged
  );

  let prediction = predict(&model, &phase2.params, &data, &opts.solve)?;
  scatter_overlay(Path::new("fit.svg"), data.states(), &prediction)?;
  Checkpoint::new(&model, phase2.params)?.save(Path::new("spiral.ckpt"))?;
  println!("wrote {} frames, fit.svg and spiral.ckpt", plotter.frames_written());

  Ok(())
}
