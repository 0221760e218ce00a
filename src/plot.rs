//! Scatter rendering for training progress. Strictly a side channel:
//! render failures are logged, never fed back into the optimization.

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use tracing::{debug, warn};

use crate::{
  data::Trajectory,
  error::{FitError, FitResult},
  scalar::Real,
  train::TrainEvent,
};


fn to_f64<R: Real>(v: R) -> f64 {
  v.to_f64().unwrap_or(f64::NAN)
}

/// Render two overlaid scatter series, data vs prediction, as an SVG.
///
/// Deliberately textless: no captions or tick labels, so rendering
/// works on machines without any installed fonts.

pub fn scatter_overlay<R: Real>(
  path: &Path,
  data: &[[R; 2]],
  prediction: &[Vec<R>],
) -> FitResult<()> {
  if prediction.iter().any(|p| p.len() < 2) {
    return Err(FitError::InvalidInput {
      what: "prediction rows must have at least two components".into(),
    });
  }
  let data: Vec<(f64, f64)> = data.iter().map(|p| (to_f64(p[0]), to_f64(p[1]))).collect();
  let prediction: Vec<(f64, f64)> = prediction
    .iter()
    .map(|p| (to_f64(p[0]), to_f64(p[1])))
    .collect();
  if data.is_empty() {
    return Err(FitError::Render("nothing to plot".into()));
  }

  let mut min_x = f64::INFINITY;
  let mut max_x = f64::NEG_INFINITY;
  let mut min_y = f64::INFINITY;
  let mut max_y = f64::NEG_INFINITY;
  for &(x, y) in data.iter().chain(&prediction) {
    if x.is_finite() && y.is_finite() {
      min_x = min_x.min(x);
      max_x = max_x.max(x);
      min_y = min_y.min(y);
      max_y = max_y.max(y);
    }
  }
  if !(min_x.is_finite() && min_y.is_finite()) {
    return Err(FitError::Render("no finite points to plot".into()));
  }
  let pad_x = ((max_x - min_x) * 0.05).max(0.1);
  let pad_y = ((max_y - min_y) * 0.05).max(0.1);

  let root = SVGBackend::new(path, (720, 560)).into_drawing_area();
  root.fill(&WHITE).map_err(|e| FitError::Render(e.to_string()))?;

  let mut chart = ChartBuilder::on(&root)
    .margin(10)
    .build_cartesian_2d(min_x - pad_x..max_x + pad_x, min_y - pad_y..max_y + pad_y)
    .map_err(|e| FitError::Render(e.to_string()))?;

  chart
    .configure_mesh()
    .draw()
    .map_err(|e| FitError::Render(e.to_string()))?;

  chart
    .draw_series(data.iter().map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())))
    .map_err(|e| FitError::Render(e.to_string()))?;
  chart
    .draw_series(prediction.iter().map(|&(x, y)| Circle::new((x, y), 3, RED.filled())))
    .map_err(|e| FitError::Render(e.to_string()))?;

  root.present().map_err(|e| FitError::Render(e.to_string()))?;
  Ok(())
}


/// Writes one overlay frame per invocation.
///
/// Owns its frame counter; never requests a stop. A failed render is
/// logged as a warning and the frame dropped, so plotting cannot
/// perturb the training loop.

pub struct PlotCallback<R: Real> {
  out_dir: PathBuf,
  frame: usize,
  data: Vec<[R; 2]>,
}

impl<R: Real> PlotCallback<R> {
  pub fn new(out_dir: impl Into<PathBuf>, data: &Trajectory<R>) -> FitResult<Self> {
    let out_dir = out_dir.into();
    std::fs::create_dir_all(&out_dir).map_err(|e| FitError::Render(e.to_string()))?;
    Ok(Self {
      out_dir,
      frame: 0,
      data: data.states().to_vec(),
    })
  }

  pub fn frames_written(&self) -> usize {
    self.frame
  }

  pub fn on_event(&mut self, event: &TrainEvent<R>) -> bool {
    self.frame += 1;
    let path = self.out_dir.join(format!("frame_{:04}.svg", self.frame));
    debug!(
      iteration = event.iteration,
      "rendering frame {}, loss = {}",
      self.frame,
      to_f64(event.loss)
    );
    if let Err(err) = scatter_overlay(&path, &self.data, event.prediction) {
      warn!("dropping frame {}: {err}", self.frame);
    }
    false
  }
}


#[cfg(test)]
mod tests {
  use rand::{rngs::StdRng, SeedableRng};

  use crate::data::SpiralConfig;

  use super::*;

  #[test]
  fn writes_svg_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overlay.svg");
    let data = [[0.0, 0.0], [1.0, 1.0], [2.0, 0.5]];
    let prediction = vec![vec![0.1, 0.1], vec![0.9, 1.2], vec![2.1, 0.4]];
    scatter_overlay(&path, &data, &prediction).unwrap();
    let written = std::fs::metadata(&path).unwrap().len();
    assert!(written > 0);
  }

  #[test]
  fn rejects_short_prediction_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overlay.svg");
    let data = [[0.0, 0.0], [1.0, 1.0]];
    let prediction = vec![vec![0.1, 0.1], vec![0.9]];
    let result = scatter_overlay(&path, &data, &prediction);
    assert!(matches!(result, Err(FitError::InvalidInput { .. })));
  }

  #[test]
  fn callback_counts_frames_and_never_stops() {
    let dir = tempfile::tempdir().unwrap();
    let data = Trajectory::<f64>::spiral(
      &SpiralConfig { samples: 5, t_final: 1.0, noise: 0.0 },
      &mut StdRng::seed_from_u64(0),
    )
    .unwrap();
    let mut plotter = PlotCallback::new(dir.path(), &data).unwrap();
    let prediction = vec![vec![0.0, 0.0]; 5];
    for iteration in [3, 6] {
      let event = TrainEvent { iteration, loss: 1.0, params: &[], prediction: &prediction };
      assert!(!plotter.on_event(&event));
    }
    assert_eq!(plotter.frames_written(), 2);
    assert!(dir.path().join("frame_0001.svg").exists());
    assert!(dir.path().join("frame_0002.svg").exists());
  }
}
