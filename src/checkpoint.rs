use std::path::Path;

use serde::{Serialize, Deserialize, de::DeserializeOwned};

use crate::{
  error::{FitError, FitResult},
  model::Mlp,
  scalar::Real,
};


/// Trained parameters together with the network shape that produced
/// them, so a fit can be persisted and loaded elsewhere.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<R: Real> {
  pub input: usize,
  pub hidden: usize,
  pub output: usize,
  pub params: Vec<R>,
}

impl<R: Real + Serialize + DeserializeOwned> Checkpoint<R> {
  pub fn new(model: &Mlp, params: Vec<R>) -> FitResult<Self> {
    if params.len() != model.param_len() {
      return Err(FitError::Checkpoint {
        what: format!("{} parameters for a model expecting {}", params.len(), model.param_len()),
      });
    }
    Ok(Self {
      input: model.input(),
      hidden: model.hidden(),
      output: model.output(),
      params,
    })
  }

  /// Rebuild the model this checkpoint belongs to.
  pub fn model(&self) -> Mlp {
    Mlp::new(self.input, self.hidden, self.output)
  }

  pub fn to_bytes(&self) -> FitResult<Vec<u8>> {
    postcard::to_allocvec(self).map_err(|e| FitError::Checkpoint { what: e.to_string() })
  }

  pub fn from_bytes(bytes: &[u8]) -> FitResult<Self> {
    let checkpoint: Self =
      postcard::from_bytes(bytes).map_err(|e| FitError::Checkpoint { what: e.to_string() })?;
    if checkpoint.params.len() != checkpoint.model().param_len() {
      return Err(FitError::Checkpoint {
        what: "parameter count disagrees with recorded shape".into(),
      });
    }
    Ok(checkpoint)
  }

  pub fn save(&self, path: &Path) -> FitResult<()> {
    std::fs::write(path, self.to_bytes()?).map_err(|e| FitError::Checkpoint { what: e.to_string() })
  }

  pub fn load(path: &Path) -> FitResult<Self> {
    let bytes =
      std::fs::read(path).map_err(|e| FitError::Checkpoint { what: e.to_string() })?;
    Self::from_bytes(&bytes)
  }
}
