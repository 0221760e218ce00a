use rand::distributions::uniform::SampleUniform;
use num_traits::{Float, NumAssignOps};


/// All continuous numeric types the crate can integrate and optimize over.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Real:
  Float + NumAssignOps + SampleUniform + std::iter::Sum + std::fmt::Debug + Send + Sync + 'static
{
}

impl<T> Real for T where
  T: Float + NumAssignOps + SampleUniform + std::iter::Sum + std::fmt::Debug + Send + Sync + 'static
{
}
