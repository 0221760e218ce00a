use crate::scalar::Real;


#[inline]
pub fn real<R: Real>(v: f64) -> R {
  R::from(v).unwrap()
}

#[inline]
pub fn dot<R: Real>(a: &[R], b: &[R]) -> R {
  a.iter().zip(b).map(|(x, y)| *x * *y).sum()
}

#[inline]
pub fn inf_norm<R: Real>(a: &[R]) -> R {
  a.iter().fold(R::zero(), |acc, x| acc.max(x.abs()))
}
