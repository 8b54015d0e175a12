use std::fmt::Debug;

use num_traits::Float;

/// The numeric scalar a context is parameterized over.
///
/// Anything float-like works, including autodiff scalar types, as long as it
/// satisfies the [`Float`] arithmetic surface. The framework never assumes a
/// particular representation beyond these bounds.
pub trait Scalar: Float + Debug + 'static {}

impl<T> Scalar for T where T: Float + Debug + 'static {}
