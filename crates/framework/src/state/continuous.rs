use ndarray::{s, Array1, ArrayView1, ArrayViewMut1};
use thiserror::Error;

use crate::scalar::Scalar;

/// Errors from building a continuous state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error(
        "continuous partition out of range: {num_positions} positions + \
         {num_velocities} velocities exceed {len} elements"
    )]
    PartitionOutOfRange {
        num_positions: usize,
        num_velocities: usize,
        len: usize,
    },
}

/// The continuous sub-state of a context.
///
/// One backing vector partitioned into three contiguous slices: generalized
/// positions `q`, generalized velocities `v`, and miscellaneous continuous
/// state `z`. The slices are exposed as non-owning windows; mutating one
/// slice leaves the others untouched, and the backing vector always equals
/// `q ‖ v ‖ z`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousState<T: Scalar> {
    data: Array1<T>,
    num_positions: usize,
    num_velocities: usize,
}

impl<T: Scalar> ContinuousState<T> {
    /// Builds a continuous state from its three segments.
    #[must_use]
    pub fn new(positions: Array1<T>, velocities: Array1<T>, misc: Array1<T>) -> Self {
        let num_positions = positions.len();
        let num_velocities = velocities.len();
        let mut data = Vec::with_capacity(num_positions + num_velocities + misc.len());
        data.extend(positions.iter().copied());
        data.extend(velocities.iter().copied());
        data.extend(misc.iter().copied());

        Self {
            data: Array1::from_vec(data),
            num_positions,
            num_velocities,
        }
    }

    /// Wraps an existing vector, taking the first `num_positions` elements
    /// as `q`, the next `num_velocities` as `v`, and the rest as `z`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::PartitionOutOfRange`] if the declared segments
    /// exceed the vector length.
    pub fn from_partitioned(
        data: Array1<T>,
        num_positions: usize,
        num_velocities: usize,
    ) -> Result<Self, StateError> {
        if num_positions + num_velocities > data.len() {
            return Err(StateError::PartitionOutOfRange {
                num_positions,
                num_velocities,
                len: data.len(),
            });
        }

        Ok(Self {
            data,
            num_positions,
            num_velocities,
        })
    }

    /// A continuous state of the given segment sizes, all zeros.
    #[must_use]
    pub fn zeros(num_positions: usize, num_velocities: usize, num_misc: usize) -> Self {
        Self {
            data: Array1::zeros(num_positions + num_velocities + num_misc),
            num_positions,
            num_velocities,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn num_positions(&self) -> usize {
        self.num_positions
    }

    #[must_use]
    pub fn num_velocities(&self) -> usize {
        self.num_velocities
    }

    #[must_use]
    pub fn num_misc(&self) -> usize {
        self.data.len() - self.num_positions - self.num_velocities
    }

    /// The `q` window.
    #[must_use]
    pub fn positions(&self) -> ArrayView1<'_, T> {
        self.data.slice(s![..self.num_positions])
    }

    pub fn positions_mut(&mut self) -> ArrayViewMut1<'_, T> {
        self.data.slice_mut(s![..self.num_positions])
    }

    /// The `v` window.
    #[must_use]
    pub fn velocities(&self) -> ArrayView1<'_, T> {
        self.data
            .slice(s![self.num_positions..self.num_positions + self.num_velocities])
    }

    pub fn velocities_mut(&mut self) -> ArrayViewMut1<'_, T> {
        self.data
            .slice_mut(s![self.num_positions..self.num_positions + self.num_velocities])
    }

    /// The `z` window.
    #[must_use]
    pub fn misc(&self) -> ArrayView1<'_, T> {
        self.data.slice(s![self.num_positions + self.num_velocities..])
    }

    pub fn misc_mut(&mut self) -> ArrayViewMut1<'_, T> {
        self.data
            .slice_mut(s![self.num_positions + self.num_velocities..])
    }

    /// The whole backing vector, `q ‖ v ‖ z`.
    #[must_use]
    pub fn view(&self) -> ArrayView1<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut1<'_, T> {
        self.data.view_mut()
    }

    /// # Panics
    ///
    /// Panics if `index >= self.num_positions()`.
    #[must_use]
    pub fn position(&self, index: usize) -> &T {
        assert!(index < self.num_positions, "position index out of range");
        &self.data[index]
    }

    /// # Panics
    ///
    /// Panics if `index >= self.num_positions()`.
    pub fn position_mut(&mut self, index: usize) -> &mut T {
        assert!(index < self.num_positions, "position index out of range");
        &mut self.data[index]
    }

    /// # Panics
    ///
    /// Panics if `index >= self.num_velocities()`.
    #[must_use]
    pub fn velocity(&self, index: usize) -> &T {
        assert!(index < self.num_velocities, "velocity index out of range");
        &self.data[self.num_positions + index]
    }

    /// # Panics
    ///
    /// Panics if `index >= self.num_velocities()`.
    pub fn velocity_mut(&mut self, index: usize) -> &mut T {
        assert!(index < self.num_velocities, "velocity index out of range");
        &mut self.data[self.num_positions + index]
    }

    /// # Panics
    ///
    /// Panics if `index >= self.num_misc()`.
    #[must_use]
    pub fn misc_element(&self, index: usize) -> &T {
        assert!(index < self.num_misc(), "misc index out of range");
        &self.data[self.num_positions + self.num_velocities + index]
    }

    /// # Panics
    ///
    /// Panics if `index >= self.num_misc()`.
    pub fn misc_element_mut(&mut self, index: usize) -> &mut T {
        assert!(index < self.num_misc(), "misc index out of range");
        let offset = self.num_positions + self.num_velocities;
        &mut self.data[offset + index]
    }
}

impl<T: Scalar> Default for ContinuousState<T> {
    fn default() -> Self {
        Self::zeros(0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn windows_partition_the_backing_vector() {
        let xc = ContinuousState::new(array![1.0, 2.0], array![3.0], array![4.0, 5.0, 6.0]);

        assert_eq!(xc.positions(), array![1.0, 2.0]);
        assert_eq!(xc.velocities(), array![3.0]);
        assert_eq!(xc.misc(), array![4.0, 5.0, 6.0]);
        assert_eq!(xc.view(), array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn mutating_one_window_leaves_the_others_unchanged() {
        let mut xc = ContinuousState::new(array![1.0, 2.0], array![3.0], array![4.0]);

        xc.velocities_mut()[0] = 30.0;

        assert_eq!(xc.positions(), array![1.0, 2.0]);
        assert_eq!(xc.misc(), array![4.0]);
        assert_relative_eq!(*xc.velocity(0), 30.0);
        assert_eq!(xc.view(), array![1.0, 2.0, 30.0, 4.0]);
    }

    #[test]
    fn from_partitioned_checks_the_split() {
        let ok = ContinuousState::from_partitioned(array![1.0, 2.0, 3.0], 1, 1).unwrap();
        assert_eq!(ok.num_misc(), 1);

        let err = ContinuousState::<f64>::from_partitioned(array![1.0, 2.0, 3.0], 2, 2);
        assert_eq!(
            err,
            Err(StateError::PartitionOutOfRange {
                num_positions: 2,
                num_velocities: 2,
                len: 3,
            })
        );
    }

    #[test]
    fn zeros_has_the_requested_shape() {
        let xc = ContinuousState::<f64>::zeros(2, 3, 1);

        assert_eq!(xc.num_positions(), 2);
        assert_eq!(xc.num_velocities(), 3);
        assert_eq!(xc.num_misc(), 1);
        assert!(xc.view().iter().all(|&x| x == 0.0));
    }
}
