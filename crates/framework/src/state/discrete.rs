use ndarray::Array1;

use crate::scalar::Scalar;

/// The discrete sub-state of a context: an ordered sequence of numeric
/// groups, one per logical discrete variable.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteState<T: Scalar> {
    groups: Vec<Array1<T>>,
}

impl<T: Scalar> Default for DiscreteState<T> {
    fn default() -> Self {
        Self { groups: Vec::new() }
    }
}

impl<T: Scalar> DiscreteState<T> {
    #[must_use]
    pub fn new(groups: Vec<Array1<T>>) -> Self {
        Self { groups }
    }

    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn group(&self, index: usize) -> Option<&Array1<T>> {
        self.groups.get(index)
    }

    pub fn group_mut(&mut self, index: usize) -> Option<&mut Array1<T>> {
        self.groups.get_mut(index)
    }

    #[must_use]
    pub fn groups(&self) -> &[Array1<T>] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn groups_are_independent() {
        let mut xd = DiscreteState::new(vec![array![1.0, 2.0], array![3.0]]);

        xd.group_mut(1).unwrap()[0] = 30.0;

        assert_eq!(xd.group(0), Some(&array![1.0, 2.0]));
        assert_eq!(xd.group(1), Some(&array![30.0]));
        assert_eq!(xd.group(2), None);
    }
}
