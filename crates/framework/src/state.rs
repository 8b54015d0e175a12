mod continuous;
mod discrete;
mod modal;

pub use continuous::{ContinuousState, StateError};
pub use discrete::DiscreteState;
pub use modal::ModalState;

use crate::scalar::Scalar;

/// The full state of a subsystem: continuous, discrete, and modal
/// sub-containers, each individually mutable.
///
/// Mutable access *at the context level* has the side effect of invalidating
/// every state-dependent cache entry; the containers themselves are plain
/// data.
#[derive(Debug, Clone)]
pub struct State<T: Scalar> {
    continuous: ContinuousState<T>,
    discrete: DiscreteState<T>,
    modal: ModalState,
}

impl<T: Scalar> Default for State<T> {
    fn default() -> Self {
        Self {
            continuous: ContinuousState::default(),
            discrete: DiscreteState::default(),
            modal: ModalState::default(),
        }
    }
}

impl<T: Scalar> State<T> {
    #[must_use]
    pub fn new(
        continuous: ContinuousState<T>,
        discrete: DiscreteState<T>,
        modal: ModalState,
    ) -> Self {
        Self {
            continuous,
            discrete,
            modal,
        }
    }

    #[must_use]
    pub fn continuous(&self) -> &ContinuousState<T> {
        &self.continuous
    }

    pub fn continuous_mut(&mut self) -> &mut ContinuousState<T> {
        &mut self.continuous
    }

    #[must_use]
    pub fn discrete(&self) -> &DiscreteState<T> {
        &self.discrete
    }

    pub fn discrete_mut(&mut self) -> &mut DiscreteState<T> {
        &mut self.discrete
    }

    #[must_use]
    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    pub fn modal_mut(&mut self) -> &mut ModalState {
        &mut self.modal
    }
}
