mod diagram;
mod leaf;

pub use diagram::{DiagramContext, DiagramError, DiagramState, DiagramStateMut, SubContext};
pub use leaf::LeafContext;

use ndarray::Array1;
use thiserror::Error;

use crate::port::{InputPort, PortError};
use crate::scalar::Scalar;
use crate::value::Value;

/// Time and step bookkeeping for a context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo<T: Scalar> {
    /// The current time. With a plain floating-point scalar, resolution
    /// gradually degrades as time grows.
    pub time: T,
}

impl<T: Scalar> Default for StepInfo<T> {
    fn default() -> Self {
        Self { time: T::zero() }
    }
}

/// Errors from context operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("no subsystem has been added at index {index}")]
    MissingSubsystem { index: usize },
}

/// The surface shared by leaf and diagram contexts.
///
/// A context bundles everything that determines a subsystem's computations:
/// time, state, and input ports, together with the cache those computations
/// live in. Mutating any of the three invalidates the corresponding cache
/// entries; this trait carries the mutation entry points and the
/// invalidation roots they use.
///
/// For a diagram context the input-port surface addresses the *exported*
/// inputs, dispatching each operation to the owning child.
pub trait Context<T: Scalar> {
    /// The current time.
    fn time(&self) -> T;

    /// Sets the time, invalidating every time-dependent cache entry first.
    /// On a diagram this recurses into every child, parent first.
    fn set_time(&mut self, time: T);

    fn num_input_ports(&self) -> usize;

    /// Borrows the input port at `index`. On a diagram this descends to the
    /// child port the exported input maps to.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] if `index` is out of range, or
    /// [`ContextError::MissingSubsystem`] if the dispatch target is absent.
    fn input_port(&self, index: usize) -> Result<&InputPort<T>, ContextError>;

    /// Replaces the input port at `index`, invalidating every cache entry
    /// that depends on that input first.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] if `index` is out of range, or
    /// [`ContextError::MissingSubsystem`] if the dispatch target is absent.
    fn set_input_port(&mut self, index: usize, port: InputPort<T>) -> Result<(), ContextError>;

    /// The numeric vector on input `index`, or `None` if the port carries an
    /// abstract payload or cannot be resolved here (a dependent port is
    /// resolved by the diagram that owns the wiring).
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] if `index` is out of range, or
    /// [`ContextError::MissingSubsystem`] if the dispatch target is absent.
    fn vector_input(&self, index: usize) -> Result<Option<&Array1<T>>, ContextError>;

    /// The abstract value on input `index`; the same resolution rules as
    /// [`Context::vector_input`] apply.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] if `index` is out of range, or
    /// [`ContextError::MissingSubsystem`] if the dispatch target is absent.
    fn abstract_input(&self, index: usize) -> Result<Option<&Value>, ContextError>;

    /// The data version of input `index`, or `None` where resolution is the
    /// owning diagram's job.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] if `index` is out of range, or
    /// [`ContextError::MissingSubsystem`] if the dispatch target is absent.
    fn input_data_version(&self, index: usize) -> Result<Option<u64>, ContextError>;

    /// Invalidates every cache entry that depends on time.
    fn invalidate_time_dependents(&mut self);

    /// Invalidates every cache entry that depends on state.
    fn invalidate_state_dependents(&mut self);

    /// Invalidates every cache entry that depends on input `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] if `index` is out of range, or
    /// [`ContextError::MissingSubsystem`] if the dispatch target is absent.
    fn invalidate_input_dependents(&mut self, index: usize) -> Result<(), ContextError>;
}
