use crate::context::LeafContext;
use crate::port::{PortValue, SystemOutput};
use crate::scalar::Scalar;

/// The behavior owner of a leaf subsystem.
///
/// A `System` reads inputs and state from its context and produces values on
/// its output slots. The framework supplies the context machinery; the
/// system supplies the factories and the computation:
///
/// - [`System::create_context`] allocates a [`LeafContext`] with the
///   system's state shape and input ports, and declares any computation
///   tickets against the context's well-known roots.
/// - [`System::create_output`] allocates the matching output slot set.
/// - [`System::compute_outputs`] fills the slots from the context and the
///   resolved input payloads, then marks what it computed fresh.
///
/// Inputs arrive resolved because a dependent port reads a sibling's output
/// slot, which only the orchestrating diagram can reach; drivers obtain the
/// payloads from `DiagramContext::resolved_inputs` (or
/// `LeafContext::input_values` for a standalone system) and pass them
/// through. `inputs[i]` is `None` when port `i` is disconnected.
pub trait System<T: Scalar> {
    /// The error type for a failed output computation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Allocates a context matching this system's declared shape.
    fn create_context(&self) -> LeafContext<T>;

    /// Allocates an output slot set matching this system's output ports.
    fn create_output(&self) -> SystemOutput<T>;

    /// Computes the output slot values for the given context and inputs.
    ///
    /// # Errors
    ///
    /// Each system defines its own `Error` type, allowing it to determine
    /// what constitutes a failure within its domain.
    fn compute_outputs(
        &self,
        context: &LeafContext<T>,
        inputs: &[Option<PortValue<T>>],
        output: &mut SystemOutput<T>,
    ) -> Result<(), Self::Error>;
}
