//! Computation cache and context graph for composing dynamical systems into
//! diagrams.
//!
//! Every subsystem owns a context (time, state, input ports, and a
//! dependency-tracked cache); diagrams compose child contexts and wire
//! output ports to input ports. Reads hit the cache; any mutation of time,
//! state, or an input invalidates everything downstream of it, across
//! subsystem boundaries.

mod cache;
mod context;
mod port;
mod scalar;
mod state;
mod system;
mod value;

pub use cache::{Cache, CacheError, CacheTicket};
pub use context::{
    Context, ContextError, DiagramContext, DiagramError, DiagramState, DiagramStateMut,
    LeafContext, StepInfo, SubContext,
};
pub use port::{
    DependentInputPort, FreestandingInputPort, InputPort, OutputPort, PortError, PortLocator,
    PortValue, SystemOutput,
};
pub use scalar::Scalar;
pub use state::{ContinuousState, DiscreteState, ModalState, State, StateError};
pub use system::System;
pub use value::{ErasedValue, Value};
