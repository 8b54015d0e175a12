use ndarray::Array1;

use crate::cache::{Cache, CacheError, CacheTicket};
use crate::context::{Context, ContextError, StepInfo};
use crate::port::{DependentInputPort, InputPort, PortError, PortValue};
use crate::scalar::Scalar;
use crate::state::State;
use crate::value::Value;

/// The context of one leaf subsystem: time, state, input ports, and the
/// cache its computations live in.
///
/// Construction allocates three kinds of well-known cache tickets — one for
/// time, one for state, and one per input port slot — which anchor the
/// invalidation protocol: [`LeafContext::set_time`], mutable state access,
/// and input replacement each invalidate through the matching root. Systems
/// register their own computations by creating tickets with these roots as
/// prerequisites, via [`LeafContext::make_cache_ticket`].
#[derive(Debug)]
pub struct LeafContext<T: Scalar> {
    step_info: StepInfo<T>,
    state: State<T>,
    inputs: Vec<InputPort<T>>,
    cache: Cache,
    time_ticket: CacheTicket,
    state_ticket: CacheTicket,
    input_tickets: Vec<CacheTicket>,
    parent_slot: Option<usize>,
}

impl<T: Scalar> LeafContext<T> {
    /// Creates a context at time zero with the given state and input ports.
    #[must_use]
    pub fn new(state: State<T>, inputs: Vec<InputPort<T>>) -> Self {
        let (cache, time_ticket, state_ticket, input_tickets) =
            Self::build_cache_tickets(inputs.len());
        Self {
            step_info: StepInfo::default(),
            state,
            inputs,
            cache,
            time_ticket,
            state_ticket,
            input_tickets,
            parent_slot: None,
        }
    }

    fn build_cache_tickets(
        num_inputs: usize,
    ) -> (Cache, CacheTicket, CacheTicket, Vec<CacheTicket>) {
        let mut cache = Cache::new();
        let time = allocate_root(&mut cache);
        let state = allocate_root(&mut cache);
        let inputs = (0..num_inputs).map(|_| allocate_root(&mut cache)).collect();
        (cache, time, state, inputs)
    }

    /// The state of this subsystem.
    #[must_use]
    pub fn state(&self) -> &State<T> {
        &self.state
    }

    /// Writable state access. Invalidates every state-dependent cache entry.
    ///
    /// Once this context participates in a diagram, the *shape* of the state
    /// (segment sizes, group count, modal count) must not change; only the
    /// stored numbers may.
    pub fn state_mut(&mut self) -> &mut State<T> {
        self.invalidate_state_dependents();
        &mut self.state
    }

    /// State access for write-through views whose creation already
    /// invalidated the state dependents.
    pub(crate) fn state_raw_mut(&mut self) -> &mut State<T> {
        &mut self.state
    }

    /// The ticket every time-dependent computation must list as a
    /// prerequisite.
    #[must_use]
    pub fn time_ticket(&self) -> CacheTicket {
        self.time_ticket
    }

    /// The ticket every state-dependent computation must list as a
    /// prerequisite.
    #[must_use]
    pub fn state_ticket(&self) -> CacheTicket {
        self.state_ticket
    }

    /// The ticket for input port slot `index`. The ticket addresses the
    /// slot, not the port object: replacing the port leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] if `index` is out of range.
    pub fn input_ticket(&self, index: usize) -> Result<CacheTicket, ContextError> {
        self.input_tickets
            .get(index)
            .copied()
            .ok_or_else(|| self.input_out_of_range(index))
    }

    /// Allocates a computation ticket, typically with the well-known tickets
    /// as prerequisites.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownTicket`] if a prerequisite is foreign.
    pub fn make_cache_ticket(
        &mut self,
        prerequisites: &[CacheTicket],
    ) -> Result<CacheTicket, CacheError> {
        self.cache.make_ticket(prerequisites)
    }

    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    /// The slot this context occupies in its parent diagram, if any. A
    /// lookup datum only; the parent owns this context.
    #[must_use]
    pub fn parent_slot(&self) -> Option<usize> {
        self.parent_slot
    }

    pub(crate) fn set_parent_slot(&mut self, slot: usize) {
        self.parent_slot = Some(slot);
    }

    /// Owned snapshots of the input payloads, in port order. Dependent ports
    /// yield `None`; the owning diagram's resolution must be used instead.
    #[must_use]
    pub fn input_values(&self) -> Vec<Option<PortValue<T>>> {
        self.inputs
            .iter()
            .map(|port| match port {
                InputPort::Freestanding(port) => Some(port.value().clone()),
                InputPort::Dependent(_) => None,
            })
            .collect()
    }

    /// Deep clone with every dependent input port rebuilt by `resolve`,
    /// which receives the port's slot index and locator. The owning diagram
    /// passes a resolver that snapshots the referent's output slot.
    pub(crate) fn clone_with_input_resolver(
        &self,
        mut resolve: impl FnMut(usize, DependentInputPort) -> InputPort<T>,
    ) -> Self {
        let inputs = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, port)| match port {
                InputPort::Freestanding(port) => InputPort::Freestanding(port.clone()),
                InputPort::Dependent(port) => resolve(index, *port),
            })
            .collect();

        Self {
            step_info: self.step_info,
            state: self.state.clone(),
            inputs,
            cache: self.cache.clone(),
            time_ticket: self.time_ticket,
            state_ticket: self.state_ticket,
            input_tickets: self.input_tickets.clone(),
            parent_slot: None,
        }
    }

    fn input_out_of_range(&self, index: usize) -> ContextError {
        ContextError::Port(PortError::InputOutOfRange {
            index,
            count: self.inputs.len(),
        })
    }
}

fn allocate_root(cache: &mut Cache) -> CacheTicket {
    cache
        .make_ticket(&[])
        .expect("an empty prerequisite list is always valid")
}

impl<T: Scalar> Context<T> for LeafContext<T> {
    fn time(&self) -> T {
        self.step_info.time
    }

    fn set_time(&mut self, time: T) {
        self.invalidate_time_dependents();
        self.step_info.time = time;
    }

    fn num_input_ports(&self) -> usize {
        self.inputs.len()
    }

    fn input_port(&self, index: usize) -> Result<&InputPort<T>, ContextError> {
        self.inputs
            .get(index)
            .ok_or_else(|| self.input_out_of_range(index))
    }

    fn set_input_port(&mut self, index: usize, port: InputPort<T>) -> Result<(), ContextError> {
        if index >= self.inputs.len() {
            return Err(self.input_out_of_range(index));
        }
        self.invalidate_input_dependents(index)?;
        self.inputs[index] = port;
        Ok(())
    }

    fn vector_input(&self, index: usize) -> Result<Option<&Array1<T>>, ContextError> {
        Ok(self.input_port(index)?.vector())
    }

    fn abstract_input(&self, index: usize) -> Result<Option<&Value>, ContextError> {
        Ok(self.input_port(index)?.abstract_value())
    }

    fn input_data_version(&self, index: usize) -> Result<Option<u64>, ContextError> {
        Ok(self.input_port(index)?.data_version())
    }

    fn invalidate_time_dependents(&mut self) {
        self.cache
            .invalidate(self.time_ticket)
            .expect("the time ticket is allocated at construction");
    }

    fn invalidate_state_dependents(&mut self) {
        self.cache
            .invalidate(self.state_ticket)
            .expect("the state ticket is allocated at construction");
    }

    fn invalidate_input_dependents(&mut self, index: usize) -> Result<(), ContextError> {
        let ticket = self.input_ticket(index)?;
        self.cache
            .invalidate(ticket)
            .expect("input tickets are allocated at construction");
        Ok(())
    }
}

impl<T: Scalar> Clone for LeafContext<T> {
    /// Deep clone: independent cache, state, and input ports. The clone is a
    /// fresh root, so the parent slot is cleared; a diagram re-installs it
    /// when the clone is added as a child.
    ///
    /// A dependent input port must become a freestanding snapshot of its
    /// referent, and only the diagram owning the wiring can reach that
    /// referent. A standalone context has no dependent ports, and a child
    /// context is cloned by its diagram, which performs the conversion; a
    /// lone clone of a context that still holds one refuses rather than
    /// carry a locator that means nothing once detached.
    ///
    /// # Panics
    ///
    /// Panics if the context holds a dependent input port.
    fn clone(&self) -> Self {
        self.clone_with_input_resolver(|index, port| {
            panic!(
                "cannot clone input port {index}, which reads {}, in \
                 isolation: only the diagram owning the wiring can snapshot \
                 its referent",
                port.source()
            )
        })
    }
}
