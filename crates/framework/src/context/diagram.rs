mod state_view;
mod wiring;

pub use state_view::{DiagramState, DiagramStateMut};

use ndarray::Array1;
use thiserror::Error;
use tracing::{debug, trace};

use std::collections::{HashSet, VecDeque};

use crate::cache::{Cache, CacheError, CacheTicket};
use crate::context::{Context, ContextError, LeafContext, StepInfo};
use crate::port::{
    FreestandingInputPort, InputPort, OutputPort, PortError, PortLocator, PortValue, SystemOutput,
};
use crate::scalar::Scalar;
use crate::value::Value;

use state_view::{DiagramStateMap, SegmentDims};
use wiring::WiringGraph;

/// Errors from diagram-context construction and dispatch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiagramError {
    #[error("subsystem index {index} is out of range for a diagram of {count} subsystems")]
    SubsystemOutOfRange { index: usize, count: usize },

    #[error("a subsystem has already been added at index {index}")]
    SubsystemOccupied { index: usize },

    #[error("no subsystem has been added at index {index}")]
    MissingSubsystem { index: usize },

    #[error("{dest} is already connected to another output")]
    InputAlreadyConnected { dest: PortLocator },

    #[error("the aggregate state has not been built: call make_state after adding all subsystems")]
    StateNotBuilt,

    #[error("subsystem {index} has no aggregate state: nested diagrams build theirs first")]
    SubsystemStateNotBuilt { index: usize },

    #[error("the wiring contains a cycle through subsystem {subsystem}")]
    WiringCycle { subsystem: usize },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Port(#[from] PortError),
}

/// A child slot of a diagram: either a leaf context or a nested diagram.
#[derive(Debug, Clone)]
pub enum SubContext<T: Scalar> {
    Leaf(LeafContext<T>),
    Diagram(DiagramContext<T>),
}

impl<T: Scalar> From<LeafContext<T>> for SubContext<T> {
    fn from(context: LeafContext<T>) -> Self {
        Self::Leaf(context)
    }
}

impl<T: Scalar> From<DiagramContext<T>> for SubContext<T> {
    fn from(context: DiagramContext<T>) -> Self {
        Self::Diagram(context)
    }
}

impl<T: Scalar> SubContext<T> {
    pub(crate) fn set_parent_slot(&mut self, slot: usize) {
        match self {
            Self::Leaf(context) => context.set_parent_slot(slot),
            Self::Diagram(context) => context.set_parent_slot(slot),
        }
    }

    pub(crate) fn continuous_dims(&self) -> Option<SegmentDims> {
        match self {
            Self::Leaf(context) => {
                let xc = context.state().continuous();
                Some(SegmentDims {
                    positions: xc.num_positions(),
                    velocities: xc.num_velocities(),
                    misc: xc.num_misc(),
                })
            }
            Self::Diagram(context) => context.state_map.as_ref().map(DiagramStateMap::totals),
        }
    }

    pub(crate) fn num_discrete_groups(&self) -> Option<usize> {
        match self {
            Self::Leaf(context) => Some(context.state().discrete().num_groups()),
            Self::Diagram(context) => context
                .state_map
                .as_ref()
                .map(DiagramStateMap::num_discrete_groups),
        }
    }

    pub(crate) fn num_modal_variables(&self) -> Option<usize> {
        match self {
            Self::Leaf(context) => Some(context.state().modal().num_variables()),
            Self::Diagram(context) => context
                .state_map
                .as_ref()
                .map(DiagramStateMap::num_modal_variables),
        }
    }

    pub(crate) fn position_ref(&self, index: usize) -> &T {
        match self {
            Self::Leaf(context) => context.state().continuous().position(index),
            Self::Diagram(context) => context.position_raw(index),
        }
    }

    pub(crate) fn position_raw_mut(&mut self, index: usize) -> &mut T {
        match self {
            Self::Leaf(context) => context.state_raw_mut().continuous_mut().position_mut(index),
            Self::Diagram(context) => context.position_raw_mut(index),
        }
    }

    pub(crate) fn velocity_ref(&self, index: usize) -> &T {
        match self {
            Self::Leaf(context) => context.state().continuous().velocity(index),
            Self::Diagram(context) => context.velocity_raw(index),
        }
    }

    pub(crate) fn velocity_raw_mut(&mut self, index: usize) -> &mut T {
        match self {
            Self::Leaf(context) => context.state_raw_mut().continuous_mut().velocity_mut(index),
            Self::Diagram(context) => context.velocity_raw_mut(index),
        }
    }

    pub(crate) fn misc_ref(&self, index: usize) -> &T {
        match self {
            Self::Leaf(context) => context.state().continuous().misc_element(index),
            Self::Diagram(context) => context.misc_raw(index),
        }
    }

    pub(crate) fn misc_raw_mut(&mut self, index: usize) -> &mut T {
        match self {
            Self::Leaf(context) => context
                .state_raw_mut()
                .continuous_mut()
                .misc_element_mut(index),
            Self::Diagram(context) => context.misc_raw_mut(index),
        }
    }

    pub(crate) fn discrete_group_ref(&self, index: usize) -> &Array1<T> {
        match self {
            Self::Leaf(context) => context
                .state()
                .discrete()
                .group(index)
                .expect("group index was mapped at make_state"),
            Self::Diagram(context) => context.discrete_group_raw(index),
        }
    }

    pub(crate) fn discrete_group_raw_mut(&mut self, index: usize) -> &mut Array1<T> {
        match self {
            Self::Leaf(context) => context
                .state_raw_mut()
                .discrete_mut()
                .group_mut(index)
                .expect("group index was mapped at make_state"),
            Self::Diagram(context) => context.discrete_group_raw_mut(index),
        }
    }

    pub(crate) fn modal_ref(&self, index: usize) -> &Value {
        match self {
            Self::Leaf(context) => context
                .state()
                .modal()
                .value(index)
                .expect("modal index was mapped at make_state"),
            Self::Diagram(context) => context.modal_raw(index),
        }
    }

    pub(crate) fn modal_raw_mut(&mut self, index: usize) -> &mut Value {
        match self {
            Self::Leaf(context) => context
                .state_raw_mut()
                .modal_mut()
                .value_mut(index)
                .expect("modal index was mapped at make_state"),
            Self::Diagram(context) => context.modal_raw_mut(index),
        }
    }
}

impl<T: Scalar> Context<T> for SubContext<T> {
    fn time(&self) -> T {
        match self {
            Self::Leaf(context) => context.time(),
            Self::Diagram(context) => context.time(),
        }
    }

    fn set_time(&mut self, time: T) {
        match self {
            Self::Leaf(context) => context.set_time(time),
            Self::Diagram(context) => context.set_time(time),
        }
    }

    fn num_input_ports(&self) -> usize {
        match self {
            Self::Leaf(context) => context.num_input_ports(),
            Self::Diagram(context) => context.num_input_ports(),
        }
    }

    fn input_port(&self, index: usize) -> Result<&InputPort<T>, ContextError> {
        match self {
            Self::Leaf(context) => context.input_port(index),
            Self::Diagram(context) => context.input_port(index),
        }
    }

    fn set_input_port(&mut self, index: usize, port: InputPort<T>) -> Result<(), ContextError> {
        match self {
            Self::Leaf(context) => context.set_input_port(index, port),
            Self::Diagram(context) => context.set_input_port(index, port),
        }
    }

    fn vector_input(&self, index: usize) -> Result<Option<&Array1<T>>, ContextError> {
        match self {
            Self::Leaf(context) => context.vector_input(index),
            Self::Diagram(context) => context.vector_input(index),
        }
    }

    fn abstract_input(&self, index: usize) -> Result<Option<&Value>, ContextError> {
        match self {
            Self::Leaf(context) => context.abstract_input(index),
            Self::Diagram(context) => context.abstract_input(index),
        }
    }

    fn input_data_version(&self, index: usize) -> Result<Option<u64>, ContextError> {
        match self {
            Self::Leaf(context) => context.input_data_version(index),
            Self::Diagram(context) => context.input_data_version(index),
        }
    }

    fn invalidate_time_dependents(&mut self) {
        match self {
            Self::Leaf(context) => context.invalidate_time_dependents(),
            Self::Diagram(context) => context.invalidate_time_dependents(),
        }
    }

    fn invalidate_state_dependents(&mut self) {
        match self {
            Self::Leaf(context) => context.invalidate_state_dependents(),
            Self::Diagram(context) => context.invalidate_state_dependents(),
        }
    }

    fn invalidate_input_dependents(&mut self, index: usize) -> Result<(), ContextError> {
        match self {
            Self::Leaf(context) => context.invalidate_input_dependents(index),
            Self::Diagram(context) => context.invalidate_input_dependents(index),
        }
    }
}

/// The context of a composite subsystem: a fixed set of child contexts,
/// their output slot sets, the exported-port lists, and the wiring that
/// makes a downstream input a view onto an upstream output.
///
/// A diagram context is assembled in one construction phase, in order:
/// [`DiagramContext::add_system`] for every child, then
/// [`DiagramContext::export_input`] / [`DiagramContext::export_output`] and
/// [`DiagramContext::connect`] declarations, then
/// [`DiagramContext::make_state`]. Afterwards the topology is frozen; only
/// time, state, and freestanding input values change.
///
/// Exported ports give the diagram the same input surface as a leaf: the
/// [`Context`] operations address exported indices and dispatch to the
/// owning child.
#[derive(Debug)]
pub struct DiagramContext<T: Scalar> {
    step_info: StepInfo<T>,
    cache: Cache,
    time_ticket: CacheTicket,
    state_ticket: CacheTicket,
    input_tickets: Vec<CacheTicket>,
    contexts: Vec<Option<SubContext<T>>>,
    outputs: Vec<Option<SystemOutput<T>>>,
    input_ids: Vec<PortLocator>,
    output_ids: Vec<PortLocator>,
    wiring: WiringGraph,
    state_map: Option<DiagramStateMap>,
    parent_slot: Option<usize>,
}

impl<T: Scalar> DiagramContext<T> {
    /// Creates an empty diagram context for exactly `num_subsystems`
    /// children. The size is final.
    #[must_use]
    pub fn new(num_subsystems: usize) -> Self {
        let mut cache = Cache::new();
        let time_ticket = allocate_root(&mut cache);
        let state_ticket = allocate_root(&mut cache);
        Self {
            step_info: StepInfo::default(),
            cache,
            time_ticket,
            state_ticket,
            input_tickets: Vec::new(),
            contexts: (0..num_subsystems).map(|_| None).collect(),
            outputs: (0..num_subsystems).map(|_| None).collect(),
            input_ids: Vec::new(),
            output_ids: Vec::new(),
            wiring: WiringGraph::new(num_subsystems),
            state_map: None,
            parent_slot: None,
        }
    }

    #[must_use]
    pub fn num_subsystems(&self) -> usize {
        self.contexts.len()
    }

    /// Installs a child context and its output slot set at `index`, and
    /// records the back-reference from the child to this slot.
    ///
    /// # Errors
    ///
    /// Returns [`DiagramError::SubsystemOutOfRange`] or
    /// [`DiagramError::SubsystemOccupied`] on an invalid slot.
    pub fn add_system(
        &mut self,
        index: usize,
        context: impl Into<SubContext<T>>,
        output: SystemOutput<T>,
    ) -> Result<(), DiagramError> {
        let count = self.contexts.len();
        if index >= count {
            return Err(DiagramError::SubsystemOutOfRange { index, count });
        }
        if self.contexts[index].is_some() || self.outputs[index].is_some() {
            return Err(DiagramError::SubsystemOccupied { index });
        }

        let mut context = context.into();
        context.set_parent_slot(index);
        self.contexts[index] = Some(context);
        self.outputs[index] = Some(output);
        debug!(index, "added subsystem");
        Ok(())
    }

    /// Declares that input `id.port` of child `id.subsystem` is an input of
    /// the whole diagram, appending it to the exported-input list and
    /// allocating its invalidation ticket.
    ///
    /// # Errors
    ///
    /// Fails if the child is absent or the port is out of its declared
    /// range.
    pub fn export_input(&mut self, id: impl Into<PortLocator>) -> Result<(), DiagramError> {
        let id = id.into();
        let child = self.subsystem_context(id.subsystem)?;
        let count = child.num_input_ports();
        if id.port >= count {
            return Err(PortError::InputOutOfRange {
                index: id.port,
                count,
            }
            .into());
        }

        let ticket = allocate_root(&mut self.cache);
        self.input_tickets.push(ticket);
        self.input_ids.push(id);
        Ok(())
    }

    /// Declares that output `id.port` of child `id.subsystem` is an output
    /// of the whole diagram.
    ///
    /// # Errors
    ///
    /// Fails if the child is absent or the port is out of its declared
    /// range.
    pub fn export_output(&mut self, id: impl Into<PortLocator>) -> Result<(), DiagramError> {
        let id = id.into();
        let output = self.subsystem_output(id.subsystem)?;
        let count = output.num_ports();
        if id.port >= count {
            return Err(PortError::OutputOutOfRange {
                index: id.port,
                count,
            }
            .into());
        }

        self.output_ids.push(id);
        Ok(())
    }

    /// Declares that output `src` feeds input `dest`: installs a dependent
    /// input port at the destination and records the wire in both
    /// directions.
    ///
    /// # Errors
    ///
    /// Fails if either endpoint is absent or out of range, or if `dest` is
    /// already connected.
    pub fn connect(
        &mut self,
        src: impl Into<PortLocator>,
        dest: impl Into<PortLocator>,
    ) -> Result<(), DiagramError> {
        let src = src.into();
        let dest = dest.into();

        let src_output = self.subsystem_output(src.subsystem)?;
        let count = src_output.num_ports();
        if src.port >= count {
            return Err(PortError::OutputOutOfRange {
                index: src.port,
                count,
            }
            .into());
        }

        let dest_child = self.subsystem_context(dest.subsystem)?;
        let count = dest_child.num_input_ports();
        if dest.port >= count {
            return Err(PortError::InputOutOfRange {
                index: dest.port,
                count,
            }
            .into());
        }

        if self.wiring.source_of(dest).is_some() {
            return Err(DiagramError::InputAlreadyConnected { dest });
        }

        let child = self.contexts[dest.subsystem]
            .as_mut()
            .expect("the destination subsystem was validated above");
        child.set_input_port(dest.port, InputPort::dependent(src))?;
        self.wiring.connect(src, dest);
        debug!(%src, %dest, "connected output to input");
        Ok(())
    }

    /// Builds the aggregate state view over all children, in child-index
    /// order. Every child must be installed; nested diagrams must have
    /// built their own aggregate state already.
    ///
    /// # Errors
    ///
    /// Returns [`DiagramError::MissingSubsystem`] or
    /// [`DiagramError::SubsystemStateNotBuilt`] accordingly.
    pub fn make_state(&mut self) -> Result<(), DiagramError> {
        self.state_map = Some(DiagramStateMap::build(&self.contexts)?);
        Ok(())
    }

    /// The aggregate state: one logical continuous/discrete/modal container
    /// concatenating the children's sub-containers.
    ///
    /// # Errors
    ///
    /// Returns [`DiagramError::StateNotBuilt`] before `make_state`.
    pub fn state(&self) -> Result<DiagramState<'_, T>, DiagramError> {
        let map = self.state_map.as_ref().ok_or(DiagramError::StateNotBuilt)?;
        Ok(DiagramState {
            children: &self.contexts,
            map,
        })
    }

    /// Write-through access to the aggregate state. Invalidates every
    /// state-dependent cache entry of this context and of every child.
    ///
    /// # Errors
    ///
    /// Returns [`DiagramError::StateNotBuilt`] before `make_state`.
    pub fn state_mut(&mut self) -> Result<DiagramStateMut<'_, T>, DiagramError> {
        if self.state_map.is_none() {
            return Err(DiagramError::StateNotBuilt);
        }
        self.invalidate_state_dependents();
        let map = self
            .state_map
            .as_ref()
            .expect("presence was checked above");
        Ok(DiagramStateMut {
            children: &mut self.contexts,
            map,
        })
    }

    /// # Errors
    ///
    /// Fails on an out-of-range index or an empty slot.
    pub fn subsystem_context(&self, index: usize) -> Result<&SubContext<T>, DiagramError> {
        let count = self.contexts.len();
        self.contexts
            .get(index)
            .ok_or(DiagramError::SubsystemOutOfRange { index, count })?
            .as_ref()
            .ok_or(DiagramError::MissingSubsystem { index })
    }

    /// # Errors
    ///
    /// Fails on an out-of-range index or an empty slot.
    pub fn subsystem_context_mut(&mut self, index: usize) -> Result<&mut SubContext<T>, DiagramError> {
        let count = self.contexts.len();
        self.contexts
            .get_mut(index)
            .ok_or(DiagramError::SubsystemOutOfRange { index, count })?
            .as_mut()
            .ok_or(DiagramError::MissingSubsystem { index })
    }

    /// # Errors
    ///
    /// Fails on an out-of-range index or an empty slot.
    pub fn subsystem_output(&self, index: usize) -> Result<&SystemOutput<T>, DiagramError> {
        let count = self.outputs.len();
        self.outputs
            .get(index)
            .ok_or(DiagramError::SubsystemOutOfRange { index, count })?
            .as_ref()
            .ok_or(DiagramError::MissingSubsystem { index })
    }

    /// # Errors
    ///
    /// Fails on an out-of-range index or an empty slot.
    pub fn subsystem_output_mut(
        &mut self,
        index: usize,
    ) -> Result<&mut SystemOutput<T>, DiagramError> {
        let count = self.outputs.len();
        self.outputs
            .get_mut(index)
            .ok_or(DiagramError::SubsystemOutOfRange { index, count })?
            .as_mut()
            .ok_or(DiagramError::MissingSubsystem { index })
    }

    /// Borrows a child context together with writable access to its output
    /// slot set, the pair a driver needs to run one subsystem's output
    /// computation.
    ///
    /// # Errors
    ///
    /// Fails on an out-of-range index or an empty slot.
    pub fn subsystem_context_and_output_mut(
        &mut self,
        index: usize,
    ) -> Result<(&SubContext<T>, &mut SystemOutput<T>), DiagramError> {
        let count = self.contexts.len();
        let context = self
            .contexts
            .get(index)
            .ok_or(DiagramError::SubsystemOutOfRange { index, count })?
            .as_ref()
            .ok_or(DiagramError::MissingSubsystem { index })?;
        let output = self
            .outputs
            .get_mut(index)
            .ok_or(DiagramError::SubsystemOutOfRange { index, count })?
            .as_mut()
            .ok_or(DiagramError::MissingSubsystem { index })?;
        Ok((context, output))
    }

    #[must_use]
    pub fn num_output_ports(&self) -> usize {
        self.output_ids.len()
    }

    /// The output slot behind exported output `index`.
    ///
    /// # Errors
    ///
    /// Fails on an out-of-range exported index or a missing child.
    pub fn output_port(&self, index: usize) -> Result<&OutputPort<T>, DiagramError> {
        let id = self.exported_output(index)?;
        Ok(self.subsystem_output(id.subsystem)?.port(id.port)?)
    }

    /// # Errors
    ///
    /// Fails on an out-of-range exported index or a missing child.
    pub fn mark_output_port_fresh(&mut self, index: usize) -> Result<(), DiagramError> {
        let id = self.exported_output(index)?;
        Ok(self.subsystem_output_mut(id.subsystem)?.mark_fresh(id.port)?)
    }

    /// # Errors
    ///
    /// Fails on an out-of-range exported index or a missing child.
    pub fn is_output_port_fresh(&self, index: usize) -> Result<bool, DiagramError> {
        let id = self.exported_output(index)?;
        Ok(self.subsystem_output(id.subsystem)?.is_fresh(id.port)?)
    }

    /// Whether all of child `index`'s output slots are currently fresh.
    ///
    /// # Errors
    ///
    /// Fails on an out-of-range index or an empty slot.
    pub fn is_evaluation_fresh(&self, index: usize) -> Result<bool, DiagramError> {
        Ok(self.subsystem_output(index)?.all_fresh())
    }

    /// Marks every output slot of child `index` fresh.
    ///
    /// # Errors
    ///
    /// Fails on an out-of-range index or an empty slot.
    pub fn mark_evaluation_fresh(&mut self, index: usize) -> Result<(), DiagramError> {
        self.subsystem_output_mut(index)?.mark_all_fresh();
        Ok(())
    }

    /// Notifies everything downstream of output `port` of subsystem
    /// `subsystem` that the slot's content changed.
    ///
    /// Walks the inverse wiring breadth-first: each consumer has its
    /// input-dependent cache entries invalidated and its whole output set
    /// marked stale (any of its outputs may depend on any of its inputs),
    /// and the walk continues from the consumer's outputs. A visited set
    /// bounds the walk, so cyclic wiring terminates. The origin slot's own
    /// freshness is left to the caller who changed it.
    ///
    /// # Errors
    ///
    /// Fails if the origin is absent or out of range.
    pub fn propagate_invalid_outputs(
        &mut self,
        subsystem: usize,
        port: usize,
    ) -> Result<(), DiagramError> {
        let origin_output = self.subsystem_output(subsystem)?;
        let count = origin_output.num_ports();
        if port >= count {
            return Err(PortError::OutputOutOfRange { index: port, count }.into());
        }

        let origin = PortLocator { subsystem, port };
        let mut visited = HashSet::from([origin]);
        let mut pending = VecDeque::from([origin]);
        while let Some(src) = pending.pop_front() {
            for dest in self.wiring.consumers_of(src) {
                let consumer = self.contexts[dest.subsystem]
                    .as_mut()
                    .expect("wired subsystems are present");
                consumer.invalidate_input_dependents(dest.port)?;

                let output = self.outputs[dest.subsystem]
                    .as_mut()
                    .expect("wired subsystems are present");
                for downstream_port in 0..output.num_ports() {
                    let loc = PortLocator {
                        subsystem: dest.subsystem,
                        port: downstream_port,
                    };
                    if visited.insert(loc) {
                        output.mark_stale(downstream_port)?;
                        pending.push_back(loc);
                    }
                }
            }
        }

        trace!(%origin, "propagated output invalidation");
        Ok(())
    }

    /// Subsystem indices ordered so every producer precedes its consumers.
    ///
    /// # Errors
    ///
    /// Returns [`DiagramError::WiringCycle`] if the wiring has a feedback
    /// loop, which admits no such order.
    pub fn evaluation_order(&self) -> Result<Vec<usize>, DiagramError> {
        self.wiring
            .evaluation_order()
            .map_err(|subsystem| DiagramError::WiringCycle { subsystem })
    }

    /// The resolved vector payload feeding input `port` of child
    /// `subsystem`: the wired upstream output slot if the input is
    /// connected, else the child's own freestanding payload.
    ///
    /// # Errors
    ///
    /// Fails on absent subsystems or out-of-range ports.
    pub fn subsystem_vector_input(
        &self,
        subsystem: usize,
        port: usize,
    ) -> Result<Option<&Array1<T>>, DiagramError> {
        self.subsystem_context(subsystem)?;
        let value = self.resolve_input_value(PortLocator { subsystem, port })?;
        Ok(value.and_then(PortValue::vector))
    }

    /// Owned snapshots of every resolved input payload of child `subsystem`,
    /// in port order. `None` marks a port that cannot be resolved here.
    ///
    /// # Errors
    ///
    /// Fails on absent subsystems or out-of-range ports.
    pub fn resolved_inputs(
        &self,
        subsystem: usize,
    ) -> Result<Vec<Option<PortValue<T>>>, DiagramError> {
        let child = self.subsystem_context(subsystem)?;
        (0..child.num_input_ports())
            .map(|port| {
                let value = self.resolve_input_value(PortLocator { subsystem, port })?;
                Ok(value.cloned())
            })
            .collect()
    }

    /// The ticket invalidated when time changes on this diagram.
    #[must_use]
    pub fn time_ticket(&self) -> CacheTicket {
        self.time_ticket
    }

    /// The ticket invalidated when the aggregate state is touched.
    #[must_use]
    pub fn state_ticket(&self) -> CacheTicket {
        self.state_ticket
    }

    /// The ticket invalidated when exported input `index` changes.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InputOutOfRange`] on an unknown exported index.
    pub fn input_ticket(&self, index: usize) -> Result<CacheTicket, DiagramError> {
        self.input_tickets
            .get(index)
            .copied()
            .ok_or_else(|| {
                PortError::InputOutOfRange {
                    index,
                    count: self.input_tickets.len(),
                }
                .into()
            })
    }

    /// Allocates a computation ticket in this diagram's own cache.
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

    /// The slot this diagram occupies in its parent, if nested.
    #[must_use]
    pub fn parent_slot(&self) -> Option<usize> {
        self.parent_slot
    }

    pub(crate) fn set_parent_slot(&mut self, slot: usize) {
        self.parent_slot = Some(slot);
    }

    fn exported_input(&self, index: usize) -> Result<PortLocator, ContextError> {
        self.input_ids.get(index).copied().ok_or(ContextError::Port(
            PortError::InputOutOfRange {
                index,
                count: self.input_ids.len(),
            },
        ))
    }

    fn exported_output(&self, index: usize) -> Result<PortLocator, DiagramError> {
        self.output_ids
            .get(index)
            .copied()
            .ok_or_else(|| {
                PortError::OutputOutOfRange {
                    index,
                    count: self.output_ids.len(),
                }
                .into()
            })
    }

    /// Resolves the payload feeding `dest`. A wire at this level wins;
    /// otherwise the child's own port is consulted, descending through
    /// nested diagrams. A dependent marker wired by an *outer* diagram
    /// cannot be resolved here and reads as disconnected.
    fn resolve_input_value(
        &self,
        dest: PortLocator,
    ) -> Result<Option<&PortValue<T>>, ContextError> {
        if let Some(src) = self.wiring.source_of(dest) {
            let output = self.outputs[src.subsystem]
                .as_ref()
                .ok_or(ContextError::MissingSubsystem {
                    index: src.subsystem,
                })?;
            return Ok(Some(output.port(src.port)?.value()));
        }

        let child = self
            .contexts
            .get(dest.subsystem)
            .and_then(Option::as_ref)
            .ok_or(ContextError::MissingSubsystem {
                index: dest.subsystem,
            })?;
        match child {
            SubContext::Leaf(leaf) => match leaf.input_port(dest.port)? {
                InputPort::Freestanding(port) => Ok(Some(port.value())),
                InputPort::Dependent(_) => Ok(None),
            },
            SubContext::Diagram(diagram) => {
                let inner = diagram.exported_input(dest.port)?;
                diagram.resolve_input_value(inner)
            }
        }
    }

    /// Resolves the data version feeding `dest`, with the same rules as
    /// [`DiagramContext::resolve_input_value`].
    fn resolve_input_version(&self, dest: PortLocator) -> Result<Option<u64>, ContextError> {
        if let Some(src) = self.wiring.source_of(dest) {
            let output = self.outputs[src.subsystem]
                .as_ref()
                .ok_or(ContextError::MissingSubsystem {
                    index: src.subsystem,
                })?;
            return Ok(Some(output.port(src.port)?.data_version()));
        }

        let child = self
            .contexts
            .get(dest.subsystem)
            .and_then(Option::as_ref)
            .ok_or(ContextError::MissingSubsystem {
                index: dest.subsystem,
            })?;
        match child {
            SubContext::Leaf(leaf) => leaf.input_data_version(dest.port),
            SubContext::Diagram(diagram) => {
                let inner = diagram.exported_input(dest.port)?;
                diagram.resolve_input_version(inner)
            }
        }
    }

    /// Clones a leaf child, converting each dependent input port wired at
    /// this level into a freestanding snapshot of its referent. A foreign
    /// marker (a port wired into this child by an outer diagram) is carried
    /// over as-is; the diagram owning it rebuilds it when it replays its
    /// connections.
    fn clone_leaf_child(&self, index: usize, leaf: &LeafContext<T>) -> LeafContext<T> {
        leaf.clone_with_input_resolver(|port_index, dependent| {
            let dest = PortLocator {
                subsystem: index,
                port: port_index,
            };
            if self.wiring.source_of(dest) == Some(dependent.source()) {
                let referent = self
                    .subsystem_output(dependent.source().subsystem)
                    .ok()
                    .and_then(|output| output.port(dependent.source().port).ok());
                if let Some(referent) = referent {
                    return InputPort::Freestanding(FreestandingInputPort::snapshot_of(referent));
                }
            }
            InputPort::Dependent(dependent)
        })
    }

    fn position_raw(&self, index: usize) -> &T {
        let (child, local) = self.built_map().locate_position(index);
        self.child_ref(child).position_ref(local)
    }

    fn position_raw_mut(&mut self, index: usize) -> &mut T {
        let (child, local) = self.built_map().locate_position(index);
        self.child_mut(child).position_raw_mut(local)
    }

    fn velocity_raw(&self, index: usize) -> &T {
        let (child, local) = self.built_map().locate_velocity(index);
        self.child_ref(child).velocity_ref(local)
    }

    fn velocity_raw_mut(&mut self, index: usize) -> &mut T {
        let (child, local) = self.built_map().locate_velocity(index);
        self.child_mut(child).velocity_raw_mut(local)
    }

    fn misc_raw(&self, index: usize) -> &T {
        let (child, local) = self.built_map().locate_misc(index);
        self.child_ref(child).misc_ref(local)
    }

    fn misc_raw_mut(&mut self, index: usize) -> &mut T {
        let (child, local) = self.built_map().locate_misc(index);
        self.child_mut(child).misc_raw_mut(local)
    }

    fn discrete_group_raw(&self, group: usize) -> &Array1<T> {
        let (child, local) = self
            .built_map()
            .discrete_group_slot(group)
            .expect("group index was mapped at make_state");
        self.child_ref(child).discrete_group_ref(local)
    }

    fn discrete_group_raw_mut(&mut self, group: usize) -> &mut Array1<T> {
        let (child, local) = self
            .built_map()
            .discrete_group_slot(group)
            .expect("group index was mapped at make_state");
        self.child_mut(child).discrete_group_raw_mut(local)
    }

    fn modal_raw(&self, index: usize) -> &Value {
        let (child, local) = self
            .built_map()
            .modal_slot(index)
            .expect("modal index was mapped at make_state");
        self.child_ref(child).modal_ref(local)
    }

    fn modal_raw_mut(&mut self, index: usize) -> &mut Value {
        let (child, local) = self
            .built_map()
            .modal_slot(index)
            .expect("modal index was mapped at make_state");
        self.child_mut(child).modal_raw_mut(local)
    }

    fn built_map(&self) -> &DiagramStateMap {
        self.state_map
            .as_ref()
            .expect("the aggregate state is built before element access")
    }

    fn child_ref(&self, index: usize) -> &SubContext<T> {
        self.contexts[index]
            .as_ref()
            .expect("children were present when the aggregate state was built")
    }

    fn child_mut(&mut self, index: usize) -> &mut SubContext<T> {
        self.contexts[index]
            .as_mut()
            .expect("children were present when the aggregate state was built")
    }
}

fn allocate_root(cache: &mut Cache) -> CacheTicket {
    cache
        .make_ticket(&[])
        .expect("an empty prerequisite list is always valid")
}

impl<T: Scalar> Context<T> for DiagramContext<T> {
    fn time(&self) -> T {
        self.step_info.time
    }

    /// Sets this context's time, then every child's, in child-index order.
    fn set_time(&mut self, time: T) {
        self.invalidate_time_dependents();
        self.step_info.time = time;
        for child in self.contexts.iter_mut().flatten() {
            child.set_time(time);
        }
    }

    fn num_input_ports(&self) -> usize {
        self.input_ids.len()
    }

    fn input_port(&self, index: usize) -> Result<&InputPort<T>, ContextError> {
        let id = self.exported_input(index)?;
        let child = self
            .contexts
            .get(id.subsystem)
            .and_then(Option::as_ref)
            .ok_or(ContextError::MissingSubsystem { index: id.subsystem })?;
        child.input_port(id.port)
    }

    fn set_input_port(&mut self, index: usize, port: InputPort<T>) -> Result<(), ContextError> {
        let id = self.exported_input(index)?;
        {
            let child = self
                .contexts
                .get(id.subsystem)
                .and_then(Option::as_ref)
                .ok_or(ContextError::MissingSubsystem { index: id.subsystem })?;
            let count = child.num_input_ports();
            if id.port >= count {
                return Err(ContextError::Port(PortError::InputOutOfRange {
                    index: id.port,
                    count,
                }));
            }
        }

        self.cache
            .invalidate(self.input_tickets[index])
            .expect("exported-input tickets are allocated at export");
        let child = self.contexts[id.subsystem]
            .as_mut()
            .expect("presence was checked above");
        child.set_input_port(id.port, port)
    }

    fn vector_input(&self, index: usize) -> Result<Option<&Array1<T>>, ContextError> {
        let id = self.exported_input(index)?;
        Ok(self.resolve_input_value(id)?.and_then(PortValue::vector))
    }

    fn abstract_input(&self, index: usize) -> Result<Option<&Value>, ContextError> {
        let id = self.exported_input(index)?;
        Ok(self
            .resolve_input_value(id)?
            .and_then(PortValue::abstract_value))
    }

    fn input_data_version(&self, index: usize) -> Result<Option<u64>, ContextError> {
        let id = self.exported_input(index)?;
        self.resolve_input_version(id)
    }

    fn invalidate_time_dependents(&mut self) {
        self.cache
            .invalidate(self.time_ticket)
            .expect("the time ticket is allocated at construction");
    }

    /// The aggregate state is the children's state, so the invalidation
    /// recurses through every child.
    fn invalidate_state_dependents(&mut self) {
        self.cache
            .invalidate(self.state_ticket)
            .expect("the state ticket is allocated at construction");
        for child in self.contexts.iter_mut().flatten() {
            child.invalidate_state_dependents();
        }
    }

    fn invalidate_input_dependents(&mut self, index: usize) -> Result<(), ContextError> {
        let id = self.exported_input(index)?;
        self.cache
            .invalidate(self.input_tickets[index])
            .expect("exported-input tickets are allocated at export");
        let child = self
            .contexts
            .get_mut(id.subsystem)
            .and_then(Option::as_mut)
            .ok_or(ContextError::MissingSubsystem { index: id.subsystem })?;
        child.invalidate_input_dependents(id.port)
    }
}

impl<T: Scalar> Clone for DiagramContext<T> {
    /// Deep clone, rebuilt through the construction sequence: children and
    /// output sets are cloned and re-added in index order, the aggregate
    /// state view is rebuilt, and every connection and exported port is
    /// replayed on the clone. A leaf child's dependent inputs wired at this
    /// level are first snapshotted as freestanding, so the clone stays
    /// self-consistent even where a connection is not replayed.
    ///
    /// # Panics
    ///
    /// Panics if a subsystem slot is still empty; cloning is only meaningful
    /// after the construction phase.
    fn clone(&self) -> Self {
        let mut clone = Self::new(self.num_subsystems());

        for index in 0..self.num_subsystems() {
            let child = self.contexts[index]
                .as_ref()
                .expect("cannot clone a diagram context with missing subsystems");
            let output = self.outputs[index]
                .as_ref()
                .expect("cannot clone a diagram context with missing subsystems");

            let child_clone = match child {
                SubContext::Leaf(leaf) => SubContext::Leaf(self.clone_leaf_child(index, leaf)),
                SubContext::Diagram(diagram) => SubContext::Diagram(diagram.clone()),
            };
            clone
                .add_system(index, child_clone, output.clone())
                .expect("the clone's slots are empty and in range");
        }

        if self.state_map.is_some() {
            clone
                .make_state()
                .expect("the original's aggregate state was built from these children");
        }

        for (src, dest) in self.wiring.connections() {
            clone
                .connect(src, dest)
                .expect("the original's wiring is valid");
        }
        for &id in &self.input_ids {
            clone
                .export_input(id)
                .expect("the original's exported inputs are valid");
        }
        for &id in &self.output_ids {
            clone
                .export_output(id)
                .expect("the original's exported outputs are valid");
        }

        // The diagram's own cache is carried over wholesale so user tickets
        // survive; allocation order matches, so the replayed tickets alias
        // the originals.
        clone.step_info = self.step_info;
        clone.cache = self.cache.clone();
        clone.time_ticket = self.time_ticket;
        clone.state_ticket = self.state_ticket;
        clone.input_tickets = self.input_tickets.clone();
        clone
    }
}
