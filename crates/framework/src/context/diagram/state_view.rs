use ndarray::Array1;

use super::{DiagramError, SubContext};
use crate::scalar::Scalar;
use crate::value::Value;

/// Continuous segment sizes of one child, or totals across children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SegmentDims {
    pub positions: usize,
    pub velocities: usize,
    pub misc: usize,
}

/// Locator tables mapping the diagram's logical state onto its children.
///
/// Built once by `make_state`, after which the topology is frozen. No child
/// state is owned or referenced here; every access re-resolves through the
/// child list, which keeps cloning trivial.
#[derive(Debug, Clone)]
pub(crate) struct DiagramStateMap {
    continuous: Vec<SegmentDims>,
    discrete_groups: Vec<(usize, usize)>,
    modal_slots: Vec<(usize, usize)>,
    totals: SegmentDims,
}

impl DiagramStateMap {
    pub(crate) fn build<T: Scalar>(
        children: &[Option<SubContext<T>>],
    ) -> Result<Self, DiagramError> {
        let mut continuous = Vec::with_capacity(children.len());
        let mut discrete_groups = Vec::new();
        let mut modal_slots = Vec::new();
        let mut totals = SegmentDims::default();

        for (index, slot) in children.iter().enumerate() {
            let child = slot
                .as_ref()
                .ok_or(DiagramError::MissingSubsystem { index })?;
            let dims = child
                .continuous_dims()
                .ok_or(DiagramError::SubsystemStateNotBuilt { index })?;
            let groups = child
                .num_discrete_groups()
                .ok_or(DiagramError::SubsystemStateNotBuilt { index })?;
            let modal = child
                .num_modal_variables()
                .ok_or(DiagramError::SubsystemStateNotBuilt { index })?;

            totals.positions += dims.positions;
            totals.velocities += dims.velocities;
            totals.misc += dims.misc;
            continuous.push(dims);
            discrete_groups.extend((0..groups).map(|group| (index, group)));
            modal_slots.extend((0..modal).map(|slot| (index, slot)));
        }

        Ok(Self {
            continuous,
            discrete_groups,
            modal_slots,
            totals,
        })
    }

    pub(crate) fn totals(&self) -> SegmentDims {
        self.totals
    }

    pub(crate) fn num_discrete_groups(&self) -> usize {
        self.discrete_groups.len()
    }

    pub(crate) fn num_modal_variables(&self) -> usize {
        self.modal_slots.len()
    }

    pub(crate) fn locate_position(&self, index: usize) -> (usize, usize) {
        self.locate(index, |dims| dims.positions, "position")
    }

    pub(crate) fn locate_velocity(&self, index: usize) -> (usize, usize) {
        self.locate(index, |dims| dims.velocities, "velocity")
    }

    pub(crate) fn locate_misc(&self, index: usize) -> (usize, usize) {
        self.locate(index, |dims| dims.misc, "misc")
    }

    pub(crate) fn discrete_group_slot(&self, group: usize) -> Option<(usize, usize)> {
        self.discrete_groups.get(group).copied()
    }

    pub(crate) fn modal_slot(&self, index: usize) -> Option<(usize, usize)> {
        self.modal_slots.get(index).copied()
    }

    fn locate(
        &self,
        mut index: usize,
        segment: impl Fn(&SegmentDims) -> usize,
        kind: &str,
    ) -> (usize, usize) {
        for (child, dims) in self.continuous.iter().enumerate() {
            let len = segment(dims);
            if index < len {
                return (child, index);
            }
            index -= len;
        }
        panic!("{kind} index out of range for the aggregate state");
    }
}

/// Read view over a diagram's aggregate state.
///
/// Presents one logical continuous/discrete/modal container formed by
/// concatenating the children's sub-containers in child-index order. Element
/// accessors panic on out-of-range indices, like container indexing.
#[derive(Debug)]
pub struct DiagramState<'a, T: Scalar> {
    pub(crate) children: &'a [Option<SubContext<T>>],
    pub(crate) map: &'a DiagramStateMap,
}

impl<T: Scalar> DiagramState<'_, T> {
    #[must_use]
    pub fn num_positions(&self) -> usize {
        self.map.totals().positions
    }

    #[must_use]
    pub fn num_velocities(&self) -> usize {
        self.map.totals().velocities
    }

    #[must_use]
    pub fn num_misc(&self) -> usize {
        self.map.totals().misc
    }

    /// Total continuous length, `q ‖ v ‖ z` across all children.
    #[must_use]
    pub fn len(&self) -> usize {
        let totals = self.map.totals();
        totals.positions + totals.velocities + totals.misc
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn position(&self, index: usize) -> &T {
        let (child, local) = self.map.locate_position(index);
        child_ref(self.children, child).position_ref(local)
    }

    #[must_use]
    pub fn velocity(&self, index: usize) -> &T {
        let (child, local) = self.map.locate_velocity(index);
        child_ref(self.children, child).velocity_ref(local)
    }

    #[must_use]
    pub fn misc_element(&self, index: usize) -> &T {
        let (child, local) = self.map.locate_misc(index);
        child_ref(self.children, child).misc_ref(local)
    }

    /// Copies the aggregate continuous state out as one vector: the
    /// children's `q` segments in order, then all `v`, then all `z`.
    #[must_use]
    pub fn to_array(&self) -> Array1<T> {
        let totals = self.map.totals();
        let mut data = Vec::with_capacity(self.len());
        data.extend((0..totals.positions).map(|i| *self.position(i)));
        data.extend((0..totals.velocities).map(|i| *self.velocity(i)));
        data.extend((0..totals.misc).map(|i| *self.misc_element(i)));
        Array1::from_vec(data)
    }

    #[must_use]
    pub fn num_discrete_groups(&self) -> usize {
        self.map.num_discrete_groups()
    }

    #[must_use]
    pub fn discrete_group(&self, group: usize) -> Option<&Array1<T>> {
        let (child, local) = self.map.discrete_group_slot(group)?;
        Some(child_ref(self.children, child).discrete_group_ref(local))
    }

    #[must_use]
    pub fn num_modal_variables(&self) -> usize {
        self.map.num_modal_variables()
    }

    #[must_use]
    pub fn modal_variable(&self, index: usize) -> Option<&Value> {
        let (child, local) = self.map.modal_slot(index)?;
        Some(child_ref(self.children, child).modal_ref(local))
    }
}

/// Write-through view over a diagram's aggregate state.
///
/// Mutations resolve to the owning child and write its state directly; the
/// diagram never copies child state. State-dependent cache entries were
/// already invalidated when this view was created.
#[derive(Debug)]
pub struct DiagramStateMut<'a, T: Scalar> {
    pub(crate) children: &'a mut [Option<SubContext<T>>],
    pub(crate) map: &'a DiagramStateMap,
}

impl<T: Scalar> DiagramStateMut<'_, T> {
    #[must_use]
    pub fn num_positions(&self) -> usize {
        self.map.totals().positions
    }

    #[must_use]
    pub fn num_velocities(&self) -> usize {
        self.map.totals().velocities
    }

    #[must_use]
    pub fn num_misc(&self) -> usize {
        self.map.totals().misc
    }

    #[must_use]
    pub fn position(&self, index: usize) -> &T {
        let (child, local) = self.map.locate_position(index);
        child_ref(self.children, child).position_ref(local)
    }

    pub fn position_mut(&mut self, index: usize) -> &mut T {
        let (child, local) = self.map.locate_position(index);
        child_mut(self.children, child).position_raw_mut(local)
    }

    #[must_use]
    pub fn velocity(&self, index: usize) -> &T {
        let (child, local) = self.map.locate_velocity(index);
        child_ref(self.children, child).velocity_ref(local)
    }

    pub fn velocity_mut(&mut self, index: usize) -> &mut T {
        let (child, local) = self.map.locate_velocity(index);
        child_mut(self.children, child).velocity_raw_mut(local)
    }

    #[must_use]
    pub fn misc_element(&self, index: usize) -> &T {
        let (child, local) = self.map.locate_misc(index);
        child_ref(self.children, child).misc_ref(local)
    }

    pub fn misc_element_mut(&mut self, index: usize) -> &mut T {
        let (child, local) = self.map.locate_misc(index);
        child_mut(self.children, child).misc_raw_mut(local)
    }

    pub fn discrete_group_mut(&mut self, group: usize) -> Option<&mut Array1<T>> {
        let (child, local) = self.map.discrete_group_slot(group)?;
        Some(child_mut(self.children, child).discrete_group_raw_mut(local))
    }

    pub fn modal_variable_mut(&mut self, index: usize) -> Option<&mut Value> {
        let (child, local) = self.map.modal_slot(index)?;
        Some(child_mut(self.children, child).modal_raw_mut(local))
    }
}

fn child_ref<T: Scalar>(children: &[Option<SubContext<T>>], index: usize) -> &SubContext<T> {
    children[index]
        .as_ref()
        .expect("children were present when the aggregate state was built")
}

fn child_mut<T: Scalar>(
    children: &mut [Option<SubContext<T>>],
    index: usize,
) -> &mut SubContext<T> {
    children[index]
        .as_mut()
        .expect("children were present when the aggregate state was built")
}
