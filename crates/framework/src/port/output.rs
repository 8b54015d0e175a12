use ndarray::Array1;

use crate::port::{PortError, PortValue};
use crate::scalar::Scalar;
use crate::value::Value;

/// One output slot of a subsystem: a payload, a monotonic data version, and
/// a freshness flag.
///
/// The freshness flag asserts that the slot's content is consistent with the
/// owning subsystem's current time, state, and inputs. Taking the payload
/// mutably bumps the version and clears the flag; whoever finishes the
/// computation marks the slot fresh again.
#[derive(Debug, Clone)]
pub struct OutputPort<T: Scalar> {
    value: PortValue<T>,
    version: u64,
    fresh: bool,
}

impl<T: Scalar> OutputPort<T> {
    #[must_use]
    pub fn new(value: PortValue<T>) -> Self {
        Self {
            value,
            version: 0,
            fresh: false,
        }
    }

    #[must_use]
    pub fn from_vector(vector: Array1<T>) -> Self {
        Self::new(PortValue::Vector(vector))
    }

    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self::new(PortValue::Abstract(value))
    }

    #[must_use]
    pub fn value(&self) -> &PortValue<T> {
        &self.value
    }

    /// Exclusive access to the payload. Bumps the data version and marks the
    /// slot stale until it is marked fresh again.
    pub fn value_mut(&mut self) -> &mut PortValue<T> {
        self.version += 1;
        self.fresh = false;
        &mut self.value
    }

    #[must_use]
    pub fn vector(&self) -> Option<&Array1<T>> {
        self.value.vector()
    }

    #[must_use]
    pub fn abstract_value(&self) -> Option<&Value> {
        self.value.abstract_value()
    }

    #[must_use]
    pub fn data_version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn mark_fresh(&mut self) {
        self.fresh = true;
    }

    pub fn mark_stale(&mut self) {
        self.fresh = false;
    }
}

/// The ordered output slots of one subsystem.
#[derive(Debug, Clone, Default)]
pub struct SystemOutput<T: Scalar> {
    ports: Vec<OutputPort<T>>,
}

impl<T: Scalar> SystemOutput<T> {
    #[must_use]
    pub fn new(ports: Vec<OutputPort<T>>) -> Self {
        Self { ports }
    }

    #[must_use]
    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    /// # Errors
    ///
    /// Returns [`PortError::OutputOutOfRange`] if `index` is out of range.
    pub fn port(&self, index: usize) -> Result<&OutputPort<T>, PortError> {
        self.ports.get(index).ok_or(PortError::OutputOutOfRange {
            index,
            count: self.ports.len(),
        })
    }

    /// # Errors
    ///
    /// Returns [`PortError::OutputOutOfRange`] if `index` is out of range.
    pub fn port_mut(&mut self, index: usize) -> Result<&mut OutputPort<T>, PortError> {
        let count = self.ports.len();
        self.ports
            .get_mut(index)
            .ok_or(PortError::OutputOutOfRange { index, count })
    }

    /// # Errors
    ///
    /// Returns [`PortError::OutputOutOfRange`] if `index` is out of range.
    pub fn mark_fresh(&mut self, index: usize) -> Result<(), PortError> {
        self.port_mut(index)?.mark_fresh();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`PortError::OutputOutOfRange`] if `index` is out of range.
    pub fn mark_stale(&mut self, index: usize) -> Result<(), PortError> {
        self.port_mut(index)?.mark_stale();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`PortError::OutputOutOfRange`] if `index` is out of range.
    pub fn is_fresh(&self, index: usize) -> Result<bool, PortError> {
        Ok(self.port(index)?.is_fresh())
    }

    pub fn mark_all_fresh(&mut self) {
        for port in &mut self.ports {
            port.mark_fresh();
        }
    }

    /// Whether every slot is currently fresh. Vacuously true with no slots.
    #[must_use]
    pub fn all_fresh(&self) -> bool {
        self.ports.iter().all(OutputPort::is_fresh)
    }
}
