use ndarray::Array1;

use crate::port::{OutputPort, PortLocator, PortValue};
use crate::scalar::Scalar;
use crate::value::Value;

/// An input port of a subsystem.
///
/// Exactly one of two shapes: a freestanding port that exclusively owns its
/// payload, or a dependent port that reads another subsystem's output slot.
/// A dependent port stores only a [`PortLocator`]; the diagram owning the
/// wiring resolves it, so the accessors here return `None` for dependent
/// ports.
#[derive(Debug)]
pub enum InputPort<T: Scalar> {
    Freestanding(FreestandingInputPort<T>),
    Dependent(DependentInputPort),
}

impl<T: Scalar> Clone for InputPort<T> {
    /// A freestanding port clones its payload. A dependent port cloned in
    /// isolation must become a freestanding snapshot of its referent, and
    /// the referent is only reachable through the diagram that owns the
    /// wiring, so a lone clone refuses rather than carry a locator that
    /// means nothing once detached. Diagrams snapshot dependent ports
    /// themselves while cloning their children.
    ///
    /// # Panics
    ///
    /// Panics on a dependent port.
    fn clone(&self) -> Self {
        match self {
            Self::Freestanding(port) => Self::Freestanding(port.clone()),
            Self::Dependent(port) => panic!(
                "cannot clone an input port reading {} in isolation: only \
                 the diagram owning the wiring can snapshot its referent",
                port.source()
            ),
        }
    }
}

impl<T: Scalar> InputPort<T> {
    /// A freestanding port owning the given vector.
    #[must_use]
    pub fn from_vector(vector: Array1<T>) -> Self {
        Self::Freestanding(FreestandingInputPort::from_vector(vector))
    }

    /// A freestanding port owning the given abstract value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self::Freestanding(FreestandingInputPort::from_value(value))
    }

    /// A dependent port reading the output slot at `source`.
    #[must_use]
    pub fn dependent(source: impl Into<PortLocator>) -> Self {
        Self::Dependent(DependentInputPort::new(source.into()))
    }

    /// The owned vector payload, or `None` for abstract or dependent ports.
    #[must_use]
    pub fn vector(&self) -> Option<&Array1<T>> {
        match self {
            Self::Freestanding(port) => port.vector(),
            Self::Dependent(_) => None,
        }
    }

    /// The owned abstract payload, or `None` for vector or dependent ports.
    #[must_use]
    pub fn abstract_value(&self) -> Option<&Value> {
        match self {
            Self::Freestanding(port) => port.abstract_value(),
            Self::Dependent(_) => None,
        }
    }

    /// The owned payload's data version; `None` for dependent ports, whose
    /// version is the referent's and is resolved through the diagram.
    #[must_use]
    pub fn data_version(&self) -> Option<u64> {
        match self {
            Self::Freestanding(port) => Some(port.data_version()),
            Self::Dependent(_) => None,
        }
    }
}

/// An input port that exclusively owns its payload.
#[derive(Debug, Clone)]
pub struct FreestandingInputPort<T: Scalar> {
    value: PortValue<T>,
    version: u64,
}

impl<T: Scalar> FreestandingInputPort<T> {
    #[must_use]
    pub fn new(value: PortValue<T>) -> Self {
        Self { value, version: 0 }
    }

    #[must_use]
    pub fn from_vector(vector: Array1<T>) -> Self {
        Self::new(PortValue::Vector(vector))
    }

    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self::new(PortValue::Abstract(value))
    }

    /// Captures the current payload and version of an output slot. Used when
    /// a context leaves its diagram, e.g. during cloning.
    #[must_use]
    pub fn snapshot_of(referent: &OutputPort<T>) -> Self {
        Self {
            value: referent.value().clone(),
            version: referent.data_version(),
        }
    }

    #[must_use]
    pub fn value(&self) -> &PortValue<T> {
        &self.value
    }

    /// Exclusive access to the payload. Bumps the data version.
    pub fn value_mut(&mut self) -> &mut PortValue<T> {
        self.version += 1;
        &mut self.value
    }

    /// Replaces the payload with a vector. Bumps the data version.
    pub fn set_vector(&mut self, vector: Array1<T>) {
        self.version += 1;
        self.value = PortValue::Vector(vector);
    }

    /// Replaces the payload with an abstract value. Bumps the data version.
    pub fn set_value(&mut self, value: Value) {
        self.version += 1;
        self.value = PortValue::Abstract(value);
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
}

/// A non-owning reference to another subsystem's output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentInputPort {
    source: PortLocator,
}

impl DependentInputPort {
    #[must_use]
    pub fn new(source: PortLocator) -> Self {
        Self { source }
    }

    #[must_use]
    pub fn source(&self) -> PortLocator {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn freestanding_mutation_bumps_the_version() {
        let mut port = FreestandingInputPort::from_vector(array![1.0, 2.0]);
        assert_eq!(port.data_version(), 0);

        port.set_vector(array![3.0]);
        assert_eq!(port.data_version(), 1);
        assert_eq!(port.vector(), Some(&array![3.0]));

        port.value_mut();
        assert_eq!(port.data_version(), 2);
    }

    #[test]
    fn dependent_ports_resolve_nothing_on_their_own() {
        let port = InputPort::<f64>::dependent((2, 0));

        assert!(port.vector().is_none());
        assert!(port.abstract_value().is_none());
        assert!(port.data_version().is_none());

        let InputPort::Dependent(dependent) = port else {
            panic!("expected a dependent port");
        };
        assert_eq!(dependent.source(), PortLocator { subsystem: 2, port: 0 });
    }

    #[test]
    fn freestanding_ports_clone_their_payload() {
        let port = InputPort::<f64>::from_vector(array![1.0, 2.0]);

        let clone = port.clone();

        assert_eq!(clone.vector(), Some(&array![1.0, 2.0]));
        assert_eq!(clone.data_version(), Some(0));
    }

    #[test]
    #[should_panic(expected = "in isolation")]
    fn dependent_ports_cannot_be_cloned_in_isolation() {
        let port = InputPort::<f64>::dependent((2, 0));

        let _ = port.clone();
    }

    #[test]
    fn snapshot_captures_payload_and_version() {
        let mut referent = OutputPort::from_vector(array![0.0]);
        *referent.value_mut().vector_mut().unwrap() = array![5.0];

        let snapshot = FreestandingInputPort::snapshot_of(&referent);

        assert_eq!(snapshot.vector(), Some(&array![5.0]));
        assert_eq!(snapshot.data_version(), referent.data_version());
    }

    #[test]
    fn abstract_payloads_are_supported() {
        let port = InputPort::<f64>::from_value(Value::new("mode-a"));

        assert!(port.vector().is_none());
        assert_eq!(
            port.abstract_value().unwrap().downcast_ref::<&str>(),
            Some(&"mode-a")
        );
    }
}
