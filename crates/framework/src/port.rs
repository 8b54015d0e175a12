mod input;
mod output;

pub use input::{DependentInputPort, FreestandingInputPort, InputPort};
pub use output::{OutputPort, SystemOutput};

use std::fmt;

use ndarray::Array1;
use thiserror::Error;

use crate::scalar::Scalar;
use crate::value::Value;

/// Errors from addressing ports by index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("input port {index} is out of range: {count} input ports exist")]
    InputOutOfRange { index: usize, count: usize },

    #[error("output port {index} is out of range: {count} output ports exist")]
    OutputOutOfRange { index: usize, count: usize },
}

/// Identifies one port of one subsystem within a diagram.
///
/// Locators are resolved through the diagram that owns the wiring; they are
/// never dereferenced on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortLocator {
    pub subsystem: usize,
    pub port: usize,
}

impl fmt::Display for PortLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subsystem {} port {}", self.subsystem, self.port)
    }
}

impl From<(usize, usize)> for PortLocator {
    fn from((subsystem, port): (usize, usize)) -> Self {
        Self { subsystem, port }
    }
}

/// The payload carried by a port: a numeric vector or an abstract value.
#[derive(Debug, Clone)]
pub enum PortValue<T: Scalar> {
    Vector(Array1<T>),
    Abstract(Value),
}

impl<T: Scalar> PortValue<T> {
    /// The numeric vector, if this is a vector payload.
    #[must_use]
    pub fn vector(&self) -> Option<&Array1<T>> {
        match self {
            Self::Vector(vector) => Some(vector),
            Self::Abstract(_) => None,
        }
    }

    pub fn vector_mut(&mut self) -> Option<&mut Array1<T>> {
        match self {
            Self::Vector(vector) => Some(vector),
            Self::Abstract(_) => None,
        }
    }

    /// The abstract value, if this is an abstract payload.
    #[must_use]
    pub fn abstract_value(&self) -> Option<&Value> {
        match self {
            Self::Vector(_) => None,
            Self::Abstract(value) => Some(value),
        }
    }

    pub fn abstract_value_mut(&mut self) -> Option<&mut Value> {
        match self {
            Self::Vector(_) => None,
            Self::Abstract(value) => Some(value),
        }
    }
}
