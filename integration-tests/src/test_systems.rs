//! Mock systems used by the end-to-end diagram tests.

use braid_framework::{
    Context, ContinuousState, DiscreteState, InputPort, LeafContext, ModalState, OutputPort,
    PortValue, State, System, SystemOutput,
};
use ndarray::{array, Array1};
use thiserror::Error;

/// The shared error type of the mock systems.
#[derive(Debug, Error)]
pub enum TestSystemError {
    #[error("input port {port} is disconnected or not a vector")]
    DisconnectedInput { port: usize },
}

fn vector_input<'a>(
    inputs: &'a [Option<PortValue<f64>>],
    port: usize,
) -> Result<&'a Array1<f64>, TestSystemError> {
    inputs
        .get(port)
        .and_then(Option::as_ref)
        .and_then(PortValue::vector)
        .ok_or(TestSystemError::DisconnectedInput { port })
}

/// Emits a constant vector on its single output port.
pub struct ConstantSource {
    pub value: Array1<f64>,
}

impl System<f64> for ConstantSource {
    type Error = TestSystemError;

    fn create_context(&self) -> LeafContext<f64> {
        LeafContext::new(State::default(), vec![])
    }

    fn create_output(&self) -> SystemOutput<f64> {
        SystemOutput::new(vec![OutputPort::from_vector(Array1::zeros(self.value.len()))])
    }

    fn compute_outputs(
        &self,
        _context: &LeafContext<f64>,
        _inputs: &[Option<PortValue<f64>>],
        output: &mut SystemOutput<f64>,
    ) -> Result<(), Self::Error> {
        let port = output.port_mut(0).expect("one output port");
        *port.value_mut() = PortValue::Vector(self.value.clone());
        port.mark_fresh();
        Ok(())
    }
}

/// Emits the context time on its single output port.
pub struct EchoTime;

impl System<f64> for EchoTime {
    type Error = TestSystemError;

    fn create_context(&self) -> LeafContext<f64> {
        LeafContext::new(State::default(), vec![])
    }

    fn create_output(&self) -> SystemOutput<f64> {
        SystemOutput::new(vec![OutputPort::from_vector(array![0.0])])
    }

    fn compute_outputs(
        &self,
        context: &LeafContext<f64>,
        _inputs: &[Option<PortValue<f64>>],
        output: &mut SystemOutput<f64>,
    ) -> Result<(), Self::Error> {
        let port = output.port_mut(0).expect("one output port");
        *port.value_mut() = PortValue::Vector(array![context.time()]);
        port.mark_fresh();
        Ok(())
    }
}

/// Scales its single vector input by a constant.
pub struct Gain {
    pub gain: f64,
    pub width: usize,
}

impl System<f64> for Gain {
    type Error = TestSystemError;

    fn create_context(&self) -> LeafContext<f64> {
        LeafContext::new(
            State::default(),
            vec![InputPort::from_vector(Array1::zeros(self.width))],
        )
    }

    fn create_output(&self) -> SystemOutput<f64> {
        SystemOutput::new(vec![OutputPort::from_vector(Array1::zeros(self.width))])
    }

    fn compute_outputs(
        &self,
        _context: &LeafContext<f64>,
        inputs: &[Option<PortValue<f64>>],
        output: &mut SystemOutput<f64>,
    ) -> Result<(), Self::Error> {
        let input = vector_input(inputs, 0)?;
        let scaled = input.mapv(|x| x * self.gain);

        let port = output.port_mut(0).expect("one output port");
        *port.value_mut() = PortValue::Vector(scaled);
        port.mark_fresh();
        Ok(())
    }
}

/// Adds its two vector inputs elementwise.
pub struct Adder {
    pub width: usize,
}

impl System<f64> for Adder {
    type Error = TestSystemError;

    fn create_context(&self) -> LeafContext<f64> {
        LeafContext::new(
            State::default(),
            vec![
                InputPort::from_vector(Array1::zeros(self.width)),
                InputPort::from_vector(Array1::zeros(self.width)),
            ],
        )
    }

    fn create_output(&self) -> SystemOutput<f64> {
        SystemOutput::new(vec![OutputPort::from_vector(Array1::zeros(self.width))])
    }

    fn compute_outputs(
        &self,
        _context: &LeafContext<f64>,
        inputs: &[Option<PortValue<f64>>],
        output: &mut SystemOutput<f64>,
    ) -> Result<(), Self::Error> {
        let sum = vector_input(inputs, 0)? + vector_input(inputs, 1)?;

        let port = output.port_mut(0).expect("one output port");
        *port.value_mut() = PortValue::Vector(sum);
        port.mark_fresh();
        Ok(())
    }
}

/// A point with position and velocity state that reports its position.
pub struct MovingPoint {
    pub initial_position: f64,
    pub initial_velocity: f64,
}

impl System<f64> for MovingPoint {
    type Error = TestSystemError;

    fn create_context(&self) -> LeafContext<f64> {
        LeafContext::new(
            State::new(
                ContinuousState::new(
                    array![self.initial_position],
                    array![self.initial_velocity],
                    array![],
                ),
                DiscreteState::default(),
                ModalState::default(),
            ),
            vec![],
        )
    }

    fn create_output(&self) -> SystemOutput<f64> {
        SystemOutput::new(vec![OutputPort::from_vector(array![0.0])])
    }

    fn compute_outputs(
        &self,
        context: &LeafContext<f64>,
        _inputs: &[Option<PortValue<f64>>],
        output: &mut SystemOutput<f64>,
    ) -> Result<(), Self::Error> {
        let position = *context.state().continuous().position(0);

        let port = output.port_mut(0).expect("one output port");
        *port.value_mut() = PortValue::Vector(array![position]);
        port.mark_fresh();
        Ok(())
    }
}
