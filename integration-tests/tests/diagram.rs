//! End-to-end scenarios driving systems through a diagram context.

use approx::assert_relative_eq;
use braid_framework::{
    Context, DiagramContext, InputPort, SubContext, System, Value,
};
use integration_tests::test_systems::{
    Adder, ConstantSource, EchoTime, Gain, MovingPoint, TestSystemError,
};
use ndarray::array;

type TestSystem<'a> = &'a dyn System<f64, Error = TestSystemError>;

/// Builds a diagram with one slot per system, contexts and outputs from the
/// systems' factories.
fn build_diagram(systems: &[TestSystem<'_>]) -> DiagramContext<f64> {
    let mut diagram = DiagramContext::new(systems.len());
    for (index, system) in systems.iter().enumerate() {
        diagram
            .add_system(index, system.create_context(), system.create_output())
            .unwrap();
    }
    diagram
}

/// Runs every stale subsystem in dependency order, feeding each the resolved
/// input payloads.
fn evaluate(diagram: &mut DiagramContext<f64>, systems: &[TestSystem<'_>]) {
    for index in diagram.evaluation_order().unwrap() {
        if diagram.is_evaluation_fresh(index).unwrap() {
            continue;
        }
        let inputs = diagram.resolved_inputs(index).unwrap();
        let (context, output) = diagram.subsystem_context_and_output_mut(index).unwrap();
        let SubContext::Leaf(context) = context else {
            continue;
        };
        systems[index].compute_outputs(context, &inputs, output).unwrap();
    }
}

#[test]
fn time_propagates_to_every_child() {
    let systems: Vec<TestSystem<'_>> = vec![&EchoTime, &EchoTime, &EchoTime];
    let mut diagram = build_diagram(&systems);
    for index in 0..3 {
        diagram.export_output((index, 0)).unwrap();
    }
    diagram.make_state().unwrap();

    diagram.set_time(7.5);

    for index in 0..3 {
        assert_relative_eq!(diagram.subsystem_context(index).unwrap().time(), 7.5);
    }

    evaluate(&mut diagram, &systems);
    for index in 0..3 {
        assert_eq!(
            diagram.output_port(index).unwrap().vector(),
            Some(&array![7.5])
        );
    }
}

#[test]
fn wired_inputs_read_the_upstream_output_slot() {
    let source = ConstantSource {
        value: array![2.0],
    };
    let gain = Gain {
        gain: 3.0,
        width: 1,
    };
    let systems: Vec<TestSystem<'_>> = vec![&source, &gain];
    let mut diagram = build_diagram(&systems);
    diagram.connect((0, 0), (1, 0)).unwrap();
    diagram.export_output((1, 0)).unwrap();
    diagram.make_state().unwrap();

    evaluate(&mut diagram, &systems);

    // The downstream input is a view onto the upstream slot.
    assert_eq!(
        diagram.subsystem_vector_input(1, 0).unwrap(),
        Some(&array![2.0])
    );
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![6.0]));

    // Freshness coherence: a fresh evaluation means every slot is fresh.
    for index in 0..2 {
        assert!(diagram.is_evaluation_fresh(index).unwrap());
        let output = diagram.subsystem_output(index).unwrap();
        for port in 0..output.num_ports() {
            assert!(output.is_fresh(port).unwrap());
        }
    }
}

#[test]
fn upstream_changes_invalidate_and_recompute_downstream() {
    let source = ConstantSource {
        value: array![2.0],
    };
    let gain = Gain {
        gain: 3.0,
        width: 1,
    };
    let systems: Vec<TestSystem<'_>> = vec![&source, &gain];
    let mut diagram = build_diagram(&systems);
    diagram.connect((0, 0), (1, 0)).unwrap();
    diagram.export_output((1, 0)).unwrap();
    diagram.make_state().unwrap();
    evaluate(&mut diagram, &systems);
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![6.0]));

    // Simulate an upstream recompute: write the source's slot, then tell the
    // diagram the slot changed.
    {
        let output = diagram.subsystem_output_mut(0).unwrap();
        let port = output.port_mut(0).unwrap();
        *port.value_mut() = braid_framework::PortValue::Vector(array![5.0]);
        port.mark_fresh();
    }
    diagram.propagate_invalid_outputs(0, 0).unwrap();
    assert!(!diagram.is_evaluation_fresh(1).unwrap());

    evaluate(&mut diagram, &systems);
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![15.0]));
}

#[test]
fn exported_inputs_drive_a_child_port() {
    let adder = Adder { width: 1 };
    let systems: Vec<TestSystem<'_>> = vec![&adder];
    let mut diagram = build_diagram(&systems);
    diagram.export_input((0, 0)).unwrap();
    diagram.export_input((0, 1)).unwrap();
    diagram.export_output((0, 0)).unwrap();
    diagram.make_state().unwrap();

    diagram
        .set_input_port(0, InputPort::from_vector(array![1.0]))
        .unwrap();
    diagram
        .set_input_port(1, InputPort::from_vector(array![2.0]))
        .unwrap();
    evaluate(&mut diagram, &systems);
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![3.0]));

    diagram
        .set_input_port(0, InputPort::from_vector(array![10.0]))
        .unwrap();
    diagram.subsystem_output_mut(0).unwrap().mark_stale(0).unwrap();
    evaluate(&mut diagram, &systems);
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![12.0]));
}

#[test]
fn cloned_diagrams_share_nothing() {
    let gain = Gain {
        gain: 3.0,
        width: 1,
    };
    let systems: Vec<TestSystem<'_>> = vec![&gain];
    let mut diagram = build_diagram(&systems);
    diagram.export_input((0, 0)).unwrap();
    diagram.export_output((0, 0)).unwrap();
    diagram.make_state().unwrap();
    diagram
        .set_input_port(0, InputPort::from_vector(array![2.0]))
        .unwrap();
    evaluate(&mut diagram, &systems);
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![6.0]));

    let mut clone = diagram.clone();
    clone
        .set_input_port(0, InputPort::from_vector(array![10.0]))
        .unwrap();
    clone.subsystem_output_mut(0).unwrap().mark_stale(0).unwrap();
    clone.set_time(99.0);
    evaluate(&mut clone, &systems);

    assert_eq!(clone.output_port(0).unwrap().vector(), Some(&array![30.0]));
    assert_eq!(clone.vector_input(0).unwrap(), Some(&array![10.0]));

    // The original saw none of it.
    assert_eq!(diagram.time(), 0.0);
    assert_eq!(diagram.vector_input(0).unwrap(), Some(&array![2.0]));
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![6.0]));
}

#[test]
fn state_changes_flow_through_the_aggregate_view() {
    let point = MovingPoint {
        initial_position: 1.5,
        initial_velocity: 0.0,
    };
    let systems: Vec<TestSystem<'_>> = vec![&point];
    let mut diagram = build_diagram(&systems);
    diagram.export_output((0, 0)).unwrap();
    diagram.make_state().unwrap();

    // A cached computation registered against the child's state root.
    let entry = {
        let SubContext::Leaf(context) = diagram.subsystem_context_mut(0).unwrap() else {
            panic!("expected a leaf child");
        };
        let root = context.state_ticket();
        let entry = context.make_cache_ticket(&[root]).unwrap();
        context.cache_mut().set(entry, Value::new(0_i32)).unwrap();
        entry
    };

    evaluate(&mut diagram, &systems);
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![1.5]));

    *diagram.state_mut().unwrap().position_mut(0) = 9.0;
    diagram.subsystem_output_mut(0).unwrap().mark_stale(0).unwrap();

    // The state-dependent cache entry is gone, and the recompute sees the
    // written-through position.
    let SubContext::Leaf(context) = diagram.subsystem_context(0).unwrap() else {
        panic!("expected a leaf child");
    };
    assert!(context.cache().get(entry).unwrap().is_none());

    evaluate(&mut diagram, &systems);
    assert_eq!(diagram.output_port(0).unwrap().vector(), Some(&array![9.0]));
}
