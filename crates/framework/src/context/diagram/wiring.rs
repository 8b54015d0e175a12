use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::{algo::toposort, Direction};

use crate::port::PortLocator;

/// One output-to-input connection between two subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Wire {
    src_port: usize,
    dest_port: usize,
}

/// The port-level wiring of a diagram.
///
/// Subsystems are graph nodes, fixed at construction; each connection is a
/// directed edge from the producing subsystem to the consuming one, weighted
/// with the port pair. Forward queries ([`WiringGraph::consumers_of`]) drive
/// invalidation propagation; reverse queries ([`WiringGraph::source_of`])
/// resolve dependent input ports.
#[derive(Debug, Clone)]
pub(crate) struct WiringGraph {
    graph: DiGraph<usize, Wire>,
    nodes: Vec<NodeIndex>,
}

impl WiringGraph {
    pub(crate) fn new(num_subsystems: usize) -> Self {
        let mut graph = DiGraph::new();
        let nodes = (0..num_subsystems).map(|i| graph.add_node(i)).collect();
        Self { graph, nodes }
    }

    /// Records that `dest` reads `src`. Endpoint validity is the diagram's
    /// responsibility.
    pub(crate) fn connect(&mut self, src: PortLocator, dest: PortLocator) {
        self.graph.add_edge(
            self.nodes[src.subsystem],
            self.nodes[dest.subsystem],
            Wire {
                src_port: src.port,
                dest_port: dest.port,
            },
        );
    }

    /// The output slot feeding `dest`, if `dest` is wired.
    pub(crate) fn source_of(&self, dest: PortLocator) -> Option<PortLocator> {
        self.graph
            .edges_directed(self.nodes[dest.subsystem], Direction::Incoming)
            .find(|edge| edge.weight().dest_port == dest.port)
            .map(|edge| PortLocator {
                subsystem: self.graph[edge.source()],
                port: edge.weight().src_port,
            })
    }

    /// Every input port wired to the output slot `src`.
    pub(crate) fn consumers_of(&self, src: PortLocator) -> Vec<PortLocator> {
        self.graph
            .edges_directed(self.nodes[src.subsystem], Direction::Outgoing)
            .filter(|edge| edge.weight().src_port == src.port)
            .map(|edge| PortLocator {
                subsystem: self.graph[edge.target()],
                port: edge.weight().dest_port,
            })
            .collect()
    }

    /// All connections as `(src, dest)` pairs, in insertion order.
    pub(crate) fn connections(&self) -> Vec<(PortLocator, PortLocator)> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    PortLocator {
                        subsystem: self.graph[edge.source()],
                        port: edge.weight().src_port,
                    },
                    PortLocator {
                        subsystem: self.graph[edge.target()],
                        port: edge.weight().dest_port,
                    },
                )
            })
            .collect()
    }

    /// Subsystem indices in an order where every producer precedes its
    /// consumers, or the index of a subsystem on a cycle.
    pub(crate) fn evaluation_order(&self) -> Result<Vec<usize>, usize> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|node| self.graph[node]).collect())
            .map_err(|cycle| self.graph[cycle.node_id()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(subsystem: usize, port: usize) -> PortLocator {
        PortLocator { subsystem, port }
    }

    #[test]
    fn sources_and_consumers_match_by_port() {
        let mut wiring = WiringGraph::new(3);
        wiring.connect(loc(0, 0), loc(1, 0));
        wiring.connect(loc(0, 0), loc(2, 1));
        wiring.connect(loc(0, 1), loc(2, 0));

        assert_eq!(wiring.source_of(loc(1, 0)), Some(loc(0, 0)));
        assert_eq!(wiring.source_of(loc(2, 0)), Some(loc(0, 1)));
        assert_eq!(wiring.source_of(loc(0, 0)), None);

        let consumers = wiring.consumers_of(loc(0, 0));
        assert_eq!(consumers, vec![loc(1, 0), loc(2, 1)]);
        assert!(wiring.consumers_of(loc(1, 0)).is_empty());
    }

    #[test]
    fn connections_replay_in_insertion_order() {
        let mut wiring = WiringGraph::new(2);
        wiring.connect(loc(0, 1), loc(1, 0));
        wiring.connect(loc(0, 0), loc(1, 1));

        assert_eq!(
            wiring.connections(),
            vec![(loc(0, 1), loc(1, 0)), (loc(0, 0), loc(1, 1))]
        );
    }

    #[test]
    fn evaluation_order_respects_dependencies() {
        let mut wiring = WiringGraph::new(3);
        wiring.connect(loc(2, 0), loc(0, 0));
        wiring.connect(loc(0, 0), loc(1, 0));

        let order = wiring.evaluation_order().unwrap();
        let rank = |i: usize| order.iter().position(|&s| s == i).unwrap();

        assert_eq!(order.len(), 3);
        assert!(rank(2) < rank(0));
        assert!(rank(0) < rank(1));
    }

    #[test]
    fn evaluation_order_reports_cycles() {
        let mut wiring = WiringGraph::new(2);
        wiring.connect(loc(0, 0), loc(1, 0));
        wiring.connect(loc(1, 0), loc(0, 0));

        assert!(wiring.evaluation_order().is_err());
    }
}
