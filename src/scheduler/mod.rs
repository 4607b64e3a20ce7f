//! Deterministic topological scheduling (spec §4.3 / §8).
//!
//! The expanded graph's edges already guarantee a DAG (every input id is
//! smaller than its consumer after the expander's final rewrite), so a
//! straightforward Kahn's-algorithm sort suffices. The only subtlety the
//! determinism contract demands: whenever more than one node is ready at
//! once, the scheduler must break the tie the same way on every run. Ties
//! are broken by ascending `NodeId`, which is what makes "inputs have
//! strictly smaller schedule positions" something callers can rely on
//! without having to inspect the schedule itself.

use std::collections::BinaryHeap;
use std::cmp::Reverse;

use crate::ir::Node;
use crate::types::NodeId;

pub mod arena;

/// Ascending-id-ordered sequence of node ids to execute, one entry per
/// non-`Alias` node in the expanded graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule(pub Vec<NodeId>);

impl Schedule {
    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }

    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        self.0.iter().position(|&n| n == id)
    }
}

pub fn schedule(nodes: &[Node]) -> Schedule {
    let n = nodes.len();
    let mut indegree = vec![0usize; n];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, node) in nodes.iter().enumerate() {
        if let Node::Op { inputs, .. } = node {
            indegree[i] = inputs.len();
            for input in inputs {
                consumers[input.index()].push(i);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = BinaryHeap::new();
    for (i, &deg) in indegree.iter().enumerate() {
        if deg == 0 {
            ready.push(Reverse(i));
        }
    }

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(NodeId(i as u32));
        for &consumer in &consumers[i] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.push(Reverse(consumer));
            }
        }
    }

    debug_assert_eq!(order.len(), n, "expanded graph must be acyclic by construction");
    Schedule(order)
}
