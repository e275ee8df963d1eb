//! Accelerator-eligibility classification.
//!
//! Starts from every callable node the operator-support predicate accepts, then (unless
//! non-tensor traffic is allowed) evicts nodes that would exchange non-tensor values with the
//! host. Given a chain
//!
//! ```text
//! ACC_1 -> ACC_2 -> ACC_3 -> HOST_1
//! ```
//!
//! where every accelerator node produces a non-tensor value, all three end up on the host.

use std::collections::VecDeque;

use crate::graph::{Graph, NodeList, NodeSet};
use crate::support::OperatorSupport;

pub struct AcceleratorNodeFinder<'a, S: OperatorSupport + ?Sized> {
    graph: &'a Graph,
    support: &'a S,
    allow_non_tensor: bool,
}

impl<'a, S: OperatorSupport + ?Sized> AcceleratorNodeFinder<'a, S> {
    pub fn new(graph: &'a Graph, support: &'a S, allow_non_tensor: bool) -> Self {
        Self {
            graph,
            support,
            allow_non_tensor,
        }
    }

    pub fn find(&self) -> NodeSet {
        let mut acc_nodes: NodeSet = self
            .graph
            .callable_ids()
            .filter(|&id| self.support.is_node_supported(self.graph, id))
            .collect();

        if !self.allow_non_tensor {
            self.reduce_non_tensor_input(&mut acc_nodes);
            self.reduce_non_tensor_output(&mut acc_nodes);
        }
        log::debug!(
            "graph `{}`: {} of {} callable nodes are accelerator-eligible",
            self.graph.name,
            acc_nodes.len(),
            self.graph.callable_ids().count()
        );
        acc_nodes
    }

    /// Evicts eligible consumers of every host node in `worklist`. An evicted node that
    /// produces a non-tensor value is itself queued, so eviction spreads forward.
    fn evict_users(&self, acc_nodes: &mut NodeSet, worklist: NodeList) {
        let mut worklist = VecDeque::from(worklist);
        while let Some(node) = worklist.pop_front() {
            for &user in self.graph.users(node) {
                if acc_nodes.remove(&user) {
                    log::debug!(
                        "evicting `{}`: reads a non-tensor value from the host",
                        self.graph.node(user).name
                    );
                    if !self.graph.node(user).has_tensor_meta() {
                        worklist.push_back(user);
                    }
                }
            }
        }
    }

    /// Host nodes producing non-tensor values cannot feed accelerator nodes.
    fn reduce_non_tensor_input(&self, acc_nodes: &mut NodeSet) {
        let host_non_tensor = self
            .graph
            .callable_ids()
            .filter(|id| !acc_nodes.contains(id) && !self.graph.node(*id).has_tensor_meta())
            .collect();
        self.evict_users(acc_nodes, host_non_tensor);
    }

    /// Accelerator nodes producing non-tensor values cannot feed host nodes.
    fn reduce_non_tensor_output(&self, acc_nodes: &mut NodeSet) {
        loop {
            let new_host_nodes: NodeList = acc_nodes
                .iter()
                .copied()
                .filter(|&id| {
                    !self.graph.node(id).has_tensor_meta()
                        && self
                            .graph
                            .users(id)
                            .iter()
                            .any(|user| !acc_nodes.contains(user))
                })
                .collect();
            if new_host_nodes.is_empty() {
                break;
            }
            for node in &new_host_nodes {
                log::debug!(
                    "evicting `{}`: sends a non-tensor value to the host",
                    self.graph.node(*node).name
                );
                acc_nodes.remove(node);
            }
            self.evict_users(acc_nodes, new_host_nodes);
        }
    }
}
