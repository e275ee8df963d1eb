//! Fusion groups: sets of nodes that must land in the same subgraph.

use std::collections::{HashMap, HashSet};

use crate::graph::{Graph, NodeId, NodeList, NodeSet};

/// Mapping from a fused node to the group it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionMap {
    groups: Vec<NodeSet>,
    group_of: HashMap<NodeId, usize>,
}

impl FusionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from already-closed groups.
    pub fn from_groups(groups: impl IntoIterator<Item = NodeSet>) -> Self {
        let mut map = Self::default();
        for group in groups {
            map.insert_group(group);
        }
        map
    }

    pub fn insert_group(&mut self, group: NodeSet) {
        let index = self.groups.len();
        for node in &group {
            self.group_of.insert(*node, index);
        }
        self.groups.push(group);
    }

    pub fn group(&self, node: NodeId) -> Option<&NodeSet> {
        self.group_of.get(&node).map(|&index| &self.groups[index])
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.group_of.contains_key(&node)
    }

    pub fn groups(&self) -> impl Iterator<Item = &NodeSet> + '_ {
        self.groups.iter()
    }

    /// Fused nodes in ascending graph order.
    pub fn fused_nodes(&self) -> NodeList {
        let mut nodes: NodeList = self.group_of.keys().copied().collect();
        nodes.sort();
        nodes
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Supplies the fusion groups for a graph.
///
/// Resolvers may shrink `acc_nodes` when a group cannot live entirely on the accelerator.
pub trait FusionResolver {
    fn resolve(&self, graph: &Graph, acc_nodes: &mut NodeSet) -> FusionMap;
}

/// Groups connected accelerator nodes that pass non-tensor values between each other, so
/// that no such value has to cross a subgraph boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonTensorFusionFinder;

struct FusionGroup {
    /// Smallest graph index of any member; nothing above the group can lie on a path into it.
    top_node_idx: usize,
    nodes: NodeSet,
    inputs: NodeSet,
    pending: NodeList,
}

impl FusionGroup {
    fn add_node(&mut self, graph: &Graph, node: NodeId) {
        if !self.nodes.insert(node) {
            return;
        }
        self.pending.push(node);
        self.inputs.remove(&node);
        for input in graph.input_nodes(node) {
            if graph.node(input).is_callable() && !self.nodes.contains(&input) {
                self.inputs.insert(input);
            }
        }
    }
}

impl NonTensorFusionFinder {
    /// Walks upstream from the group's inputs; any node on a path that leads back into the
    /// group is added, together with the rest of that path.
    fn add_paths_into_group(graph: &Graph, group: &mut FusionGroup) {
        let inputs: NodeList = group.inputs.iter().copied().collect();
        let mut dead = HashSet::new();
        Self::recursive_add_node(graph, group, &inputs, &mut dead);
    }

    fn recursive_add_node(
        graph: &Graph,
        group: &mut FusionGroup,
        inputs: &[NodeId],
        dead: &mut HashSet<NodeId>,
    ) -> bool {
        for &arg in inputs {
            if !graph.node(arg).is_callable() || arg.index() < group.top_node_idx {
                continue;
            }
            if group.nodes.contains(&arg) {
                return true;
            }
            if dead.contains(&arg) {
                continue;
            }
            let upstream = graph.input_nodes(arg);
            if Self::recursive_add_node(graph, group, &upstream, dead) {
                group.add_node(graph, arg);
                return true;
            }
            dead.insert(arg);
        }
        false
    }
}

impl FusionResolver for NonTensorFusionFinder {
    fn resolve(&self, graph: &Graph, acc_nodes: &mut NodeSet) -> FusionMap {
        let mut result = FusionMap::new();
        let candidates: NodeList = acc_nodes.iter().copied().collect();

        for start in candidates {
            let node = graph.node(start);
            if result.contains(start)
                || !node.is_callable()
                || node.has_tensor_meta()
                || !acc_nodes.contains(&start)
            {
                continue;
            }

            let mut group = FusionGroup {
                top_node_idx: start.index(),
                nodes: NodeSet::from([start]),
                inputs: graph.input_nodes(start).into_iter().collect(),
                pending: vec![start],
            };
            while let Some(current) = group.pending.pop() {
                Self::add_paths_into_group(graph, &mut group);

                if !graph.node(current).has_tensor_meta() {
                    for &user in graph.users(current) {
                        if !graph.node(user).is_callable() || group.nodes.contains(&user) {
                            continue;
                        }
                        group.add_node(graph, user);
                        Self::add_paths_into_group(graph, &mut group);
                    }
                }

                for arg in graph.input_nodes(current) {
                    let input = graph.node(arg);
                    if !input.is_callable()
                        || input.has_tensor_meta()
                        || group.nodes.contains(&arg)
                    {
                        continue;
                    }
                    group.add_node(graph, arg);
                    group.top_node_idx = group.top_node_idx.min(arg.index());
                    Self::add_paths_into_group(graph, &mut group);
                }
            }

            if group.nodes.is_subset(acc_nodes) {
                log::debug!(
                    "fusion group of {} node(s) anchored at `{}`",
                    group.nodes.len(),
                    node.name
                );
                result.insert_group(group.nodes);
            } else {
                log::debug!(
                    "fusion group anchored at `{}` reaches host nodes; moving {} node(s) to host",
                    node.name,
                    group.nodes.len()
                );
                for member in &group.nodes {
                    acc_nodes.remove(member);
                }
            }
        }
        result
    }
}
