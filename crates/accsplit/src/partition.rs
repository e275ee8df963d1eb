//! Worklist partitioner producing alternating accelerator / host subgraphs.

use serde::Serialize;

use crate::deps::DependencyMap;
use crate::error::SplitterError;
use crate::fusion::FusionMap;
use crate::graph::{Graph, NodeId, NodeList, NodeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subgraph {
    pub is_accelerator: bool,
    pub nodes: NodeList,
}

impl Subgraph {
    pub fn new(is_accelerator: bool, nodes: NodeList) -> Self {
        Self {
            is_accelerator,
            nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Callable nodes that can start the traversal, split into `(host, accelerator)`.
///
/// These are the consumers of graph inputs and attribute reads, plus callable nodes with no
/// inputs at all (constant factories), which nothing else would ever enqueue.
pub fn starter_nodes(graph: &Graph, acc_nodes: &NodeSet) -> (NodeSet, NodeSet) {
    let mut host = NodeSet::new();
    let mut acc = NodeSet::new();
    let mut push = |id: NodeId| {
        if acc_nodes.contains(&id) {
            acc.insert(id);
        } else {
            host.insert(id);
        }
    };
    for (id, node) in graph.iter() {
        if node.op.is_source() {
            for &user in graph.users(id) {
                if graph.node(user).is_callable() {
                    push(user);
                }
            }
        } else if node.is_callable() && node.inputs.is_empty() {
            push(id);
        }
    }
    (host, acc)
}

/// Assigns every reachable callable node to a subgraph.
///
/// The current subgraph keeps absorbing ready nodes of its own kind; only when none is ready
/// does it close and the mode flip. Among several ready nodes the one earliest in the graph
/// is taken, which keeps node order inside a subgraph reproducible.
pub fn put_nodes_into_subgraphs(
    graph: &Graph,
    acc_nodes: &NodeSet,
    deps: &DependencyMap,
    fusions: &FusionMap,
) -> Result<Vec<Subgraph>, SplitterError> {
    let (mut host_frontier, mut acc_frontier) = starter_nodes(graph, acc_nodes);
    let mut visited = NodeSet::new();

    // Host starters may all wait on accelerator nodes, as in `add(x, sin(x))`.
    let mut is_accelerator = !host_frontier
        .iter()
        .any(|&candidate| deps.is_ready(candidate, &visited));
    let mut current = NodeList::new();
    let mut subgraphs = Vec::new();

    while !host_frontier.is_empty() || !acc_frontier.is_empty() {
        let frontier = if is_accelerator {
            &mut acc_frontier
        } else {
            &mut host_frontier
        };
        let ready = frontier
            .iter()
            .copied()
            .find(|&candidate| deps.is_ready(candidate, &visited));

        let Some(node) = ready else {
            if current.is_empty() {
                return Err(SplitterError::EmptySubgraph);
            }
            log::debug!(
                "closing {} subgraph #{} with {} node(s)",
                mode_name(is_accelerator),
                subgraphs.len(),
                current.len()
            );
            subgraphs.push(Subgraph::new(is_accelerator, std::mem::take(&mut current)));
            is_accelerator = !is_accelerator;
            continue;
        };

        frontier.remove(&node);
        visited.insert(node);
        current.push(node);

        if let Some(fusion) = fusions.group(node) {
            acc_frontier.extend(
                fusion
                    .iter()
                    .copied()
                    .filter(|member| !visited.contains(member)),
            );
        }

        for &user in graph.users(node) {
            if !graph.node(user).is_callable() || visited.contains(&user) {
                continue;
            }
            if acc_nodes.contains(&user) {
                acc_frontier.insert(user);
            } else {
                host_frontier.insert(user);
            }
        }
    }

    if !current.is_empty() {
        subgraphs.push(Subgraph::new(is_accelerator, current));
    }
    if subgraphs.is_empty() {
        return Err(SplitterError::NoSubgraphs);
    }
    Ok(subgraphs)
}

fn mode_name(is_accelerator: bool) -> &'static str {
    if is_accelerator {
        "accelerator"
    } else {
        "host"
    }
}
