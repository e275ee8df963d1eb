//! Upstream growth of an already-tagged accelerator subgraph.

use crate::deps::DependencyMap;
use crate::error::SplitterError;
use crate::fusion::FusionMap;
use crate::graph::{Graph, NodeList, NodeSet};
use crate::tag::SubgraphTag;

/// Callable nodes outside `tag` that feed a callable node inside it.
pub fn find_parent_nodes_of_subgraph(graph: &Graph, tag: SubgraphTag) -> NodeSet {
    let mut parents = NodeSet::new();
    for (_, node) in graph.iter() {
        if !node.is_callable() || node.tag != Some(tag) {
            continue;
        }
        for &input in &node.inputs {
            let producer = graph.node(input);
            if producer.is_callable() && producer.tag != Some(tag) {
                parents.insert(input);
            }
        }
    }
    parents
}

/// Pulls accelerator-eligible ancestors into the `tag` subgraph, walking against the data
/// flow. A parent is absorbed once all of its consumers that run before `tag` have been
/// absorbed. Returns the absorbed nodes in absorption order.
pub fn extend_acc_subgraph(
    graph: &mut Graph,
    acc_nodes: &NodeSet,
    fusions: &FusionMap,
    tag: SubgraphTag,
) -> Result<NodeList, SplitterError> {
    if !tag.is_accelerator {
        return Err(SplitterError::NotAcceleratorTag(tag));
    }

    let mut deps = DependencyMap::build_reverse(graph, Some(tag.index));
    deps.fuse_reverse(graph, fusions);

    let mut parents = find_parent_nodes_of_subgraph(graph, tag);
    let mut visited = NodeSet::new();
    let mut absorbed = NodeList::new();

    loop {
        let next = parents
            .iter()
            .copied()
            .find(|node| acc_nodes.contains(node) && deps.is_ready(*node, &visited));
        let Some(node) = next else {
            break;
        };

        graph.node_mut(node).tag = Some(tag);
        parents.remove(&node);
        visited.insert(node);
        absorbed.push(node);

        if let Some(fusion) = fusions.group(node) {
            parents.extend(
                fusion
                    .iter()
                    .copied()
                    .filter(|member| !visited.contains(member)),
            );
        }
        for input in graph.input_nodes(node) {
            if graph.node(input).is_callable() && !visited.contains(&input) {
                parents.insert(input);
            }
        }
    }

    log::debug!(
        "extended `{tag}` with {} upstream node(s): {:?}",
        absorbed.len(),
        graph.names_of(&absorbed)
    );
    Ok(absorbed)
}
