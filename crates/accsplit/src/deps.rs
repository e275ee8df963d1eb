//! Direct dependency maps between callable nodes.
//!
//! Only direct edges are recorded; the partitioner checks readiness with a subset test against
//! the visited set, so a transitive closure is never needed.

use std::collections::HashMap;

use crate::fusion::FusionMap;
use crate::graph::{Graph, NodeId, NodeSet, OpKind};

static NO_DEPS: NodeSet = NodeSet::new();

/// Node -> set of nodes it has to wait for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyMap {
    deps: HashMap<NodeId, NodeSet>,
}

impl DependencyMap {
    pub fn deps_of(&self, node: NodeId) -> &NodeSet {
        self.deps.get(&node).unwrap_or(&NO_DEPS)
    }

    /// True when every dependency of `node` is in `visited`.
    pub fn is_ready(&self, node: NodeId, visited: &NodeSet) -> bool {
        self.deps_of(node).is_subset(visited)
    }

    pub fn add(&mut self, node: NodeId, dep: NodeId) {
        self.deps.entry(node).or_default().insert(dep);
    }

    fn extend(&mut self, node: NodeId, deps: impl IntoIterator<Item = NodeId>) {
        self.deps.entry(node).or_default().extend(deps);
    }

    fn set(&mut self, node: NodeId, deps: NodeSet) {
        self.deps.insert(node, deps);
    }

    /// Forward dependencies: every consumer of a callable node (other than the graph output)
    /// depends on it. Placeholders and attribute reads never act as dependencies.
    pub fn build(graph: &Graph) -> Self {
        let mut map = Self::default();
        for node in graph.callable_ids() {
            for &user in graph.users(node) {
                if graph.node(user).op != OpKind::Output {
                    map.add(user, node);
                }
            }
        }
        map
    }

    /// [`DependencyMap::build`] followed by the fusion adjustment: members of a group share
    /// the group's outer dependencies, and outer consumers of any member wait for every member.
    pub fn build_with_fusions(graph: &Graph, fusions: &FusionMap) -> Self {
        let mut map = Self::build(graph);
        for node in fusions.fused_nodes() {
            let Some(fusion) = fusions.group(node) else {
                continue;
            };
            for &neighbor in fusion {
                let outer: Vec<NodeId> = map.deps_of(neighbor).difference(fusion).copied().collect();
                map.extend(node, outer);

                for &user in graph.users(neighbor) {
                    if !fusion.contains(&user) && graph.node(user).op != OpKind::Output {
                        map.add(user, node);
                    }
                }
            }
        }
        map
    }

    /// Reverse dependencies used when growing a subgraph upstream: a callable node maps to its
    /// callable consumers. With `below_tag`, consumers already tagged into that subgraph or a
    /// later one are ignored, so growth never has to wait on them.
    pub fn build_reverse(graph: &Graph, below_tag: Option<usize>) -> Self {
        let mut map = Self::default();
        for node in graph.callable_ids() {
            for &user in graph.users(node) {
                let consumer = graph.node(user);
                if !consumer.is_callable() {
                    continue;
                }
                let counted = match (below_tag, consumer.tag) {
                    (Some(limit), Some(tag)) => tag.index < limit,
                    _ => true,
                };
                if counted {
                    map.add(node, user);
                }
            }
        }
        map
    }

    /// Fusion adjustment for reverse maps: every member of a group waits on the union of the
    /// group's outer consumers, and every outer input of a member waits on the whole group.
    pub fn fuse_reverse(&mut self, graph: &Graph, fusions: &FusionMap) {
        for fusion in fusions.groups() {
            let mut shared = NodeSet::new();
            for &member in fusion {
                shared.extend(self.deps_of(member).iter().copied());
            }
            shared.retain(|node| !fusion.contains(node));

            for &member in fusion {
                self.set(member, shared.clone());
                for input in graph.input_nodes(member) {
                    if !fusion.contains(&input) {
                        self.extend(input, fusion.iter().copied());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::text::parse_graph;

    fn deps(graph: &Graph, map: &DependencyMap, name: &str) -> Vec<String> {
        graph.names_of(map.deps_of(graph.find(name).unwrap()))
    }

    #[test]
    fn fused_nodes_share_outer_dependencies() {
        let graph = parse_graph(
            r#"
graph @g(%x: tensor<f32, 4>) {
  %a = call relu(%x) : tensor<f32, 4>
  %b = call tanh(%x) : tensor<f32, 4>
  %f1 = call shape(%a) : opaque
  %f2 = call view(%b, %f1) : tensor<f32, 4>
  %o = call neg(%f1, %f2) : tensor<f32, 4>
  return %o
}
"#,
        )
        .expect("valid graph");
        let plain = DependencyMap::build(&graph);
        assert_eq!(deps(&graph, &plain, "a"), Vec::<String>::new());
        assert_eq!(deps(&graph, &plain, "f1"), vec!["a"]);
        assert_eq!(deps(&graph, &plain, "f2"), vec!["b", "f1"]);

        let group: NodeSet = [graph.find("f1").unwrap(), graph.find("f2").unwrap()].into();
        let fusions = FusionMap::from_groups([group]);
        let fused = DependencyMap::build_with_fusions(&graph, &fusions);
        assert_eq!(deps(&graph, &fused, "f1"), vec!["a", "b"]);
        assert_eq!(deps(&graph, &fused, "f2"), vec!["a", "b", "f1"]);
        assert_eq!(deps(&graph, &fused, "o"), vec!["f1", "f2"]);
    }
}
