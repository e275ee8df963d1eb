//! Operator-support predicates consumed by the classifier.

use std::collections::HashMap;

use crate::graph::{DType, Graph, NodeId};

/// Decides whether the accelerator backend can execute a callable node.
///
/// Implementations may read the graph but must not depend on anything other than the node
/// and its inputs; the splitter calls them once per callable node.
pub trait OperatorSupport {
    fn is_node_supported(&self, graph: &Graph, node: NodeId) -> bool;
}

impl<F> OperatorSupport for F
where
    F: Fn(&Graph, NodeId) -> bool,
{
    fn is_node_supported(&self, graph: &Graph, node: NodeId) -> bool {
        self(graph, node)
    }
}

/// Maps spelling variants of a target (`torch.add`, `operator.add`, `add`) onto one
/// canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetAliases {
    map: HashMap<String, String>,
}

impl TargetAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.map.insert(from.into(), to.into());
        self
    }

    pub fn canonical<'a>(&'a self, target: &'a str) -> &'a str {
        self.map.get(target).map(String::as_str).unwrap_or(target)
    }
}

/// Canonical target name of `node`.
pub fn node_target<'a>(graph: &'a Graph, node: NodeId, aliases: &'a TargetAliases) -> &'a str {
    aliases.canonical(&graph.node(node).target)
}

/// Allowed dtypes for one positional input; `None` accepts anything.
pub type InputDTypes = Option<Vec<DType>>;

/// Table-driven support predicate keyed by canonical target.
#[derive(Debug, Clone, Default)]
pub struct OperatorSupportTable {
    aliases: TargetAliases,
    entries: HashMap<String, Option<Vec<InputDTypes>>>,
}

impl OperatorSupportTable {
    pub fn new(aliases: TargetAliases) -> Self {
        Self {
            aliases,
            entries: HashMap::new(),
        }
    }

    /// Supports `target` regardless of input dtypes.
    pub fn allow(mut self, target: impl Into<String>) -> Self {
        self.entries.insert(target.into(), None);
        self
    }

    pub fn allow_all<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for target in targets {
            self.entries.insert(target.into(), None);
        }
        self
    }

    /// Supports `target` when each constrained positional input carries one of the listed
    /// dtypes. Inputs without tensor metadata never satisfy a constraint.
    pub fn allow_with_dtypes(
        mut self,
        target: impl Into<String>,
        inputs: impl IntoIterator<Item = InputDTypes>,
    ) -> Self {
        self.entries
            .insert(target.into(), Some(inputs.into_iter().collect()));
        self
    }

    pub fn aliases(&self) -> &TargetAliases {
        &self.aliases
    }
}

impl OperatorSupport for OperatorSupportTable {
    fn is_node_supported(&self, graph: &Graph, node: NodeId) -> bool {
        let current = graph.node(node);
        if !current.is_callable() {
            return false;
        }
        let target = self.aliases.canonical(&current.target);
        let Some(entry) = self.entries.get(target) else {
            return false;
        };
        let Some(constraints) = entry else {
            return true;
        };

        for (input, allowed) in current.inputs.iter().zip(constraints) {
            let Some(allowed) = allowed else {
                continue;
            };
            let dtype = graph.node(*input).meta.as_ref().map(|meta| meta.dtype);
            match dtype {
                Some(dtype) if allowed.contains(&dtype) => {}
                _ => return false,
            }
        }
        true
    }
}
