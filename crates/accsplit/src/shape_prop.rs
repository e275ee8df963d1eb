//! Shape and dtype propagation contract.
//!
//! The splitter only reads the resulting `meta` field: its presence marks a tensor-valued node.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::graph::{Graph, OpKind, TensorMeta};

/// Value fed to a graph input while propagating metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleInput {
    Tensor(TensorMeta),
    /// Non-tensor input (an int, a shape, a config object).
    Opaque,
}

impl SampleInput {
    pub fn meta(&self) -> Option<&TensorMeta> {
        match self {
            SampleInput::Tensor(meta) => Some(meta),
            SampleInput::Opaque => None,
        }
    }
}

impl From<TensorMeta> for SampleInput {
    fn from(meta: TensorMeta) -> Self {
        SampleInput::Tensor(meta)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropagationError {
    #[error("graph `{graph}` takes {expected} input(s) but {found} sample input(s) were given")]
    InputCount {
        graph: String,
        expected: usize,
        found: usize,
    },
    #[error("{0}")]
    Message(String),
}

pub trait ShapePropagator {
    fn propagate(&self, graph: &mut Graph, inputs: &[SampleInput]) -> Result<(), PropagationError>;
}

impl<F> ShapePropagator for F
where
    F: Fn(&mut Graph, &[SampleInput]) -> Result<(), PropagationError>,
{
    fn propagate(&self, graph: &mut Graph, inputs: &[SampleInput]) -> Result<(), PropagationError> {
        self(graph, inputs)
    }
}

type MetaRule = Box<dyn Fn(&[Option<&TensorMeta>]) -> Option<TensorMeta> + Send + Sync>;

/// Seeds graph inputs from the sample inputs and recomputes call nodes that have a rule
/// registered for their target. Nodes without a rule keep whatever the tracer recorded.
#[derive(Default)]
pub struct MetaPropagation {
    rules: HashMap<String, MetaRule>,
}

impl MetaPropagation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule<F>(mut self, target: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&[Option<&TensorMeta>]) -> Option<TensorMeta> + Send + Sync + 'static,
    {
        self.rules.insert(target.into(), Box::new(rule));
        self
    }

    /// Output takes the metadata of the first tensor input (elementwise ops, activations).
    pub fn same_as_first_input(inputs: &[Option<&TensorMeta>]) -> Option<TensorMeta> {
        inputs.iter().flatten().next().map(|meta| (*meta).clone())
    }
}

impl fmt::Debug for MetaPropagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<&String> = self.rules.keys().collect();
        targets.sort();
        f.debug_struct("MetaPropagation")
            .field("rules", &targets)
            .finish()
    }
}

impl ShapePropagator for MetaPropagation {
    fn propagate(&self, graph: &mut Graph, inputs: &[SampleInput]) -> Result<(), PropagationError> {
        let placeholders = graph.placeholders();
        if placeholders.len() != inputs.len() {
            return Err(PropagationError::InputCount {
                graph: graph.name.clone(),
                expected: placeholders.len(),
                found: inputs.len(),
            });
        }
        for (id, input) in placeholders.into_iter().zip(inputs) {
            graph.node_mut(id).meta = input.meta().cloned();
        }

        let ids: Vec<_> = graph.ids().collect();
        for id in ids {
            let node = graph.node(id);
            if node.op != OpKind::Call {
                continue;
            }
            let Some(rule) = self.rules.get(&node.target) else {
                continue;
            };
            let input_meta: Vec<Option<&TensorMeta>> = node
                .inputs
                .iter()
                .map(|input| graph.node(*input).meta.as_ref())
                .collect();
            let meta = rule(&input_meta);
            graph.node_mut(id).meta = meta;
        }
        Ok(())
    }
}
