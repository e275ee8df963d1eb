//! Arena-backed dataflow graph consumed by the splitter.
//!
//! Nodes live in a single `Vec` and reference each other through [`NodeId`]s. Forward edges
//! (inputs) are stored on each node; consumer lists are derived into a reverse index as nodes
//! are appended, so the graph never holds aliased back-pointers.
//!
//! Nodes must be appended in topological order: every input has to exist before the node that
//! reads it. The splitter relies on that ordering and never restructures a graph; it only
//! writes the `tag` annotation.

pub mod text;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::tag::SubgraphTag;

/// Stable index of a node inside its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unordered (but deterministically iterated) set of node references.
pub type NodeSet = BTreeSet<NodeId>;
/// Order-preserving sequence of node references.
pub type NodeList = Vec<NodeId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Graph input.
    Placeholder,
    /// Read of a stored attribute (weights, buffers).
    GetAttr,
    /// Invocation of an operator or module; the only kind that can be placed on a backend.
    Call,
    /// Terminal node returning the graph results.
    Output,
}

impl OpKind {
    #[inline]
    pub fn is_callable(self) -> bool {
        matches!(self, OpKind::Call)
    }

    /// Placeholders and attribute reads feed the graph without depending on anything.
    #[inline]
    pub fn is_source(self) -> bool {
        matches!(self, OpKind::Placeholder | OpKind::GetAttr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    U8,
    I16,
    I32,
    I64,
    F16,
    Bf16,
    F32,
    F64,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::F16 | DType::Bf16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::Bf16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        let dtype = match normalized.as_str() {
            "bool" | "i1" => DType::Bool,
            "i8" => DType::I8,
            "u8" => DType::U8,
            "i16" => DType::I16,
            "i32" => DType::I32,
            "i64" => DType::I64,
            "f16" => DType::F16,
            "bf16" => DType::Bf16,
            "f32" => DType::F32,
            "f64" => DType::F64,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape and dtype recorded by shape propagation for tensor-valued nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorMeta {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl TensorMeta {
    pub fn new(dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.numel().saturating_mul(self.dtype.size_in_bytes())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op: OpKind,
    /// Operator or module identifier; opaque to the splitter.
    pub target: String,
    pub inputs: Vec<NodeId>,
    /// `None` when the node does not produce a tensor (or was never propagated).
    pub meta: Option<TensorMeta>,
    pub tag: Option<SubgraphTag>,
}

impl Node {
    #[inline]
    pub fn is_callable(&self) -> bool {
        self.op.is_callable()
    }

    #[inline]
    pub fn has_tensor_meta(&self) -> bool {
        self.meta.is_some()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node `{0}` is defined twice")]
    DuplicateName(String),
    #[error("node `{node}` reads unknown value #{input}")]
    UnknownInput { node: String, input: u32 },
    #[error("graph already has an output node")]
    OutputAlreadySet,
    #[error("cannot append `{0}` after the output node")]
    AfterOutput(String),
    #[error("graph cannot hold more than {} nodes", u32::MAX)]
    TooManyNodes,
    #[error("{0}")]
    Parse(String),
}

/// Directed acyclic dataflow graph stored in topological order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    nodes: Vec<Node>,
    users: Vec<SmallVec<[NodeId; 4]>>,
    names: HashMap<String, NodeId>,
    output: Option<NodeId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_placeholder(
        &mut self,
        name: impl Into<String>,
        meta: Option<TensorMeta>,
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        let target = name.clone();
        self.push(name, OpKind::Placeholder, target, Vec::new(), meta)
    }

    pub fn add_get_attr(
        &mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        meta: Option<TensorMeta>,
    ) -> Result<NodeId, GraphError> {
        self.push(name.into(), OpKind::GetAttr, target.into(), Vec::new(), meta)
    }

    pub fn add_call(
        &mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        inputs: Vec<NodeId>,
        meta: Option<TensorMeta>,
    ) -> Result<NodeId, GraphError> {
        self.push(name.into(), OpKind::Call, target.into(), inputs, meta)
    }

    pub fn set_output(&mut self, results: Vec<NodeId>) -> Result<NodeId, GraphError> {
        if self.output.is_some() {
            return Err(GraphError::OutputAlreadySet);
        }
        let id = self.push(
            "output".to_string(),
            OpKind::Output,
            "output".to_string(),
            results,
            None,
        )?;
        self.output = Some(id);
        Ok(id)
    }

    fn push(
        &mut self,
        name: String,
        op: OpKind,
        target: String,
        inputs: Vec<NodeId>,
        meta: Option<TensorMeta>,
    ) -> Result<NodeId, GraphError> {
        if self.output.is_some() {
            return Err(GraphError::AfterOutput(name));
        }
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        if let Some(bad) = inputs.iter().find(|input| input.index() >= self.nodes.len()) {
            return Err(GraphError::UnknownInput {
                node: name,
                input: bad.0,
            });
        }

        let id = next_node_id(self.nodes.len())?;
        for input in &inputs {
            let users = &mut self.users[input.index()];
            if !users.contains(&id) {
                users.push(id);
            }
        }
        self.names.insert(name.clone(), id);
        self.nodes.push(Node {
            name,
            op,
            target,
            inputs,
            meta,
            tag: None,
        });
        self.users.push(SmallVec::new());
        Ok(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Consumers of `id`, each listed once, in the order they were appended.
    #[inline]
    pub fn users(&self, id: NodeId) -> &[NodeId] {
        self.users[id.index()].as_slice()
    }

    /// Distinct inputs of `id` in first-use order.
    pub fn input_nodes(&self, id: NodeId) -> NodeList {
        let mut out = NodeList::with_capacity(self.node(id).inputs.len());
        for input in &self.node(id).inputs {
            if !out.contains(input) {
                out.push(*input);
            }
        }
        out
    }

    pub fn output(&self) -> Option<NodeId> {
        self.output
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|idx| NodeId(idx as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx as u32), node))
    }

    pub fn callable_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.iter()
            .filter(|(_, node)| node.is_callable())
            .map(|(id, _)| id)
    }

    pub fn placeholders(&self) -> NodeList {
        self.iter()
            .filter(|(_, node)| node.op == OpKind::Placeholder)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn clear_tags(&mut self) {
        for node in &mut self.nodes {
            node.tag = None;
        }
    }

    /// Names of the given nodes, in the given order; handy for reports and assertions.
    pub fn names_of<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Vec<String> {
        ids.into_iter()
            .map(|id| self.node(*id).name.clone())
            .collect()
    }
}

fn next_node_id(len: usize) -> Result<NodeId, GraphError> {
    u32::try_from(len)
        .map(NodeId)
        .map_err(|_| GraphError::TooManyNodes)
}
