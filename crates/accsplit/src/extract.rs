//! Extraction of tagged subgraphs into independently invocable stages.
//!
//! A [`SplitModule`] is the composite result: one [`Stage`] per tag, each owning its own
//! [`Graph`], plus the wiring the driver uses to feed stages from graph inputs and from
//! earlier stages' outputs.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::graph::{Graph, GraphError, NodeId, NodeList};
use crate::tag::SubgraphTag;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("callable node `{node}` has no subgraph tag")]
    Untagged { node: String },
    #[error("node `{node}` carries tag `{tag}` which is not part of the split")]
    UnknownTag { node: String, tag: SubgraphTag },
    #[error("node `{node}` reads `{producer}`, which runs in a later subgraph")]
    ForwardReference { node: String, producer: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Where the driver takes a stage input (or a final result) from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueSource {
    /// A placeholder or attribute read of the original graph.
    Graph(NodeId),
    /// The `output`-th result of stage `stage`.
    Stage { stage: usize, output: usize },
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub tag: SubgraphTag,
    /// Self-contained graph; its placeholders line up with `inputs`.
    pub graph: Graph,
    pub inputs: Vec<ValueSource>,
    /// Original nodes whose values leave the stage, in result order.
    pub outputs: NodeList,
    /// Original nodes executed by the stage, in graph order.
    pub nodes: NodeList,
}

impl Stage {
    pub fn name(&self) -> String {
        self.tag.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct SplitModule {
    pub name: String,
    /// Placeholders of the original graph, in order.
    pub inputs: NodeList,
    /// Stages in dispatch order.
    pub stages: Vec<Stage>,
    pub outputs: Vec<ValueSource>,
    /// Names of the original placeholders and attribute reads the driver forwards.
    pub graph_values: HashMap<NodeId, String>,
}

impl SplitModule {
    pub fn stage(&self, tag: SubgraphTag) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.tag == tag)
    }

    pub fn accelerator_stages(&self) -> impl Iterator<Item = (usize, &Stage)> + '_ {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| stage.tag.is_accelerator)
    }
}

/// Turns a fully tagged graph into a [`SplitModule`].
pub trait Extractor {
    fn extract(&self, graph: &Graph, tags: &[SubgraphTag]) -> Result<SplitModule, ExtractError>;
}

/// Default extractor: one stage per tag, in the order the tags are given.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagExtractor;

impl Extractor for TagExtractor {
    fn extract(&self, graph: &Graph, tags: &[SubgraphTag]) -> Result<SplitModule, ExtractError> {
        let stage_of: HashMap<SubgraphTag, usize> = tags
            .iter()
            .enumerate()
            .map(|(index, tag)| (*tag, index))
            .collect();

        let mut members: Vec<NodeList> = vec![NodeList::new(); tags.len()];
        let mut node_stage: HashMap<NodeId, usize> = HashMap::new();
        for (id, node) in graph.iter() {
            if !node.is_callable() {
                continue;
            }
            let tag = node.tag.ok_or_else(|| ExtractError::Untagged {
                node: node.name.clone(),
            })?;
            let stage = *stage_of.get(&tag).ok_or_else(|| ExtractError::UnknownTag {
                node: node.name.clone(),
                tag,
            })?;
            members[stage].push(id);
            node_stage.insert(id, stage);
        }

        // A stage exports every member read by another stage or by the graph output.
        let mut exports: Vec<NodeList> = vec![NodeList::new(); tags.len()];
        let mut export_slot: HashMap<NodeId, ValueSource> = HashMap::new();
        for (stage, nodes) in members.iter().enumerate() {
            for &id in nodes {
                let leaves = graph
                    .users(id)
                    .iter()
                    .any(|user| node_stage.get(user) != Some(&stage));
                if leaves {
                    export_slot.insert(
                        id,
                        ValueSource::Stage {
                            stage,
                            output: exports[stage].len(),
                        },
                    );
                    exports[stage].push(id);
                }
            }
        }

        let source_of = |reader: NodeId, value: NodeId, stage: usize| {
            let producer = graph.node(value);
            if !producer.is_callable() {
                return Ok(ValueSource::Graph(value));
            }
            match export_slot.get(&value) {
                Some(source @ ValueSource::Stage { stage: from, .. }) if *from < stage => {
                    Ok(*source)
                }
                _ => Err(ExtractError::ForwardReference {
                    node: graph.node(reader).name.clone(),
                    producer: producer.name.clone(),
                }),
            }
        };

        let mut stages = Vec::with_capacity(tags.len());
        for (stage, (nodes, outputs)) in members.into_iter().zip(exports).enumerate() {
            let tag = tags[stage];
            let mut sub = Graph::new(tag.to_string());
            let mut local: HashMap<NodeId, NodeId> = HashMap::new();
            let mut inputs = Vec::new();

            for &id in &nodes {
                let node = graph.node(id);
                let mut mapped = Vec::with_capacity(node.inputs.len());
                for &input in &node.inputs {
                    if let Some(local_id) = local.get(&input) {
                        mapped.push(*local_id);
                        continue;
                    }
                    inputs.push(source_of(id, input, stage)?);
                    let producer = graph.node(input);
                    let placeholder =
                        sub.add_placeholder(producer.name.clone(), producer.meta.clone())?;
                    local.insert(input, placeholder);
                    mapped.push(placeholder);
                }
                let local_id =
                    sub.add_call(node.name.clone(), node.target.clone(), mapped, node.meta.clone())?;
                local.insert(id, local_id);
            }

            let results = outputs.iter().map(|id| local[id]).collect();
            sub.set_output(results)?;
            stages.push(Stage {
                tag,
                graph: sub,
                inputs,
                outputs,
                nodes,
            });
        }

        let mut results = Vec::new();
        if let Some(output) = graph.output() {
            for &value in &graph.node(output).inputs {
                results.push(source_of(output, value, tags.len())?);
            }
        }

        let graph_values = graph
            .iter()
            .filter(|(_, node)| node.op.is_source())
            .map(|(id, node)| (id, node.name.clone()))
            .collect();

        Ok(SplitModule {
            name: graph.name.clone(),
            graph_values,
            inputs: graph.placeholders(),
            stages,
            outputs: results,
        })
    }
}

impl fmt::Display for SplitModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |source: &ValueSource| match source {
            ValueSource::Graph(id) => match self.graph_values.get(id) {
                Some(name) => format!("%{name}"),
                None => format!("%#{}", id.0),
            },
            ValueSource::Stage { stage, output } => {
                format!("%{}[{}]", self.stages[*stage].name(), output)
            }
        };
        let list = |sources: &[ValueSource]| {
            sources.iter().map(render).collect::<Vec<_>>().join(", ")
        };

        writeln!(f, "split @{} {{", self.name)?;
        for stage in &self.stages {
            writeln!(
                f,
                "  %{} = {}({})",
                stage.name(),
                stage.name(),
                list(&stage.inputs)
            )?;
        }
        writeln!(f, "  return {}", list(&self.outputs))?;
        write!(f, "}}")?;
        for stage in &self.stages {
            write!(f, "\n\n{}", stage.graph)?;
        }
        Ok(())
    }
}
