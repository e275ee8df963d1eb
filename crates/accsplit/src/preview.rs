//! Diagnostic reports: operator-support coverage and per-stage transfer bounds.

use std::collections::{BTreeMap, BTreeSet};

use crate::extract::{SplitModule, Stage, ValueSource};
use crate::graph::{DType, Graph, NodeId};
use crate::shape_prop::{PropagationError, SampleInput, ShapePropagator};
use crate::support::{node_target, OperatorSupport, TargetAliases};

/// Default host <-> accelerator bandwidth: 100 GiB/s.
pub const DEFAULT_BUS_BANDWIDTH: f64 = 100.0 * (1u64 << 30) as f64;

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewOptions {
    /// Bytes per second the host link can move; bounds each stage's throughput.
    pub bus_bandwidth: f64,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            bus_bandwidth: DEFAULT_BUS_BANDWIDTH,
        }
    }
}

/// A stage compiled for the accelerator.
pub trait LoweredStage {
    fn run(&self, inputs: &[SampleInput]) -> anyhow::Result<()>;
}

/// Backend lowering hook used by the split preview.
pub trait Lowering {
    fn lower(&self, stage: &Stage, inputs: &[SampleInput]) -> anyhow::Result<Box<dyn LoweredStage>>;

    /// Explains which part of `stage` made lowering or running fail.
    fn find_culprit(&self, _stage: &Stage, _inputs: &[SampleInput]) -> String {
        "Unable to find a culprit because find_culprit() is not implemented.".to_string()
    }
}

/// Lowering that keeps the stage graph as is; running only checks the inputs line up with
/// the stage's placeholders.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityLowering;

struct IdentityStage {
    expected: Vec<bool>,
}

impl LoweredStage for IdentityStage {
    fn run(&self, inputs: &[SampleInput]) -> anyhow::Result<()> {
        anyhow::ensure!(
            inputs.len() == self.expected.len(),
            "stage expects {} input(s), got {}",
            self.expected.len(),
            inputs.len()
        );
        for (index, (input, is_tensor)) in inputs.iter().zip(&self.expected).enumerate() {
            anyhow::ensure!(
                input.meta().is_some() == *is_tensor,
                "input {index} does not match the stage signature"
            );
        }
        Ok(())
    }
}

impl Lowering for IdentityLowering {
    fn lower(&self, stage: &Stage, _inputs: &[SampleInput]) -> anyhow::Result<Box<dyn LoweredStage>> {
        let expected = stage
            .graph
            .placeholders()
            .into_iter()
            .map(|id| stage.graph.node(id).has_tensor_meta())
            .collect();
        Ok(Box::new(IdentityStage { expected }))
    }
}

/// Values observed at one stage's boundary.
#[derive(Debug, Clone)]
pub struct StageBoundary {
    pub inputs: Vec<SampleInput>,
    /// The stage graph after propagating `inputs` through it.
    pub graph: Graph,
}

impl StageBoundary {
    pub fn outputs(&self) -> Vec<SampleInput> {
        let Some(output) = self.graph.output() else {
            return Vec::new();
        };
        self.graph
            .node(output)
            .inputs
            .iter()
            .map(|id| to_sample(&self.graph, *id))
            .collect()
    }
}

/// Walks a [`SplitModule`] in dispatch order and records what each stage receives.
pub struct BoundaryEvaluator<'a, P: ShapePropagator + ?Sized> {
    graph: &'a Graph,
    propagator: &'a P,
}

impl<'a, P: ShapePropagator + ?Sized> BoundaryEvaluator<'a, P> {
    /// `graph` is the original graph the module was extracted from; attribute reads take
    /// their metadata from it.
    pub fn new(graph: &'a Graph, propagator: &'a P) -> Self {
        Self { graph, propagator }
    }

    pub fn evaluate(
        &self,
        module: &SplitModule,
        sample_inputs: &[SampleInput],
    ) -> Result<Vec<StageBoundary>, PropagationError> {
        if module.inputs.len() != sample_inputs.len() {
            return Err(PropagationError::InputCount {
                graph: module.name.clone(),
                expected: module.inputs.len(),
                found: sample_inputs.len(),
            });
        }

        let mut boundaries: Vec<StageBoundary> = Vec::with_capacity(module.stages.len());
        for stage in &module.stages {
            let inputs = stage
                .inputs
                .iter()
                .map(|source| self.resolve(module, sample_inputs, &boundaries, *source))
                .collect::<Result<Vec<_>, _>>()?;
            let mut graph = stage.graph.clone();
            self.propagator.propagate(&mut graph, &inputs)?;
            boundaries.push(StageBoundary { inputs, graph });
        }
        Ok(boundaries)
    }

    fn resolve(
        &self,
        module: &SplitModule,
        sample_inputs: &[SampleInput],
        done: &[StageBoundary],
        source: ValueSource,
    ) -> Result<SampleInput, PropagationError> {
        match source {
            ValueSource::Graph(id) => {
                if let Some(position) = module.inputs.iter().position(|input| *input == id) {
                    return Ok(sample_inputs[position].clone());
                }
                Ok(to_sample(self.graph, id))
            }
            ValueSource::Stage { stage, output } => done
                .get(stage)
                .and_then(|boundary| boundary.outputs().get(output).cloned())
                .ok_or_else(|| {
                    PropagationError::Message(format!(
                        "stage #{stage} output {output} is read before it is produced"
                    ))
                }),
        }
    }
}

fn to_sample(graph: &Graph, id: NodeId) -> SampleInput {
    match &graph.node(id).meta {
        Some(meta) => SampleInput::Tensor(meta.clone()),
        None => SampleInput::Opaque,
    }
}

type DTypeSignature = Vec<Option<DType>>;

fn render_signature(signature: &DTypeSignature) -> String {
    let parts: Vec<String> = signature
        .iter()
        .map(|dtype| match dtype {
            Some(dtype) => dtype.to_string(),
            None => "None".to_string(),
        })
        .collect();
    format!("({})", parts.join(", "))
}

/// Lists which operator targets (and input dtype combinations) the accelerator supports.
pub fn node_support_report<S: OperatorSupport + ?Sized>(
    graph: &Graph,
    support: &S,
    aliases: &TargetAliases,
) -> String {
    let mut supported: BTreeMap<String, BTreeSet<DTypeSignature>> = BTreeMap::new();
    let mut unsupported: BTreeMap<String, BTreeSet<DTypeSignature>> = BTreeMap::new();

    for id in graph.callable_ids() {
        let target = node_target(graph, id, aliases).to_string();
        let mut signature: DTypeSignature = graph
            .node(id)
            .inputs
            .iter()
            .map(|input| graph.node(*input).meta.as_ref().map(|meta| meta.dtype))
            .collect();
        while matches!(signature.last(), Some(None)) {
            signature.pop();
        }

        let table = if support.is_node_supported(graph, id) {
            &mut supported
        } else {
            &mut unsupported
        };
        table.entry(target).or_default().insert(signature);
    }

    let mut report = String::from("\nSupported node types in the model:\n");
    for (target, signatures) in &supported {
        for signature in signatures {
            report.push_str(&format!("{target}: {}\n", render_signature(signature)));
        }
    }
    report.push_str("\nUnsupported node types in the model:\n");
    for (target, signatures) in &unsupported {
        for signature in signatures {
            report.push_str(&format!("{target}: {}\n", render_signature(signature)));
        }
    }
    report
}

/// Per-stage transfer volumes, throughput bounds and lowering results for every
/// accelerator stage of `module`.
pub fn stage_transfer_report<L: Lowering + ?Sized>(
    module: &SplitModule,
    boundaries: &[StageBoundary],
    lowering: &L,
    options: &PreviewOptions,
) -> String {
    let mut report = String::new();
    let mut max_qps = options.bus_bandwidth;
    let mut bottleneck = String::new();

    for (index, stage) in module.accelerator_stages() {
        let Some(boundary) = boundaries.get(index) else {
            continue;
        };
        let name = stage.name();
        report.push_str(&format!("\nProcessing accelerator stage {name}\n"));

        let mut input_bytes = 0usize;
        let mut output_bytes = 0usize;
        report.push_str("Checking inputs...\n");
        for id in boundary.graph.placeholders() {
            let node = boundary.graph.node(id);
            match &node.meta {
                Some(meta) => input_bytes += meta.size_in_bytes(),
                None => report.push_str(&format!(
                    "Input {} is not a tensor, this might cause problems during lowering!\n",
                    node.name
                )),
            }
        }

        report.push_str("Checking outputs...\n");
        if let Some(output) = boundary.graph.output() {
            for id in &boundary.graph.node(output).inputs {
                let node = boundary.graph.node(*id);
                match &node.meta {
                    Some(meta) => output_bytes += meta.size_in_bytes(),
                    None => report.push_str(&format!(
                        "Output {} is not a tensor, this might cause problems during lowering!\n",
                        node.name
                    )),
                }
            }
        }

        let qps = options.bus_bandwidth / input_bytes.max(output_bytes).max(1) as f64;
        report.push_str(&format!(
            "Total input size in bytes is {input_bytes}, total output size in bytes is \
             {output_bytes}, theoretical max qps (bounded by bus bandwidth) for this stage is {qps}.\n"
        ));
        if qps < max_qps {
            max_qps = qps;
            bottleneck = name.clone();
        }

        let lowered = match lowering.lower(stage, &boundary.inputs) {
            Ok(lowered) => lowered,
            Err(err) => {
                log::debug!("lowering {name} failed: {err:#}");
                report.push_str("Run into an error during lowering!\n");
                report.push_str(&lowering.find_culprit(stage, &boundary.inputs));
                report.push('\n');
                continue;
            }
        };
        match lowered.run(&boundary.inputs) {
            Ok(()) => report.push_str("Lowering and running succeed!\n"),
            Err(err) => {
                log::debug!("running {name} failed: {err:#}");
                report.push_str("Run into an error during inference!\n");
                report.push_str(&lowering.find_culprit(stage, &boundary.inputs));
                report.push('\n');
            }
        }
    }

    report.push_str(&format!(
        "\nTheoretical max qps (bounded by bus bandwidth) for this model is {max_qps}, \
         bottleneck is stage {bottleneck}."
    ));
    report
}

/// Headline of a split preview section: how many subgraphs of each kind exist.
pub(crate) fn describe_counts(label: &str, stages: &[(bool, usize)]) -> String {
    let accelerator = stages.iter().filter(|(is_acc, _)| *is_acc).count();
    format!(
        "{label}, total {} subgraphs are created: {accelerator} accelerator subgraphs and {} host subgraphs.\n",
        stages.len(),
        stages.len() - accelerator
    )
}

