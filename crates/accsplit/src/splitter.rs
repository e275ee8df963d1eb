//! The splitter entry point: classification, fusion and dependencies are computed once at
//! construction; partitioning, merging, tagging and extraction run on demand.

use serde::Serialize;

use crate::classify::AcceleratorNodeFinder;
use crate::deps::DependencyMap;
use crate::error::SplitterError;
use crate::extract::{Extractor, SplitModule, TagExtractor};
use crate::fusion::{FusionMap, FusionResolver, NonTensorFusionFinder};
use crate::graph::{Graph, NodeList, NodeSet};
use crate::merge;
use crate::partition::{self, Subgraph};
use crate::preview::{self, BoundaryEvaluator, Lowering, PreviewOptions};
use crate::settings::SplitterSettings;
use crate::shape_prop::{MetaPropagation, SampleInput, ShapePropagator};
use crate::support::{OperatorSupport, TargetAliases};
use crate::tag::{self, SubgraphTag};

/// External pieces the splitter delegates to.
pub struct Collaborators {
    pub propagator: Box<dyn ShapePropagator>,
    pub fusion: Box<dyn FusionResolver>,
    pub extractor: Box<dyn Extractor>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            propagator: Box::new(MetaPropagation::new()),
            fusion: Box::new(NonTensorFusionFinder),
            extractor: Box::new(TagExtractor),
        }
    }
}

/// One tagged subgraph, by node name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedSubgraph {
    pub tag: String,
    pub is_accelerator: bool,
    pub nodes: Vec<String>,
}

/// Current tag assignment of the graph, in subgraph order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitPlan {
    pub graph: String,
    pub subgraphs: Vec<PlannedSubgraph>,
}

impl SplitPlan {
    pub fn subgraph(&self, tag: &str) -> Option<&PlannedSubgraph> {
        self.subgraphs.iter().find(|subgraph| subgraph.tag == tag)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub struct Splitter<S: OperatorSupport> {
    graph: Graph,
    sample_inputs: Vec<SampleInput>,
    support: S,
    settings: SplitterSettings,
    aliases: TargetAliases,
    collaborators: Collaborators,
    acc_nodes: NodeSet,
    fusions: FusionMap,
    deps: DependencyMap,
    tags: Vec<SubgraphTag>,
}

impl<S: OperatorSupport> Splitter<S> {
    pub fn new(
        graph: Graph,
        sample_inputs: Vec<SampleInput>,
        support: S,
        settings: SplitterSettings,
    ) -> Result<Self, SplitterError> {
        Self::with_collaborators(graph, sample_inputs, support, settings, Collaborators::default())
    }

    pub fn with_collaborators(
        mut graph: Graph,
        sample_inputs: Vec<SampleInput>,
        support: S,
        settings: SplitterSettings,
        collaborators: Collaborators,
    ) -> Result<Self, SplitterError> {
        collaborators.propagator.propagate(&mut graph, &sample_inputs)?;

        let mut acc_nodes =
            AcceleratorNodeFinder::new(&graph, &support, settings.allow_non_tensor).find();
        let fusions = if settings.skip_fusion {
            FusionMap::new()
        } else {
            collaborators.fusion.resolve(&graph, &mut acc_nodes)
        };
        let deps = DependencyMap::build_with_fusions(&graph, &fusions);

        log::debug!(
            "graph `{}`: {} accelerator-eligible node(s), {} fusion group(s)",
            graph.name,
            acc_nodes.len(),
            fusions.groups().count()
        );

        Ok(Self {
            graph,
            sample_inputs,
            support,
            settings,
            aliases: TargetAliases::new(),
            collaborators,
            acc_nodes,
            fusions,
            deps,
            tags: Vec::new(),
        })
    }

    /// Canonical target names used by [`Splitter::node_support_preview`].
    pub fn with_target_aliases(mut self, aliases: TargetAliases) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn settings(&self) -> &SplitterSettings {
        &self.settings
    }

    pub fn acc_nodes(&self) -> &NodeSet {
        &self.acc_nodes
    }

    pub fn fusions(&self) -> &FusionMap {
        &self.fusions
    }

    pub fn deps(&self) -> &DependencyMap {
        &self.deps
    }

    pub fn tags(&self) -> &[SubgraphTag] {
        &self.tags
    }

    /// Partition, merge, tag and extract.
    pub fn call(&mut self) -> Result<SplitModule, SplitterError> {
        let subgraphs = self.put_nodes_into_subgraphs()?;
        let subgraphs = self.remove_small_acc_subgraphs(subgraphs);
        self.tag(&subgraphs)?;
        self.split(false)
    }

    pub fn put_nodes_into_subgraphs(&self) -> Result<Vec<Subgraph>, SplitterError> {
        partition::put_nodes_into_subgraphs(&self.graph, &self.acc_nodes, &self.deps, &self.fusions)
    }

    pub fn remove_small_acc_subgraphs(&self, subgraphs: Vec<Subgraph>) -> Vec<Subgraph> {
        merge::remove_small_acc_subgraphs(subgraphs, self.settings.min_acc_module_size)
    }

    pub fn tag(&mut self, subgraphs: &[Subgraph]) -> Result<&[SubgraphTag], SplitterError> {
        self.tags = tag::tag_subgraphs(&mut self.graph, subgraphs)?;
        Ok(&self.tags)
    }

    /// Extracts the tagged graph. With `remove_tag`, tags are cleared afterwards so the graph
    /// can be split again.
    pub fn split(&mut self, remove_tag: bool) -> Result<SplitModule, SplitterError> {
        let module = self.collaborators.extractor.extract(&self.graph, &self.tags)?;
        if remove_tag {
            self.clear_tags();
        }
        Ok(module)
    }

    pub fn clear_tags(&mut self) {
        self.graph.clear_tags();
        self.tags.clear();
    }

    /// Grows the accelerator subgraph `tag` upwards; see [`crate::extend::extend_acc_subgraph`].
    pub fn extend_acc_subgraph(&mut self, tag: SubgraphTag) -> Result<NodeList, SplitterError> {
        crate::extend::extend_acc_subgraph(&mut self.graph, &self.acc_nodes, &self.fusions, tag)
    }

    pub fn plan(&self) -> SplitPlan {
        let subgraphs = self
            .tags
            .iter()
            .map(|tag| PlannedSubgraph {
                tag: tag.to_string(),
                is_accelerator: tag.is_accelerator,
                nodes: self
                    .graph
                    .iter()
                    .filter(|(_, node)| node.tag == Some(*tag))
                    .map(|(_, node)| node.name.clone())
                    .collect(),
            })
            .collect();
        SplitPlan {
            graph: self.graph.name.clone(),
            subgraphs,
        }
    }

    pub fn node_support_preview(&self) -> String {
        let report = preview::node_support_report(&self.graph, &self.support, &self.aliases);
        log::info!("{report}");
        report
    }

    /// Runs the pipeline without keeping tags and reports, per accelerator stage, the data
    /// crossing its boundary, the resulting throughput bound and whether `lowering` accepts it.
    pub fn split_preview<L: Lowering + ?Sized>(
        &mut self,
        lowering: &L,
        options: &PreviewOptions,
    ) -> Result<String, SplitterError> {
        let subgraphs = self.put_nodes_into_subgraphs()?;
        let mut report = preview::describe_counts(
            "Before removing small accelerator subgraphs",
            &shape_of(&subgraphs),
        );

        let subgraphs = self.remove_small_acc_subgraphs(subgraphs);
        report.push_str(&preview::describe_counts(
            "After removing small accelerator subgraphs",
            &shape_of(&subgraphs),
        ));
        for (index, subgraph) in subgraphs.iter().enumerate() {
            let tag = SubgraphTag {
                index,
                is_accelerator: subgraph.is_accelerator,
            };
            report.push_str(&format!("{tag}: {} node(s)\n", subgraph.len()));
        }

        self.tag(&subgraphs)?;
        let module = self.split(true)?;

        let evaluator = BoundaryEvaluator::new(&self.graph, self.collaborators.propagator.as_ref());
        let boundaries = evaluator.evaluate(&module, &self.sample_inputs)?;
        report.push_str(&preview::stage_transfer_report(
            &module,
            &boundaries,
            lowering,
            options,
        ));

        log::info!("{report}");
        Ok(report)
    }
}

fn shape_of(subgraphs: &[Subgraph]) -> Vec<(bool, usize)> {
    subgraphs
        .iter()
        .map(|subgraph| (subgraph.is_accelerator, subgraph.len()))
        .collect()
}
