
use accsplit::extract::ValueSource;
use accsplit::graph::Graph;
use accsplit::shape_prop::{PropagationError, SampleInput};
use accsplit::{
    graph, Collaborators, NodeId, Splitter, SplitterError, SplitterSettings, SubgraphTag,
};
use split_support::{
    assert_boundary_safe, assert_complete, assert_fusion_cohesion, assert_order_valid, f32_input,
    names, table,
};

const SIN_COS: &str = r#"
graph @sin_cos(%a: tensor<f32, 4>) {
  %b = call sin(%a) : tensor<f32, 4>
  %c = call cos(%a) : tensor<f32, 4>
  %d = call add(%b, %c) : tensor<f32, 4>
  return %d
}
"#;

// `%s` is a non-tensor shape flowing through a view/reshape pair; those nodes have to stay
// together on the accelerator.
const SHAPE_FUSION: &str = r#"
graph @shape_fusion(%x: tensor<f32, 2x8>) {
  %s = call shape(%x) : opaque
  %v = call view(%x, %s) : tensor<f32, 16>
  %w = call relu(%v) : tensor<f32, 16>
  %u = call reshape(%w, %s) : tensor<f32, 2x8>
  %o = call neg(%u) : tensor<f32, 2x8>
  %h = call log(%o) : tensor<f32, 2x8>
  %t = call tanh(%h) : tensor<f32, 2x8>
  return %t
}
"#;

// `%d` is a host starter (it reads `%x`) but cannot run before `%a`.
const RESIDUAL: &str = r#"
graph @residual(%x: tensor<f32, 4>) {
  %a = call sin(%x) : tensor<f32, 4>
  %d = call add(%x, %a) : tensor<f32, 4>
  return %d
}
"#;

const MIXED: &str = r#"
graph @mixed(%x: tensor<f32, 8>, %y: tensor<f32, 8>) {
  %w = get_attr weight : tensor<f32, 8>
  %a = call mul(%x, %w) : tensor<f32, 8>
  %b = call sort(%y) : tensor<f32, 8>
  %c = call add(%a, %b) : tensor<f32, 8>
  %d = call relu(%c) : tensor<f32, 8>
  %e = call topk(%d) : tensor<f32, 8>
  %f = call sub(%e, %a) : tensor<f32, 8>
  %g = call exp(%f) : tensor<f32, 8>
  %z = call zeros() : tensor<f32, 8>
  %h = call add(%g, %z) : tensor<f32, 8>
  return %h, %b
}
"#;

fn sin_cos_splitter(min_acc_module_size: usize) -> Splitter<accsplit::OperatorSupportTable> {
    Splitter::new(
        graph!(SIN_COS),
        vec![f32_input(&[4])],
        table(&["sin", "cos"]),
        SplitterSettings::default().with_min_acc_module_size(min_acc_module_size),
    )
    .expect("splitter builds")
}

fn tag_of(graph: &Graph, name: &str) -> Option<SubgraphTag> {
    graph.node(split_support::id(graph, name)).tag
}

#[test]
fn sin_cos_splits_into_accelerator_then_host() {
    let mut splitter = sin_cos_splitter(1);
    let module = splitter.call().expect("split succeeds");

    let graph = splitter.graph();
    assert_eq!(tag_of(graph, "b"), Some(SubgraphTag::accelerator(0)));
    assert_eq!(tag_of(graph, "c"), Some(SubgraphTag::accelerator(0)));
    assert_eq!(tag_of(graph, "d"), Some(SubgraphTag::host(1)));

    let plan = splitter.plan();
    assert_eq!(plan.subgraphs.len(), 2);
    assert_eq!(
        plan.subgraph("run_on_accelerator_0").expect("acc stage").nodes,
        vec!["b", "c"]
    );
    assert_eq!(
        plan.subgraph("run_on_host_1").expect("host stage").nodes,
        vec!["d"]
    );

    assert_eq!(module.stages.len(), 2);
    let acc = &module.stages[0];
    assert_eq!(acc.name(), "run_on_accelerator_0");
    assert_eq!(acc.inputs, vec![ValueSource::Graph(split_support::id(graph, "a"))]);
    assert_eq!(graph.names_of(&acc.outputs), vec!["b", "c"]);

    let host = &module.stages[1];
    assert_eq!(
        host.inputs,
        vec![
            ValueSource::Stage { stage: 0, output: 0 },
            ValueSource::Stage { stage: 0, output: 1 },
        ]
    );
    assert_eq!(module.outputs, vec![ValueSource::Stage { stage: 1, output: 0 }]);
}

#[test]
fn small_accelerator_subgraph_folds_into_host() {
    let mut splitter = sin_cos_splitter(3);
    splitter.call().expect("split succeeds");

    let plan = splitter.plan();
    assert_eq!(plan.subgraphs.len(), 1);
    let host = &plan.subgraphs[0];
    assert_eq!(host.tag, "run_on_host_0");
    assert!(!host.is_accelerator);
    assert_eq!(host.nodes, vec!["b", "c", "d"]);
}

#[test]
fn partitions_are_complete_and_ordered() {
    let cases: &[(&str, &[&str])] = &[
        (SIN_COS, &["sin", "cos"]),
        (SIN_COS, &["add"]),
        (SHAPE_FUSION, &["shape", "view", "relu", "reshape", "neg", "tanh"]),
        (MIXED, &["mul", "add", "relu", "sub", "exp", "zeros"]),
        (MIXED, &["sort", "topk"]),
        (MIXED, &[]),
        (RESIDUAL, &["sin"]),
        (RESIDUAL, &["add"]),
    ];
    for (src, supported) in cases {
        let graph = graph!(src);
        let inputs = vec![f32_input(&[8]); graph.placeholders().len()];
        let splitter = Splitter::new(
            graph,
            inputs,
            table(supported),
            SplitterSettings::default(),
        )
        .expect("splitter builds");
        let subgraphs = splitter.put_nodes_into_subgraphs().expect("partitions");
        assert_complete(splitter.graph(), &subgraphs);
        assert_order_valid(splitter.graph(), &subgraphs);
        assert_boundary_safe(splitter.graph(), splitter.acc_nodes());
        assert!(subgraphs
            .windows(2)
            .all(|pair| pair[0].is_accelerator != pair[1].is_accelerator));
    }
}

#[test]
fn residual_starts_on_the_accelerator_when_host_starters_wait() {
    let splitter = Splitter::new(
        graph!(RESIDUAL),
        vec![f32_input(&[4])],
        table(&["sin"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds");
    let subgraphs = splitter.put_nodes_into_subgraphs().expect("partitions");
    assert_eq!(subgraphs.len(), 2);
    assert!(subgraphs[0].is_accelerator);
    assert_eq!(names(splitter.graph(), &subgraphs[0]), vec!["a"]);
    assert!(!subgraphs[1].is_accelerator);
    assert_eq!(names(splitter.graph(), &subgraphs[1]), vec!["d"]);
}

#[test]
fn graph_without_callable_nodes_has_no_subgraphs() {
    let splitter = Splitter::new(
        graph!("graph @passthrough(%x: tensor<f32, 4>) {\n  return %x\n}"),
        vec![f32_input(&[4])],
        table(&["sin"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds");
    let err = splitter.put_nodes_into_subgraphs().unwrap_err();
    assert!(matches!(err, SplitterError::NoSubgraphs));
}

#[test]
fn zero_input_nodes_are_scheduled() {
    let splitter = Splitter::new(
        graph!(MIXED),
        vec![f32_input(&[8]), f32_input(&[8])],
        table(&["mul", "add", "relu", "sub", "exp", "zeros"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds");
    let subgraphs = splitter.put_nodes_into_subgraphs().expect("partitions");
    let scheduled: Vec<String> = subgraphs
        .iter()
        .flat_map(|subgraph| names(splitter.graph(), subgraph))
        .collect();
    assert!(scheduled.contains(&"z".to_string()));
}

#[test]
fn merge_threshold_holds_after_merging() {
    for min in 1..=4 {
        let splitter = Splitter::new(
            graph!(MIXED),
            vec![f32_input(&[8]), f32_input(&[8])],
            table(&["mul", "add", "relu", "sub", "exp", "zeros"]),
            SplitterSettings::default().with_min_acc_module_size(min),
        )
        .expect("splitter builds");
        let subgraphs = splitter
            .remove_small_acc_subgraphs(splitter.put_nodes_into_subgraphs().expect("partitions"));
        assert_complete(splitter.graph(), &subgraphs);
        if subgraphs.len() > 1 {
            for subgraph in subgraphs.iter().filter(|subgraph| subgraph.is_accelerator) {
                assert!(subgraph.len() >= min, "min {min}: {subgraphs:?}");
            }
        }
        assert!(subgraphs
            .windows(2)
            .all(|pair| pair[0].is_accelerator || pair[1].is_accelerator));
    }
}

#[test]
fn fusion_groups_share_a_tag() {
    let mut splitter = Splitter::new(
        graph!(SHAPE_FUSION),
        vec![f32_input(&[2, 8])],
        table(&["shape", "view", "relu", "reshape", "neg", "tanh"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds");
    assert!(!splitter.fusions().is_empty());

    splitter.call().expect("split succeeds");
    assert_fusion_cohesion(splitter.graph(), splitter.fusions());

    let plan = splitter.plan();
    let tags: Vec<&str> = plan
        .subgraphs
        .iter()
        .map(|subgraph| subgraph.tag.as_str())
        .collect();
    assert_eq!(
        tags,
        vec!["run_on_accelerator_0", "run_on_host_1", "run_on_accelerator_2"]
    );
    assert_eq!(plan.subgraphs[0].nodes, vec!["s", "v", "w", "u", "o"]);
    assert_eq!(plan.subgraphs[1].nodes, vec!["h"]);
    assert_eq!(plan.subgraphs[2].nodes, vec!["t"]);
}

#[test]
fn skip_fusion_leaves_no_groups() {
    let splitter = Splitter::new(
        graph!(SHAPE_FUSION),
        vec![f32_input(&[2, 8])],
        table(&["shape", "view", "relu", "reshape", "neg", "tanh"]),
        SplitterSettings::default().with_skip_fusion(true),
    )
    .expect("splitter builds");
    assert!(splitter.fusions().is_empty());
}

#[test]
fn non_tensor_producer_feeding_host_moves_to_host() {
    // `reshape` is unsupported, so the shape it consumes cannot be produced on the accelerator.
    let splitter = Splitter::new(
        graph!(SHAPE_FUSION),
        vec![f32_input(&[2, 8])],
        table(&["shape", "view", "relu", "neg", "tanh"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds");
    let acc: Vec<String> = splitter.graph().names_of(splitter.acc_nodes());
    assert!(!acc.contains(&"s".to_string()));
    assert!(!acc.contains(&"v".to_string()));
    assert_boundary_safe(splitter.graph(), splitter.acc_nodes());

    let allowed = Splitter::new(
        graph!(SHAPE_FUSION),
        vec![f32_input(&[2, 8])],
        table(&["shape", "view", "relu", "neg", "tanh"]),
        SplitterSettings::default()
            .with_allow_non_tensor(true)
            .with_skip_fusion(true),
    )
    .expect("splitter builds");
    let acc: Vec<String> = allowed.graph().names_of(allowed.acc_nodes());
    assert!(acc.contains(&"s".to_string()));
}

#[test]
fn retagging_after_clear_is_identical() {
    let mut splitter = Splitter::new(
        graph!(MIXED),
        vec![f32_input(&[8]), f32_input(&[8])],
        table(&["mul", "add", "relu", "sub", "exp", "zeros"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds");
    splitter.call().expect("first split");
    let first = splitter.plan();

    splitter.clear_tags();
    assert!(splitter.plan().subgraphs.is_empty());
    splitter.call().expect("second split");
    assert_eq!(splitter.plan(), first);
}

#[test]
fn tagging_twice_is_an_error() {
    let mut splitter = sin_cos_splitter(1);
    splitter.call().expect("first split");
    let first = splitter.plan();
    let err = splitter.call().unwrap_err();
    assert!(matches!(err, SplitterError::AlreadyTagged { ref node } if node == "b"));

    // The failed attempt leaves the earlier assignment intact.
    assert_eq!(splitter.plan(), first);
    assert_eq!(splitter.split(false).expect("still extracts").stages.len(), 2);
}

#[test]
fn split_with_remove_tag_clears_annotations() {
    let mut splitter = sin_cos_splitter(1);
    let subgraphs = splitter.put_nodes_into_subgraphs().expect("partitions");
    splitter.tag(&subgraphs).expect("tags");
    let module = splitter.split(true).expect("extracts");
    assert_eq!(module.stages.len(), 2);
    assert!(splitter.graph().iter().all(|(_, node)| node.tag.is_none()));
    assert!(splitter.tags().is_empty());
}

#[test]
fn extracted_module_prints_driver_and_stages() {
    let mut splitter = sin_cos_splitter(1);
    let module = splitter.call().expect("split succeeds");
    let text = module.to_string();
    assert!(text.starts_with("split @sin_cos {"));
    assert!(text.contains("%run_on_accelerator_0 = run_on_accelerator_0(%a)"));
    assert!(text.contains(
        "%run_on_host_1 = run_on_host_1(%run_on_accelerator_0[0], %run_on_accelerator_0[1])"
    ));
    assert!(text.contains("return %run_on_host_1[0]"));
    assert!(text.contains("graph @run_on_host_1("));
}

#[test]
fn plan_serializes_to_json() {
    let mut splitter = sin_cos_splitter(1);
    splitter.call().expect("split succeeds");
    let json: serde_json::Value =
        serde_json::from_str(&splitter.plan().to_json().expect("serializes")).expect("json");
    assert_eq!(json["graph"], "sin_cos");
    assert_eq!(json["subgraphs"][0]["tag"], "run_on_accelerator_0");
    assert_eq!(json["subgraphs"][1]["nodes"][0], "d");
}

#[test]
fn wrong_sample_input_count_is_reported() {
    let err = Splitter::new(
        graph!(SIN_COS),
        Vec::new(),
        table(&["sin"]),
        SplitterSettings::default(),
    )
    .err()
    .expect("construction fails");
    assert!(matches!(
        err,
        SplitterError::Propagation(PropagationError::InputCount { expected: 1, found: 0, .. })
    ));
}

#[test]
fn custom_propagator_drives_classification() {
    // Strips metadata from `b`, which turns it into a non-tensor value feeding the host.
    let propagator = |graph: &mut Graph, _inputs: &[SampleInput]| -> Result<(), PropagationError> {
        let b = graph.find("b").ok_or_else(|| PropagationError::Message("no b".into()))?;
        graph.node_mut(b).meta = None;
        Ok(())
    };
    let collaborators = Collaborators {
        propagator: Box::new(propagator),
        ..Collaborators::default()
    };
    let splitter = Splitter::with_collaborators(
        graph!(SIN_COS),
        vec![f32_input(&[4])],
        |graph: &Graph, node: NodeId| graph.node(node).target != "add",
        SplitterSettings::default().with_skip_fusion(true),
        collaborators,
    )
    .expect("splitter builds");
    assert_eq!(splitter.graph().names_of(splitter.acc_nodes()), vec!["c"]);
}
