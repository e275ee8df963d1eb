
use accsplit::extract::Stage;
use accsplit::preview::LoweredStage;
use accsplit::{
    graph, DType, IdentityLowering, Lowering, OperatorSupportTable, PreviewOptions, SampleInput,
    Splitter, SplitterSettings, TargetAliases, TensorMeta,
};
use split_support::{f32_input, table};

const SIN_COS: &str = r#"
graph @sin_cos(%a: tensor<f32, 4>) {
  %b = call sin(%a) : tensor<f32, 4>
  %c = call cos(%a) : tensor<f32, 4>
  %d = call add(%b, %c) : tensor<f32, 4>
  return %d
}
"#;

fn sin_cos() -> Splitter<OperatorSupportTable> {
    Splitter::new(
        graph!(SIN_COS),
        vec![f32_input(&[4])],
        table(&["sin", "cos"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds")
}

struct RejectingLowering;

impl Lowering for RejectingLowering {
    fn lower(&self, stage: &Stage, _inputs: &[SampleInput]) -> anyhow::Result<Box<dyn LoweredStage>> {
        anyhow::bail!("no kernel for {}", stage.name())
    }

    fn find_culprit(&self, stage: &Stage, _inputs: &[SampleInput]) -> String {
        format!("culprit found in {}", stage.name())
    }
}

struct FailingRun;

struct Broken;

impl LoweredStage for Broken {
    fn run(&self, _inputs: &[SampleInput]) -> anyhow::Result<()> {
        anyhow::bail!("device lost")
    }
}

impl Lowering for FailingRun {
    fn lower(&self, _stage: &Stage, _inputs: &[SampleInput]) -> anyhow::Result<Box<dyn LoweredStage>> {
        Ok(Box::new(Broken))
    }
}

#[test]
fn node_support_preview_groups_by_canonical_target_and_dtypes() {
    let aliases = TargetAliases::new().alias("aten.sin", "sin");
    let splitter = Splitter::new(
        graph!(
            r#"
graph @ops(%x: tensor<f32, 4>, %i: tensor<i64, 4>, %n: opaque) {
  %a = call aten.sin(%x) : tensor<f32, 4>
  %b = call sin(%i) : tensor<f32, 4>
  %c = call pow(%a, %n) : tensor<f32, 4>
  %d = call add(%a, %b) : tensor<f32, 4>
  return %c, %d
}
"#
        ),
        vec![
            f32_input(&[4]),
            TensorMeta::new(DType::I64, vec![4]).into(),
            SampleInput::Opaque,
        ],
        OperatorSupportTable::new(aliases.clone()).allow_all(["sin", "add"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds")
    .with_target_aliases(aliases);

    assert_eq!(
        splitter.node_support_preview(),
        "\nSupported node types in the model:\n\
         add: (f32, f32)\n\
         sin: (i64)\n\
         sin: (f32)\n\
         \nUnsupported node types in the model:\n\
         pow: (f32)\n"
    );
}

#[test]
fn split_preview_reports_counts_transfer_sizes_and_bottleneck() {
    let mut splitter = sin_cos();
    let report = splitter
        .split_preview(&IdentityLowering, &PreviewOptions::default())
        .expect("preview runs");

    assert!(report.contains(
        "Before removing small accelerator subgraphs, total 2 subgraphs are created: \
         1 accelerator subgraphs and 1 host subgraphs."
    ));
    assert!(report.contains("run_on_accelerator_0: 2 node(s)\nrun_on_host_1: 1 node(s)\n"));
    assert!(report.contains("Processing accelerator stage run_on_accelerator_0"));
    assert!(report.contains(
        "Total input size in bytes is 16, total output size in bytes is 32, theoretical max qps \
         (bounded by bus bandwidth) for this stage is 3355443200."
    ));
    assert!(report.contains("Lowering and running succeed!"));
    assert!(report.ends_with(
        "for this model is 3355443200, bottleneck is stage run_on_accelerator_0."
    ));
    assert!(!report.contains("run_on_host_1\n"));

    assert!(splitter.graph().iter().all(|(_, node)| node.tag.is_none()));
    assert!(splitter.tags().is_empty());
}

#[test]
fn split_preview_uses_configured_bandwidth() {
    let mut splitter = sin_cos();
    let report = splitter
        .split_preview(
            &IdentityLowering,
            &PreviewOptions {
                bus_bandwidth: 1000.0,
            },
        )
        .expect("preview runs");
    assert!(report.contains("for this stage is 31.25."));
}

#[test]
fn split_preview_can_run_repeatedly() {
    let mut splitter = sin_cos();
    let first = splitter
        .split_preview(&IdentityLowering, &PreviewOptions::default())
        .expect("first preview");
    let second = splitter
        .split_preview(&IdentityLowering, &PreviewOptions::default())
        .expect("second preview");
    assert_eq!(first, second);
}

#[test]
fn lowering_failure_is_reported_with_culprit() {
    let mut splitter = sin_cos();
    let report = splitter
        .split_preview(&RejectingLowering, &PreviewOptions::default())
        .expect("preview runs");
    assert!(report.contains("Run into an error during lowering!\nculprit found in run_on_accelerator_0"));
    assert!(!report.contains("Lowering and running succeed!"));
}

#[test]
fn inference_failure_falls_back_to_default_culprit() {
    let mut splitter = sin_cos();
    let report = splitter
        .split_preview(&FailingRun, &PreviewOptions::default())
        .expect("preview runs");
    assert!(report.contains(
        "Run into an error during inference!\n\
         Unable to find a culprit because find_culprit() is not implemented."
    ));
}

#[test]
fn non_tensor_stage_inputs_are_flagged() {
    let mut splitter = Splitter::new(
        graph!(
            r#"
graph @scaled(%x: tensor<f32, 4>, %n: opaque) {
  %y = call scale(%x, %n) : tensor<f32, 4>
  %z = call relu(%y) : tensor<f32, 4>
  return %z
}
"#
        ),
        vec![f32_input(&[4]), SampleInput::Opaque],
        table(&["scale", "relu"]),
        SplitterSettings::default(),
    )
    .expect("splitter builds");
    let report = splitter
        .split_preview(&IdentityLowering, &PreviewOptions::default())
        .expect("preview runs");
    assert!(report.contains("Input n is not a tensor, this might cause problems during lowering!"));
    assert!(report.contains("Total input size in bytes is 16, total output size in bytes is 16"));
    assert!(report.contains("Lowering and running succeed!"));
}
