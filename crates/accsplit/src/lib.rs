pub mod classify;
pub mod deps;
pub mod error;
pub mod extend;
pub mod extract;
pub mod fusion;
pub mod graph;
pub mod merge;
pub mod partition;
pub mod preview;
pub mod settings;
pub mod shape_prop;
pub mod splitter;
pub mod support;
pub mod tag;
mod env;

pub use error::SplitterError;
pub use extract::{SplitModule, Stage, ValueSource};
pub use graph::{DType, Graph, NodeId, OpKind, TensorMeta};
pub use partition::Subgraph;
pub use preview::{IdentityLowering, Lowering, PreviewOptions};
pub use settings::SplitterSettings;
pub use shape_prop::SampleInput;
pub use splitter::{Collaborators, SplitPlan, Splitter};
pub use support::{OperatorSupport, OperatorSupportTable, TargetAliases};
pub use tag::SubgraphTag;
