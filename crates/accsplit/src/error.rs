use thiserror::Error;

use crate::extract::ExtractError;
use crate::shape_prop::PropagationError;
use crate::tag::SubgraphTag;

/// Errors surfaced by the splitter pipeline.
///
/// `EmptySubgraph`, `NoSubgraphs` and `AlreadyTagged` are internal-consistency failures: they
/// indicate broken frontier seeding or dependency bookkeeping rather than bad user input.
#[derive(Debug, Error)]
pub enum SplitterError {
    #[error("subgraph can't be empty")]
    EmptySubgraph,
    #[error("couldn't create subgraphs")]
    NoSubgraphs,
    #[error("node `{node}` was already tagged")]
    AlreadyTagged { node: String },
    #[error("`{0}` is not a subgraph tag")]
    UnknownTag(String),
    #[error("subgraph `{0}` is not an accelerator subgraph")]
    NotAcceleratorTag(SubgraphTag),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Propagation(#[from] PropagationError),
}
