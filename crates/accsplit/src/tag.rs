use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SplitterError;
use crate::graph::Graph;
use crate::partition::Subgraph;

const ACCELERATOR_PREFIX: &str = "run_on_accelerator_";
const HOST_PREFIX: &str = "run_on_host_";

/// Subgraph label written onto every node that belongs to a subgraph.
///
/// The index is the subgraph's position in the final ordered list, so tags compare in
/// execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SubgraphTag {
    pub index: usize,
    pub is_accelerator: bool,
}

impl SubgraphTag {
    pub fn accelerator(index: usize) -> Self {
        Self {
            index,
            is_accelerator: true,
        }
    }

    pub fn host(index: usize) -> Self {
        Self {
            index,
            is_accelerator: false,
        }
    }
}

impl fmt::Display for SubgraphTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.is_accelerator {
            ACCELERATOR_PREFIX
        } else {
            HOST_PREFIX
        };
        write!(f, "{prefix}{}", self.index)
    }
}

impl FromStr for SubgraphTag {
    type Err = SplitterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (is_accelerator, index) = if let Some(index) = s.strip_prefix(ACCELERATOR_PREFIX) {
            (true, index)
        } else if let Some(index) = s.strip_prefix(HOST_PREFIX) {
            (false, index)
        } else {
            return Err(SplitterError::UnknownTag(s.to_string()));
        };
        let index = index
            .parse::<usize>()
            .map_err(|_| SplitterError::UnknownTag(s.to_string()))?;
        Ok(Self {
            index,
            is_accelerator,
        })
    }
}

/// Writes one tag per subgraph onto its nodes, in list order, and returns the tags.
///
/// A node that already carries a tag, or that appears in two subgraphs, means subgraphs
/// overlap, which the partitioner must never produce. Nothing is written in that case.
pub fn tag_subgraphs(
    graph: &mut Graph,
    subgraphs: &[Subgraph],
) -> Result<Vec<SubgraphTag>, SplitterError> {
    let mut seen = HashSet::new();
    for &id in subgraphs.iter().flat_map(|subgraph| &subgraph.nodes) {
        let node = graph.node(id);
        if node.tag.is_some() || !seen.insert(id) {
            return Err(SplitterError::AlreadyTagged {
                node: node.name.clone(),
            });
        }
    }

    let mut tags = Vec::with_capacity(subgraphs.len());
    for (index, subgraph) in subgraphs.iter().enumerate() {
        let tag = SubgraphTag {
            index,
            is_accelerator: subgraph.is_accelerator,
        };
        for &id in &subgraph.nodes {
            graph.node_mut(id).tag = Some(tag);
        }
        tags.push(tag);
    }
    Ok(tags)
}
