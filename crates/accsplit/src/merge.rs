use crate::partition::Subgraph;

/// Folds accelerator subgraphs smaller than `min_acc_module_size` into their neighbours.
///
/// A small accelerator subgraph is appended to the previous entry, whatever its kind; with
/// no previous entry it is relabelled host. Adjacent host subgraphs are coalesced. One
/// left-to-right pass, not repeated.
pub fn remove_small_acc_subgraphs(
    subgraphs: Vec<Subgraph>,
    min_acc_module_size: usize,
) -> Vec<Subgraph> {
    let mut result: Vec<Subgraph> = Vec::with_capacity(subgraphs.len());
    for mut subgraph in subgraphs {
        if subgraph.is_accelerator {
            if subgraph.len() >= min_acc_module_size {
                result.push(subgraph);
            } else if let Some(previous) = result.last_mut() {
                log::debug!(
                    "merging accelerator subgraph of {} node(s) into the previous subgraph",
                    subgraph.len()
                );
                previous.nodes.append(&mut subgraph.nodes);
            } else {
                log::debug!(
                    "relabelling leading accelerator subgraph of {} node(s) as host",
                    subgraph.len()
                );
                subgraph.is_accelerator = false;
                result.push(subgraph);
            }
        } else {
            match result.last_mut() {
                Some(previous) if !previous.is_accelerator => {
                    previous.nodes.append(&mut subgraph.nodes);
                }
                _ => result.push(subgraph),
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;

    fn sg(is_accelerator: bool, ids: &[u32]) -> Subgraph {
        Subgraph::new(is_accelerator, ids.iter().map(|&id| NodeId(id)).collect())
    }

    #[test]
    fn small_middle_accelerator_joins_previous_host_and_hosts_coalesce() {
        let merged = remove_small_acc_subgraphs(
            vec![
                sg(false, &[0]),
                sg(true, &[1]),
                sg(false, &[2]),
                sg(true, &[3, 4]),
            ],
            2,
        );
        assert_eq!(merged, vec![sg(false, &[0, 1, 2]), sg(true, &[3, 4])]);
    }

    #[test]
    fn small_leading_accelerator_becomes_host() {
        let merged = remove_small_acc_subgraphs(vec![sg(true, &[0, 1]), sg(false, &[2])], 3);
        assert_eq!(merged, vec![sg(false, &[0, 1, 2])]);
    }

    #[test]
    fn small_accelerator_after_accelerator_is_absorbed() {
        let merged = remove_small_acc_subgraphs(
            vec![sg(true, &[0, 1, 2]), sg(true, &[3]), sg(false, &[4])],
            3,
        );
        assert_eq!(merged, vec![sg(true, &[0, 1, 2, 3]), sg(false, &[4])]);
    }

    #[test]
    fn threshold_of_one_keeps_everything() {
        let input = vec![sg(true, &[0]), sg(false, &[1]), sg(true, &[2])];
        assert_eq!(remove_small_acc_subgraphs(input.clone(), 1), input);
    }
}
