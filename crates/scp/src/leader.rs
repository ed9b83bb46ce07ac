//! Deterministic leader election over slice trees.
//!
//! Each nomination round samples a neighbor set from the local slice tree:
//! every node in the tree is included with probability proportional to its
//! slice weight, compared against a uniform hash draw seeded by
//! `(slot, round, node)`. A second, independent draw provides the priority
//! used to break ties among neighbors. For a fixed `(slot, round)` every
//! correct node computes the same draws and therefore the same leader.

use sha2::{Digest, Sha256};

use crate::message::Slices;
use crate::{NodeId, SlotIndex};

/// Domain tag for the neighbor-sampling draw.
const NEIGHBOR_TAG: u8 = 1;
/// Domain tag for the priority draw.
const PRIORITY_TAG: u8 = 2;

/// A uniform `u64` draw from `(tag, slot, round, node)`.
fn hash_draw(tag: u8, slot: SlotIndex, round: u32, node: &NodeId) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update([tag]);
    hasher.update(slot.to_be_bytes());
    hasher.update(round.to_be_bytes());
    hasher.update(node.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// The fraction of the threshold a node represents at its nesting depth,
/// as a `(numerator, denominator)` pair.
///
/// A direct validator of a tree with threshold `k` and branch width `n`
/// weighs `k / n`; a node inside an inner set multiplies through each level.
/// Returns `(0, 1)` when the node does not appear in the tree.
fn node_frac(node: &NodeId, slices: &Slices) -> (u64, u64) {
    if slices.validators.iter().any(|v| v == node) {
        return (slices.threshold as u64, slices.branch_len() as u64);
    }
    for inner in &slices.inner_sets {
        let (num, denom) = node_frac(node, inner);
        if num > 0 {
            return (
                slices.threshold as u64 * num,
                slices.branch_len() as u64 * denom,
            );
        }
    }
    (0, 1)
}

/// A node's slice weight scaled to `0..=u64::MAX`.
pub fn node_weight(node: &NodeId, slices: &Slices) -> u64 {
    let (num, denom) = node_frac(node, slices);
    if num == 0 || denom == 0 {
        return 0;
    }
    if num >= denom {
        return u64::MAX;
    }
    ((num as u128 * u64::MAX as u128) / denom as u128) as u64
}

/// All nodes referenced anywhere in a slice tree, in tree order.
pub fn all_nodes(slices: &Slices) -> Vec<NodeId> {
    let mut nodes = slices.validators.clone();
    for inner in &slices.inner_sets {
        nodes.extend(all_nodes(inner));
    }
    nodes
}

/// The neighbor candidate set for `(slot, round)`.
///
/// Samples each node of the tree with probability `weight(node)`: the node is
/// a neighbor when its uniform draw falls below its scaled weight.
pub fn get_neighbors(slot: SlotIndex, round: u32, slices: &Slices) -> Vec<NodeId> {
    all_nodes(slices)
        .into_iter()
        .filter(|node| {
            let weight = node_weight(node, slices);
            hash_draw(NEIGHBOR_TAG, slot, round, node) < weight
        })
        .collect()
}

/// The tie-breaking priority of a node for `(slot, round)`.
pub fn get_priority(slot: SlotIndex, round: u32, node: &NodeId) -> u64 {
    hash_draw(PRIORITY_TAG, slot, round, node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn node_weight_full_threshold_is_max() {
        let slices = Slices::flat(3, nodes(&["A", "B", "C"]));
        assert_eq!(node_weight(&"A".to_string(), &slices), u64::MAX);
    }

    #[test]
    fn node_weight_absent_node_is_zero() {
        let slices = Slices::flat(2, nodes(&["A", "B", "C"]));
        assert_eq!(node_weight(&"Z".to_string(), &slices), 0);
    }

    #[test]
    fn node_weight_nested_multiplies_levels() {
        // 1 of { {1 of {A, B}}, {1 of {C, D}} }: A weighs (1*1)/(2*2) = 1/4
        let slices = Slices::nested(
            1,
            vec![],
            vec![
                Slices::flat(1, nodes(&["A", "B"])),
                Slices::flat(1, nodes(&["C", "D"])),
            ],
        );
        let weight = node_weight(&"A".to_string(), &slices);
        let quarter = u64::MAX / 4;
        assert!(weight.abs_diff(quarter) <= 4);
    }

    #[test]
    fn neighbors_are_deterministic() {
        let slices = Slices::flat(2, nodes(&["A", "B", "C", "D"]));
        let first = get_neighbors(9, 1, &slices);
        let second = get_neighbors(9, 1, &slices);
        assert_eq!(first, second);
    }

    #[test]
    fn neighbors_include_everyone_at_full_weight() {
        let slices = Slices::flat(3, nodes(&["A", "B", "C"]));
        // weight == u64::MAX, so only a draw of exactly u64::MAX could miss
        let neighbors = get_neighbors(1, 1, &slices);
        assert_eq!(neighbors.len(), 3);
    }

    #[test]
    fn priority_varies_with_round_and_node() {
        let a = "A".to_string();
        let b = "B".to_string();
        assert_eq!(get_priority(1, 1, &a), get_priority(1, 1, &a));
        assert_ne!(get_priority(1, 1, &a), get_priority(1, 2, &a));
        assert_ne!(get_priority(1, 1, &a), get_priority(1, 1, &b));
        assert_ne!(get_priority(2, 1, &a), get_priority(1, 1, &a));
    }
}
