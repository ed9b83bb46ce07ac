//! Threshold evaluation over quorum slice trees.
//!
//! Three pure predicates drive all federated-voting decisions:
//!
//! - [`slices_threshold`]: is one slice tree satisfied by a signer set?
//! - [`quorum_threshold`]: does a signer set satisfy the local node's tree
//!   *and* the tree restricted to nodes that are themselves satisfied?
//! - [`blocking_threshold`]: do the signers block every slice of the tree?
//!
//! `quorum_threshold` applies a one-level "convinced nodes" closure rather
//! than a full fixed-point quorum search; this is the observed protocol and
//! is preserved as-is.
//!
//! None of these functions has an error path. Trees whose threshold falls
//! outside the branch count are evaluated with plain arithmetic: the
//! threshold is simply never (or trivially) met.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::message::Slices;
use crate::NodeId;

/// Maximum slice-tree nesting depth accepted by [`check_slices`].
const MAXIMUM_NESTING_LEVEL: u32 = 4;

/// Check whether a slice tree is satisfied by a signer set.
///
/// Counts direct validators present in `signers` plus inner trees that are
/// recursively satisfied, and compares against the tree's threshold.
pub fn slices_threshold(slices: &Slices, signers: &HashSet<NodeId>) -> bool {
    let mut count = slices
        .validators
        .iter()
        .filter(|v| signers.contains(*v))
        .count();
    count += slices
        .inner_sets
        .iter()
        .filter(|inner| slices_threshold(inner, signers))
        .count();
    count >= slices.threshold as usize
}

/// Check whether `signers` forms a quorum from `self_node`'s point of view.
///
/// True iff `self_node`'s own tree is satisfied by the signer set, and also
/// by the set of all known nodes whose own tree is independently satisfied
/// by the signer set (the one-level convinced closure). Nodes whose slices
/// are not yet known contribute nothing; an unknown `self_node` yields
/// `false`.
pub fn quorum_threshold(
    node_slices: &HashMap<NodeId, Slices>,
    signers: &[NodeId],
    self_node: &NodeId,
) -> bool {
    let Some(this_slices) = node_slices.get(self_node) else {
        return false;
    };
    let signer_set: HashSet<NodeId> = signers.iter().cloned().collect();
    if !slices_threshold(this_slices, &signer_set) {
        return false;
    }
    let convinced: HashSet<NodeId> = node_slices
        .iter()
        .filter(|(_, slices)| slices_threshold(slices, &signer_set))
        .map(|(node, _)| node.clone())
        .collect();
    slices_threshold(this_slices, &convinced)
}

/// Search for a quorum among `signers` from `self_node`'s point of view.
///
/// Returns the convinced signer set when [`quorum_threshold`] semantics are
/// met, restricted to the signers themselves, or `None` when no quorum
/// exists. This is the set-valued twin of [`quorum_threshold`], used by
/// diagnostics and tests.
pub fn find_quorum(
    node_slices: &HashMap<NodeId, Slices>,
    signers: &[NodeId],
    self_node: &NodeId,
) -> Option<BTreeSet<NodeId>> {
    let this_slices = node_slices.get(self_node)?;
    let signer_set: HashSet<NodeId> = signers.iter().cloned().collect();
    if !slices_threshold(this_slices, &signer_set) {
        return None;
    }
    let convinced: BTreeSet<NodeId> = signer_set
        .iter()
        .filter(|node| {
            node_slices
                .get(*node)
                .is_some_and(|slices| slices_threshold(slices, &signer_set))
        })
        .cloned()
        .collect();
    let convinced_set: HashSet<NodeId> = convinced.iter().cloned().collect();
    if slices_threshold(this_slices, &convinced_set) {
        Some(convinced)
    } else {
        None
    }
}

/// Check whether `signers` is a blocking set for the slice tree.
///
/// With branch width `n` and threshold `k`, the complement of the signers
/// cannot reach `k` once more than `n - k` branches are signed or
/// recursively satisfied.
pub fn blocking_threshold(slices: &Slices, signers: &[NodeId]) -> bool {
    let signer_set: HashSet<NodeId> = signers.iter().cloned().collect();
    blocking_threshold_set(slices, &signer_set)
}

fn blocking_threshold_set(slices: &Slices, signers: &HashSet<NodeId>) -> bool {
    let n = slices.branch_len();
    let mut count = slices
        .validators
        .iter()
        .filter(|v| signers.contains(*v))
        .count();
    count += slices
        .inner_sets
        .iter()
        .filter(|inner| slices_threshold(inner, signers))
        .count();
    count > n.saturating_sub(slices.threshold as usize)
}

/// Advisory sanity check for a slice tree.
///
/// Flags thresholds outside the branch count, duplicate validators and
/// excessive nesting. The threshold evaluators accept such trees regardless;
/// this exists so the orchestrator can log a warning on construction.
pub fn check_slices(slices: &Slices) -> std::result::Result<(), String> {
    let mut seen = HashSet::new();
    check_slices_inner(slices, &mut seen, 0)
}

fn check_slices_inner(
    slices: &Slices,
    seen: &mut HashSet<NodeId>,
    depth: u32,
) -> std::result::Result<(), String> {
    if depth > MAXIMUM_NESTING_LEVEL {
        return Err("maximum slice nesting level exceeded".to_string());
    }
    if slices.threshold as usize > slices.branch_len() {
        return Err(format!(
            "threshold {} exceeds {} branches",
            slices.threshold,
            slices.branch_len()
        ));
    }
    for validator in &slices.validators {
        if !seen.insert(validator.clone()) {
            return Err(format!("duplicate validator {validator}"));
        }
    }
    for inner in &slices.inner_sets {
        check_slices_inner(inner, seen, depth + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
