//! Per-node message caching and per-value vote bookkeeping.

use std::collections::HashMap;

use crate::{NodeId, Value};

/// Latest-by-timestamp message cache, one entry per sender.
///
/// Only a strictly newer timestamp replaces a stored message; equal or older
/// timestamps are ignored, which makes duplicate and out-of-order delivery
/// harmless.
#[derive(Debug, Default)]
pub struct LatestStore<T> {
    data: HashMap<NodeId, T>,
    timestamps: HashMap<NodeId, u64>,
}

impl<T> LatestStore<T> {
    pub fn new() -> Self {
        LatestStore {
            data: HashMap::new(),
            timestamps: HashMap::new(),
        }
    }

    /// Record `value` from `node` unless an equal-or-newer entry exists.
    pub fn record(&mut self, node: &NodeId, value: T, timestamp: u64) {
        match self.timestamps.get(node) {
            Some(latest) if *latest >= timestamp => {}
            _ => {
                self.data.insert(node.clone(), value);
                self.timestamps.insert(node.clone(), timestamp);
            }
        }
    }

    /// The latest message from `node`, if any.
    pub fn get(&self, node: &NodeId) -> Option<&T> {
        self.data.get(node)
    }

    /// All `(node, latest message)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &T)> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct VoteState {
    voted: bool,
    accepted: bool,
}

/// Tracks which nodes voted or accepted each value during nomination.
#[derive(Debug, Default)]
pub struct VoteLedger {
    data: HashMap<Value, HashMap<NodeId, VoteState>>,
}

impl VoteLedger {
    pub fn new() -> Self {
        VoteLedger::default()
    }

    /// Record that `node` voted for `value`.
    pub fn record_vote(&mut self, value: &Value, node: &NodeId) {
        self.entry(value, node).voted = true;
    }

    /// Record that `node` accepted `value`.
    pub fn record_accept(&mut self, value: &Value, node: &NodeId) {
        self.entry(value, node).accepted = true;
    }

    fn entry(&mut self, value: &Value, node: &NodeId) -> &mut VoteState {
        self.data
            .entry(value.clone())
            .or_default()
            .entry(node.clone())
            .or_default()
    }

    /// Nodes that voted for or accepted `value`.
    pub fn voted_or_accepted(&self, value: &Value) -> Vec<NodeId> {
        self.collect(value, |state| state.voted || state.accepted)
    }

    /// Nodes that accepted `value`.
    pub fn accepted(&self, value: &Value) -> Vec<NodeId> {
        self.collect(value, |state| state.accepted)
    }

    fn collect(&self, value: &Value, pred: impl Fn(&VoteState) -> bool) -> Vec<NodeId> {
        match self.data.get(value) {
            Some(states) => states
                .iter()
                .filter(|(_, state)| pred(state))
                .map(|(node, _)| node.clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_store_keeps_newest() {
        let mut store: LatestStore<u32> = LatestStore::new();
        let node = "A".to_string();
        store.record(&node, 1, 100);
        store.record(&node, 2, 200);
        assert_eq!(store.get(&node), Some(&2));

        // older and equal timestamps are ignored
        store.record(&node, 3, 150);
        assert_eq!(store.get(&node), Some(&2));
        store.record(&node, 4, 200);
        assert_eq!(store.get(&node), Some(&2));
    }

    #[test]
    fn latest_store_tracks_nodes_independently() {
        let mut store: LatestStore<u32> = LatestStore::new();
        store.record(&"A".to_string(), 1, 100);
        store.record(&"B".to_string(), 2, 50);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&"B".to_string()), Some(&2));
    }

    #[test]
    fn vote_ledger_distinguishes_kinds() {
        let mut ledger = VoteLedger::new();
        let tx = "tx1".to_string();
        ledger.record_vote(&tx, &"A".to_string());
        ledger.record_accept(&tx, &"B".to_string());

        let mut voters = ledger.voted_or_accepted(&tx);
        voters.sort();
        assert_eq!(voters, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(ledger.accepted(&tx), vec!["B".to_string()]);
        assert!(ledger.accepted(&"tx2".to_string()).is_empty());
    }

    #[test]
    fn vote_ledger_upgrade_to_accept_keeps_vote() {
        let mut ledger = VoteLedger::new();
        let tx = "tx1".to_string();
        let node = "A".to_string();
        ledger.record_vote(&tx, &node);
        ledger.record_accept(&tx, &node);
        assert_eq!(ledger.voted_or_accepted(&tx), vec![node.clone()]);
        assert_eq!(ledger.accepted(&tx), vec![node]);
    }
}
