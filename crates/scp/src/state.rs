//! Aggregate mutable state for one consensus slot.

use std::collections::HashMap;

use crate::driver::{TimerKind, TimerToken};
use crate::hash::hash_ballot;
use crate::message::{Ballot, ScpCommit, ScpExternalize, ScpNominate, ScpPrepare, Slices};
use crate::storage::{LatestStore, VoteLedger};
use crate::{NodeId, Value};

/// The four protocol phases. A slot's phase is monotonic and never regresses;
/// after [`Phase::Externalize`] no further transition is possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Nominate,
    Prepare,
    Commit,
    Externalize,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Nominate => "NOMINATE",
            Phase::Prepare => "PREPARE",
            Phase::Commit => "COMMIT",
            Phase::Externalize => "EXTERNALIZE",
        };
        f.write_str(name)
    }
}

/// The aggregate mutable record for one slot, owned exclusively by that
/// slot's run and mutated only by the phase handlers.
///
/// The ballot lists (`accepted_prepared`, `confirmed_prepared`,
/// `accepted_committed`, `confirmed_committed`) are append-only and
/// hash-deduplicated; `confirmed_values` is append-only and frozen once
/// nomination ends; `priority_nodes` only grows as leaders are elected.
#[derive(Debug)]
pub struct ProtocolState {
    pub phase: Phase,

    /// Current nomination round; incremented by the nomination timer.
    pub nomination_round: u32,
    /// Leaders elected so far, self included when applicable.
    pub priority_nodes: Vec<NodeId>,

    /// Last slice tree advertised by each node; grows monotonically and is
    /// never pruned within a slot.
    pub node_slices: HashMap<NodeId, Slices>,
    /// Which nodes voted/accepted each value.
    pub votes: VoteLedger,

    pub nominate_store: LatestStore<ScpNominate>,
    pub prepare_store: LatestStore<ScpPrepare>,
    pub commit_store: LatestStore<ScpCommit>,
    pub externalize_store: LatestStore<ScpExternalize>,
    /// The most recently received prepare payload, rechecked for v-blocking
    /// acceptance after every event.
    pub last_received_prepare: Option<ScpPrepare>,

    pub accepted_prepared: Vec<Ballot>,
    pub confirmed_prepared: Vec<Ballot>,
    pub accepted_committed: Vec<Ballot>,
    pub confirmed_committed: Vec<Ballot>,
    /// Working cache for deriving `prepare.cCounter`.
    pub commit_ballot: Option<Ballot>,
    pub confirmed_values: Vec<Value>,

    pub nominate: ScpNominate,
    pub prepare: ScpPrepare,
    pub commit: ScpCommit,
    pub externalize: ScpExternalize,

    /// Generation of the live nomination timer, if armed.
    nomination_timer: Option<u64>,
    /// Generation of the live ballot-counter timer, if armed.
    ballot_timer: Option<u64>,
    next_timer_generation: u64,
}

impl ProtocolState {
    /// Fresh state for a slot, with the node-slice map seeded with the local
    /// node's own tree.
    pub fn new(self_node: &NodeId, slices: &Slices) -> Self {
        let mut node_slices = HashMap::new();
        node_slices.insert(self_node.clone(), slices.clone());
        ProtocolState {
            phase: Phase::Nominate,
            nomination_round: 1,
            priority_nodes: Vec::new(),
            node_slices,
            votes: VoteLedger::new(),
            nominate_store: LatestStore::new(),
            prepare_store: LatestStore::new(),
            commit_store: LatestStore::new(),
            externalize_store: LatestStore::new(),
            last_received_prepare: None,
            accepted_prepared: Vec::new(),
            confirmed_prepared: Vec::new(),
            accepted_committed: Vec::new(),
            confirmed_committed: Vec::new(),
            commit_ballot: None,
            confirmed_values: Vec::new(),
            nominate: ScpNominate::default(),
            prepare: ScpPrepare::default(),
            commit: ScpCommit::default(),
            externalize: ScpExternalize::default(),
            nomination_timer: None,
            ballot_timer: None,
            next_timer_generation: 0,
        }
    }

    /// The highest confirmed-prepared ballot, if any.
    pub fn highest_confirmed_prepared(&self) -> Option<Ballot> {
        highest(&self.confirmed_prepared)
    }

    /// The highest accepted-prepared ballot, if any.
    pub fn highest_accepted_prepared(&self) -> Option<Ballot> {
        highest(&self.accepted_prepared)
    }

    /// Append to `accepted_prepared` unless the ballot hash is already
    /// present. Returns whether the list changed.
    pub fn add_accepted_prepared(&mut self, ballot: &Ballot) -> bool {
        push_deduped(&mut self.accepted_prepared, ballot)
    }

    /// Append to `confirmed_prepared` with hash dedup.
    pub fn add_confirmed_prepared(&mut self, ballot: &Ballot) -> bool {
        push_deduped(&mut self.confirmed_prepared, ballot)
    }

    /// Append to `accepted_committed` with hash dedup.
    pub fn add_accepted_committed(&mut self, ballot: &Ballot) -> bool {
        push_deduped(&mut self.accepted_committed, ballot)
    }

    /// Append to `confirmed_committed` with hash dedup.
    pub fn add_confirmed_committed(&mut self, ballot: &Ballot) -> bool {
        push_deduped(&mut self.confirmed_committed, ballot)
    }

    /// Arm the timer of the given kind, superseding any live instance.
    pub fn arm_timer(&mut self, kind: TimerKind) -> TimerToken {
        self.next_timer_generation += 1;
        let generation = self.next_timer_generation;
        match kind {
            TimerKind::Nomination => self.nomination_timer = Some(generation),
            TimerKind::Ballot => self.ballot_timer = Some(generation),
        }
        TimerToken { kind, generation }
    }

    /// Clear the live timer of the given kind.
    pub fn clear_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Nomination => self.nomination_timer = None,
            TimerKind::Ballot => self.ballot_timer = None,
        }
    }

    /// Whether `token` still refers to the live timer of its kind.
    pub fn timer_is_live(&self, token: TimerToken) -> bool {
        let live = match token.kind {
            TimerKind::Nomination => self.nomination_timer,
            TimerKind::Ballot => self.ballot_timer,
        };
        live == Some(token.generation)
    }
}

fn highest(ballots: &[Ballot]) -> Option<Ballot> {
    let mut iter = ballots.iter();
    let mut best = iter.next()?.clone();
    for ballot in iter {
        if best.is_lower_than(ballot) {
            best = ballot.clone();
        }
    }
    Some(best)
}

fn push_deduped(ballots: &mut Vec<Ballot>, ballot: &Ballot) -> bool {
    let hash = hash_ballot(ballot);
    if ballots.iter().any(|b| hash_ballot(b) == hash) {
        return false;
    }
    ballots.push(ballot.clone());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(counter: u32, values: &[&str]) -> Ballot {
        Ballot {
            counter,
            value: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn new_state() -> ProtocolState {
        let node = "A".to_string();
        ProtocolState::new(&node, &Slices::flat(1, vec![node.clone()]))
    }

    #[test]
    fn ballot_lists_dedup_by_hash() {
        let mut state = new_state();
        assert!(state.add_accepted_prepared(&ballot(1, &["x", "y"])));
        // same identity, different value order
        assert!(!state.add_accepted_prepared(&ballot(1, &["y", "x"])));
        assert_eq!(state.accepted_prepared.len(), 1);
        assert!(state.add_accepted_prepared(&ballot(2, &["x", "y"])));
        assert_eq!(state.accepted_prepared.len(), 2);
    }

    #[test]
    fn highest_getters_use_ballot_order() {
        let mut state = new_state();
        assert!(state.highest_accepted_prepared().is_none());
        state.add_accepted_prepared(&ballot(1, &["x"]));
        state.add_accepted_prepared(&ballot(3, &["y"]));
        state.add_accepted_prepared(&ballot(2, &["z"]));
        assert_eq!(state.highest_accepted_prepared().unwrap().counter, 3);

        state.add_confirmed_prepared(&ballot(2, &["a", "b"]));
        state.add_confirmed_prepared(&ballot(2, &["c"]));
        // equal counters: longer value wins
        assert_eq!(
            state.highest_confirmed_prepared().unwrap().value.len(),
            2
        );
    }

    #[test]
    fn timer_rearm_invalidates_previous_token() {
        let mut state = new_state();
        let first = state.arm_timer(TimerKind::Ballot);
        assert!(state.timer_is_live(first));
        let second = state.arm_timer(TimerKind::Ballot);
        assert!(!state.timer_is_live(first));
        assert!(state.timer_is_live(second));

        // kinds are independent
        let nomination = state.arm_timer(TimerKind::Nomination);
        assert!(state.timer_is_live(second));
        state.clear_timer(TimerKind::Ballot);
        assert!(!state.timer_is_live(second));
        assert!(state.timer_is_live(nomination));
    }

    #[test]
    fn initial_state_shape() {
        let state = new_state();
        assert_eq!(state.phase, Phase::Nominate);
        assert_eq!(state.nomination_round, 1);
        assert_eq!(state.prepare.ballot.counter, 1);
        assert!(state.prepare.prepared.is_none());
        assert_eq!(state.node_slices.len(), 1);
        assert!(state.confirmed_values.is_empty());
    }
}
