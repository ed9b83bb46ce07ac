//! Nomination phase: leader rotation and federated voting over values.
//!
//! Per round, the local node samples a neighbor set from its own slice tree
//! (self always included) and elects the neighbor with the highest priority
//! draw as leader. Only values echoed or suggested by an elected leader enter
//! the local vote set. Each value then climbs the federated-voting ladder:
//!
//! - **vote**: the value is in the local `voted` list
//! - **accept**: a quorum voted-or-accepted it, or a v-blocking set accepted it
//! - **confirm**: a quorum accepted it
//!
//! Once any value is confirmed the candidate set freezes and the slot enters
//! the prepare phase. Later rounds keep electing additional leaders (the set
//! only grows) until confirmation cancels the round timer.

use tracing::debug;

use crate::driver::{Driver, TimerKind};
use crate::leader::{get_neighbors, get_priority};
use crate::message::{Payload, ScpNominate};
use crate::quorum::{blocking_threshold, quorum_threshold};
use crate::slot::Slot;
use crate::state::Phase;
use crate::{NodeId, Value};

impl<D: Driver> Slot<D> {
    /// Elect the leader for the current round, fold in its nominations, vote
    /// for the local input when self-elected, and rearm the round timer.
    pub(crate) fn determine_priority_node(&mut self) {
        let slot = self.config.slot;
        let round = self.state.nomination_round;

        let mut neighbors = vec![self.config.node_id.clone()];
        neighbors.extend(get_neighbors(slot, round, &self.config.slices));

        // Strict comparison keeps the earliest entry on ties, so an
        // otherwise-unweighted self wins against an equal-priority neighbor.
        let mut leader = neighbors[0].clone();
        let mut best = get_priority(slot, round, &leader);
        for node in &neighbors[1..] {
            let priority = get_priority(slot, round, node);
            if priority > best {
                best = priority;
                leader = node.clone();
            }
        }
        debug!(slot, round, leader = %leader, "elected nomination leader");

        if !self.state.priority_nodes.contains(&leader) {
            self.state.priority_nodes.push(leader.clone());
            // The new leader may have nominated before its election; fold its
            // cached statement in now.
            if let Some(nominate) = self.state.nominate_store.get(&leader).cloned() {
                let candidates: Vec<Value> = nominate
                    .accepted
                    .iter()
                    .chain(nominate.voted.iter())
                    .cloned()
                    .collect();
                let valid = self.validate_candidates(candidates);
                self.add_to_votes(&valid);
            }
        }

        if self.state.priority_nodes.contains(&self.config.node_id) {
            let input = self.driver.get_input(slot);
            self.add_to_votes(&input);
        }

        self.arm_timer(TimerKind::Nomination, round);
    }

    fn validate_candidates(&self, candidates: Vec<Value>) -> Vec<Value> {
        candidates
            .into_iter()
            .filter(|v| self.driver.validate_value(self.config.slot, v))
            .collect()
    }

    /// Vote for each value not yet voted or accepted. No-op after any value
    /// has been confirmed: the candidate set is frozen.
    pub(crate) fn add_to_votes(&mut self, values: &[Value]) {
        if !self.state.confirmed_values.is_empty() {
            return;
        }
        for value in values {
            if !self.state.nominate.voted.contains(value)
                && !self.state.nominate.accepted.contains(value)
            {
                self.state.nominate.voted.push(value.clone());
                self.state
                    .votes
                    .record_vote(value, &self.config.node_id);
                self.driver.nominating_value(self.config.slot, value);
            }
        }
        self.on_nominate_updated();
    }

    /// Move values from voted to accepted.
    fn accept_nominates(&mut self, values: &[Value]) {
        for value in values {
            if !self.state.nominate.accepted.contains(value) {
                self.state.nominate.accepted.push(value.clone());
                self.state
                    .votes
                    .record_accept(value, &self.config.node_id);
            }
        }
        self.state
            .nominate
            .voted
            .retain(|v| !values.contains(v));
        self.on_nominate_updated();
    }

    /// Promote accepted values to confirmed.
    fn confirm_nominates(&mut self, values: &[Value]) {
        self.state.confirmed_values.extend(values.iter().cloned());
        self.on_nominate_updated();
        self.on_confirmed_updated();
    }

    /// Normalize the local nominate statement, broadcast it, and record it as
    /// the local node's own latest message.
    fn on_nominate_updated(&mut self) {
        self.state.nominate.voted.sort();
        let accepted: std::collections::BTreeSet<Value> = self
            .state
            .nominate
            .accepted
            .iter()
            .chain(self.state.confirmed_values.iter())
            .cloned()
            .collect();
        self.state.nominate.accepted = accepted.into_iter().collect();

        let payload = Payload::Nominate(self.state.nominate.clone());
        let envelope = self.make_envelope(payload);
        self.send(&envelope);

        let own = self.state.nominate.clone();
        self.state
            .nominate_store
            .record(&self.config.node_id, own, envelope.timestamp);
        let node = self.config.node_id.clone();
        for value in self.state.nominate.voted.clone() {
            self.state.votes.record_vote(&value, &node);
        }
        for value in self.state.nominate.accepted.clone() {
            self.state.votes.record_accept(&value, &node);
        }
    }

    /// A value was confirmed: stop leader rotation and, if still nominating,
    /// move to the prepare phase.
    fn on_confirmed_updated(&mut self) {
        self.state.clear_timer(TimerKind::Nomination);
        self.driver
            .cancel_timer(self.config.slot, TimerKind::Nomination);
        debug!(
            slot = self.config.slot,
            values = ?self.state.confirmed_values,
            "confirmed nominated values"
        );
        if self.state.phase == Phase::Nominate {
            self.enter_prepare_phase();
        }
    }

    /// Handle an inbound nominate statement.
    pub(crate) fn receive_nominate(
        &mut self,
        sender: &NodeId,
        msg: &ScpNominate,
        timestamp: u64,
    ) {
        self.state
            .nominate_store
            .record(sender, msg.clone(), timestamp);
        for value in &msg.voted {
            self.state.votes.record_vote(value, sender);
        }
        for value in &msg.accepted {
            self.state.votes.record_accept(value, sender);
        }

        if self.state.priority_nodes.contains(sender) {
            let candidates: Vec<Value> = msg
                .voted
                .iter()
                .chain(msg.accepted.iter())
                .cloned()
                .collect();
            let valid = self.validate_candidates(candidates);
            self.add_to_votes(&valid);
        }

        // Accept: quorum over vote-or-accept, per locally voted value.
        let mut newly_accepted: Vec<Value> = self
            .state
            .nominate
            .voted
            .iter()
            .filter(|value| {
                let signers = self.state.votes.voted_or_accepted(value);
                quorum_threshold(&self.state.node_slices, &signers, &self.config.node_id)
            })
            .cloned()
            .collect();
        // Accept: v-blocking set of accepters, per value the sender accepted.
        for value in &msg.accepted {
            if newly_accepted.contains(value) {
                continue;
            }
            let accepters = self.state.votes.accepted(value);
            if blocking_threshold(&self.config.slices, &accepters) {
                newly_accepted.push(value.clone());
            }
        }
        if !newly_accepted.is_empty() {
            self.accept_nominates(&newly_accepted);
        }

        // Confirm: quorum over accepters, per locally accepted value.
        let candidates: Vec<Value> = self
            .state
            .nominate
            .accepted
            .iter()
            .filter(|value| !self.state.confirmed_values.contains(value))
            .cloned()
            .collect();
        if !candidates.is_empty() {
            let newly_confirmed: Vec<Value> = candidates
                .into_iter()
                .filter(|value| {
                    let accepters = self.state.votes.accepted(value);
                    quorum_threshold(
                        &self.state.node_slices,
                        &accepters,
                        &self.config.node_id,
                    )
                })
                .collect();
            if !newly_confirmed.is_empty() {
                self.confirm_nominates(&newly_confirmed);
            }
        }
    }
}
