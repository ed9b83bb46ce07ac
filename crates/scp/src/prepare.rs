//! Prepare phase: federated voting over prepare ballots.
//!
//! The slot enters this phase with a ballot carrying the confirmed nominated
//! values at counter 1. Every event then re-derives the prepare statement in a
//! fixed order: counter escalation first, then the `prepared` field, then the
//! `aCounter`, `hCounter` and `cCounter` fields, then a broadcast (suppressed
//! when nothing changed), and finally the commit-phase entry check.
//!
//! Counter escalation has two triggers. A quorum at-or-above the local counter
//! arms the ballot timer, restarting it on every further quorum event; the
//! timer bumps the counter by one when it fires. A
//! v-blocking set strictly above the local counter raises it immediately to
//! the lowest counter above the current one, repeatedly, and takes precedence
//! by cancelling the timer.

use tracing::{debug, trace};

use crate::driver::{Driver, TimerKind};
use crate::hash::{hash_ballot, hash_ballot_value};
use crate::message::{Ballot, Payload, ScpPrepare, INFINITY_COUNTER};
use crate::quorum::{blocking_threshold, quorum_threshold};
use crate::slot::Slot;
use crate::state::Phase;
use crate::{NodeId, Result};

impl<D: Driver> Slot<D> {
    /// Leave nomination: seed the prepare ballot with the confirmed values
    /// and broadcast the first prepare statement.
    pub(crate) fn enter_prepare_phase(&mut self) {
        self.state.phase = Phase::Prepare;
        debug!(slot = self.config.slot, "entering PREPARE phase");
        self.driver.phase_changed(self.config.slot, Phase::Prepare);
        self.state.prepare.ballot.value = self.state.confirmed_values.clone();
        self.send_prepare_message();
    }

    /// Cache an inbound prepare statement.
    pub(crate) fn receive_prepare(&mut self, sender: &NodeId, msg: &ScpPrepare, timestamp: u64) {
        self.state.prepare_store.record(sender, msg.clone(), timestamp);
        self.state.last_received_prepare = Some(msg.clone());
    }

    /// Re-run every prepare-side acceptance and confirmation check against
    /// the current message caches.
    pub(crate) fn check_message_states_for_prepare(&mut self) {
        let current = self.state.prepare.ballot.clone();
        self.check_prepare_accept_quorum(&current);
        self.check_prepare_accept_blocking(&current);
        if let Some(last) = self.state.last_received_prepare.clone() {
            self.check_prepare_accept_blocking(&last.ballot);
        }
        if let Some(prepared) = self.state.prepare.prepared.clone() {
            self.check_prepare_confirm(&prepared);
        }
        self.check_prepare_accept_commit();
    }

    /// Accept `ballot` as prepared when a quorum votes or accepts it.
    ///
    /// A commit statement implies prepare votes for its prepared counter and
    /// for the infinity counter; an externalize statement implies the
    /// infinity counter.
    fn check_prepare_accept_quorum(&mut self, ballot: &Ballot) {
        let hash = hash_ballot(ballot);
        let mut signers: Vec<NodeId> = Vec::new();
        for (node, p) in self.state.prepare_store.iter() {
            if hash_ballot(&p.ballot) == hash
                || p.prepared.as_ref().is_some_and(|b| hash_ballot(b) == hash)
            {
                signers.push(node.clone());
            }
        }
        for (node, c) in self.state.commit_store.iter() {
            let infinity = Ballot {
                counter: INFINITY_COUNTER,
                value: c.ballot.value.clone(),
            };
            let prepared = Ballot {
                counter: c.prepared_counter,
                value: c.ballot.value.clone(),
            };
            if hash_ballot(&infinity) == hash || hash_ballot(&prepared) == hash {
                signers.push(node.clone());
            }
        }
        for (node, e) in self.state.externalize_store.iter() {
            let infinity = Ballot {
                counter: INFINITY_COUNTER,
                value: e.commit.value.clone(),
            };
            if hash_ballot(&infinity) == hash {
                signers.push(node.clone());
            }
        }
        if quorum_threshold(&self.state.node_slices, &signers, &self.config.node_id)
            && self.state.add_accepted_prepared(ballot)
        {
            debug!(%ballot, "accepted prepared (quorum)");
        }
    }

    /// Accept `ballot` as prepared when a v-blocking set already accepts it.
    fn check_prepare_accept_blocking(&mut self, ballot: &Ballot) {
        let hash = hash_ballot(ballot);
        let value_hash = hash_ballot_value(Some(ballot));
        let mut accepters: Vec<NodeId> = Vec::new();
        for (node, p) in self.state.prepare_store.iter() {
            if p.prepared.as_ref().is_some_and(|b| hash_ballot(b) == hash) {
                accepters.push(node.clone());
            }
        }
        for (node, c) in self.state.commit_store.iter() {
            let prepared = Ballot {
                counter: c.prepared_counter,
                value: c.ballot.value.clone(),
            };
            if hash_ballot(&prepared) == hash {
                accepters.push(node.clone());
            }
        }
        for (node, e) in self.state.externalize_store.iter() {
            if hash_ballot_value(Some(&e.commit)) == value_hash {
                accepters.push(node.clone());
            }
        }
        if blocking_threshold(&self.config.slices, &accepters)
            && self.state.add_accepted_prepared(ballot)
        {
            debug!(%ballot, "accepted prepared (blocking set)");
        }
    }

    /// Confirm `ballot` as prepared when a quorum accepts it.
    fn check_prepare_confirm(&mut self, ballot: &Ballot) {
        let hash = hash_ballot(ballot);
        let value_hash = hash_ballot_value(Some(ballot));
        let mut accepters: Vec<NodeId> = Vec::new();
        for (node, p) in self.state.prepare_store.iter() {
            if p.prepared.as_ref().is_some_and(|b| hash_ballot(b) == hash) {
                accepters.push(node.clone());
            }
        }
        for (node, c) in self.state.commit_store.iter() {
            let prepared = Ballot {
                counter: c.prepared_counter,
                value: c.ballot.value.clone(),
            };
            let high = Ballot {
                counter: c.h_counter,
                value: c.ballot.value.clone(),
            };
            if hash_ballot(&prepared) == hash || hash_ballot(&high) == hash {
                accepters.push(node.clone());
            }
        }
        for (node, e) in self.state.externalize_store.iter() {
            if hash_ballot_value(Some(&e.commit)) == value_hash {
                accepters.push(node.clone());
            }
        }
        if quorum_threshold(&self.state.node_slices, &accepters, &self.config.node_id)
            && self.state.add_confirmed_prepared(ballot)
        {
            debug!(%ballot, "confirmed prepared");
        }
    }

    /// Accept the local prepared ballot as committed when a quorum votes or
    /// accepts commit for its counter, or a v-blocking set accepts it.
    fn check_prepare_accept_commit(&mut self) {
        let Some(prepared) = self.state.prepare.prepared.clone() else {
            return;
        };
        let value_hash = hash_ballot_value(Some(&prepared));
        let n = prepared.counter;

        let mut signers: Vec<NodeId> = Vec::new();
        for (node, p) in self.state.prepare_store.iter() {
            if hash_ballot_value(Some(&p.ballot)) == value_hash
                && p.c_counter <= n
                && n <= p.h_counter
            {
                signers.push(node.clone());
            }
        }
        for (node, c) in self.state.commit_store.iter() {
            if hash_ballot_value(Some(&c.ballot)) == value_hash && n <= c.h_counter {
                signers.push(node.clone());
            }
        }
        for (node, e) in self.state.externalize_store.iter() {
            if hash_ballot_value(Some(&e.commit)) == value_hash && n >= e.commit.counter {
                signers.push(node.clone());
            }
        }
        if quorum_threshold(&self.state.node_slices, &signers, &self.config.node_id)
            && self.state.add_accepted_committed(&prepared)
        {
            debug!(ballot = %prepared, "accepted committed (quorum)");
        }

        let mut accepters: Vec<NodeId> = Vec::new();
        for (node, c) in self.state.commit_store.iter() {
            if hash_ballot_value(Some(&c.ballot)) == value_hash
                && c.c_counter <= n
                && n <= c.h_counter
            {
                accepters.push(node.clone());
            }
        }
        for (node, e) in self.state.externalize_store.iter() {
            if hash_ballot_value(Some(&e.commit)) == value_hash && n >= e.commit.counter {
                accepters.push(node.clone());
            }
        }
        if blocking_threshold(&self.config.slices, &accepters)
            && self.state.add_accepted_committed(&prepared)
        {
            debug!(ballot = %prepared, "accepted committed (blocking set)");
        }
    }

    /// Nodes at (or strictly above) a counter across all ballot-carrying
    /// caches, paired with the counters they stand at. Externalize statements
    /// stand at the infinity counter.
    pub(crate) fn counter_escalation_sources(
        &self,
        current: u32,
        strictly_above: bool,
    ) -> (Vec<NodeId>, Vec<u32>) {
        let keep = |c: u32| {
            if strictly_above {
                c > current
            } else {
                c >= current
            }
        };
        let mut nodes: Vec<NodeId> = Vec::new();
        let mut counters: Vec<u32> = Vec::new();
        for (node, p) in self.state.prepare_store.iter() {
            if keep(p.ballot.counter) {
                nodes.push(node.clone());
                counters.push(p.ballot.counter);
            }
        }
        for (node, c) in self.state.commit_store.iter() {
            if keep(c.ballot.counter) {
                nodes.push(node.clone());
                counters.push(c.ballot.counter);
            }
        }
        for (node, _) in self.state.externalize_store.iter() {
            nodes.push(node.clone());
            counters.push(INFINITY_COUNTER);
        }
        (nodes, counters)
    }

    /// The counter to jump to when a v-blocking set stands strictly above
    /// `current`: the lowest counter above it. `None` when not blocked.
    pub(crate) fn counter_blocking_target(&self, current: u32) -> Option<u32> {
        if current == INFINITY_COUNTER {
            return None;
        }
        let (nodes, counters) = self.counter_escalation_sources(current, true);
        if !blocking_threshold(&self.config.slices, &nodes) {
            return None;
        }
        counters.into_iter().min()
    }

    /// Arm the ballot timer for the current counter. A quorum-positive event
    /// while the timer is already running restarts the countdown under a
    /// fresh token.
    pub(crate) fn check_counter_quorum(&mut self, current: u32) {
        let (nodes, _) = self.counter_escalation_sources(current, false);
        if quorum_threshold(&self.state.node_slices, &nodes, &self.config.node_id) {
            debug!(counter = current, "ballot timer armed");
            self.arm_timer(TimerKind::Ballot, current);
        }
    }

    /// Prepare-phase counter escalation: blocking-set jumps first (with a
    /// recursive statement refresh, cancelling any pending timer), then the
    /// quorum timer check.
    fn check_update_counter(&mut self) -> Result<()> {
        let mut raised = false;
        while let Some(target) = self.counter_blocking_target(self.state.prepare.ballot.counter) {
            debug!(
                from = self.state.prepare.ballot.counter,
                to = target,
                "prepare counter raised by blocking set"
            );
            self.state.prepare.ballot.counter = target;
            raised = true;
        }
        if raised {
            self.on_ballot_counter_change();
            self.do_prepare_update()?;
            self.state.clear_timer(TimerKind::Ballot);
            self.driver.cancel_timer(self.config.slot, TimerKind::Ballot);
        }
        self.check_counter_quorum(self.state.prepare.ballot.counter);
        Ok(())
    }

    /// Re-derive the ballot value after a counter change: the highest
    /// confirmed-prepared value wins, then the confirmed nominated values,
    /// then the highest accepted-prepared value.
    pub(crate) fn on_ballot_counter_change(&mut self) {
        if let Some(highest) = self.state.highest_confirmed_prepared() {
            self.state.prepare.ballot.value = highest.value;
            return;
        }
        if !self.state.confirmed_values.is_empty() {
            self.state.prepare.ballot.value = self.state.confirmed_values.clone();
            return;
        }
        if let Some(highest) = self.state.highest_accepted_prepared() {
            self.state.prepare.ballot.value = highest.value;
        }
    }

    /// Re-derive `prepared` from the highest accepted-prepared ballot. When
    /// the current ballot is below it, the advertised counter is capped one
    /// below the ballot's own.
    fn recalculate_prepared_field(&mut self) {
        let Some(highest) = self.state.highest_accepted_prepared() else {
            self.state.prepare.prepared = None;
            return;
        };
        if self.state.prepare.ballot.is_lower_than(&highest) {
            self.state.prepare.prepared = Some(Ballot {
                counter: self.state.prepare.ballot.counter.saturating_sub(1),
                value: highest.value,
            });
        } else {
            self.state.prepare.prepared = Some(highest);
        }
        trace!(prepared = ?self.state.prepare.prepared, "prepared field updated");
    }

    /// Advance `aCounter` when the prepared value changed: ballots below it
    /// are abandoned.
    fn recalculate_a_counter(&mut self, old: Option<&Ballot>) {
        let Some(old) = old else { return };
        if let Some(prepared) = &self.state.prepare.prepared {
            self.state.prepare.a_counter = if old.value.len() < prepared.value.len() {
                old.counter
            } else {
                old.counter + 1
            };
        }
    }

    /// `hCounter` follows the highest confirmed-prepared ballot, but only
    /// while its value matches the current ballot's.
    fn recalculate_h_counter(&mut self) {
        let ballot_value = hash_ballot_value(Some(&self.state.prepare.ballot));
        self.state.prepare.h_counter = match self.state.highest_confirmed_prepared() {
            Some(highest) if hash_ballot_value(Some(&highest)) == ballot_value => highest.counter,
            _ => 0,
        };
    }

    /// Maintain the working commit ballot: drop it when it was passed by a
    /// higher prepared ballot with a different value or when `aCounter`
    /// overtook `cCounter`, and seed it from the current ballot once
    /// `hCounter` catches up to the ballot counter.
    fn update_commit_ballot(&mut self) {
        let drop_commit = match &self.state.commit_ballot {
            Some(commit_ballot) => {
                let passed = self.state.prepare.prepared.as_ref().is_some_and(|prepared| {
                    commit_ballot.is_lower_than(prepared)
                        && hash_ballot_value(Some(prepared))
                            != hash_ballot_value(Some(commit_ballot))
                });
                passed || self.state.prepare.a_counter > self.state.prepare.c_counter
            }
            None => false,
        };
        if drop_commit {
            self.state.commit_ballot = None;
        }
        if self.state.commit_ballot.is_none()
            && self.state.prepare.h_counter == self.state.prepare.ballot.counter
        {
            self.state.commit_ballot = Some(self.state.prepare.ballot.clone());
        }
    }

    fn recalculate_c_counter(&mut self) {
        self.update_commit_ballot();
        self.state.prepare.c_counter = match &self.state.commit_ballot {
            Some(commit_ballot) if self.state.prepare.h_counter != 0 => commit_ballot.counter,
            _ => 0,
        };
    }

    /// Broadcast the current prepare statement and deliver it to the local
    /// caches: the node's own statement counts in its threshold checks.
    pub(crate) fn send_prepare_message(&mut self) {
        let payload = Payload::Prepare(self.state.prepare.clone());
        let envelope = self.make_envelope(payload);
        self.send(&envelope);
        let own = self.state.prepare.clone();
        let node = self.config.node_id.clone();
        self.receive_prepare(&node, &own, envelope.timestamp);
    }

    fn check_enter_commit_phase(&mut self) -> Result<()> {
        if self.state.phase == Phase::Prepare
            && !self.state.confirmed_prepared.is_empty()
            && !self.state.accepted_committed.is_empty()
        {
            self.enter_commit_phase()?;
        }
        Ok(())
    }

    /// One full prepare-statement refresh, in fixed order.
    pub(crate) fn do_prepare_update(&mut self) -> Result<()> {
        self.check_update_counter()?;
        let old_prepared = self.state.prepare.prepared.clone();
        self.recalculate_prepared_field();
        if hash_ballot_value(old_prepared.as_ref())
            != hash_ballot_value(self.state.prepare.prepared.as_ref())
        {
            self.recalculate_a_counter(old_prepared.as_ref());
        }
        self.recalculate_h_counter();
        self.recalculate_c_counter();
        self.send_prepare_message();
        self.check_enter_commit_phase()
    }
}
