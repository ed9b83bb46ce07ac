//! Commit phase: federated voting that the prepared ballot is safe to commit.
//!
//! Entered once a prepared ballot is confirmed and a commit is accepted. The
//! commit statement carries the ballot, the counter it was prepared at, and
//! the `[cCounter, hCounter]` range of accepted-committed counters. The same
//! counter escalation rules as the prepare phase apply to the commit ballot.

use tracing::debug;

use crate::driver::{Driver, TimerKind};
use crate::hash::hash_ballot_value;
use crate::message::{Payload, ScpCommit};
use crate::quorum::{blocking_threshold, quorum_threshold};
use crate::slot::Slot;
use crate::state::Phase;
use crate::{NodeId, Result, ScpError};

impl<D: Driver> Slot<D> {
    /// Leave the prepare phase: the commit ballot is the confirmed prepared
    /// ballot.
    ///
    /// Entry without an accepted-committed or prepared ballot is a protocol
    /// invariant violation and surfaces as an internal error.
    pub(crate) fn enter_commit_phase(&mut self) -> Result<()> {
        self.state.phase = Phase::Commit;
        if self.state.accepted_committed.is_empty() {
            return Err(ScpError::InternalError(
                "entered COMMIT without an accepted-committed ballot".to_string(),
            ));
        }
        let Some(prepared) = self.state.prepare.prepared.clone() else {
            return Err(ScpError::InternalError(
                "entered COMMIT without a prepared ballot".to_string(),
            ));
        };
        debug!(slot = self.config.slot, ballot = %prepared, "entering COMMIT phase");
        self.driver.phase_changed(self.config.slot, Phase::Commit);
        self.state.commit.ballot = prepared.clone();
        self.state.commit.prepared_counter = prepared.counter;
        self.do_commit_update()
    }

    /// Cache an inbound commit statement.
    pub(crate) fn receive_commit(&mut self, sender: &NodeId, msg: &ScpCommit, timestamp: u64) {
        self.state.commit_store.record(sender, msg.clone(), timestamp);
    }

    /// Re-run the commit-ballot acceptance and confirmation checks.
    pub(crate) fn check_message_states_for_commit(&mut self) {
        self.check_commit_accept();
        self.check_commit_confirm();
    }

    /// Accept the commit ballot as committed when a quorum votes or accepts
    /// commit for its counter, or a v-blocking set accepts it.
    fn check_commit_accept(&mut self) {
        let ballot = self.state.commit.ballot.clone();
        let value_hash = hash_ballot_value(Some(&ballot));
        let n = ballot.counter;

        let mut signers: Vec<NodeId> = Vec::new();
        for (node, p) in self.state.prepare_store.iter() {
            if hash_ballot_value(Some(&p.ballot)) == value_hash
                && p.c_counter <= n
                && n <= p.h_counter
            {
                signers.push(node.clone());
            }
        }
        // a commit statement votes commit for every counter at or above its
        // cCounter
        for (node, c) in self.state.commit_store.iter() {
            if hash_ballot_value(Some(&c.ballot)) == value_hash && n >= c.c_counter {
                signers.push(node.clone());
            }
        }
        for (node, e) in self.state.externalize_store.iter() {
            if n >= e.commit.counter {
                signers.push(node.clone());
            }
        }
        if quorum_threshold(&self.state.node_slices, &signers, &self.config.node_id)
            && self.state.add_accepted_committed(&ballot)
        {
            debug!(%ballot, "accepted committed (quorum)");
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
            if n >= e.commit.counter {
                accepters.push(node.clone());
            }
        }
        if blocking_threshold(&self.config.slices, &accepters)
            && self.state.add_accepted_committed(&ballot)
        {
            debug!(%ballot, "accepted committed (blocking set)");
        }
    }

    /// Confirm the commit ballot when a quorum accepts it as committed.
    fn check_commit_confirm(&mut self) {
        let ballot = self.state.commit.ballot.clone();
        let value_hash = hash_ballot_value(Some(&ballot));
        let n = ballot.counter;

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
            if hash_ballot_value(Some(&e.commit)) == value_hash {
                accepters.push(node.clone());
            }
        }
        if quorum_threshold(&self.state.node_slices, &accepters, &self.config.node_id)
            && self.state.add_confirmed_committed(&ballot)
        {
            debug!(%ballot, "confirmed committed");
        }
    }

    /// Commit-phase counter escalation, mirroring the prepare phase but
    /// acting on the commit ballot.
    fn check_update_commit_counter(&mut self) -> Result<()> {
        let mut raised = false;
        while let Some(target) = self.counter_blocking_target(self.state.commit.ballot.counter) {
            debug!(
                from = self.state.commit.ballot.counter,
                to = target,
                "commit counter raised by blocking set"
            );
            self.state.commit.ballot.counter = target;
            raised = true;
        }
        if raised {
            self.do_commit_update()?;
            self.state.clear_timer(TimerKind::Ballot);
            self.driver.cancel_timer(self.config.slot, TimerKind::Ballot);
        }
        self.check_counter_quorum(self.state.commit.ballot.counter);
        Ok(())
    }

    /// Re-derive `preparedCounter` from the highest accepted-prepared ballot,
    /// capped one below the commit ballot when the commit ballot is lower.
    fn recalculate_prepared_counter(&mut self) -> Result<()> {
        let Some(highest) = self.state.highest_accepted_prepared() else {
            return Err(ScpError::InternalError(
                "no accepted-prepared ballot in COMMIT phase".to_string(),
            ));
        };
        if self.state.commit.ballot.is_lower_than(&highest) {
            self.state.commit.prepared_counter =
                self.state.commit.ballot.counter.saturating_sub(1);
        } else {
            self.state.commit.prepared_counter = highest.counter;
        }
        Ok(())
    }

    /// `cCounter` is the lowest accepted-committed counter, `hCounter` the
    /// highest; both 0 while nothing is accepted.
    fn recalculate_commit_range(&mut self) {
        self.state.commit.c_counter = self
            .state
            .accepted_committed
            .iter()
            .map(|b| b.counter)
            .min()
            .unwrap_or(0);
        self.state.commit.h_counter = self
            .state
            .accepted_committed
            .iter()
            .map(|b| b.counter)
            .max()
            .unwrap_or(0);
    }

    /// Broadcast the current commit statement.
    fn send_commit_message(&mut self) {
        let payload = Payload::Commit(self.state.commit.clone());
        let envelope = self.make_envelope(payload);
        self.send(&envelope);
    }

    fn check_enter_externalize_phase(&mut self) {
        if self.state.phase == Phase::Commit && !self.state.confirmed_committed.is_empty() {
            self.enter_externalize_phase();
        }
    }

    /// One full commit-statement refresh, in fixed order.
    pub(crate) fn do_commit_update(&mut self) -> Result<()> {
        self.check_update_commit_counter()?;
        self.recalculate_prepared_counter()?;
        self.recalculate_commit_range();
        self.send_commit_message();
        self.check_enter_externalize_phase();
        Ok(())
    }
}
