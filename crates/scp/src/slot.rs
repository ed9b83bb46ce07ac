//! Slot orchestrator: event intake, dispatch and broadcast plumbing.
//!
//! A [`Slot`] owns the full protocol state for one slot index and processes
//! exactly two kinds of events, each run synchronously to completion:
//!
//! - an inbound [`Envelope`] via [`Slot::receive`] (or [`Slot::receive_json`])
//! - an elapsed timer via [`Slot::handle_timer`]
//!
//! Every inbound envelope first refreshes the sender's slice tree in the
//! node-slice map, then dispatches by payload kind. Outside nomination, every
//! event additionally re-runs the prepare and commit acceptance checks and the
//! current phase's update routine, so that progress never depends on which
//! message kind happened to arrive last.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::driver::{Driver, TimerKind, TimerToken};
use crate::format::envelope_to_str;
use crate::hash::{hash_envelope, Hash256};
use crate::message::{Envelope, Payload, Slices};
use crate::quorum::check_slices;
use crate::state::{Phase, ProtocolState};
use crate::{NodeId, Result, ScpError, SlotIndex, Value};

/// Static per-slot configuration of the local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The local node's identifier.
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    /// The local node's quorum slice tree.
    pub slices: Slices,
    /// The slot index this instance decides.
    pub slot: SlotIndex,
}

/// One consensus slot run by the local node.
pub struct Slot<D: Driver> {
    pub(crate) config: NodeConfig,
    pub(crate) driver: Arc<D>,
    pub(crate) state: ProtocolState,
    /// Hashes of envelopes already broadcast, timestamp excluded.
    sent: HashSet<Hash256>,
    /// Timestamp of the last outbound envelope, kept strictly increasing so
    /// that successive self-records are never dropped by the latest-store.
    last_timestamp: u64,
}

impl<D: Driver> Slot<D> {
    /// Create a slot. Call [`Slot::init`] to start nominating.
    pub fn new(config: NodeConfig, driver: Arc<D>) -> Self {
        if let Err(reason) = check_slices(&config.slices) {
            warn!(node = %config.node_id, reason, "questionable quorum slices");
        }
        let state = ProtocolState::new(&config.node_id, &config.slices);
        Slot {
            config,
            driver,
            state,
            sent: HashSet::new(),
            last_timestamp: 0,
        }
    }

    /// Start the slot: elect the round-1 leader, vote for the local input if
    /// the local node is a leader, and arm the nomination timer.
    pub fn init(&mut self) {
        debug!(slot = self.config.slot, node = %self.config.node_id, "slot started");
        self.determine_priority_node();
    }

    /// Stop the slot, cancelling any live timers. State is left intact.
    pub fn abort(&mut self) {
        self.state.clear_timer(TimerKind::Nomination);
        self.state.clear_timer(TimerKind::Ballot);
        self.driver.cancel_timer(self.config.slot, TimerKind::Nomination);
        self.driver.cancel_timer(self.config.slot, TimerKind::Ballot);
    }

    /// The current protocol phase.
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Read access to the protocol state, for diagnostics and tests.
    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// The decided value set, once the slot has externalized.
    pub fn externalized_values(&self) -> Option<&[Value]> {
        if self.state.phase == Phase::Externalize {
            Some(&self.state.externalize.commit.value)
        } else {
            None
        }
    }

    /// Process one inbound envelope to completion.
    ///
    /// Duplicate and out-of-order delivery are tolerated; an envelope
    /// addressed to a different slot is rejected.
    pub fn receive(&mut self, envelope: Envelope) -> Result<()> {
        if envelope.slot != self.config.slot {
            return Err(ScpError::InvalidMessage(format!(
                "envelope for slot {} delivered to slot {}",
                envelope.slot, self.config.slot
            )));
        }
        trace!(node = %self.config.node_id, "recv {}", envelope_to_str(&envelope));
        self.state
            .node_slices
            .insert(envelope.sender.clone(), envelope.slices.clone());
        match &envelope.payload {
            Payload::Nominate(msg) => {
                self.receive_nominate(&envelope.sender, msg, envelope.timestamp)
            }
            Payload::Prepare(msg) => {
                self.receive_prepare(&envelope.sender, msg, envelope.timestamp)
            }
            Payload::Commit(msg) => {
                self.receive_commit(&envelope.sender, msg, envelope.timestamp)
            }
            Payload::Externalize(msg) => {
                self.receive_externalize(&envelope.sender, msg, envelope.timestamp)
            }
        }
        if self.state.phase != Phase::Nominate {
            self.check_message_states_for_prepare();
            self.check_message_states_for_commit();
        }
        match self.state.phase {
            Phase::Commit => self.do_commit_update()?,
            Phase::Prepare => self.do_prepare_update()?,
            _ => {}
        }
        Ok(())
    }

    /// Parse a JSON envelope and process it.
    ///
    /// An unknown message kind or malformed envelope is a fatal decode error;
    /// the envelope is rejected outright.
    pub fn receive_json(&mut self, bytes: &[u8]) -> Result<()> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| ScpError::InvalidMessage(e.to_string()))?;
        self.receive(envelope)
    }

    /// Process one elapsed timer.
    ///
    /// A token from a timer that has since been rearmed or cancelled is
    /// silently ignored.
    pub fn handle_timer(&mut self, token: TimerToken) -> Result<()> {
        if !self.state.timer_is_live(token) {
            trace!(?token, "stale timer token ignored");
            return Ok(());
        }
        self.state.clear_timer(token.kind);
        match token.kind {
            TimerKind::Nomination => {
                self.state.nomination_round += 1;
                debug!(
                    round = self.state.nomination_round,
                    "nomination round advanced"
                );
                self.determine_priority_node();
                Ok(())
            }
            TimerKind::Ballot => match self.state.phase {
                Phase::Prepare => {
                    self.state.prepare.ballot.counter += 1;
                    debug!(
                        counter = self.state.prepare.ballot.counter,
                        "prepare ballot counter bumped by timer"
                    );
                    self.on_ballot_counter_change();
                    self.do_prepare_update()
                }
                Phase::Commit => {
                    self.state.commit.ballot.counter += 1;
                    debug!(
                        counter = self.state.commit.ballot.counter,
                        "commit ballot counter bumped by timer"
                    );
                    self.do_commit_update()
                }
                _ => Ok(()),
            },
        }
    }

    /// Wrap a payload in an envelope stamped with a strictly increasing
    /// timestamp.
    pub(crate) fn make_envelope(&mut self, payload: Payload) -> Envelope {
        Envelope {
            sender: self.config.node_id.clone(),
            slot: self.config.slot,
            slices: self.config.slices.clone(),
            timestamp: self.next_timestamp(),
            payload,
        }
    }

    /// Broadcast an envelope unless an identical one (timestamp aside) has
    /// already been sent for this slot.
    pub(crate) fn send(&mut self, envelope: &Envelope) {
        let hash = hash_envelope(envelope);
        if self.sent.insert(hash) {
            trace!(node = %self.config.node_id, "send {}", envelope_to_str(envelope));
            self.driver.emit_envelope(envelope);
        }
    }

    /// Rearm a slot timer through the driver, invalidating the previous
    /// token of the same kind.
    pub(crate) fn arm_timer(&mut self, kind: TimerKind, n: u32) {
        self.driver.cancel_timer(self.config.slot, kind);
        let token = self.state.arm_timer(kind);
        let timeout = self.driver.compute_timeout(n, kind);
        self.driver.setup_timer(self.config.slot, token, timeout);
    }

    fn next_timestamp(&mut self) -> u64 {
        let now = self.driver.now_ms();
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }
}
