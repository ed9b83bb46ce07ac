//! Externalize phase: the terminal broadcast of the decided value.
//!
//! Entered once the commit ballot is confirmed committed. Both timers are
//! cancelled, the decision is announced once, and the slot never leaves this
//! phase; later inbound statements are cached but trigger no further
//! transition.

use tracing::info;

use crate::driver::{Driver, TimerKind};
use crate::message::{Payload, ScpExternalize};
use crate::slot::Slot;
use crate::state::Phase;
use crate::NodeId;

impl<D: Driver> Slot<D> {
    pub(crate) fn enter_externalize_phase(&mut self) {
        self.state.clear_timer(TimerKind::Nomination);
        self.state.clear_timer(TimerKind::Ballot);
        self.driver
            .cancel_timer(self.config.slot, TimerKind::Nomination);
        self.driver
            .cancel_timer(self.config.slot, TimerKind::Ballot);

        self.state.phase = Phase::Externalize;
        self.driver
            .phase_changed(self.config.slot, Phase::Externalize);
        self.state.externalize.commit = self.state.commit.ballot.clone();
        self.state.externalize.h_counter = self.state.commit.ballot.counter;
        info!(
            slot = self.config.slot,
            ballot = %self.state.externalize.commit,
            "value externalized"
        );
        self.send_externalize_message();
        let values = self.state.externalize.commit.value.clone();
        self.driver.value_externalized(self.config.slot, &values);
    }

    /// Cache an inbound externalize statement.
    pub(crate) fn receive_externalize(
        &mut self,
        sender: &NodeId,
        msg: &ScpExternalize,
        timestamp: u64,
    ) {
        self.state
            .externalize_store
            .record(sender, msg.clone(), timestamp);
    }

    fn send_externalize_message(&mut self) {
        let payload = Payload::Externalize(self.state.externalize.clone());
        let envelope = self.make_envelope(payload);
        self.send(&envelope);
    }
}
