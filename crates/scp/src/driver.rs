//! Driver trait connecting the engine to its environment.
//!
//! The engine is isolated from everything application-specific: it does not
//! know how to reach peers, how to judge a value, where locally suggested
//! values come from, or how to schedule a timer. All of that is delegated
//! through [`Driver`], implemented by the embedding application.

use std::time::Duration;

use crate::message::Envelope;
use crate::state::Phase;
use crate::{SlotIndex, Value};

/// Base nomination-round timeout in milliseconds.
pub const NOMINATION_BASE_TIMEOUT_MS: u64 = 1000;
/// Per-round increment of the nomination timeout in milliseconds.
pub const NOMINATION_TIMEOUT_STEP_MS: u64 = 1000;
/// Per-counter step of the ballot timer in milliseconds: a timer armed at
/// counter `c` fires after `(c + 1) * BALLOT_TIMEOUT_STEP_MS`.
pub const BALLOT_TIMEOUT_STEP_MS: u64 = 1000;

/// Which of the two slot timers a token belongs to.
///
/// At most one timer of each kind is live per slot; rearming replaces the
/// previous instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Drives nomination-round (leader rotation) advancement.
    Nomination,
    /// Drives ballot-counter escalation once a quorum is at or above the
    /// local counter.
    Ballot,
}

/// Handle for one armed timer instance.
///
/// The environment passes the token back via [`crate::Slot::handle_timer`]
/// when the timeout elapses. The engine compares the generation against the
/// live one for the kind, so a token from a replaced timer is silently
/// ignored even if the environment never cancelled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Callback interface implemented by the embedding application.
///
/// Implementors must be `Send + Sync`; the engine itself runs its handlers
/// synchronously to completion and holds no locks while calling out.
pub trait Driver: Send + Sync {
    /// Broadcast an envelope to all peers.
    ///
    /// Called at most once per distinct protocol content; retransmission of
    /// unchanged state is suppressed by the orchestrator.
    fn emit_envelope(&self, envelope: &Envelope);

    /// Judge a candidate value.
    ///
    /// Values failing validation are excluded from the local vote set; this
    /// is not an error condition.
    fn validate_value(&self, slot: SlotIndex, value: &Value) -> bool;

    /// Locally suggested values, consulted whenever the local node is among
    /// the elected leaders.
    fn get_input(&self, slot: SlotIndex) -> Vec<Value>;

    /// Schedule a timer. When it elapses, pass `token` back into
    /// [`crate::Slot::handle_timer`].
    ///
    /// A new token of the same kind supersedes the previous one; cancelling
    /// the old instance is an optimization, not a correctness requirement.
    fn setup_timer(&self, _slot: SlotIndex, _token: TimerToken, _timeout: Duration) {}

    /// Cancel the live timer of the given kind, if the environment supports
    /// cancellation.
    fn cancel_timer(&self, _slot: SlotIndex, _kind: TimerKind) {}

    /// Timeout for a nomination round or a ballot counter.
    ///
    /// For [`TimerKind::Nomination`], `n` is the current round; for
    /// [`TimerKind::Ballot`], `n` is the current ballot counter. The defaults
    /// escalate linearly so that slow rounds get progressively more time.
    fn compute_timeout(&self, n: u32, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::Nomination => Duration::from_millis(
                NOMINATION_BASE_TIMEOUT_MS + NOMINATION_TIMEOUT_STEP_MS * n as u64,
            ),
            TimerKind::Ballot => {
                Duration::from_millis((n as u64 + 1) * BALLOT_TIMEOUT_STEP_MS)
            }
        }
    }

    /// Current wall-clock time in milliseconds, used to timestamp outbound
    /// envelopes. Overridable for deterministic tests.
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Called when the local node starts voting for a value.
    fn nominating_value(&self, _slot: SlotIndex, _value: &Value) {}

    /// Called on every phase transition.
    fn phase_changed(&self, _slot: SlotIndex, _phase: Phase) {}

    /// Called once when the slot externalizes, with the decided value set.
    fn value_externalized(&self, _slot: SlotIndex, _values: &[Value]) {}
}
