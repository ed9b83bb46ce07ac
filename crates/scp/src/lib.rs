//! Single-slot federated Byzantine agreement engine.
//!
//! This crate implements one consensus slot of an SCP-style protocol: nodes
//! agree on one value set per slot using per-node **quorum slices** instead of
//! a global validator list, tolerating arbitrary non-quorum faults without a
//! central authority.
//!
//! ## Key Concepts
//!
//! - **Quorum Slices**: Each node defines its own threshold over trusted
//!   validators and nested sub-slices
//! - **Quorum**: A set of nodes in which every member's slice threshold is
//!   satisfied by other members of the set
//! - **V-Blocking Set**: A set that intersects every slice of a node,
//!   sufficient to force it to act without a full quorum
//!
//! ## Protocol Phases
//!
//! 1. **Nominate**: Federated voting over candidate values produces one
//!    confirmed value set
//! 2. **Prepare**: Federated voting over prepare ballots; the ballot counter
//!    escalates under contention
//! 3. **Commit**: Federated voting that a prepared ballot is safe to commit
//! 4. **Externalize**: Terminal broadcast of the decided value
//!
//! ## Event Model
//!
//! The engine is single-threaded and event-driven. Exactly two event sources
//! exist: inbound envelopes ([`Slot::receive`]) and timer expiry
//! ([`Slot::handle_timer`]); each is handled synchronously to completion.
//! Timers, broadcasting and value validation are delegated to the embedding
//! application through the [`Driver`] trait.
//!
//! ```ignore
//! use fedbft_scp::{Driver, NodeConfig, Slot};
//!
//! let mut slot = Slot::new(config, driver);
//! slot.init();
//! slot.receive(envelope)?;       // from the transport
//! slot.handle_timer(token)?;     // from the timer service
//! ```

mod commit;
mod driver;
mod error;
mod externalize;
mod format;
mod hash;
mod leader;
mod message;
mod nomination;
mod prepare;
mod quorum;
mod slot;
mod state;
mod storage;

pub use driver::{Driver, TimerKind, TimerToken, BALLOT_TIMEOUT_STEP_MS, NOMINATION_BASE_TIMEOUT_MS, NOMINATION_TIMEOUT_STEP_MS};
pub use error::ScpError;
pub use format::{ballot_to_str, envelope_to_str};
pub use hash::{hash_ballot, hash_ballot_value, hash_envelope, Hash256};
pub use message::{
    Ballot, Envelope, Payload, ScpCommit, ScpExternalize, ScpNominate, ScpPrepare, Slices,
    INFINITY_COUNTER,
};
pub use quorum::{blocking_threshold, check_slices, find_quorum, quorum_threshold, slices_threshold};
pub use leader::{get_neighbors, get_priority, node_weight};
pub use slot::{NodeConfig, Slot};
pub use state::{Phase, ProtocolState};
pub use storage::{LatestStore, VoteLedger};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ScpError>;

/// A node identifier (public key rendered as a string).
pub type NodeId = String;

/// An opaque candidate value; semantic validation is delegated to the driver.
pub type Value = String;

/// A slot index (typically a ledger sequence number).
pub type SlotIndex = u64;
