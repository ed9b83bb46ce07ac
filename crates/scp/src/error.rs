//! Error types for engine operations.

use thiserror::Error;

/// Errors that can occur while driving a consensus slot.
///
/// Protocol-logic errors are fatal by design: they indicate an invariant
/// violation (a bug) and are propagated loudly rather than degraded around.
/// Missing peer data is not an error; unknown senders simply contribute
/// nothing to any threshold until their slices are learned.
#[derive(Debug, Error)]
pub enum ScpError {
    /// The envelope is malformed or carries an unknown message kind.
    ///
    /// Such envelopes are rejected outright without touching slot state.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A protocol invariant was violated.
    ///
    /// Examples: entering COMMIT without an accepted-committed ballot, or
    /// without a `prepared` ballot to seed the commit ballot from. These are
    /// unrecoverable bugs and must surface to the caller.
    #[error("internal state error: {0}")]
    InternalError(String),
}
