//! Wire types: quorum slices, ballots, phase payloads and the envelope.
//!
//! The JSON field names match the network contract of the transport
//! collaborator (`innerSets`, `aCounter`, `hCounter`, `cCounter`,
//! `preparedCounter`; payload kinds tagged `ScpNominate` / `ScpPrepare` /
//! `ScpCommit` / `ScpExternalize`).

use serde::{Deserialize, Serialize};

use crate::{NodeId, SlotIndex, Value};

/// Counter value standing in for the unbounded counter implied by an
/// externalize statement.
pub const INFINITY_COUNTER: u32 = 100_000;

/// A quorum slice tree: a threshold over direct validators and nested
/// sub-trees.
///
/// Immutable once received. A tree is *satisfied* by a signer set if at least
/// `threshold` of its direct validators are in the set or are nested trees
/// recursively satisfied by it. Trees with `threshold` outside
/// `0..=len(validators)+len(inner_sets)` are accepted as-is; the threshold
/// arithmetic simply never (or always) succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Slices {
    pub threshold: u32,
    pub validators: Vec<NodeId>,
    #[serde(rename = "innerSets", default, skip_serializing_if = "Vec::is_empty")]
    pub inner_sets: Vec<Slices>,
}

impl Slices {
    /// A flat slice tree with no nesting.
    pub fn flat(threshold: u32, validators: Vec<NodeId>) -> Self {
        Slices {
            threshold,
            validators,
            inner_sets: Vec::new(),
        }
    }

    /// A nested slice tree.
    pub fn nested(threshold: u32, validators: Vec<NodeId>, inner_sets: Vec<Slices>) -> Self {
        Slices {
            threshold,
            validators,
            inner_sets,
        }
    }

    /// Number of direct branches (validators plus inner sets).
    pub fn branch_len(&self) -> usize {
        self.validators.len() + self.inner_sets.len()
    }
}

/// A ballot: a counter paired with a value sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub counter: u32,
    pub value: Vec<Value>,
}

impl Ballot {
    /// Ballot ordering: by counter, then by value-sequence *length*.
    ///
    /// Length, not content: two ballots with equal counters and distinct
    /// values of the same length are unordered with respect to each other.
    pub fn is_lower_than(&self, other: &Ballot) -> bool {
        self.counter < other.counter
            || (self.counter == other.counter && self.value.len() < other.value.len())
    }

    /// Non-strict variant of [`Ballot::is_lower_than`].
    pub fn is_lower_or_equal(&self, other: &Ballot) -> bool {
        self.is_lower_than(other)
            || (self.counter == other.counter && self.value.len() == other.value.len())
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, [{}])", self.counter, self.value.join(" "))
    }
}

/// Nomination payload: values voted and accepted by the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpNominate {
    pub voted: Vec<Value>,
    pub accepted: Vec<Value>,
}

/// Prepare payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpPrepare {
    /// Current and highest prepare vote.
    pub ballot: Ballot,
    /// Highest accepted prepared ballot, if any.
    pub prepared: Option<Ballot>,
    /// Lowest non-aborted ballot counter, or 0.
    #[serde(rename = "aCounter")]
    pub a_counter: u32,
    /// Counter of the highest confirmed prepared ballot matching `ballot`'s
    /// value, or 0.
    #[serde(rename = "hCounter")]
    pub h_counter: u32,
    /// Counter of the working commit ballot, or 0.
    #[serde(rename = "cCounter")]
    pub c_counter: u32,
}

impl Default for ScpPrepare {
    fn default() -> Self {
        ScpPrepare {
            ballot: Ballot {
                counter: 1,
                value: Vec::new(),
            },
            prepared: None,
            a_counter: 0,
            h_counter: 0,
            c_counter: 0,
        }
    }
}

/// Commit payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpCommit {
    pub ballot: Ballot,
    #[serde(rename = "preparedCounter")]
    pub prepared_counter: u32,
    #[serde(rename = "hCounter")]
    pub h_counter: u32,
    #[serde(rename = "cCounter")]
    pub c_counter: u32,
}

impl Default for ScpCommit {
    fn default() -> Self {
        ScpCommit {
            ballot: Ballot {
                counter: 1,
                value: Vec::new(),
            },
            prepared_counter: 0,
            h_counter: 0,
            c_counter: 0,
        }
    }
}

/// Externalize payload: the terminal decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpExternalize {
    pub commit: Ballot,
    #[serde(rename = "hCounter")]
    pub h_counter: u32,
}

impl Default for ScpExternalize {
    fn default() -> Self {
        ScpExternalize {
            commit: Ballot {
                counter: 1,
                value: Vec::new(),
            },
            h_counter: 0,
        }
    }
}

/// The phase payload of an envelope, tagged by message kind.
///
/// Deserializing an unknown kind fails, which the orchestrator surfaces as a
/// fatal [`crate::ScpError::InvalidMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum Payload {
    #[serde(rename = "ScpNominate")]
    Nominate(ScpNominate),
    #[serde(rename = "ScpPrepare")]
    Prepare(ScpPrepare),
    #[serde(rename = "ScpCommit")]
    Commit(ScpCommit),
    #[serde(rename = "ScpExternalize")]
    Externalize(ScpExternalize),
}

impl Payload {
    /// The wire tag of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Nominate(_) => "ScpNominate",
            Payload::Prepare(_) => "ScpPrepare",
            Payload::Commit(_) => "ScpCommit",
            Payload::Externalize(_) => "ScpExternalize",
        }
    }
}

/// The wire envelope exchanged with the transport collaborator.
///
/// Every envelope carries the sender's current slice tree, which the
/// orchestrator records before dispatching the payload. Delivery order and
/// duplication are both tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: NodeId,
    pub slot: SlotIndex,
    pub slices: Slices,
    pub timestamp: u64,
    #[serde(flatten)]
    pub payload: Payload,
}
