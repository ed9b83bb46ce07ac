//! Canonical hashing for ballots, values and envelopes.
//!
//! All deduplication in the engine is keyed by SHA-256 over a canonical JSON
//! rendering: ballot identity is `{counter, sorted(value)}`, ballot-value
//! identity is the sorted value sequence alone, and outbound-envelope identity
//! is the full envelope with its timestamp zeroed so that a recomputation
//! that changes no protocol field does not retransmit.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::message::{Ballot, Envelope};

/// A 32-byte SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash, used as a fallback when serialization fails.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Hash raw bytes.
    pub fn hash(data: &[u8]) -> Hash256 {
        let digest = Sha256::digest(data);
        Hash256(digest.into())
    }

    /// Hash the canonical JSON rendering of a serializable value.
    pub fn hash_json<T: Serialize>(value: &T) -> Hash256 {
        serde_json::to_vec(value)
            .map(|bytes| Hash256::hash(&bytes))
            .unwrap_or(Hash256::ZERO)
    }

    /// Hex rendering of the digest.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// Ballot identity hash: `{counter, sorted(value)}`.
///
/// The value sequence is sorted before hashing so that two ballots carrying
/// the same values in different order deduplicate to one entry.
pub fn hash_ballot(ballot: &Ballot) -> Hash256 {
    let mut value = ballot.value.clone();
    value.sort();
    Hash256::hash_json(&serde_json::json!({
        "counter": ballot.counter,
        "value": value,
    }))
}

/// Ballot-value identity hash: the sorted value sequence, or `null`.
///
/// `None` hashes to the canonical `null` digest so that "no ballot" compares
/// unequal to every real value.
pub fn hash_ballot_value(ballot: Option<&Ballot>) -> Hash256 {
    match ballot {
        Some(b) => {
            let mut value = b.value.clone();
            value.sort();
            Hash256::hash_json(&value)
        }
        None => Hash256::hash_json(&serde_json::Value::Null),
    }
}

/// Outbound-envelope identity hash with the timestamp zeroed.
pub fn hash_envelope(envelope: &Envelope) -> Hash256 {
    let mut canonical = envelope.clone();
    canonical.timestamp = 0;
    Hash256::hash_json(&canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Payload, ScpNominate, Slices};

    fn ballot(counter: u32, values: &[&str]) -> Ballot {
        Ballot {
            counter,
            value: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn ballot_hash_ignores_value_order() {
        let a = ballot(3, &["x", "y"]);
        let b = ballot(3, &["y", "x"]);
        assert_eq!(hash_ballot(&a), hash_ballot(&b));
    }

    #[test]
    fn ballot_hash_distinguishes_counter_and_content() {
        let a = ballot(3, &["x", "y"]);
        assert_ne!(hash_ballot(&a), hash_ballot(&ballot(4, &["x", "y"])));
        assert_ne!(hash_ballot(&a), hash_ballot(&ballot(3, &["x", "z"])));
    }

    #[test]
    fn ballot_value_hash_none_is_distinct() {
        let a = ballot(1, &["x"]);
        assert_ne!(hash_ballot_value(None), hash_ballot_value(Some(&a)));
        assert_eq!(hash_ballot_value(None), hash_ballot_value(None));
    }

    #[test]
    fn ballot_value_hash_ignores_counter() {
        let a = ballot(1, &["x"]);
        let b = ballot(9, &["x"]);
        assert_eq!(hash_ballot_value(Some(&a)), hash_ballot_value(Some(&b)));
    }

    #[test]
    fn envelope_hash_is_timestamp_independent() {
        let mut envelope = Envelope {
            sender: "A".to_string(),
            slot: 7,
            slices: Slices::flat(1, vec!["A".to_string()]),
            timestamp: 1111,
            payload: Payload::Nominate(ScpNominate {
                voted: vec!["tx1".to_string()],
                accepted: vec![],
            }),
        };
        let h1 = hash_envelope(&envelope);
        envelope.timestamp = 2222;
        assert_eq!(h1, hash_envelope(&envelope));
    }
}
