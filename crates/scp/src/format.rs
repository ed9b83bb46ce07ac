//! Compact log renderings for ballots and envelopes.

use crate::message::{Ballot, Envelope, Payload};

/// One-line rendering of a ballot: `(counter, [values])`.
pub fn ballot_to_str(ballot: &Ballot) -> String {
    format!("({}, [{}])", ballot.counter, ballot.value.join(" "))
}

fn opt_ballot_to_str(ballot: Option<&Ballot>) -> String {
    match ballot {
        Some(b) => ballot_to_str(b),
        None => "-".to_string(),
    }
}

/// One-line rendering of an envelope for tracing output.
pub fn envelope_to_str(envelope: &Envelope) -> String {
    let body = match &envelope.payload {
        Payload::Nominate(n) => format!(
            "voted=[{}] accepted=[{}]",
            n.voted.join(" "),
            n.accepted.join(" ")
        ),
        Payload::Prepare(p) => format!(
            "ballot={} prepared={} a={} h={} c={}",
            ballot_to_str(&p.ballot),
            opt_ballot_to_str(p.prepared.as_ref()),
            p.a_counter,
            p.h_counter,
            p.c_counter
        ),
        Payload::Commit(c) => format!(
            "ballot={} prepared={} h={} c={}",
            ballot_to_str(&c.ballot),
            c.prepared_counter,
            c.h_counter,
            c.c_counter
        ),
        Payload::Externalize(e) => format!(
            "commit={} h={}",
            ballot_to_str(&e.commit),
            e.h_counter
        ),
    };
    format!(
        "{} from {} slot {}: {}",
        envelope.payload.kind(),
        envelope.sender,
        envelope.slot,
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ScpPrepare, Slices};

    #[test]
    fn renders_prepare_envelope() {
        let envelope = Envelope {
            sender: "A".to_string(),
            slot: 4,
            slices: Slices::flat(1, vec!["A".to_string()]),
            timestamp: 0,
            payload: Payload::Prepare(ScpPrepare::default()),
        };
        let rendered = envelope_to_str(&envelope);
        assert!(rendered.starts_with("ScpPrepare from A slot 4"));
        assert!(rendered.contains("prepared=-"));
    }
}
