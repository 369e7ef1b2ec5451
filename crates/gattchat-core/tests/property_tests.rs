//! Property-based tests for the envelope codec, framing and reassembly
//!
//! These check the round-trip and boundary invariants over arbitrary inputs
//! rather than hand-picked examples.

use gattchat_core::{
    ConnectionId, Coordinates, Envelope, EnvelopeBody, Fragmenter, GroupId, PeerId, Reassembler,
    ReassemblyOutcome, FRAME_HEADER_LEN,
};
use proptest::prelude::*;
use std::time::Duration;

/// Generate printable text, including JSON-significant characters
fn arb_text() -> impl Strategy<Value = String> {
    prop::string::string_regex(r#"[a-zA-Z0-9 {}\[\]":,\\.!?éü🙂]{1,200}"#).unwrap()
}

fn arb_name() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-zA-Z0-9 ]{0,24}").unwrap()
}

fn arb_peer_id() -> impl Strategy<Value = PeerId> {
    prop::string::string_regex(r"[a-f0-9]{1,32}")
        .unwrap()
        .prop_map(PeerId::new)
}

fn arb_group_id() -> impl Strategy<Value = GroupId> {
    prop::string::string_regex(r"[a-f0-9-]{1,36}")
        .unwrap()
        .prop_map(GroupId::new)
}

/// Any finite latitude/longitude pair at full `f64` precision
fn arb_location() -> impl Strategy<Value = Option<Coordinates>> {
    prop::option::of(
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| Coordinates::new(lat, lon)),
    )
}

/// Text-bearing bodies always carry text or a location
fn arb_body() -> impl Strategy<Value = EnvelopeBody> {
    prop_oneof![
        (arb_text(), arb_location()).prop_map(|(text, location)| EnvelopeBody::PlainMessage {
            text: Some(text),
            location,
        }),
        (arb_location().prop_filter("needs a location", Option::is_some)).prop_map(|location| {
            EnvelopeBody::PlainMessage {
                text: None,
                location,
            }
        }),
        (arb_group_id(), arb_name()).prop_map(|(group_id, group_name)| {
            EnvelopeBody::GroupCreate {
                group_id,
                group_name,
            }
        }),
        arb_group_id().prop_map(|group_id| EnvelopeBody::GroupJoin { group_id }),
        (arb_group_id(), arb_name()).prop_map(|(group_id, group_name)| {
            EnvelopeBody::GroupInvite {
                group_id,
                group_name,
            }
        }),
        (arb_group_id(), arb_text(), arb_location()).prop_map(|(group_id, text, location)| {
            EnvelopeBody::GroupMessage {
                group_id,
                text: Some(text),
                location,
            }
        }),
    ]
}

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    (arb_peer_id(), arb_name(), arb_body())
        .prop_map(|(sender_id, sender_name, body)| Envelope::new(sender_id, sender_name, body))
}

/// Feed every chunk in order, collecting each outcome
fn reassemble(reassembler: &mut Reassembler, chunks: &[&[u8]]) -> Vec<ReassemblyOutcome> {
    chunks
        .iter()
        .map(|chunk| reassembler.accept(ConnectionId::new(1), chunk))
        .collect()
}

proptest! {
    /// Property: decode(encode(e)) == e for every valid envelope
    #[test]
    fn envelope_roundtrip(envelope in arb_envelope()) {
        let encoded = envelope.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    /// Property: chunks concatenate back to exactly the input
    #[test]
    fn split_concatenates_to_input(
        bytes in prop::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 1usize..300,
    ) {
        let chunks: Vec<&[u8]> = Fragmenter::split(&bytes, chunk_size).unwrap().collect();
        prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= chunk_size));
        prop_assert_eq!(chunks.concat(), bytes.clone());
        prop_assert_eq!(chunks.len(), bytes.len().div_ceil(chunk_size));
    }

    /// Property: an exact multiple of the chunk size has no empty trailing chunk
    #[test]
    fn exact_multiple_has_no_trailing_chunk(
        chunk_size in 1usize..64,
        count in 1usize..32,
    ) {
        let bytes = vec![0xA5u8; chunk_size * count];
        let chunks: Vec<&[u8]> = Fragmenter::split(&bytes, chunk_size).unwrap().collect();
        prop_assert_eq!(chunks.len(), count);
        prop_assert!(chunks.iter().all(|c| c.len() == chunk_size));
    }

    /// Property: reassembling a split frame in order yields the payload
    #[test]
    fn split_then_reassemble_yields_payload(
        payload in prop::collection::vec(any::<u8>(), 1..4096),
        chunk_size in 1usize..256,
    ) {
        let frame = Fragmenter::frame(&payload, 8192).unwrap();
        let chunks: Vec<&[u8]> = Fragmenter::split(&frame, chunk_size).unwrap().collect();
        let mut reassembler = Reassembler::new(8192, Duration::from_secs(30));

        let outcomes = reassemble(&mut reassembler, &chunks);
        let (last, pending) = outcomes.split_last().unwrap();
        prop_assert!(pending.iter().all(|o| *o == ReassemblyOutcome::Pending));
        prop_assert_eq!(last, &ReassemblyOutcome::Complete(payload));
        prop_assert_eq!(reassembler.pending_bytes(ConnectionId::new(1)), 0);
    }

    /// Property: a truncated frame followed by another frame never completes
    /// with wrong content
    #[test]
    fn truncated_frame_is_never_completed_wrongly(
        first in prop::collection::vec(any::<u8>(), 2..512),
        second in prop::collection::vec(any::<u8>(), 1..512),
        cut in 1usize..512,
        chunk_size in 1usize..64,
    ) {
        let first_frame = Fragmenter::frame(&first, 8192).unwrap();
        let cut = FRAME_HEADER_LEN + (cut % (first.len() - 1)) + 1;
        prop_assume!(cut < first_frame.len());
        let second_frame = Fragmenter::frame(&second, 8192).unwrap();

        let mut stream = first_frame[..cut].to_vec();
        stream.extend_from_slice(&second_frame);
        let chunks: Vec<&[u8]> = Fragmenter::split(&stream, chunk_size).unwrap().collect();
        let mut reassembler = Reassembler::new(8192, Duration::from_secs(30));

        for outcome in reassemble(&mut reassembler, &chunks) {
            if let ReassemblyOutcome::Complete(bytes) = outcome {
                prop_assert!(bytes == first || bytes == second);
            }
        }
    }

    /// Property: an encoded envelope survives framing, chunking and reassembly
    #[test]
    fn envelope_survives_transport(envelope in arb_envelope(), chunk_size in 1usize..244) {
        let frame = Fragmenter::prepare(&envelope, chunk_size, 8192).unwrap();
        let chunks: Vec<&[u8]> = frame.chunks().collect();
        prop_assert_eq!(chunks.len(), frame.chunk_count());

        let mut reassembler = Reassembler::new(8192, Duration::from_secs(30));
        match reassemble(&mut reassembler, &chunks).pop() {
            Some(ReassemblyOutcome::Complete(payload)) => {
                prop_assert_eq!(Envelope::decode(&payload).unwrap(), envelope);
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }
}
