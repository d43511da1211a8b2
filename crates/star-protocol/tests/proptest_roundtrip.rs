//! Property-based round-trip coverage for the wire envelope (spec.md §4.1
//! P4: "any valid envelope survives encode then decode unchanged").

use proptest::prelude::*;

use star_protocol::{
    decode_default, encode, Envelope, Identity, IdentityKind, OutcomeBody, OutcomeStatus, Payload,
};

fn arb_id() -> BoxedStrategy<String> {
    "[A-Za-z0-9_-]{3,50}".prop_map(|s| s).boxed()
}

fn arb_kind() -> BoxedStrategy<IdentityKind> {
    prop_oneof![
        Just(IdentityKind::Hub),
        Just(IdentityKind::Agent),
        Just(IdentityKind::Environment),
        Just(IdentityKind::Human),
    ]
    .boxed()
}

fn arb_identity() -> BoxedStrategy<Identity> {
    (arb_kind(), arb_id())
        .prop_map(|(kind, id)| Identity::new(kind, id).unwrap())
        .boxed()
}

fn arb_outcome_status() -> BoxedStrategy<OutcomeStatus> {
    prop_oneof![Just(OutcomeStatus::Success), Just(OutcomeStatus::Error)].boxed()
}

fn arb_payload() -> BoxedStrategy<Payload> {
    prop_oneof![
        (arb_id(), "[a-z_]{1,20}").prop_map(|(id, action)| Payload::Action {
            id,
            action,
            parameters: serde_json::json!({"k": "v"}),
        }),
        (arb_id(), arb_outcome_status()).prop_map(|(id, status)| Payload::Outcome {
            id,
            outcome: OutcomeBody { status, extra: serde_json::Map::new() },
            outcome_type: "dict".to_owned(),
        }),
        (arb_id(), "[a-z_]{1,20}").prop_map(|(id, event)| Payload::Event {
            id,
            event,
            data: serde_json::json!({}),
        }),
        ("[a-z_]{1,20}", any::<u64>()).prop_map(|(stream_type, sequence)| Payload::Stream {
            stream_type,
            sequence,
            data: serde_json::json!({}),
        }),
    ]
    .boxed()
}

fn arb_envelope() -> BoxedStrategy<Envelope> {
    (arb_identity(), arb_identity(), arb_payload())
        .prop_map(|(sender, recipient, payload)| Envelope::message(sender, recipient, payload))
        .boxed()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

    #[test]
    fn encode_decode_round_trips_sender_recipient_and_payload(envelope in arb_envelope()) {
        let frame = encode(&envelope).unwrap();
        let back = decode_default(&frame).unwrap();
        prop_assert_eq!(back.sender, envelope.sender);
        prop_assert_eq!(back.recipient, envelope.recipient);
        prop_assert_eq!(back.typed_payload().unwrap(), envelope.typed_payload().unwrap());
    }

    #[test]
    fn encode_always_fills_timestamp_and_version(envelope in arb_envelope()) {
        let frame = encode(&envelope).unwrap();
        let back = decode_default(&frame).unwrap();
        prop_assert!(back.timestamp.is_some());
        prop_assert_eq!(back.version.as_deref(), Some("1"));
    }
}
