//! End-to-end Hub scenarios (spec.md §8), driven through the raw protocol
//! client so each test can assert on exact wire envelopes rather than
//! going through `star-client`'s reconnect/handler machinery.

use serde_json::json;

use star_hub::HubConfig;
use star_protocol::{
    Envelope, EnvelopeType, ErrorCode, Identity, IdentityKind, OutcomeBody, OutcomeStatus, Payload,
    TypedPayload,
};
use star_test_support::{RawClient, TestHub};

fn agent(id: &str) -> Identity {
    Identity::new(IdentityKind::Agent, id).unwrap()
}

fn environment(id: &str) -> Identity {
    Identity::new(IdentityKind::Environment, id).unwrap()
}

/// Scenario 1: unicast action/outcome round trip between an agent and its
/// home environment.
#[tokio::test(flavor = "multi_thread")]
async fn unicast_action_and_outcome() {
    let hub = TestHub::start(HubConfig::default()).await;
    let base = hub.base_url();

    let mut env = RawClient::connect(&format!("{base}/env/demo")).await.unwrap();
    env.recv().await.unwrap(); // initial heartbeat

    let mut a1 = RawClient::connect(&format!("{base}/env/demo/agent/a1")).await.unwrap();
    a1.recv().await.unwrap(); // initial heartbeat

    let action = Envelope::message(
        agent("a1"),
        environment("demo"),
        Payload::Action {
            id: "x1".to_owned(),
            action: "move".to_owned(),
            parameters: json!({"direction": "north"}),
        },
    );
    a1.send(&action).await.unwrap();

    let forwarded = env.recv().await.unwrap();
    assert_eq!(forwarded.envelope_type, EnvelopeType::Message);
    match forwarded.typed_payload().unwrap() {
        TypedPayload::Message(Payload::Action { id, action, .. }) => {
            assert_eq!(id, "x1");
            assert_eq!(action, "move");
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    let mut extra = serde_json::Map::new();
    extra.insert("data".to_owned(), json!({"new_position": {"x": 1, "y": 0}}));
    let outcome = Envelope::message(
        environment("demo"),
        agent("a1"),
        Payload::Outcome {
            id: "x1".to_owned(),
            outcome: OutcomeBody { status: OutcomeStatus::Success, extra },
            outcome_type: "dict".to_owned(),
        },
    );
    env.send(&outcome).await.unwrap();

    let delivered = a1.recv().await.unwrap();
    match delivered.typed_payload().unwrap() {
        TypedPayload::Message(Payload::Outcome { id, outcome, outcome_type }) => {
            assert_eq!(id, "x1");
            assert_eq!(outcome.status, OutcomeStatus::Success);
            assert_eq!(outcome_type, "dict");
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

/// Scenario 2: an environment's scoped broadcast reaches only the agents
/// attached to its own environment.
#[tokio::test(flavor = "multi_thread")]
async fn scoped_broadcast_excludes_other_environments() {
    let hub = TestHub::start(HubConfig::default()).await;
    let base = hub.base_url();

    let mut w = RawClient::connect(&format!("{base}/env/w")).await.unwrap();
    w.recv().await.unwrap();

    let mut a1 = RawClient::connect(&format!("{base}/env/w/agent/a1")).await.unwrap();
    a1.recv().await.unwrap();
    let mut a2 = RawClient::connect(&format!("{base}/env/w/agent/a2")).await.unwrap();
    a2.recv().await.unwrap();
    let mut b1 = RawClient::connect(&format!("{base}/env/w2/agent/b1")).await.unwrap();
    b1.recv().await.unwrap();

    let event = Envelope::message(
        environment("w"),
        Identity::wildcard(IdentityKind::Agent),
        Payload::Event {
            id: "e1".to_owned(),
            event: "arrived".to_owned(),
            data: json!({}),
        },
    );
    w.send(&event).await.unwrap();

    for client in [&mut a1, &mut a2] {
        let received = client.recv().await.unwrap();
        match received.typed_payload().unwrap() {
            TypedPayload::Message(Payload::Event { event, .. }) => assert_eq!(event, "arrived"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    // b1 is in a different environment, so it must not receive the event;
    // it should still be able to talk to its own environment instead.
    let mut w2 = RawClient::connect(&format!("{base}/env/w2")).await.unwrap();
    w2.recv().await.unwrap();
    let ping = Envelope::message(
        agent("b1"),
        environment("w2"),
        Payload::Event { id: "p1".to_owned(), event: "ping".to_owned(), data: json!({}) },
    );
    b1.send(&ping).await.unwrap();
    let received = w2.recv().await.unwrap();
    match received.typed_payload().unwrap() {
        TypedPayload::Message(Payload::Event { id, .. }) => assert_eq!(id, "p1"),
        other => panic!("unexpected payload: {other:?}"),
    }
}

/// Scenario 3: addressing a nonexistent environment produces a
/// `ROUTING_NO_RECIPIENT` error carrying the original message id.
#[tokio::test(flavor = "multi_thread")]
async fn no_recipient_produces_routing_error() {
    let hub = TestHub::start(HubConfig::default()).await;
    let base = hub.base_url();

    let mut a1 = RawClient::connect(&format!("{base}/env/demo/agent/a1")).await.unwrap();
    a1.recv().await.unwrap();

    let action = Envelope::message(
        agent("a1"),
        environment("missing"),
        Payload::Action {
            id: "m1".to_owned(),
            action: "observe".to_owned(),
            parameters: json!({}),
        },
    );
    a1.send(&action).await.unwrap();

    let error_envelope = a1.recv().await.unwrap();
    assert_eq!(error_envelope.envelope_type, EnvelopeType::Error);
    match error_envelope.typed_payload().unwrap() {
        TypedPayload::Error(err) => {
            assert_eq!(err.error_code, ErrorCode::RoutingNoRecipient);
            assert_eq!(err.details.unwrap()["original_message_id"], json!("m1"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

/// Scenario 4: a second connection under the same identity evicts the
/// first; the new connection becomes current.
#[tokio::test(flavor = "multi_thread")]
async fn identity_collision_evicts_the_first_session() {
    let hub = TestHub::start(HubConfig::default()).await;
    let base = hub.base_url();
    let url = format!("{base}/env/demo/agent/a1");

    let mut first = RawClient::connect(&url).await.unwrap();
    first.recv().await.unwrap();
    assert!(hub.registry().is_open(IdentityKind::Agent, "a1").await);

    let mut second = RawClient::connect(&url).await.unwrap();
    second.recv().await.unwrap();

    // The first connection's transport was aborted out from under it; its
    // next read fails rather than returning a liveness response.
    assert!(first.recv().await.is_err());

    // The second is now the session of record and can still exchange
    // traffic normally.
    let action = Envelope::message(
        agent("a1"),
        environment("demo"),
        Payload::Action { id: "x9".to_owned(), action: "ping".to_owned(), parameters: json!({}) },
    );
    second.send(&action).await.unwrap();
    assert!(hub.registry().is_open(IdentityKind::Agent, "a1").await);
}

/// Scenario 5: a session that never reads is evicted once it has been
/// silent longer than `session_timeout_s`.
#[tokio::test(flavor = "multi_thread")]
async fn idle_session_is_evicted() {
    let mut config = HubConfig::default();
    config.heartbeat_interval_s = 1;
    config.session_timeout_s = 2;
    let hub = TestHub::start(config).await;
    let base = hub.base_url();

    let mut a1 = RawClient::connect(&format!("{base}/env/demo/agent/a1")).await.unwrap();
    a1.recv().await.unwrap(); // initial heartbeat

    assert!(hub.registry().is_open(IdentityKind::Agent, "a1").await);
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert!(!hub.registry().is_open(IdentityKind::Agent, "a1").await);
}
