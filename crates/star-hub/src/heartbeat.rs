//! The Hub's heartbeater (spec.md §4.5).
//!
//! A single logical timer, not one per session — spec.md §9 calls out the
//! single-timer design explicitly, a deliberate generalization away from
//! the teacher's per-session `tokio::time::interval` in `ws_forwarder.rs`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use star_protocol::{Envelope, HeartbeatPayload};

use crate::registry::{CloseReason, Registry};

/// Run the heartbeat sweep forever: every `heartbeat_interval`, send each
/// open session a heartbeat and evict anyone whose `last_traffic_seen` is
/// older than `session_timeout`. Intended to be `tokio::spawn`ed once per
/// Hub instance and aborted on shutdown.
pub async fn run(registry: Arc<Registry>, heartbeat_interval: Duration, session_timeout: Duration) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        sweep(&registry, session_timeout).await;
    }
}

async fn sweep(registry: &Registry, session_timeout: Duration) {
    let now = Instant::now();
    for session in registry.snapshot().await {
        let idle_for = {
            let last_seen = session
                .last_traffic_seen
                .lock()
                .expect("last_traffic_seen mutex poisoned");
            now.saturating_duration_since(*last_seen)
        };

        if idle_for >= session_timeout {
            info!(kind = ?session.identity.kind, id = %session.identity.id, "evicting idle session");
            registry.evict(&session.identity, CloseReason::IdleTimeout).await;
            continue;
        }

        let heartbeat = Envelope::heartbeat(session.identity.clone(), HeartbeatPayload::running());
        session.send_queue.enqueue(heartbeat);
        registry.record_heartbeat_sent(&session.identity).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionTasks;
    use star_protocol::{Identity, IdentityKind};

    fn dummy_tasks() -> SessionTasks {
        SessionTasks {
            reader: tokio::spawn(async {}),
            writer: tokio::spawn(async {}),
        }
    }

    #[tokio::test]
    async fn sweep_sends_a_heartbeat_to_every_open_session() {
        let registry = Registry::new();
        let identity = Identity::new(IdentityKind::Agent, "a1").unwrap();
        registry.register(identity.clone(), None, Arc::new(crate::registry::SendQueue::new(16)), dummy_tasks()).await;

        sweep(&registry, Duration::from_secs(60)).await;

        let session = registry.lookup(IdentityKind::Agent, "a1").await.unwrap();
        let envelope = session.send_queue.dequeue().await;
        assert_eq!(envelope.envelope_type, star_protocol::EnvelopeType::Heartbeat);
        assert_eq!(envelope.sender, Identity::hub());
    }

    #[tokio::test]
    async fn sweep_evicts_sessions_past_the_idle_timeout() {
        let registry = Registry::new();
        let identity = Identity::new(IdentityKind::Agent, "a1").unwrap();
        registry.register(identity.clone(), None, Arc::new(crate::registry::SendQueue::new(16)), dummy_tasks()).await;

        // No traffic recorded and a zero-length timeout: immediately idle.
        sweep(&registry, Duration::from_secs(0)).await;

        assert!(!registry.is_open(IdentityKind::Agent, "a1").await);
    }
}
