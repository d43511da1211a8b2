//! Environment role facade (spec.md §4.6).
//!
//! An environment receives agent actions through `handlers.on_action`
//! (registered at [`EnvironmentClient::connect`] time) and answers with
//! `send_outcome`; it also owns the scoped broadcast to its own agent
//! membership via `broadcast_event`, and a small slot of local world state.

use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;

use star_protocol::{Envelope, Identity, IdentityKind, OutcomeBody, OutcomeStatus, Payload};

use crate::core::{ClientHandle, HandlerSet, StarClient};
use crate::error::ClientError;

/// A connected environment.
pub struct EnvironmentClient {
    handle: ClientHandle,
    world: Mutex<Option<Value>>,
}

impl EnvironmentClient {
    /// Connect as `(environment, env_id)` at `{base_url}/env/{env_id}`.
    pub async fn connect(
        base_url: &str,
        env_id: &str,
        handlers: HandlerSet,
    ) -> Result<Self, ClientError> {
        let identity = Identity::new(IdentityKind::Environment, env_id)
            .map_err(ClientError::Protocol)?;
        let url = format!("{base_url}/env/{env_id}");
        let handle = StarClient::connect(url, identity, handlers).await?;
        Ok(Self { handle, world: Mutex::new(None) })
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.handle.identity()
    }

    /// Answer the agent action whose id is `action_id` with an outcome.
    /// Fire-and-forget: the Hub routes it on to the waiting agent, but the
    /// environment itself does not block on delivery.
    pub fn send_outcome(
        &self,
        agent_id: &str,
        action_id: &str,
        status: OutcomeStatus,
        data: Value,
    ) -> Result<(), ClientError> {
        let recipient = Identity::new(IdentityKind::Agent, agent_id).map_err(ClientError::Protocol)?;
        let mut extra = serde_json::Map::new();
        extra.insert("data".to_owned(), data);
        let envelope = Envelope::message(
            self.identity().clone(),
            recipient,
            Payload::Outcome {
                id: action_id.to_owned(),
                outcome: OutcomeBody { status, extra },
                outcome_type: "dict".to_owned(),
            },
        );
        self.handle.send(envelope)
    }

    /// Broadcast an event to every agent registered in this environment's
    /// membership (spec.md §4.3 scoped broadcast), addressed to
    /// `(agent, "*")`.
    pub fn broadcast_event(&self, name: &str, data: Value) -> Result<(), ClientError> {
        let envelope = Envelope::message(
            self.identity().clone(),
            Identity::wildcard(IdentityKind::Agent),
            Payload::Event {
                id: Uuid::new_v4().to_string(),
                event: name.to_owned(),
                data,
            },
        );
        self.handle.send(envelope)
    }

    /// Store world state locally; this is a client-side slot, not a wire
    /// operation — the Hub has no concept of environment state.
    pub fn initialize_environment(&self, world: Value) {
        *self.world.lock().unwrap() = Some(world);
    }

    #[must_use]
    pub fn world(&self) -> Option<Value> {
        self.world.lock().unwrap().clone()
    }

    pub fn close(&self) {
        self.handle.close();
    }
}
