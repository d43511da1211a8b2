//! Agent role facade (spec.md §4.6 "Role facades add:").
//!
//! Thin builder methods over [`StarClient`] that address every action at
//! the agent's home environment, grounded on the teacher's
//! `ForwarderHello` builder (`services/forwarder/src/uplink.rs`)
//! generalized from one fixed hello message to the open action vocabulary
//! spec.md §1 leaves to the application.

use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use star_protocol::{Envelope, Identity, IdentityKind, OutcomeBody, Payload};

use crate::core::{expect_outcome, ClientHandle, HandlerSet, StarClient};
use crate::error::ClientError;

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected agent. Every action method addresses `(environment, env_id)`
/// and waits for the matching `outcome`.
pub struct AgentClient {
    handle: ClientHandle,
    environment: Identity,
}

impl AgentClient {
    /// Connect as `(agent, agent_id)` to the environment named `env_id`,
    /// at `{base_url}/env/{env_id}/agent/{agent_id}`.
    pub async fn connect(
        base_url: &str,
        env_id: &str,
        agent_id: &str,
        handlers: HandlerSet,
    ) -> Result<Self, ClientError> {
        let identity = Identity::new(IdentityKind::Agent, agent_id)
            .map_err(ClientError::Protocol)?;
        let environment = Identity::new(IdentityKind::Environment, env_id)
            .map_err(ClientError::Protocol)?;
        let url = format!("{base_url}/env/{env_id}/agent/{agent_id}");
        let handle = StarClient::connect(url, identity, handlers).await?;
        Ok(Self { handle, environment })
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.handle.identity()
    }

    async fn act(&self, action: &str, parameters: Value) -> Result<OutcomeBody, ClientError> {
        let envelope = Envelope::message(
            self.identity().clone(),
            self.environment.clone(),
            Payload::Action {
                id: Uuid::new_v4().to_string(),
                action: action.to_owned(),
                parameters,
            },
        );
        let outcome = self.handle.send_and_wait(envelope, DEFAULT_ACTION_TIMEOUT).await?;
        expect_outcome(outcome)
    }

    pub async fn move_(&self, direction: &str) -> Result<OutcomeBody, ClientError> {
        self.act("move", serde_json::json!({ "direction": direction })).await
    }

    pub async fn observe(&self) -> Result<OutcomeBody, ClientError> {
        self.act("observe", serde_json::json!({})).await
    }

    pub async fn pickup(&self, item: &str) -> Result<OutcomeBody, ClientError> {
        self.act("pickup", serde_json::json!({ "item": item })).await
    }

    /// A liveness-check action; distinct from the Hub's own heartbeat
    /// envelopes, which the read loop handles without application input.
    pub async fn ping(&self) -> Result<OutcomeBody, ClientError> {
        self.act("ping", serde_json::json!({})).await
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_environment_path_is_well_formed() {
        let url = format!("{}/env/{}/agent/{}", "ws://localhost:8765", "env1", "agent1");
        assert_eq!(url, "ws://localhost:8765/env/env1/agent/agent1");
    }
}
