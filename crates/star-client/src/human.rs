//! Human role facade (spec.md §4.6).
//!
//! A thin subscriber: humans mostly watch events/streams via
//! `handlers`, and can address any identity directly when they need to
//! push something back in (spec.md §2: "Humans: dashboards/operators").

use star_protocol::{Envelope, Identity, IdentityKind, Payload};

use crate::core::{ClientHandle, HandlerSet, StarClient};
use crate::error::ClientError;

pub struct HumanClient {
    handle: ClientHandle,
}

impl HumanClient {
    /// Connect as `(human, human_id)` at `{base_url}/human/{human_id}`.
    pub async fn connect(
        base_url: &str,
        human_id: &str,
        handlers: HandlerSet,
    ) -> Result<Self, ClientError> {
        let identity = Identity::new(IdentityKind::Human, human_id).map_err(ClientError::Protocol)?;
        let url = format!("{base_url}/human/{human_id}");
        let handle = StarClient::connect(url, identity, handlers).await?;
        Ok(Self { handle })
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.handle.identity()
    }

    /// Send any payload directly to `recipient`, bypassing the
    /// correlated action/outcome dance entirely.
    pub fn send_to(&self, recipient: Identity, payload: Payload) -> Result<(), ClientError> {
        let envelope = Envelope::message(self.identity().clone(), recipient, payload);
        self.handle.send(envelope)
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

