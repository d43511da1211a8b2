//! Participant identity: the `(kind, id)` pair that names a Hub, Agent,
//! Environment, or Human on the wire.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

const MIN_ID_LEN: usize = 3;
const MAX_ID_LEN: usize = 50;
const WILDCARD: &str = "*";

/// The four participant kinds in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Hub,
    Agent,
    Environment,
    Human,
}

/// A `(kind, id)` pair naming a participant.
///
/// `id` is validated against the `[A-Za-z0-9_-]` charset, length 3-50, on
/// every construction path except [`Identity::wildcard`], so a wildcard can
/// never arise from a typo in a regular id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub kind: IdentityKind,
    pub id: String,
}

impl Identity {
    /// Build an identity, validating `id` against the charset and length
    /// bounds. Rejects `"*"` here — use [`Identity::wildcard`] for that.
    pub fn new(kind: IdentityKind, id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id == WILDCARD {
            return Err(ProtocolError::InvalidIdentity(
                "wildcard id must be constructed via Identity::wildcard".to_owned(),
            ));
        }
        validate_id_charset(&id)?;
        Ok(Self { kind, id })
    }

    /// The distinguished Hub identity, `(hub, "hub")`.
    #[must_use]
    pub fn hub() -> Self {
        Self {
            kind: IdentityKind::Hub,
            id: "hub".to_owned(),
        }
    }

    /// A broadcast recipient for the given kind: `(kind, "*")`.
    #[must_use]
    pub fn wildcard(kind: IdentityKind) -> Self {
        Self {
            kind,
            id: WILDCARD.to_owned(),
        }
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.id == WILDCARD
    }
}

pub(crate) fn validate_id_charset(id: &str) -> Result<(), ProtocolError> {
    if id.len() < MIN_ID_LEN || id.len() > MAX_ID_LEN {
        return Err(ProtocolError::InvalidIdentity(format!(
            "id length {} not in [{MIN_ID_LEN}, {MAX_ID_LEN}]",
            id.len()
        )));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ProtocolError::InvalidIdentity(format!(
            "id '{id}' contains characters outside [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ids_outside_length_bounds() {
        assert!(Identity::new(IdentityKind::Agent, "ab").is_err());
        assert!(Identity::new(IdentityKind::Agent, "abc").is_ok());
        assert!(Identity::new(IdentityKind::Agent, "a".repeat(50)).is_ok());
        assert!(Identity::new(IdentityKind::Agent, "a".repeat(51)).is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(Identity::new(IdentityKind::Agent, "agent one").is_err());
        assert!(Identity::new(IdentityKind::Agent, "agent.one").is_err());
        assert!(Identity::new(IdentityKind::Agent, "agent_one-2").is_ok());
    }

    #[test]
    fn wildcard_bypasses_charset_but_regular_path_rejects_star() {
        let wc = Identity::wildcard(IdentityKind::Agent);
        assert!(wc.is_wildcard());
        assert!(Identity::new(IdentityKind::Agent, "*").is_err());
    }

    #[test]
    fn hub_identity_is_fixed() {
        let hub = Identity::hub();
        assert_eq!(hub.kind, IdentityKind::Hub);
        assert_eq!(hub.id, "hub");
    }
}
