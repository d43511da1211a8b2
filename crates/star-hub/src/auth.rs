//! Pluggable authentication/authorization (spec.md §4.2, §4.4).
//!
//! Generalizes the teacher's concrete `validate_token(&PgPool, &str)` into
//! a trait object, since persistence is out of scope here (spec.md §1
//! Non-goals) but the *hook* the Hub calls into is not.

use async_trait::async_trait;
use axum::http::HeaderMap;

use star_protocol::{Envelope, Identity};

/// The parsed path components of an inbound upgrade request, before a
/// `Session` exists.
#[derive(Debug, Clone)]
pub struct ConnectPath {
    pub identity: Identity,
    pub env_id: Option<String>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Gate the upgrade itself (spec.md §4.2 point 1).
    async fn authenticate(&self, path: &ConnectPath, headers: &HeaderMap) -> bool;

    /// Gate delivery of an already-validated envelope (spec.md §4.4
    /// "Permission check hook").
    async fn authorize(&self, sender: &Identity, envelope: &Envelope) -> bool;
}

/// Accepts every upgrade and authorizes every delivery (spec.md §4.2 point 1
/// "the default accepts unconditionally"; §4.4 "the default implementation
/// allows everything").
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAuthenticator;

#[async_trait]
impl Authenticator for DefaultAuthenticator {
    async fn authenticate(&self, _path: &ConnectPath, _headers: &HeaderMap) -> bool {
        true
    }

    async fn authorize(&self, _sender: &Identity, _envelope: &Envelope) -> bool {
        true
    }
}

/// Extracts the bearer token from an `Authorization` header value, following
/// the teacher's `extract_bearer` helper.
#[must_use]
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_protocol::IdentityKind;

    #[tokio::test]
    async fn default_authenticator_accepts_everything() {
        let auth = DefaultAuthenticator;
        let path = ConnectPath {
            identity: Identity::new(IdentityKind::Agent, "a1").unwrap(),
            env_id: Some("demo".to_owned()),
        };
        assert!(auth.authenticate(&path, &HeaderMap::new()).await);
    }

    #[test]
    fn extract_bearer_strips_prefix() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("Basic abc123"), None);
    }
}
