//! Hub-level failures, distinct from the per-envelope [`star_protocol::ProtocolError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upgrade rejected: path '{0}' does not satisfy the id charset")]
    MalformedPath(String),

    #[error("upgrade rejected: authentication failed")]
    Unauthenticated,

    #[error("upgrade rejected: at capacity ({0} connections)")]
    AtCapacity(usize),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Maps a rejected-upgrade `HubError` to its HTTP status, the way the
/// teacher's `services/server/src/http/response.rs` pairs a status code
/// with each of its own error constructors. `Bind`/`Config` never arise
/// from a request in flight, so they fall back to 500 rather than having
/// call sites construct a response for a case that can't reach them.
impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::MalformedPath(_) => StatusCode::BAD_REQUEST,
            HubError::Unauthenticated => StatusCode::UNAUTHORIZED,
            HubError::AtCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            HubError::Bind { .. } | HubError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_path_maps_to_bad_request() {
        let response = HubError::MalformedPath("id too short".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthenticated_maps_to_401() {
        let response = HubError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn at_capacity_maps_to_503() {
        let response = HubError::AtCapacity(1000).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
