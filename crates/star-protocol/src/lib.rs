//! Wire types and codec for the star messaging fabric: the envelope format,
//! the payload vocabulary carried inside `message` envelopes, identities,
//! the frozen error taxonomy, and the shape validator shared by the Hub and
//! every client.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod payload;
pub mod validator;

pub use codec::{decode, decode_default, encode, DEFAULT_MAX_FRAME_BYTES};
pub use envelope::{
    Envelope, EnvelopeType, ErrorEnvelopePayload, HeartbeatPayload, TypedPayload, PROTOCOL_VERSION,
};
pub use error::{ErrorCode, ProtocolError};
pub use identity::{Identity, IdentityKind};
pub use payload::{OutcomeBody, OutcomeStatus, Payload};
pub use validator::validate;
