//! Test tooling shared by `star-hub` and `star-client` integration tests
//! (spec.md §4.6, ambient test stack per SPEC_FULL.md §12).

mod raw_client;
mod test_hub;

pub use raw_client::{RawClient, RawClientError};
pub use test_hub::TestHub;
