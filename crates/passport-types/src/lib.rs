//! Shared domain types for the passport handshake.
//!
//! These types carry no behavior beyond construction and accessors, so both
//! the core state machine and host applications can depend on them.

mod handshake;
mod provider;
mod token;

pub use handshake::{HandshakeOutcome, HandshakeRequest, HandshakeResult, NormalizedEvent};
pub use provider::ProviderKind;
pub use token::{CorrelationToken, CredentialToken, PermissionScope};
