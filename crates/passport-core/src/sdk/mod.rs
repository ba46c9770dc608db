//! Identity SDK seam.
//!
//! An [`IdentitySdk`] is the provider's own client library as the bridge sees
//! it: a session cache, a way to start a login, and a hook that finishes a
//! login whose result reached the host first. Everything behind it (login
//! UI, network, token storage) is the SDK's business.

use std::fmt;

use passport_types::{CredentialToken, PermissionScope, ProviderKind};

use crate::bridge::CompletionEnvelope;

pub mod credentials;
pub mod loopback;

pub use credentials::{CredentialCache, StoredCredential};
pub use loopback::{LoopbackOptions, LoopbackSdk};

/// A completed provider login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub access_token: CredentialToken,
    pub granted_scope: PermissionScope,
}

/// Failure reported by an SDK. The message is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkError {
    message: Option<String>,
}

impl SdkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// An error the SDK gave no description for.
    pub fn unknown() -> Self {
        Self { message: None }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn into_message(self) -> Option<String> {
        self.message
    }
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "unknown sdk error"),
        }
    }
}

impl std::error::Error for SdkError {}

/// Native completion of a login, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkOutcome {
    Success(LoginResult),
    Cancel,
    Error(SdkError),
}

/// Invoked once by the SDK when a login it began completes.
pub type LoginCallback = Box<dyn FnOnce(SdkOutcome) + Send>;

pub trait IdentitySdk: Send + Sync {
    fn provider_kind(&self) -> ProviderKind;

    /// Token from the SDK's session cache, if one is valid.
    fn current_access_token(&self) -> Option<CredentialToken>;

    /// Starts a login for `scope`. The SDK calls `callback` exactly once.
    fn begin_login(&self, scope: &PermissionScope, callback: LoginCallback);

    /// Offers an envelope received by the host. Returns true if it belonged
    /// to a login in flight.
    fn on_completion(&self, envelope: &CompletionEnvelope) -> bool;
}
