use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CorrelationToken, CredentialToken, PermissionScope, ProviderKind};

/// What a caller asks for when opening a handshake. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    correlation_token: CorrelationToken,
    requested_scope: PermissionScope,
    provider_kind: ProviderKind,
}

impl HandshakeRequest {
    pub fn new(
        correlation_token: impl Into<CorrelationToken>,
        requested_scope: PermissionScope,
        provider_kind: ProviderKind,
    ) -> Self {
        Self {
            correlation_token: correlation_token.into(),
            requested_scope,
            provider_kind,
        }
    }

    pub fn correlation_token(&self) -> &CorrelationToken {
        &self.correlation_token
    }

    pub fn requested_scope(&self) -> &PermissionScope {
        &self.requested_scope
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider_kind
    }
}

/// Terminal outcome reported by a provider bridge.
///
/// A bridge emits at most one of these per armed handshake. The case where
/// nothing is ever emitted is handled by the controller, not represented here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    Success { credential_token: CredentialToken },
    Cancelled,
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl NormalizedEvent {
    pub fn success(token: impl Into<CredentialToken>) -> Self {
        NormalizedEvent::Success {
            credential_token: token.into(),
        }
    }

    pub fn failed(message: Option<String>) -> Self {
        NormalizedEvent::Failed { message }
    }
}

/// Caller-visible outcome. Provider errors are reported as `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeOutcome {
    Ok,
    Cancelled,
}

impl fmt::Display for HandshakeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeOutcome::Ok => write!(f, "ok"),
            HandshakeOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result delivered to the requester, exactly once per request.
///
/// A credential is present if and only if the outcome is `Ok`; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeResult {
    outcome: HandshakeOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_token: Option<CredentialToken>,
    provider_kind: ProviderKind,
}

impl HandshakeResult {
    pub fn ok(provider_kind: ProviderKind, credential_token: CredentialToken) -> Self {
        Self {
            outcome: HandshakeOutcome::Ok,
            credential_token: Some(credential_token),
            provider_kind,
        }
    }

    pub fn cancelled(provider_kind: ProviderKind) -> Self {
        Self {
            outcome: HandshakeOutcome::Cancelled,
            credential_token: None,
            provider_kind,
        }
    }

    pub fn outcome(&self) -> HandshakeOutcome {
        self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == HandshakeOutcome::Ok
    }

    pub fn credential_token(&self) -> Option<&CredentialToken> {
        self.credential_token.as_ref()
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider_kind
    }
}
