//! Provider bridge: the seam between the handshake controller and an
//! identity SDK.
//!
//! A bridge answers "is there a cached credential?", arms the provider's
//! login entry point, and turns whatever the SDK reports into exactly one
//! [`NormalizedEvent`]. It keeps no handshake state of its own.

use std::fmt;

use passport_types::{CredentialToken, NormalizedEvent, PermissionScope, ProviderKind};
use tokio::sync::oneshot;

use crate::sdk::{IdentitySdk, SdkOutcome};

/// Opaque payload that completes an in-flight SDK login when the result
/// reaches the host instead of the SDK (for example a pasted redirect URL).
#[derive(Clone, PartialEq, Eq)]
pub struct CompletionEnvelope(String);

impl CompletionEnvelope {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Envelopes usually carry codes or tokens.
impl fmt::Debug for CompletionEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompletionEnvelope({} bytes)", self.0.len())
    }
}

/// Single-shot event channel handed to [`ProviderBridge::arm`].
///
/// `emit` consumes the sender, so a bridge cannot report twice.
#[derive(Debug)]
pub struct EventSender {
    tx: oneshot::Sender<NormalizedEvent>,
}

impl EventSender {
    /// Delivers the event. Returns false if the handshake stopped waiting.
    pub fn emit(self, event: NormalizedEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// True once the controller side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: Option<oneshot::Receiver<NormalizedEvent>>,
}

impl EventReceiver {
    /// Waits for the bridge's event.
    ///
    /// Returns None if the sender was dropped without emitting, and on every
    /// call after the channel finished.
    pub async fn recv(&mut self) -> Option<NormalizedEvent> {
        let rx = self.rx.as_mut()?;
        let event = rx.await.ok();
        self.rx = None;
        event
    }

    /// Non-blocking check for an already emitted event.
    pub fn try_recv(&mut self) -> Option<NormalizedEvent> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(event) => {
                self.rx = None;
                Some(event)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                None
            }
        }
    }
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = oneshot::channel();
    (EventSender { tx }, EventReceiver { rx: Some(rx) })
}

pub trait ProviderBridge: Send + Sync {
    fn provider_kind(&self) -> ProviderKind;

    /// Non-blocking check against the SDK's session cache.
    fn has_cached_credential(&self) -> bool {
        self.current_credential().is_some()
    }

    /// The cached credential, if any. Never waits on the network.
    fn current_credential(&self) -> Option<CredentialToken>;

    /// Arms the login entry point. The bridge calls `on_event` at most once.
    ///
    /// Must not be called again before the previous arm has fired.
    fn arm(&self, scope: &PermissionScope, on_event: EventSender);

    /// Hands a completion payload received by the host to the SDK.
    fn forward_completion_envelope(&self, envelope: &CompletionEnvelope);
}

/// Maps an SDK's native completion into the normalized event shape.
pub fn normalize(outcome: SdkOutcome) -> NormalizedEvent {
    match outcome {
        SdkOutcome::Success(login) => NormalizedEvent::Success {
            credential_token: login.access_token,
        },
        SdkOutcome::Cancel => NormalizedEvent::Cancelled,
        SdkOutcome::Error(err) => NormalizedEvent::Failed {
            message: err.into_message(),
        },
    }
}

/// Bridge over any [`IdentitySdk`].
pub struct SdkBridge<S> {
    sdk: S,
}

impl<S: IdentitySdk> SdkBridge<S> {
    pub fn new(sdk: S) -> Self {
        Self { sdk }
    }

    pub fn sdk(&self) -> &S {
        &self.sdk
    }
}

impl<S: IdentitySdk> ProviderBridge for SdkBridge<S> {
    fn provider_kind(&self) -> ProviderKind {
        self.sdk.provider_kind()
    }

    fn current_credential(&self) -> Option<CredentialToken> {
        self.sdk
            .current_access_token()
            .filter(|token| !token.is_empty())
    }

    fn arm(&self, scope: &PermissionScope, on_event: EventSender) {
        let provider = self.sdk.provider_kind();
        self.sdk.begin_login(
            scope,
            Box::new(move |outcome| {
                match &outcome {
                    SdkOutcome::Success(login) => {
                        tracing::debug!(%provider, granted = %login.granted_scope.join(","), "sdk login succeeded");
                    }
                    SdkOutcome::Cancel => tracing::warn!(%provider, "sdk login cancelled"),
                    SdkOutcome::Error(err) => tracing::error!(%provider, error = %err, "sdk login failed"),
                }
                if !on_event.emit(normalize(outcome)) {
                    tracing::debug!(%provider, "handshake no longer waiting; dropping sdk outcome");
                }
            }),
        );
    }

    fn forward_completion_envelope(&self, envelope: &CompletionEnvelope) {
        if !self.sdk.on_completion(envelope) {
            tracing::debug!(?envelope, "sdk did not accept completion envelope");
        }
    }
}
