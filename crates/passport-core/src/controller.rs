//! Auth handshake controller.
//!
//! Drives one handshake from `open` to delivery:
//!
//! ```text
//! Idle -> Checking -> ShortCircuited -> Delivered
//!                  \-> Armed ---------> Delivered
//! ```
//!
//! Every exit path (cached credential, success, user cancel, provider error,
//! surface closed without an event) ends in exactly one delivered
//! [`HandshakeResult`]. The `Delivered` state is the guard: once reached,
//! later events and delivery attempts are ignored.

use std::fmt;
use std::sync::Arc;

use passport_types::{HandshakeRequest, HandshakeResult, NormalizedEvent, ProviderKind};

use crate::bridge::{CompletionEnvelope, EventReceiver, ProviderBridge, event_channel};
use crate::requester::ResultRouter;
use crate::surface::{SurfaceEvent, SurfaceEvents};
use crate::telemetry::{Telemetry, TelemetryEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Checking,
    ShortCircuited,
    Armed,
    Delivered,
}

/// Which path ended a handshake. Only used for logging; the requester sees
/// `Ok` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeExit {
    ShortCircuit,
    Succeeded,
    UserCancelled,
    ProviderError,
    ImplicitAbandon,
}

impl fmt::Display for HandshakeExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeExit::ShortCircuit => write!(f, "short_circuit"),
            HandshakeExit::Succeeded => write!(f, "succeeded"),
            HandshakeExit::UserCancelled => write!(f, "user_cancelled"),
            HandshakeExit::ProviderError => write!(f, "provider_error"),
            HandshakeExit::ImplicitAbandon => write!(f, "implicit_abandon"),
        }
    }
}

pub struct HandshakeController<B> {
    bridge: B,
    router: Arc<dyn ResultRouter>,
    telemetry: Arc<dyn Telemetry>,
    state: HandshakeState,
    request: Option<HandshakeRequest>,
    events: Option<EventReceiver>,
}

impl<B: ProviderBridge> HandshakeController<B> {
    pub fn new(bridge: B, router: Arc<dyn ResultRouter>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            bridge,
            router,
            telemetry,
            state: HandshakeState::Idle,
            request: None,
            events: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn request(&self) -> Option<&HandshakeRequest> {
        self.request.as_ref()
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    fn provider(&self) -> ProviderKind {
        self.request
            .as_ref()
            .map_or_else(|| self.bridge.provider_kind(), HandshakeRequest::provider_kind)
    }

    /// Opens the handshake. Short-circuits if the bridge already holds a
    /// credential, otherwise arms the bridge once and waits.
    pub fn open(&mut self, request: HandshakeRequest) {
        if self.state != HandshakeState::Idle {
            tracing::warn!(
                correlation = %request.correlation_token(),
                state = ?self.state,
                "handshake already opened; ignoring"
            );
            return;
        }
        if request.provider_kind() != self.bridge.provider_kind() {
            tracing::warn!(
                requested = %request.provider_kind(),
                bridge = %self.bridge.provider_kind(),
                "request provider differs from bridge provider"
            );
        }

        self.state = HandshakeState::Checking;
        self.request = Some(request);

        if self.bridge.has_cached_credential()
            && let Some(token) = self.bridge.current_credential()
        {
            tracing::info!(provider = %self.provider(), "social token is already obtained");
            self.state = HandshakeState::ShortCircuited;
            let result = HandshakeResult::ok(self.provider(), token);
            self.finish(HandshakeExit::ShortCircuit, result);
            return;
        }

        self.telemetry.record(&TelemetryEvent::PromptShown);
        let (tx, rx) = event_channel();
        self.events = Some(rx);
        self.state = HandshakeState::Armed;
        if let Some(request) = &self.request {
            self.bridge.arm(request.requested_scope(), tx);
        }
    }

    /// Converts the bridge's event into a result and delivers it.
    ///
    /// Ignored unless the handshake is armed.
    pub fn handle_event(&mut self, event: NormalizedEvent) {
        if self.state != HandshakeState::Armed {
            tracing::debug!(state = ?self.state, "ignoring provider event outside armed state");
            return;
        }
        self.events = None;

        let provider = self.provider();
        let (exit, result) = match event {
            NormalizedEvent::Success { credential_token } => {
                self.telemetry
                    .record(&TelemetryEvent::ExternalAuthSucceeded { provider });
                (
                    HandshakeExit::Succeeded,
                    HandshakeResult::ok(provider, credential_token),
                )
            }
            NormalizedEvent::Cancelled => {
                self.telemetry.record(&TelemetryEvent::AuthDeclined);
                (
                    HandshakeExit::UserCancelled,
                    HandshakeResult::cancelled(provider),
                )
            }
            NormalizedEvent::Failed { message } => {
                tracing::warn!(%provider, message = message.as_deref().unwrap_or_default(), "external auth failed");
                self.telemetry
                    .record(&TelemetryEvent::ExternalAuthFailed { provider, message });
                (
                    HandshakeExit::ProviderError,
                    HandshakeResult::cancelled(provider),
                )
            }
        };
        self.finish(exit, result);
    }

    /// Surface torn down while armed. Re-checks the SDK cache, since a
    /// credential may have landed without an event reaching us.
    pub fn on_surface_closed_without_event(&mut self) {
        if self.state != HandshakeState::Armed {
            tracing::debug!(state = ?self.state, "surface closed outside armed state");
            return;
        }
        self.events = None;

        self.telemetry.record(&TelemetryEvent::AuthDeclined);
        let provider = self.provider();
        let result = match self.bridge.current_credential() {
            Some(token) => HandshakeResult::ok(provider, token),
            None => HandshakeResult::cancelled(provider),
        };
        self.finish(HandshakeExit::ImplicitAbandon, result);
    }

    /// Delivers `result` to the requester unless a result was already
    /// delivered. Returns true if this call performed the delivery.
    ///
    /// A requester that no longer exists is skipped silently. Before `open`
    /// there is nobody to deliver to and the call is ignored.
    pub fn deliver(&mut self, result: HandshakeResult) -> bool {
        if self.state == HandshakeState::Delivered {
            tracing::debug!("result already delivered; dropping duplicate");
            return false;
        }
        let Some(request) = self.request.take() else {
            tracing::warn!("deliver called before open; dropping result");
            return false;
        };
        self.state = HandshakeState::Delivered;
        self.events = None;

        let correlation = request.correlation_token();
        match self.router.route(correlation) {
            Some(requester) => requester.on_handshake_result(correlation, result),
            None => tracing::debug!(%correlation, "requester gone; dropping result"),
        }
        true
    }

    fn finish(&mut self, exit: HandshakeExit, result: HandshakeResult) {
        tracing::info!(
            provider = %result.provider_kind(),
            outcome = %result.outcome(),
            %exit,
            "handshake finished"
        );
        self.deliver(result);
    }

    /// Passes a completion payload from the host surface to the bridge.
    pub fn forward_completion_envelope(&self, envelope: &CompletionEnvelope) {
        if self.state != HandshakeState::Armed {
            tracing::debug!(state = ?self.state, "no login in flight for completion envelope");
            return;
        }
        self.bridge.forward_completion_envelope(envelope);
    }

    /// Runs a full handshake on the current task.
    ///
    /// Opens the handshake (the surface has been shown), then waits for the
    /// bridge's event, forwarding envelopes from the surface meanwhile. A
    /// closed surface, or a bridge that dropped its sender without emitting,
    /// ends the handshake as an implicit cancel. Returns the final state,
    /// which is always `Delivered`.
    pub async fn run(
        &mut self,
        request: HandshakeRequest,
        surface: &mut SurfaceEvents,
    ) -> HandshakeState {
        self.open(request);

        let Some(mut events) = self.events.take() else {
            return self.state;
        };

        while self.state == HandshakeState::Armed {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::warn!("provider bridge dropped the handshake without an event");
                        self.on_surface_closed_without_event();
                    }
                },
                surface_event = surface.next() => match surface_event {
                    SurfaceEvent::Envelope(envelope) => {
                        self.forward_completion_envelope(&envelope);
                        // The SDK may settle synchronously while handling the envelope.
                        if let Some(event) = events.try_recv() {
                            self.handle_event(event);
                        }
                    }
                    SurfaceEvent::Closed => {
                        // An event that is already waiting beats the close.
                        match events.try_recv() {
                            Some(event) => self.handle_event(event),
                            None => self.on_surface_closed_without_event(),
                        }
                    }
                },
            }
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use passport_types::{CorrelationToken, CredentialToken, HandshakeOutcome, PermissionScope};

    use super::*;
    use crate::bridge::EventSender;
    use crate::requester::{OneshotRequester, Requester, RequesterRegistry};
    use crate::surface;

    #[derive(Default)]
    struct FakeBridge {
        cached: Mutex<Option<CredentialToken>>,
        armed: Mutex<Vec<PermissionScope>>,
        sender: Mutex<Option<EventSender>>,
        envelopes: Mutex<Vec<String>>,
        /// Emit this event as soon as an envelope arrives.
        settle_on_envelope: Mutex<Option<NormalizedEvent>>,
        /// Drop the sender inside `arm` without emitting.
        drop_sender_on_arm: Mutex<bool>,
    }

    impl FakeBridge {
        fn with_cached(token: &str) -> Self {
            let bridge = Self::default();
            *bridge.cached.lock().unwrap() = Some(token.into());
            bridge
        }

        fn emit(&self, event: NormalizedEvent) {
            let sender = self.sender.lock().unwrap().take().expect("bridge not armed");
            sender.emit(event);
        }

        fn arm_count(&self) -> usize {
            self.armed.lock().unwrap().len()
        }
    }

    impl ProviderBridge for FakeBridge {
        fn provider_kind(&self) -> ProviderKind {
            ProviderKind::Facebook
        }

        fn current_credential(&self) -> Option<CredentialToken> {
            self.cached.lock().unwrap().clone()
        }

        fn arm(&self, scope: &PermissionScope, on_event: EventSender) {
            self.armed.lock().unwrap().push(scope.clone());
            if *self.drop_sender_on_arm.lock().unwrap() {
                return;
            }
            *self.sender.lock().unwrap() = Some(on_event);
        }

        fn forward_completion_envelope(&self, envelope: &CompletionEnvelope) {
            self.envelopes
                .lock()
                .unwrap()
                .push(envelope.as_str().to_string());
            if let Some(event) = self.settle_on_envelope.lock().unwrap().take() {
                self.emit(event);
            }
        }
    }

    #[derive(Default)]
    struct RecordingTelemetry(Mutex<Vec<TelemetryEvent>>);

    impl RecordingTelemetry {
        fn events(&self) -> Vec<TelemetryEvent> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, name: &str) -> usize {
            self.events().iter().filter(|e| e.name() == name).count()
        }
    }

    impl Telemetry for RecordingTelemetry {
        fn record(&self, event: &TelemetryEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[derive(Default)]
    struct CollectingRequester(Mutex<Vec<(CorrelationToken, HandshakeResult)>>);

    impl CollectingRequester {
        fn results(&self) -> Vec<(CorrelationToken, HandshakeResult)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Requester for CollectingRequester {
        fn on_handshake_result(&self, correlation: &CorrelationToken, result: HandshakeResult) {
            self.0
                .lock()
                .unwrap()
                .push((correlation.clone(), result));
        }
    }

    struct Harness {
        controller: HandshakeController<FakeBridge>,
        requester: Arc<CollectingRequester>,
        telemetry: Arc<RecordingTelemetry>,
        registry: Arc<RequesterRegistry>,
    }

    impl Harness {
        fn new(bridge: FakeBridge) -> Self {
            let registry = Arc::new(RequesterRegistry::new());
            let requester = Arc::new(CollectingRequester::default());
            let as_dyn: Arc<dyn Requester> = Arc::clone(&requester) as Arc<dyn Requester>;
            registry.register("req-1".into(), &as_dyn);
            let telemetry = Arc::new(RecordingTelemetry::default());
            let controller = HandshakeController::new(
                bridge,
                Arc::clone(&registry) as Arc<dyn ResultRouter>,
                Arc::clone(&telemetry) as Arc<dyn Telemetry>,
            );
            Self {
                controller,
                requester,
                telemetry,
                registry,
            }
        }

        fn bridge(&self) -> &FakeBridge {
            self.controller.bridge()
        }

        fn single_result(&self) -> HandshakeResult {
            let results = self.requester.results();
            assert_eq!(results.len(), 1, "expected exactly one delivery");
            assert_eq!(results[0].0.as_str(), "req-1");
            results[0].1.clone()
        }
    }

    fn request() -> HandshakeRequest {
        HandshakeRequest::new(
            "req-1",
            PermissionScope::from_iter(["email", "public_profile"]),
            ProviderKind::Facebook,
        )
    }

    #[test]
    fn test_cached_credential_short_circuits() {
        let mut h = Harness::new(FakeBridge::with_cached("cached1"));

        h.controller.open(request());

        assert_eq!(h.controller.state(), HandshakeState::Delivered);
        assert_eq!(h.bridge().arm_count(), 0);
        let result = h.single_result();
        assert_eq!(result.outcome(), HandshakeOutcome::Ok);
        assert_eq!(result.credential_token().unwrap().expose(), "cached1");
        assert_eq!(h.telemetry.count("prompt_shown"), 0);
    }

    #[test]
    fn test_no_credential_arms_once_and_shows_prompt() {
        let mut h = Harness::new(FakeBridge::default());

        h.controller.open(request());

        assert_eq!(h.controller.state(), HandshakeState::Armed);
        assert_eq!(h.bridge().arm_count(), 1);
        assert_eq!(
            h.bridge().armed.lock().unwrap()[0],
            PermissionScope::from_iter(["email", "public_profile"])
        );
        assert_eq!(h.telemetry.events(), vec![TelemetryEvent::PromptShown]);
        assert!(h.requester.results().is_empty());
    }

    #[test]
    fn test_success_event_delivers_ok() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());

        h.controller.handle_event(NormalizedEvent::success("tok123"));

        let result = h.single_result();
        assert!(result.is_ok());
        assert_eq!(result.credential_token().unwrap().expose(), "tok123");
        assert_eq!(result.provider_kind(), ProviderKind::Facebook);
        assert!(h.telemetry.events().contains(&TelemetryEvent::ExternalAuthSucceeded {
            provider: ProviderKind::Facebook
        }));
        assert_eq!(h.controller.state(), HandshakeState::Delivered);
    }

    #[test]
    fn test_cancelled_event_delivers_cancelled() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());

        h.controller.handle_event(NormalizedEvent::Cancelled);

        let result = h.single_result();
        assert_eq!(result.outcome(), HandshakeOutcome::Cancelled);
        assert!(result.credential_token().is_none());
        assert_eq!(h.telemetry.count("auth_declined"), 1);
    }

    #[test]
    fn test_failed_event_delivers_cancelled_with_message_in_telemetry() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());

        h.controller
            .handle_event(NormalizedEvent::failed(Some("network error".to_string())));

        assert_eq!(h.single_result().outcome(), HandshakeOutcome::Cancelled);
        assert!(h.telemetry.events().contains(&TelemetryEvent::ExternalAuthFailed {
            provider: ProviderKind::Facebook,
            message: Some("network error".to_string()),
        }));
        assert_eq!(h.telemetry.count("auth_declined"), 0);
    }

    #[test]
    fn test_failed_event_without_message() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());

        h.controller.handle_event(NormalizedEvent::Failed { message: None });

        assert_eq!(h.single_result().outcome(), HandshakeOutcome::Cancelled);
        assert!(h.telemetry.events().contains(&TelemetryEvent::ExternalAuthFailed {
            provider: ProviderKind::Facebook,
            message: None,
        }));
    }

    #[test]
    fn test_surface_closed_uses_late_credential() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());
        *h.bridge().cached.lock().unwrap() = Some("tokX".into());

        h.controller.on_surface_closed_without_event();

        let result = h.single_result();
        assert!(result.is_ok());
        assert_eq!(result.credential_token().unwrap().expose(), "tokX");
        assert_eq!(h.telemetry.count("auth_declined"), 1);
    }

    #[test]
    fn test_surface_closed_without_credential_is_cancelled() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());

        h.controller.on_surface_closed_without_event();

        assert_eq!(h.single_result().outcome(), HandshakeOutcome::Cancelled);
    }

    #[test]
    fn test_second_event_is_ignored() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());

        h.controller.handle_event(NormalizedEvent::success("tok123"));
        h.controller.handle_event(NormalizedEvent::Cancelled);
        h.controller.on_surface_closed_without_event();

        assert!(h.single_result().is_ok());
        assert_eq!(h.telemetry.count("auth_declined"), 0);
    }

    #[test]
    fn test_deliver_twice_delivers_once() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());
        let result = HandshakeResult::ok(ProviderKind::Facebook, "tok123".into());

        assert!(h.controller.deliver(result.clone()));
        assert!(!h.controller.deliver(result));

        assert_eq!(h.requester.results().len(), 1);
    }

    #[test]
    fn test_event_before_open_is_ignored() {
        let mut h = Harness::new(FakeBridge::default());

        h.controller.handle_event(NormalizedEvent::success("tok123"));

        assert_eq!(h.controller.state(), HandshakeState::Idle);
        assert!(h.requester.results().is_empty());
    }

    #[test]
    fn test_deliver_before_open_is_rejected() {
        let mut h = Harness::new(FakeBridge::default());
        let result = HandshakeResult::ok(ProviderKind::Facebook, "tok123".into());

        assert!(!h.controller.deliver(result));
        assert_eq!(h.controller.state(), HandshakeState::Idle);

        h.controller.open(request());
        assert_eq!(h.controller.state(), HandshakeState::Armed);
        h.controller.handle_event(NormalizedEvent::success("tok456"));
        assert_eq!(h.single_result().credential_token().unwrap().expose(), "tok456");
    }

    #[test]
    fn test_open_twice_is_ignored() {
        let mut h = Harness::new(FakeBridge::default());
        h.controller.open(request());
        h.controller.open(request());

        assert_eq!(h.bridge().arm_count(), 1);
        assert_eq!(h.telemetry.count("prompt_shown"), 1);
    }

    #[test]
    fn test_dead_requester_drops_result_silently() {
        let bridge = FakeBridge::default();
        let registry = Arc::new(RequesterRegistry::new());
        {
            let requester: Arc<dyn Requester> = Arc::new(CollectingRequester::default());
            registry.register("req-1".into(), &requester);
        }
        let telemetry = Arc::new(RecordingTelemetry::default());
        let mut controller = HandshakeController::new(
            bridge,
            Arc::clone(&registry) as Arc<dyn ResultRouter>,
            telemetry as Arc<dyn Telemetry>,
        );
        controller.open(request());

        controller.handle_event(NormalizedEvent::success("tok123"));

        assert_eq!(controller.state(), HandshakeState::Delivered);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregistered_requester_is_not_an_error() {
        let mut h = Harness::new(FakeBridge::default());
        h.registry.unregister(&"req-1".into());
        h.controller.open(request());

        h.controller.handle_event(NormalizedEvent::Cancelled);

        assert_eq!(h.controller.state(), HandshakeState::Delivered);
        assert!(h.requester.results().is_empty());
    }

    #[test]
    fn test_envelope_forwarded_only_while_armed() {
        let mut h = Harness::new(FakeBridge::default());
        let envelope = CompletionEnvelope::new("/callback?code=abc");

        h.controller.forward_completion_envelope(&envelope);
        assert!(h.bridge().envelopes.lock().unwrap().is_empty());

        h.controller.open(request());
        h.controller.forward_completion_envelope(&envelope);
        assert_eq!(h.bridge().envelopes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_exit_display_is_snake_case() {
        assert_eq!(HandshakeExit::ImplicitAbandon.to_string(), "implicit_abandon");
        assert_eq!(HandshakeExit::ShortCircuit.to_string(), "short_circuit");
    }

    #[tokio::test]
    async fn test_run_short_circuits_without_waiting() {
        let mut h = Harness::new(FakeBridge::with_cached("cached1"));
        let (_handle, mut events) = surface::channel();

        let state = h.controller.run(request(), &mut events).await;

        assert_eq!(state, HandshakeState::Delivered);
        assert_eq!(h.single_result().credential_token().unwrap().expose(), "cached1");
    }

    #[tokio::test]
    async fn test_run_closes_as_cancel() {
        let mut h = Harness::new(FakeBridge::default());
        let (handle, mut events) = surface::channel();
        handle.close();

        let state = h.controller.run(request(), &mut events).await;

        assert_eq!(state, HandshakeState::Delivered);
        assert_eq!(h.single_result().outcome(), HandshakeOutcome::Cancelled);
        assert_eq!(h.telemetry.count("auth_declined"), 1);
    }

    #[tokio::test]
    async fn test_run_settles_through_forwarded_envelope() {
        let bridge = FakeBridge::default();
        *bridge.settle_on_envelope.lock().unwrap() = Some(NormalizedEvent::success("tok123"));
        let mut h = Harness::new(bridge);
        let (handle, mut events) = surface::channel();
        handle.forward_envelope(CompletionEnvelope::new("/callback?code=tok123"));
        // Queued after the envelope; must not win over the settled event.
        handle.close();

        h.controller.run(request(), &mut events).await;

        let result = h.single_result();
        assert!(result.is_ok());
        assert_eq!(result.credential_token().unwrap().expose(), "tok123");
        assert_eq!(h.telemetry.count("auth_declined"), 0);
    }

    #[tokio::test]
    async fn test_run_treats_dropped_sender_as_abandon() {
        let bridge = FakeBridge::default();
        *bridge.drop_sender_on_arm.lock().unwrap() = true;
        let mut h = Harness::new(bridge);
        let (_handle, mut events) = surface::channel();

        let state = h.controller.run(request(), &mut events).await;

        assert_eq!(state, HandshakeState::Delivered);
        assert_eq!(h.single_result().outcome(), HandshakeOutcome::Cancelled);
        assert_eq!(h.telemetry.count("auth_declined"), 1);
    }

    #[tokio::test]
    async fn test_run_delivers_to_oneshot_requester() {
        let registry = Arc::new(RequesterRegistry::new());
        let (requester, rx) = OneshotRequester::channel();
        let as_dyn: Arc<dyn Requester> = requester;
        registry.register("req-1".into(), &as_dyn);
        let bridge = FakeBridge::default();
        *bridge.settle_on_envelope.lock().unwrap() = Some(NormalizedEvent::Cancelled);
        let mut controller = HandshakeController::new(
            bridge,
            registry as Arc<dyn ResultRouter>,
            Arc::new(crate::telemetry::NoopTelemetry) as Arc<dyn Telemetry>,
        );
        let (handle, mut events) = surface::channel();
        handle.forward_envelope(CompletionEnvelope::new("?error=access_denied"));

        controller.run(request(), &mut events).await;

        let result = rx.await.unwrap();
        assert_eq!(result.outcome(), HandshakeOutcome::Cancelled);
    }
}
