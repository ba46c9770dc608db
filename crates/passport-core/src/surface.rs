//! Host presentation surface hooks.
//!
//! The surface itself (a dialog, a terminal prompt) belongs to the host. The
//! controller only sees its lifecycle: completion envelopes the host received
//! on the provider's behalf, and the surface being closed.

use tokio::sync::mpsc;

use crate::bridge::CompletionEnvelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The host received a completion payload for the in-flight login.
    Envelope(CompletionEnvelope),
    /// The surface was dismissed or torn down.
    Closed,
}

/// Host-side handle. Cloneable; dropping every clone closes the surface.
#[derive(Debug, Clone)]
pub struct SurfaceHandle {
    tx: mpsc::UnboundedSender<SurfaceEvent>,
}

impl SurfaceHandle {
    /// Forwards a completion envelope to the controller.
    ///
    /// Returns false if the controller is no longer listening.
    pub fn forward_envelope(&self, envelope: CompletionEnvelope) -> bool {
        self.tx.send(SurfaceEvent::Envelope(envelope)).is_ok()
    }

    /// Signals that the surface was torn down.
    pub fn close(&self) {
        let _ = self.tx.send(SurfaceEvent::Closed);
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Controller-side end of the surface hooks.
#[derive(Debug)]
pub struct SurfaceEvents {
    rx: mpsc::UnboundedReceiver<SurfaceEvent>,
}

impl SurfaceEvents {
    /// Waits for the next surface event. Returns `Closed` once every handle is gone.
    pub async fn next(&mut self) -> SurfaceEvent {
        self.rx.recv().await.unwrap_or(SurfaceEvent::Closed)
    }
}

pub fn channel() -> (SurfaceHandle, SurfaceEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SurfaceHandle { tx }, SurfaceEvents { rx })
}
