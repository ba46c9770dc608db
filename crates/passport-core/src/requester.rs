//! Routing handshake results back to whoever asked for them.
//!
//! The controller never owns its requester. It keeps the correlation token
//! and asks a [`ResultRouter`] for the requester at delivery time; a requester
//! that has gone away is a normal outcome, not an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use passport_types::{CorrelationToken, HandshakeResult};
use tokio::sync::oneshot;

/// Receives the result of a handshake it opened.
pub trait Requester: Send + Sync {
    fn on_handshake_result(&self, correlation: &CorrelationToken, result: HandshakeResult);
}

/// Looks up a live requester by correlation token.
pub trait ResultRouter: Send + Sync {
    fn route(&self, correlation: &CorrelationToken) -> Option<Arc<dyn Requester>>;
}

/// Correlation token -> weakly held requester.
#[derive(Default)]
pub struct RequesterRegistry {
    entries: Mutex<HashMap<CorrelationToken, Weak<dyn Requester>>>,
}

impl RequesterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `requester` under `correlation`, replacing any previous entry.
    ///
    /// Only a weak reference is kept; the caller decides how long it lives.
    pub fn register(&self, correlation: CorrelationToken, requester: &Arc<dyn Requester>) {
        self.lock().insert(correlation, Arc::downgrade(requester));
    }

    pub fn unregister(&self, correlation: &CorrelationToken) {
        self.lock().remove(correlation);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CorrelationToken, Weak<dyn Requester>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultRouter for RequesterRegistry {
    fn route(&self, correlation: &CorrelationToken) -> Option<Arc<dyn Requester>> {
        let mut entries = self.lock();
        let requester = entries.get(correlation)?.upgrade();
        if requester.is_none() {
            entries.remove(correlation);
        }
        requester
    }
}

/// Requester that hands its result to an awaiting task.
///
/// Only the first result is forwarded; later ones are ignored.
pub struct OneshotRequester {
    tx: Mutex<Option<oneshot::Sender<HandshakeResult>>>,
}

impl OneshotRequester {
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<HandshakeResult>) {
        let (tx, rx) = oneshot::channel();
        let requester = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (requester, rx)
    }
}

impl Requester for OneshotRequester {
    fn on_handshake_result(&self, correlation: &CorrelationToken, result: HandshakeResult) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => {
                if tx.send(result).is_err() {
                    tracing::debug!(%correlation, "result receiver dropped");
                }
            }
            None => tracing::warn!(%correlation, "ignoring second handshake result"),
        }
    }
}
