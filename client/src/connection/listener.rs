//! Subscription listeners.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

/// Receives the payloads of `notice` frames for one subscription.
///
/// Listeners are compared by identity, not by behaviour: unsubscribing
/// requires a clone of the exact listener that was used to subscribe.
/// Callbacks run on the connection's driver task, in socket-arrival order,
/// and must not block.
#[derive(Clone)]
pub struct Listener {
    callback: Arc<dyn Fn(Value) + Send + Sync>,
}

impl Listener {
    /// Wraps a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// A listener that forwards every payload into an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Self::new(move |payload| {
            let _ = tx.send(payload);
        });
        (listener, rx)
    }

    /// Whether `other` is a clone of this listener.
    pub fn same_as(&self, other: &Listener) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.callback) as *const (),
            Arc::as_ptr(&other.callback) as *const (),
        )
    }

    pub(crate) fn notify(&self, payload: Value) {
        (self.callback)(payload)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.callback) as *const ())
    }
}
