//! # Connection
//!
//! One WebSocket to one node. A [`Connection`] is a cheap, cloneable handle;
//! the socket itself lives in a driver task spawned by [`Connection::connect`]
//! and is never shared. Handles submit calls over a command channel and get
//! their replies back on oneshot channels, so any number of tasks may issue
//! calls concurrently.
//!
//! ## Lifecycle
//!
//! ```text
//! connect ──► Open ──drop──► Reconnecting ──ok──► Open
//!              │                   └─fail─► Closed
//!              └─close()─► Closing ──► Closed
//! ```
//!
//! Lifecycle changes are published as [`ConnectionEvent`]s on a broadcast
//! channel (see [`Connection::events`]). `Closed` is emitted exactly once.

mod driver;
mod heartbeat;
mod listener;
mod router;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::config::{self, ConnectOptions};
use crate::error::ApiError;
use crate::wire::ServiceId;

use driver::{Command, Driver};
use router::OutgoingCall;

pub use listener::Listener;
pub use router::{SUBSCRIBE_METHODS, UNSUBSCRIBE_METHODS};

// ---------------------------------------------------------------------------
// State & Events
// ---------------------------------------------------------------------------

/// Where the socket is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Calls are accepted.
    Open,
    /// The socket dropped and a replacement is being opened.
    Reconnecting,
    /// `close()` was called; waiting for the peer's close frame.
    Closing,
    /// Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Reconnecting => f.write_str("reconnecting"),
            ConnectionState::Closing => f.write_str("closing"),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// Why a connection reached [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Connection::close`] was called, or every handle was dropped.
    Requested,
    /// The node closed the socket.
    Remote,
    /// Nothing arrived for the whole receive budget.
    DeadConnection,
    /// The socket failed to read or write.
    Transport(String),
    /// The socket dropped and the single reconnect attempt failed.
    ReconnectFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed by client"),
            CloseReason::Remote => f.write_str("closed by node"),
            CloseReason::DeadConnection => f.write_str("heartbeat expired"),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
            CloseReason::ReconnectFailed(e) => write!(f, "reconnect failed: {}", e),
        }
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The socket reported an error. A `Reconnected` or `Closed` follows.
    Error(String),
    /// A fresh socket replaced a dropped one. Calls that were in flight were
    /// rejected and subscriptions are gone; sub-APIs must be brought up again.
    Reconnected,
    /// Terminal.
    Closed(CloseReason),
}

/// State visible to both the handles and the driver.
#[derive(Debug)]
pub(crate) struct Shared {
    state: RwLock<ConnectionState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Open),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to an open (or formerly open) connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    shared: Arc<Shared>,
}

impl Connection {
    /// Opens a socket to `endpoint` and starts its driver.
    ///
    /// Fails with [`ApiError::NotConfigured`] before any network activity if
    /// the endpoint is empty or the options are inconsistent.
    pub async fn connect(endpoint: &str, options: ConnectOptions) -> Result<Self, ApiError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(ApiError::NotConfigured("endpoint is empty".to_string()));
        }
        options.validate()?;

        debug!(endpoint, timeout_ms = options.connect_timeout.as_millis() as u64, "connecting");
        let ws = driver::open_socket(endpoint, options.connect_timeout).await?;
        info!(endpoint, "connection open");

        let (commands, command_rx) = mpsc::channel(config::COMMAND_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(config::EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared::new());

        let driver = Driver::new(
            endpoint.to_string(),
            options,
            shared.clone(),
            command_rx,
            events.clone(),
        );
        tokio::spawn(driver.run(ws));

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.to_string(),
                commands,
                events,
                shared,
            }),
        })
    }

    /// Issues one call and waits for its reply.
    ///
    /// `listener` is required for subscribe and unsubscribe methods (see
    /// [`SUBSCRIBE_METHODS`] and [`UNSUBSCRIBE_METHODS`]) and rejected for
    /// everything else.
    pub async fn call(
        &self,
        service: ServiceId,
        method: &str,
        args: Vec<Value>,
        listener: Option<Listener>,
    ) -> Result<Value, ApiError> {
        if !self.is_open() {
            return Err(ApiError::NotConnected);
        }

        let (reply, response) = oneshot::channel();
        let call = OutgoingCall {
            service,
            method: method.to_string(),
            args,
            listener,
        };
        self.inner
            .commands
            .send(Command::Call { call, reply })
            .await
            .map_err(|_| ApiError::NotConnected)?;

        // A dropped slot means the driver went away with the call queued.
        response.await.map_err(|_| ApiError::ConnectionClosed)?
    }

    /// Closes the socket and rejects every outstanding call. Returns once the
    /// driver has finished. Calling it again is a no-op.
    pub async fn close(&self) {
        let (done, finished) = oneshot::channel();
        if self.inner.commands.send(Command::Close { done }).await.is_err() {
            return;
        }
        let _ = finished.await;
    }

    /// Subscribes to lifecycle events. Only events sent after this call are
    /// observed.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
