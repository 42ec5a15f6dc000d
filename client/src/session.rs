//! # Session
//!
//! A session is what callers hold on to. It owns one [`Connection`], logs
//! in, brings up the enabled sub-APIs in a fixed order, discovers the chain
//! id, and reacts to the connection's lifecycle:
//!
//! - **reconnect**: log in again and bring every enabled API back up, in the
//!   same order. The status callback sees `reconnect` once the database API
//!   is usable again.
//! - **close**: drop every proxy, move to [`SessionState::Closed`], and fire
//!   the close callback exactly once.
//!
//! Sessions are explicit handles. Any number of them may coexist, each with
//! its own socket.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::capability::{Capability, CapabilitySet};
use crate::config::ConnectOptions;
use crate::connection::{Connection, ConnectionEvent};
use crate::error::ApiError;
use crate::proxy::ServiceProxy;
use crate::wire::{RpcError, ServiceId};

pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// Status & State
// ---------------------------------------------------------------------------

/// What the status callback is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Open,
    Error,
    Closed,
    Reconnect,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Open => f.write_str("open"),
            ConnectionStatus::Error => f.write_str("error"),
            ConnectionStatus::Closed => f.write_str("closed"),
            ConnectionStatus::Reconnect => f.write_str("reconnect"),
        }
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    LoggingIn,
    BringingUpServices,
    Ready,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::LoggingIn => "logging_in",
            SessionState::BringingUpServices => "bringing_up_services",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Everything a session is configured with. Fixed once the session connects.
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Sub-APIs to bring up. At least one is required.
    pub capabilities: CapabilitySet,
    /// Socket options, including `auto_reconnect`.
    pub connect: ConnectOptions,
    /// Login credentials. Public nodes accept empty ones.
    pub username: String,
    pub password: String,
    status_callback: Option<StatusCallback>,
    close_callback: Option<CloseCallback>,
}

impl SessionOptions {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn with_connect_options(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect = self.connect.with_connect_timeout(timeout);
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.connect = self.connect.with_auto_reconnect(enabled);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Called with every [`ConnectionStatus`] change.
    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.status_callback = Some(Arc::new(callback));
        self
    }

    /// Called once when the session closes, however it closes.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close_callback = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("capabilities", &self.capabilities)
            .field("connect", &self.connect)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("status_callback", &self.status_callback.is_some())
            .field("close_callback", &self.close_callback.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle to a logged-in connection and its sub-APIs.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    options: SessionOptions,
    state: RwLock<SessionState>,
    connection: RwLock<Option<Connection>>,
    proxies: RwLock<HashMap<Capability, ServiceProxy>>,
    chain_id: RwLock<Option<String>>,
    close_notified: AtomicBool,
}

impl Session {
    /// Opens the socket. Does not log in; see [`init`](Self::init).
    ///
    /// Fails with [`ApiError::NotConfigured`] before any network activity
    /// when the endpoint is empty or no capability is enabled.
    pub async fn connect(endpoint: &str, options: SessionOptions) -> Result<Self, ApiError> {
        if endpoint.trim().is_empty() {
            return Err(ApiError::NotConfigured("endpoint is empty".to_string()));
        }
        if options.capabilities.is_empty() {
            return Err(ApiError::NotConfigured(
                "at least one API must be enabled".to_string(),
            ));
        }

        let session = Session {
            inner: Arc::new(SessionInner {
                options,
                state: RwLock::new(SessionState::Disconnected),
                connection: RwLock::new(None),
                proxies: RwLock::new(HashMap::new()),
                chain_id: RwLock::new(None),
                close_notified: AtomicBool::new(false),
            }),
        };

        session.inner.set_state(SessionState::Connecting);
        match Connection::connect(endpoint, session.inner.options.connect.clone()).await {
            Ok(connection) => {
                *session.inner.connection.write() = Some(connection);
                session.inner.report(ConnectionStatus::Open);
                Ok(session)
            }
            Err(e) => {
                warn!(endpoint, error = %e, "session connect failed");
                session.inner.set_state(SessionState::Disconnected);
                session.inner.report(ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    /// Logs in and brings up every enabled API, in order, one at a time.
    ///
    /// On failure the connection is closed and the error returned. APIs
    /// brought up before the failure stay reachable through the accessors,
    /// but calls on them report [`ApiError::NotConnected`].
    pub async fn init(&self) -> Result<(), ApiError> {
        let connection = self.connection()?;
        if !connection.is_open() {
            return Err(ApiError::NotConnected);
        }

        // Subscribed before login so nothing is missed; only watched once
        // bring-up succeeds.
        let events = connection.events();

        match self.bring_up(&connection).await {
            Ok(()) => {
                self.inner.set_state(SessionState::Ready);
                spawn_watcher(Arc::downgrade(&self.inner), events);
                info!(
                    endpoint = connection.endpoint(),
                    apis = self.inner.proxies.read().len(),
                    chain_id = ?self.inner.chain_id.read().as_deref(),
                    "session ready"
                );
                Ok(())
            }
            Err(e) => {
                error!(endpoint = connection.endpoint(), error = %e, "session init failed");
                drop(events);
                connection.close().await;
                self.inner.set_state(SessionState::Closed);
                self.inner.notify_closed();
                Err(e)
            }
        }
    }

    /// [`connect`](Self::connect) then [`init`](Self::init).
    pub async fn open(endpoint: &str, options: SessionOptions) -> Result<Self, ApiError> {
        let session = Self::connect(endpoint, options).await?;
        session.init().await?;
        Ok(session)
    }

    /// Closes `previous` completely, then opens a replacement.
    pub async fn reset(
        previous: &Session,
        endpoint: &str,
        options: SessionOptions,
    ) -> Result<Self, ApiError> {
        previous.close().await;
        Self::open(endpoint, options).await
    }

    /// Closes the socket and drops every API. Idempotent.
    pub async fn close(&self) {
        let connection = self.inner.connection.read().clone();
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.inner.teardown();
    }

    async fn bring_up(&self, connection: &Connection) -> Result<(), ApiError> {
        self.inner.set_state(SessionState::LoggingIn);
        login(connection, &self.inner.options).await?;

        self.inner.set_state(SessionState::BringingUpServices);
        for capability in self.inner.options.capabilities.iter() {
            let proxy = ServiceProxy::new(capability, connection.clone());
            proxy.bring_up().await?;
            if capability == Capability::Database {
                let chain_id = fetch_chain_id(&proxy).await?;
                info!(%chain_id, "chain id discovered");
                *self.inner.chain_id.write() = Some(chain_id);
            }
            self.inner.proxies.write().insert(capability, proxy);
        }
        Ok(())
    }

    /// Re-establishes every API on a reconnected socket.
    async fn restore(&self) -> Result<(), ApiError> {
        let connection = self.connection()?;
        self.inner.set_state(SessionState::BringingUpServices);
        login(&connection, &self.inner.options).await?;

        let proxies: Vec<ServiceProxy> = {
            let map = self.inner.proxies.read();
            Capability::BRING_UP_ORDER
                .iter()
                .filter_map(|capability| map.get(capability).cloned())
                .collect()
        };

        let mut reported = false;
        for proxy in &proxies {
            proxy.bring_up().await?;
            if proxy.capability() == Capability::Database {
                self.inner.report(ConnectionStatus::Reconnect);
                reported = true;
            }
        }
        if !reported {
            self.inner.report(ConnectionStatus::Reconnect);
        }

        self.inner.set_state(SessionState::Ready);
        info!(endpoint = connection.endpoint(), apis = proxies.len(), "session restored");
        Ok(())
    }

    // -- accessors ----------------------------------------------------------

    /// The proxy for `capability`.
    pub fn api(&self, capability: Capability) -> Result<ServiceProxy, ApiError> {
        if self.inner.connection.read().is_none() {
            return Err(ApiError::NotConnected);
        }
        self.inner
            .proxies
            .read()
            .get(&capability)
            .cloned()
            .ok_or(ApiError::CapabilityDisabled(capability))
    }

    pub fn database_api(&self) -> Result<ServiceProxy, ApiError> {
        self.api(Capability::Database)
    }

    pub fn history_api(&self) -> Result<ServiceProxy, ApiError> {
        self.api(Capability::History)
    }

    pub fn network_api(&self) -> Result<ServiceProxy, ApiError> {
        self.api(Capability::NetworkBroadcast)
    }

    pub fn crypto_api(&self) -> Result<ServiceProxy, ApiError> {
        self.api(Capability::Crypto)
    }

    pub fn orders_api(&self) -> Result<ServiceProxy, ApiError> {
        self.api(Capability::Orders)
    }

    /// Chain id reported by the database API during init.
    pub fn chain_id(&self) -> Result<String, ApiError> {
        self.inner.chain_id.read().clone().ok_or(ApiError::ChainIdNotFound)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.inner.options.capabilities
    }

    /// The underlying connection, while the session has one.
    pub fn connection(&self) -> Result<Connection, ApiError> {
        self.inner.connection.read().clone().ok_or(ApiError::NotConnected)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("connection", &*self.inner.connection.read())
            .field("chain_id", &*self.inner.chain_id.read())
            .finish()
    }
}

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state");
        }
    }

    fn report(&self, status: ConnectionStatus) {
        debug!(%status, "connection status");
        if let Some(callback) = &self.options.status_callback {
            callback(status);
        }
    }

    fn teardown(&self) {
        self.proxies.write().clear();
        self.connection.write().take();
        self.chain_id.write().take();
        self.set_state(SessionState::Closed);
        self.notify_closed();
    }

    fn notify_closed(&self) {
        if self.close_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        self.report(ConnectionStatus::Closed);
        if let Some(callback) = &self.options.close_callback {
            callback();
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn login(connection: &Connection, options: &SessionOptions) -> Result<(), ApiError> {
    let accepted = connection
        .call(
            ServiceId::login(),
            "login",
            vec![json!(options.username), json!(options.password)],
            None,
        )
        .await?;

    if accepted == json!(false) {
        return Err(ApiError::Protocol(RpcError {
            code: 0,
            message: "login rejected".to_string(),
            data: None,
        }));
    }
    debug!(user = %options.username, "logged in");
    Ok(())
}

async fn fetch_chain_id(database: &ServiceProxy) -> Result<String, ApiError> {
    let reply = database.exec("get_chain_id", vec![]).await?;
    reply
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::Serialization(format!("chain id is not a string: {}", reply)))
}

/// Reacts to lifecycle events for as long as the session is alive and its
/// connection has not closed.
fn spawn_watcher(session: Weak<SessionInner>, mut events: broadcast::Receiver<ConnectionEvent>) {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle events lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(inner) = session.upgrade() else {
                break;
            };
            let session = Session { inner };

            match event {
                ConnectionEvent::Error(detail) => {
                    warn!(%detail, "connection error");
                    session.inner.report(ConnectionStatus::Error);
                }
                ConnectionEvent::Reconnected => {
                    session.inner.report(ConnectionStatus::Open);
                    if let Err(e) = session.restore().await {
                        error!(error = %e, "could not restore session after reconnect");
                        session.close().await;
                        break;
                    }
                }
                ConnectionEvent::Closed(reason) => {
                    info!(%reason, "session closed");
                    session.inner.teardown();
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn no_capabilities_is_a_configuration_error() {
        let err = Session::connect("ws://127.0.0.1:1", SessionOptions::new(CapabilitySet::none()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn empty_endpoint_is_a_configuration_error() {
        let err = Session::connect("", SessionOptions::new(CapabilitySet::all()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn failed_connect_reports_error_status() {
        let statuses = Arc::new(RwLock::new(Vec::new()));
        let seen = statuses.clone();
        let options = SessionOptions::new(CapabilitySet::database_only())
            .with_connect_timeout(Duration::from_millis(500))
            .on_status(move |status| seen.write().push(status));

        let err = Session::connect("ws://127.0.0.1:1", options).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::ConnectFailed { .. } | ApiError::ConnectTimeout { .. }
        ));
        assert_eq!(*statuses.read(), vec![ConnectionStatus::Error]);
    }

    #[test]
    fn statuses_use_wire_labels() {
        let labels: Vec<String> = [
            ConnectionStatus::Open,
            ConnectionStatus::Error,
            ConnectionStatus::Closed,
            ConnectionStatus::Reconnect,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(labels, ["open", "error", "closed", "reconnect"]);
    }

    #[test]
    fn options_debug_hides_password() {
        let options =
            SessionOptions::new(CapabilitySet::all()).with_credentials("alice", "hunter2");
        let printed = format!("{:?}", options);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn close_callback_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = SessionInner {
            options: SessionOptions::new(CapabilitySet::all())
                .on_close(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            state: RwLock::new(SessionState::Ready),
            connection: RwLock::new(None),
            proxies: RwLock::new(HashMap::new()),
            chain_id: RwLock::new(Some("abc".to_string())),
            close_notified: AtomicBool::new(false),
        };

        inner.teardown();
        inner.teardown();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*inner.state.read(), SessionState::Closed);
        assert!(inner.chain_id.read().is_none());
    }
}
