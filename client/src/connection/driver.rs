//! The task that owns the socket.
//!
//! Exactly one driver runs per connection. It alone touches the socket and
//! the call table; handles talk to it over a command channel, so the
//! heartbeat ticker and the receive path never race.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use super::heartbeat::{Beat, Heartbeat};
use super::router::{Delivery, OutgoingCall, ReplySlot, Router};
use super::{CloseReason, ConnectionEvent, ConnectionState, Shared};
use crate::config::{self, ConnectOptions};
use crate::error::ApiError;
use crate::wire::{CallRequest, Incoming, ServiceId};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Messages from connection handles to the driver.
#[derive(Debug)]
pub(crate) enum Command {
    Call { call: OutgoingCall, reply: ReplySlot },
    Close { done: oneshot::Sender<()> },
}

/// Why [`Driver::serve`] returned.
enum Exit {
    /// `close()` was called, or every handle was dropped.
    Requested(Option<oneshot::Sender<()>>),
    /// The socket went away without being asked to.
    Dropped(CloseReason),
}

/// Opens a socket, bounded by `timeout`.
pub(crate) async fn open_socket(endpoint: &str, timeout: Duration) -> Result<WsStream, ApiError> {
    match time::timeout(timeout, connect_async(endpoint)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(ApiError::ConnectFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ApiError::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

pub(crate) struct Driver {
    endpoint: String,
    options: ConnectOptions,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    router: Router,
    heartbeat: Heartbeat,
}

impl Driver {
    pub(crate) fn new(
        endpoint: String,
        options: ConnectOptions,
        shared: Arc<Shared>,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let heartbeat = Heartbeat::new(options.max_send_life, options.max_recv_life);
        Self {
            endpoint,
            options,
            shared,
            commands,
            events,
            router: Router::new(),
            heartbeat,
        }
    }

    pub(crate) async fn run(mut self, mut ws: WsStream) {
        let reason = loop {
            match self.serve(&mut ws).await {
                Exit::Requested(done) => {
                    self.shutdown(ws).await;
                    self.finish(CloseReason::Requested);
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    return;
                }
                Exit::Dropped(reason) => {
                    warn!(endpoint = %self.endpoint, %reason, "connection dropped");
                    if let CloseReason::Transport(detail) = &reason {
                        let _ = self.events.send(ConnectionEvent::Error(detail.clone()));
                    }
                    if !self.options.auto_reconnect {
                        break reason;
                    }
                    match self.reconnect().await {
                        Ok(fresh) => ws = fresh,
                        Err(e) => break CloseReason::ReconnectFailed(e.to_string()),
                    }
                }
            }
        };

        self.finish(reason);
    }

    /// Pumps commands, frames, and heartbeat ticks until the socket is
    /// closed one way or another.
    async fn serve(&mut self, ws: &mut WsStream) -> Exit {
        let period = self.options.heartbeat_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Call { call, reply }) => {
                        let Some(request) = self.router.register(call, reply) else {
                            continue;
                        };
                        self.heartbeat.on_send();
                        if let Err(e) = send(ws, &request).await {
                            return Exit::Dropped(CloseReason::Transport(e));
                        }
                    }
                    Some(Command::Close { done }) => return Exit::Requested(Some(done)),
                    None => return Exit::Requested(None),
                },
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.heartbeat.on_receive();
                        self.dispatch(text.as_str());
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.heartbeat.on_receive();
                        match std::str::from_utf8(&bytes) {
                            Ok(text) => self.dispatch(text),
                            Err(_) => warn!(len = bytes.len(), "non-utf8 binary frame, dropping"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Exit::Dropped(CloseReason::Remote);
                    }
                    Some(Ok(_)) => self.heartbeat.on_receive(),
                    Some(Err(e)) => return Exit::Dropped(CloseReason::Transport(e.to_string())),
                },
                _ = ticker.tick() => match self.heartbeat.tick() {
                    Beat::Idle => {}
                    Beat::Probe => {
                        if let Err(e) = self.keepalive(ws).await {
                            return Exit::Dropped(CloseReason::Transport(e));
                        }
                    }
                    Beat::Dead => {
                        error!(endpoint = %self.endpoint, "connection is dead, terminating socket");
                        return Exit::Dropped(CloseReason::DeadConnection);
                    }
                },
            }
        }
    }

    fn dispatch(&mut self, text: &str) {
        let frame = match Incoming::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unparseable frame, dropping");
                return;
            }
        };
        match self.router.route(frame) {
            Delivery::Settled { id, ok } => trace!(id, ok, "reply routed"),
            Delivery::Notified { subscription_id } => trace!(subscription_id, "notice routed"),
            Delivery::Dropped => debug!("frame had no recipient"),
        }
    }

    /// Sends a cheap read-only query so an idle link still sees traffic.
    /// Nobody waits for the reply; its arrival refills the receive budget.
    async fn keepalive(&mut self, ws: &mut WsStream) -> Result<(), String> {
        let (reply, _discarded) = oneshot::channel();
        let probe = OutgoingCall {
            service: ServiceId::Name("database".to_string()),
            method: "get_objects".to_string(),
            args: vec![json!([config::KEEPALIVE_OBJECT_ID])],
            listener: None,
        };
        let Some(request) = self.router.register(probe, reply) else {
            return Ok(());
        };
        debug!(id = request.id, in_flight = self.router.in_flight(), "keepalive");
        self.heartbeat.on_send();
        send(ws, &request).await
    }

    /// One attempt to replace the socket after an involuntary drop.
    async fn reconnect(&mut self) -> Result<WsStream, ApiError> {
        let rejected = self.router.fail_outstanding();
        self.shared.set_state(ConnectionState::Reconnecting);
        info!(endpoint = %self.endpoint, rejected, "reconnecting");

        let ws = open_socket(&self.endpoint, self.options.connect_timeout).await?;

        self.heartbeat.reset();
        self.shared.set_state(ConnectionState::Open);
        info!(endpoint = %self.endpoint, "reconnected");
        let _ = self.events.send(ConnectionEvent::Reconnected);
        Ok(ws)
    }

    /// Polite close: send a close frame and wait briefly for the peer's.
    async fn shutdown(&mut self, mut ws: WsStream) {
        self.shared.set_state(ConnectionState::Closing);
        if let Err(e) = ws.close(None).await {
            debug!(error = %e, "close frame not sent");
            return;
        }
        let drained = time::timeout(config::CLOSE_GRACE_PERIOD, async {
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!(endpoint = %self.endpoint, "peer did not acknowledge close");
        }
    }

    /// Runs exactly once per driver, after the last socket is gone.
    fn finish(&mut self, reason: CloseReason) {
        let subscriptions = self.router.subscriptions();
        let rejected = self.router.fail_outstanding();
        self.shared.set_state(ConnectionState::Closed);
        info!(
            endpoint = %self.endpoint,
            %reason,
            rejected,
            subscriptions,
            last_call_id = self.router.next_call_id(),
            last_delivered_id = self.router.last_delivered_id(),
            "connection closed"
        );
        let _ = self.events.send(ConnectionEvent::Closed(reason));
    }
}

async fn send(ws: &mut WsStream, request: &CallRequest) -> Result<(), String> {
    let text = request.to_text().map_err(|e| e.to_string())?;
    debug!(id = request.id, method = request.method_name(), "call");
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("socket write failed: {}", e))
}
