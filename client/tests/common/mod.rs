//! In-process stand-in for a Graphene node.
//!
//! Speaks just enough of the WebSocket API for the client to log in, bring
//! up sub-APIs, and run queries. Tests steer it with a responder closure and
//! a control channel for pushes, held replies, and hang-ups.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const CHAIN_ID: &str = "4018d7844c78f6a6c41c6a552b898022310fc5dec06da467ee7905a8dad512c8";

/// One `call` frame as the node saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub id: u64,
    pub api: Value,
    pub method: String,
    pub args: Vec<Value>,
}

impl Call {
    fn from_frame(frame: &Value) -> Option<Self> {
        let params = frame.get("params")?.as_array()?;
        Some(Self {
            id: frame.get("id")?.as_u64()?,
            api: params.first()?.clone(),
            method: params.get(1)?.as_str()?.to_string(),
            args: params.get(2).and_then(Value::as_array).cloned().unwrap_or_default(),
        })
    }

    pub fn is_login(&self) -> bool {
        self.api == json!(1)
    }
}

/// How the node answers one call.
#[derive(Debug, Clone)]
pub enum Action {
    Reply(Value),
    Fail(String),
    /// Keep the reply until [`StubNode::release_held`].
    Hold(Value),
    /// Never answer.
    Ignore,
    /// Drop the socket without a close frame.
    Hangup,
}

/// Custom behaviour. Returning `None` falls back to the default answers.
pub type Responder = Arc<dyn Fn(&Call) -> Option<Action> + Send + Sync>;

#[derive(Debug, Clone)]
enum Control {
    Push(Value),
    ReleaseHeld,
    Hangup,
}

struct NodeState {
    responder: Responder,
    calls: Mutex<Vec<Call>>,
    connections: AtomicUsize,
    control: broadcast::Sender<Control>,
}

pub struct StubNode {
    addr: SocketAddr,
    state: Arc<NodeState>,
}

impl StubNode {
    /// A node that answers everything with the defaults.
    pub async fn start() -> Self {
        Self::start_with(|_| None).await
    }

    pub async fn start_with<F>(responder: F) -> Self
    where
        F: Fn(&Call) -> Option<Action> + Send + Sync + 'static,
    {
        let (control, _) = broadcast::channel(64);
        let state = Arc::new(NodeState {
            responder: Arc::new(responder),
            calls: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            control,
        });

        let app = Router::new()
            .route("/", get(ws_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Every call received so far, across all sockets.
    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.method == method).collect()
    }

    /// Sockets accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Sends a `notice` frame on every open socket.
    pub fn push_notice(&self, subscription_id: u64, payload: Value) {
        let frame = json!({"method": "notice", "params": [subscription_id, payload]});
        let _ = self.state.control.send(Control::Push(frame));
    }

    /// Answers every held call, newest first.
    pub fn release_held(&self) {
        let _ = self.state.control.send(Control::ReleaseHeld);
    }

    /// Drops every open socket without a close frame.
    pub fn hangup(&self) {
        let _ = self.state.control.send(Control::Hangup);
    }

    /// Polls until `count` calls to `method` have arrived.
    pub async fn wait_for_calls(&self, method: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls_to(method).len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {count} {method} calls"));
    }
}

/// What a healthy public node would answer.
pub fn default_answer(call: &Call) -> Action {
    if call.is_login() {
        return match call.method.as_str() {
            "login" => Action::Reply(json!(true)),
            "database" => Action::Reply(json!(2)),
            "history" => Action::Reply(json!(3)),
            "network_broadcast" => Action::Reply(json!(4)),
            "orders" => Action::Reply(json!(5)),
            "crypto" => Action::Reply(json!(6)),
            other => Action::Fail(format!("unknown api {other}")),
        };
    }

    match call.method.as_str() {
        "get_chain_id" => Action::Reply(json!(CHAIN_ID)),
        "get_objects" => {
            let ids = call.args.first().and_then(Value::as_array).cloned().unwrap_or_default();
            Action::Reply(Value::Array(
                ids.into_iter().map(|id| json!({ "id": id })).collect(),
            ))
        }
        "get_next_object_id" => Action::Reply(json!("1.3.12")),
        "get_dynamic_global_properties" => {
            Action::Reply(json!({"id": "2.1.0", "head_block_number": 1000}))
        }
        "set_subscribe_callback"
        | "subscribe_to_market"
        | "set_block_applied_callback"
        | "set_pending_transaction_callback"
        | "unsubscribe_from_market"
        | "unsubscribe_from_accounts" => Action::Reply(Value::Null),
        other => Action::Fail(format!("method {other} not found")),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<NodeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<NodeState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut control = state.control.subscribe();
    let mut held: Vec<(u64, Value)> = Vec::new();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Some(call) = serde_json::from_str::<Value>(&text)
                    .ok()
                    .as_ref()
                    .and_then(Call::from_frame)
                else {
                    continue;
                };
                state.calls.lock().push(call.clone());

                let action = (state.responder)(&call).unwrap_or_else(|| default_answer(&call));
                let frame = match action {
                    Action::Reply(result) => {
                        json!({"id": call.id, "jsonrpc": "2.0", "result": result})
                    }
                    Action::Fail(message) => json!({
                        "id": call.id,
                        "jsonrpc": "2.0",
                        "error": {"code": 1, "message": message, "data": {}}
                    }),
                    Action::Hold(result) => {
                        held.push((call.id, result));
                        continue;
                    }
                    Action::Ignore => continue,
                    Action::Hangup => return,
                };
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }
            ctl = control.recv() => match ctl {
                Ok(Control::Push(frame)) => {
                    if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::ReleaseHeld) => {
                    for (id, result) in held.drain(..).rev() {
                        let frame = json!({"id": id, "jsonrpc": "2.0", "result": result});
                        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(Control::Hangup) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}
