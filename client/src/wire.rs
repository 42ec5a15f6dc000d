//! # Wire Frames
//!
//! The Graphene WebSocket API speaks a JSON-RPC dialect with one frame per
//! WebSocket text message. Three shapes exist:
//!
//! | Direction | Shape                                                        |
//! |-----------|--------------------------------------------------------------|
//! | out       | `{"method":"call","params":[api, method, [args]],"id":N}`    |
//! | in        | `{"id":N,"result":...}` or `{"id":N,"error":{...}}`          |
//! | in        | `{"method":"notice","params":[subscription_id,[events]]}`    |
//!
//! The first element of an outgoing call's `params` addresses the sub-API,
//! either by the numeric id the node handed out at login time or by name.
//! Api id `1` is always the login API.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Api id of the login API. Fixed by the node, never negotiated.
pub const LOGIN_API_ID: u64 = 1;

/// `method` value of every outgoing call frame.
pub const CALL_METHOD: &str = "call";

/// `method` value of inbound subscription pushes.
pub const NOTICE_METHOD: &str = "notice";

// ---------------------------------------------------------------------------
// Service Addressing
// ---------------------------------------------------------------------------

/// How an outgoing call addresses its sub-API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceId {
    /// Node-assigned api id (e.g. `2` for `database` on most nodes).
    Numeric(u64),
    /// Api name (`"database"`, `"history"`, ...). Nodes resolve these
    /// themselves, so a name works before the numeric id is known.
    Name(String),
}

impl ServiceId {
    /// The login API.
    pub fn login() -> Self {
        ServiceId::Numeric(LOGIN_API_ID)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::Numeric(id) => write!(f, "{}", id),
            ServiceId::Name(name) => f.write_str(name),
        }
    }
}

impl From<u64> for ServiceId {
    fn from(id: u64) -> Self {
        ServiceId::Numeric(id)
    }
}

impl From<&str> for ServiceId {
    fn from(name: &str) -> Self {
        ServiceId::Name(name.to_string())
    }
}

// ---------------------------------------------------------------------------
// Outgoing Call
// ---------------------------------------------------------------------------

/// An outgoing `call` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Always `"call"`.
    pub method: String,
    /// `[service, method, args]`.
    pub params: (ServiceId, String, Vec<Value>),
    /// Correlation id, echoed back in the reply.
    pub id: u64,
}

impl CallRequest {
    /// Builds a call frame.
    pub fn new(id: u64, service: ServiceId, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: CALL_METHOD.to_string(),
            params: (service, method.into(), args),
            id,
        }
    }

    /// Serializes the frame to the text sent over the socket.
    pub fn to_text(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::Serialization(e.to_string()))
    }

    /// The method name being invoked.
    pub fn method_name(&self) -> &str {
        &self.params.1
    }
}

// ---------------------------------------------------------------------------
// Remote Errors
// ---------------------------------------------------------------------------

/// Error object returned by the node in place of a `result`.
///
/// Graphene nodes send `{"code":..., "message":..., "data":{...}}` where
/// `data` carries an fc exception stack. Anything that isn't an object is
/// kept verbatim in `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code. Zero when the node didn't send one.
    #[serde(default)]
    pub code: i64,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Interprets an arbitrary `error` field.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RpcError>(value.clone()) {
            Ok(err) if value.is_object() => err,
            _ => Self {
                code: 0,
                message: value.to_string(),
                data: None,
            },
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Inbound Frames
// ---------------------------------------------------------------------------

/// Reply to a previously issued call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Id of the call being answered.
    pub id: u64,
    /// `result` on success, `error` otherwise.
    pub outcome: Result<Value, RpcError>,
}

/// Push notification for an established subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    /// Id of the call that established the subscription.
    pub subscription_id: u64,
    /// Second element of `params`, usually an array of events.
    pub payload: Value,
}

/// Any frame the node may send us.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Reply(Reply),
    Notice(Notice),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Vec<Value>>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Incoming {
    /// Parses one text frame.
    pub fn parse(text: &str) -> Result<Self, ApiError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| ApiError::Serialization(e.to_string()))?;

        if raw.method.as_deref() == Some(NOTICE_METHOD) {
            let mut params = raw.params.unwrap_or_default().into_iter();
            let subscription_id = params
                .next()
                .as_ref()
                .and_then(id_from_value)
                .ok_or_else(|| {
                    ApiError::Serialization("notice without a subscription id".to_string())
                })?;
            let payload = params.next().unwrap_or(Value::Null);
            return Ok(Incoming::Notice(Notice {
                subscription_id,
                payload,
            }));
        }

        let id = raw
            .id
            .as_ref()
            .and_then(id_from_value)
            .ok_or_else(|| ApiError::Serialization("reply without a numeric id".to_string()))?;

        let outcome = match raw.error {
            Some(err) => Err(RpcError::from_value(err)),
            None => Ok(raw.result.unwrap_or(Value::Null)),
        };

        Ok(Incoming::Reply(Reply { id, outcome }))
    }
}

/// Ids arrive as numbers, but some proxies in front of nodes stringify them.
fn id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
