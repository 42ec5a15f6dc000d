//! Call correlation and notice routing.
//!
//! The router is the bookkeeping half of a connection: it hands out call
//! ids, remembers who is waiting for which reply, keeps subscription
//! listeners alive across notices, and settles everything still in flight
//! when the socket goes away. It never touches the socket itself, which
//! keeps it synchronous and easy to test.
//!
//! One-shot calls and subscriptions share a single id namespace. Each id
//! maps to exactly one [`PendingEntry`] variant at a time:
//!
//! ```text
//! OneShot ──reply──► (removed)
//! Subscribing ──ok reply──► Subscription ──unsubscribe ok──► (removed)
//!             └─error reply─► (removed)
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::listener::Listener;
use crate::error::ApiError;
use crate::wire::{CallRequest, Incoming, Notice, Reply, ServiceId};

/// Methods whose first argument is a listener that stays registered after
/// the reply.
pub const SUBSCRIBE_METHODS: [&str; 5] = [
    "set_subscribe_callback",
    "subscribe_to_market",
    "broadcast_transaction_with_callback",
    "set_pending_transaction_callback",
    "set_block_applied_callback",
];

/// Methods that retire a subscription. The caller must hand back the exact
/// listener it subscribed with.
pub const UNSUBSCRIBE_METHODS: [&str; 2] = ["unsubscribe_from_market", "unsubscribe_from_accounts"];

pub(crate) type CallResult = Result<Value, ApiError>;
pub(crate) type ReplySlot = oneshot::Sender<CallResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    OneShot,
    Subscribe,
    Unsubscribe,
}

impl CallKind {
    pub(crate) fn of(method: &str) -> Self {
        if SUBSCRIBE_METHODS.contains(&method) {
            CallKind::Subscribe
        } else if UNSUBSCRIBE_METHODS.contains(&method) {
            CallKind::Unsubscribe
        } else {
            CallKind::OneShot
        }
    }
}

/// A call as issued by a handle, before it has an id.
#[derive(Debug)]
pub(crate) struct OutgoingCall {
    pub service: ServiceId,
    pub method: String,
    pub args: Vec<Value>,
    pub listener: Option<Listener>,
}

/// Someone waiting for a single reply.
#[derive(Debug)]
pub(crate) struct PendingCall {
    issued_at: DateTime<Utc>,
    reply: ReplySlot,
}

impl PendingCall {
    fn new(reply: ReplySlot) -> Self {
        Self {
            issued_at: Utc::now(),
            reply,
        }
    }

    fn settle(self, outcome: Result<Value, ApiError>) {
        // The caller may have given up on the future; that's fine.
        let _ = self.reply.send(outcome);
    }
}

#[derive(Debug)]
pub(crate) enum PendingEntry {
    OneShot(PendingCall),
    /// Subscribe call sent, reply not yet seen. Notices are already routed.
    Subscribing { call: PendingCall, listener: Listener },
    Subscription(Listener),
}

impl PendingEntry {
    fn listener(&self) -> Option<&Listener> {
        match self {
            PendingEntry::OneShot(_) => None,
            PendingEntry::Subscribing { listener, .. } | PendingEntry::Subscription(listener) => {
                Some(listener)
            }
        }
    }
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// A waiting call was resolved (`ok`) or rejected.
    Settled { id: u64, ok: bool },
    /// A notice reached its listener.
    Notified { subscription_id: u64 },
    /// Nobody was waiting for this frame.
    Dropped,
}

#[derive(Debug, Default)]
pub(crate) struct Router {
    next_call_id: u64,
    last_delivered_id: u64,
    entries: BTreeMap<u64, PendingEntry>,
    pending_unsubscribe: HashMap<u64, u64>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates an id for `call` and records who to wake up.
    ///
    /// Returns the frame to put on the wire, or `None` if the call was
    /// rejected up front (the rejection has already been sent to `reply`,
    /// and no id was consumed).
    pub(crate) fn register(&mut self, call: OutgoingCall, reply: ReplySlot) -> Option<CallRequest> {
        let OutgoingCall {
            service,
            method,
            mut args,
            listener,
        } = call;
        let kind = CallKind::of(&method);

        let unsubscribe_target = match (kind, listener.as_ref()) {
            (CallKind::Subscribe, None) => {
                reject(reply, format!("{} requires a listener", method));
                return None;
            }
            (CallKind::Unsubscribe, None) => {
                reject(
                    reply,
                    format!("first parameter of {} must be the original listener", method),
                );
                return None;
            }
            (CallKind::Unsubscribe, Some(listener)) => match self.subscription_of(listener) {
                Some(target) => Some(target),
                None => {
                    reject(reply, format!("{}: listener is not subscribed", method));
                    return None;
                }
            },
            (CallKind::OneShot, Some(_)) => {
                reject(reply, format!("{} does not take a listener", method));
                return None;
            }
            _ => None,
        };

        self.next_call_id += 1;
        let id = self.next_call_id;
        let call = PendingCall::new(reply);

        let entry = match (kind, listener) {
            (CallKind::Subscribe, Some(listener)) => {
                // The node refers to the subscription by the id of the call
                // that created it, so the id goes where the callback would.
                args.insert(0, Value::from(id));
                PendingEntry::Subscribing { call, listener }
            }
            _ => PendingEntry::OneShot(call),
        };

        if let Some(target) = unsubscribe_target {
            self.pending_unsubscribe.insert(id, target);
        }
        self.entries.insert(id, entry);

        Some(CallRequest::new(id, service, method, args))
    }

    /// Routes one inbound frame.
    pub(crate) fn route(&mut self, frame: Incoming) -> Delivery {
        match frame {
            Incoming::Notice(notice) => self.notify(notice),
            Incoming::Reply(reply) => self.settle(reply),
        }
    }

    fn notify(&mut self, notice: Notice) -> Delivery {
        match self.entries.get(&notice.subscription_id).and_then(PendingEntry::listener) {
            Some(listener) => {
                listener.notify(notice.payload);
                Delivery::Notified {
                    subscription_id: notice.subscription_id,
                }
            }
            None => {
                warn!(
                    subscription_id = notice.subscription_id,
                    "notice for unknown subscription, dropping"
                );
                Delivery::Dropped
            }
        }
    }

    fn settle(&mut self, reply: Reply) -> Delivery {
        let Reply { id, outcome } = reply;
        let ok = outcome.is_ok();
        let outcome = outcome.map_err(ApiError::Protocol);

        match self.entries.remove(&id) {
            Some(PendingEntry::OneShot(call)) => {
                debug!(id, elapsed_ms = elapsed_ms(&call), ok, "call settled");
                call.settle(outcome);
            }
            Some(PendingEntry::Subscribing { call, listener }) => {
                if ok {
                    self.entries.insert(id, PendingEntry::Subscription(listener));
                }
                call.settle(outcome);
            }
            Some(PendingEntry::Subscription(listener)) => {
                // Replies never target an established subscription. A
                // duplicate delivery; keep the listener where it was.
                self.entries.insert(id, PendingEntry::Subscription(listener));
                return Delivery::Dropped;
            }
            None => {
                debug!(id, "reply for unknown call id, dropping");
                return Delivery::Dropped;
            }
        }
        self.last_delivered_id = self.last_delivered_id.max(id);

        if let Some(target) = self.pending_unsubscribe.remove(&id) {
            if ok {
                self.retire(target);
            }
        }

        Delivery::Settled { id, ok }
    }

    /// Forgets the listener behind `target`. A subscribe that is still
    /// unanswered keeps its call slot so its reply settles the caller.
    fn retire(&mut self, target: u64) {
        match self.entries.remove(&target) {
            Some(PendingEntry::Subscription(_)) => {
                debug!(subscription_id = target, "subscription retired");
            }
            Some(PendingEntry::Subscribing { call, .. }) => {
                debug!(subscription_id = target, "subscription retired before confirmation");
                self.entries.insert(target, PendingEntry::OneShot(call));
            }
            Some(entry @ PendingEntry::OneShot(_)) => {
                self.entries.insert(target, entry);
            }
            None => {}
        }
    }

    /// Rejects every call still in flight with [`ApiError::ConnectionClosed`]
    /// and forgets all subscriptions. Returns how many calls were rejected.
    pub(crate) fn fail_outstanding(&mut self) -> usize {
        let entries = std::mem::take(&mut self.entries);
        self.pending_unsubscribe.clear();

        let mut rejected = 0;
        for (_, entry) in entries {
            match entry {
                PendingEntry::OneShot(call) | PendingEntry::Subscribing { call, .. } => {
                    call.settle(Err(ApiError::ConnectionClosed));
                    rejected += 1;
                }
                PendingEntry::Subscription(_) => {}
            }
        }
        rejected
    }

    fn subscription_of(&self, listener: &Listener) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.listener().is_some_and(|l| l.same_as(listener)))
            .map(|(id, _)| *id)
    }

    pub(crate) fn next_call_id(&self) -> u64 {
        self.next_call_id
    }

    pub(crate) fn last_delivered_id(&self) -> u64 {
        self.last_delivered_id
    }

    /// One-shot calls (including unconfirmed subscribes) awaiting a reply.
    pub(crate) fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !matches!(e, PendingEntry::Subscription(_)))
            .count()
    }

    /// Listeners currently receiving notices.
    pub(crate) fn subscriptions(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.listener().is_some())
            .count()
    }
}

fn reject(reply: ReplySlot, message: String) {
    warn!(%message, "rejecting call");
    let _ = reply.send(Err(ApiError::Usage(message)));
}

fn elapsed_ms(call: &PendingCall) -> i64 {
    (Utc::now() - call.issued_at).num_milliseconds()
}
