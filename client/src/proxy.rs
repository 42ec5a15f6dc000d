//! Named sub-API bound to a connection.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::Capability;
use crate::connection::{Connection, Listener};
use crate::error::ApiError;
use crate::wire::ServiceId;

/// Methods whose reply never changes for the lifetime of a chain. Their
/// first successful reply is kept and served locally from then on.
const IMMUTABLE_METHODS: [&str; 1] = ["get_chain_id"];

/// A sub-API (`database`, `history`, ...) reachable through a shared
/// [`Connection`].
///
/// Calls are addressed by the numeric api id the node assigned during
/// [`bring_up`](Self::bring_up), or by name until one is known. The proxy
/// does not own the connection: closing the session closes the socket under
/// every proxy at once.
#[derive(Clone)]
pub struct ServiceProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    capability: Capability,
    connection: Connection,
    api_id: RwLock<Option<u64>>,
    memo: DashMap<String, Value>,
}

impl ServiceProxy {
    pub fn new(capability: Capability, connection: Connection) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                capability,
                connection,
                api_id: RwLock::new(None),
                memo: DashMap::new(),
            }),
        }
    }

    /// Name the node knows this API by.
    pub fn name(&self) -> &'static str {
        self.inner.capability.api_name()
    }

    pub fn capability(&self) -> Capability {
        self.inner.capability
    }

    /// Node-assigned api id, once brought up.
    pub fn api_id(&self) -> Option<u64> {
        *self.inner.api_id.read()
    }

    /// How outgoing calls address this API right now.
    pub fn service_id(&self) -> ServiceId {
        match self.api_id() {
            Some(id) => ServiceId::Numeric(id),
            None => ServiceId::Name(self.name().to_string()),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Asks the login API for this API's id.
    ///
    /// Nodes answer with a number. Anything else (some gateways echo an
    /// object id or a name) leaves the proxy addressing by name, which every
    /// node also accepts.
    pub async fn bring_up(&self) -> Result<(), ApiError> {
        let reply = self
            .inner
            .connection
            .call(ServiceId::login(), self.name(), vec![], None)
            .await?;

        let api_id = reply.as_u64();
        match api_id {
            Some(id) => info!(api = self.name(), api_id = id, "api ready"),
            None => warn!(
                api = self.name(),
                reply = %reply,
                "non-numeric api id, addressing by name"
            ),
        }
        *self.inner.api_id.write() = api_id;
        Ok(())
    }

    /// Calls `method` on this API.
    pub async fn exec(&self, method: &str, args: Vec<Value>) -> Result<Value, ApiError> {
        let memoizable = args.is_empty() && IMMUTABLE_METHODS.contains(&method);
        if memoizable {
            if let Some(cached) = self.inner.memo.get(method) {
                debug!(api = self.name(), method, "served from memo");
                return Ok(cached.clone());
            }
        }

        let reply = self
            .inner
            .connection
            .call(self.service_id(), method, args, None)
            .await?;

        if memoizable {
            self.inner.memo.insert(method.to_string(), reply.clone());
        }
        Ok(reply)
    }

    /// Calls a subscribe method with `listener` receiving its notices. The
    /// subscription id takes the listener's place as the first argument.
    pub async fn subscribe(
        &self,
        method: &str,
        args: Vec<Value>,
        listener: Listener,
    ) -> Result<Value, ApiError> {
        self.inner
            .connection
            .call(self.service_id(), method, args, Some(listener))
            .await
    }

    /// Calls an unsubscribe method. `listener` must be a clone of the one
    /// the subscription was made with.
    pub async fn unsubscribe(
        &self,
        method: &str,
        args: Vec<Value>,
        listener: Listener,
    ) -> Result<Value, ApiError> {
        self.subscribe(method, args, listener).await
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("name", &self.name())
            .field("api_id", &self.api_id())
            .finish()
    }
}
