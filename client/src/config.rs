//! # Client Configuration & Constants
//!
//! Every tunable of the connection layer lives here: heartbeat cadence,
//! liveness budgets, timeouts, and the well-known public endpoints. Option
//! structs carry these as defaults so tests can shrink them without
//! touching the constants.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// How often the heartbeat ticks.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Ticks without an outgoing call before a keepalive probe is sent.
pub const MAX_SEND_LIFE: u32 = 5;

/// Ticks without any inbound frame before the connection is presumed dead.
/// Must exceed [`MAX_SEND_LIFE`], otherwise a healthy but idle connection
/// would be killed before the probe's reply could arrive.
pub const MAX_RECV_LIFE: u32 = MAX_SEND_LIFE * 2;

/// Object fetched by the keepalive probe: the global dynamic properties.
/// Cheap, read-only, and present on every Graphene chain.
pub const KEEPALIVE_OBJECT_ID: &str = "2.1.0";

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Default time allowed for the socket to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// How long `close()` waits for the peer to acknowledge the close frame
/// before dropping the socket anyway.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Depth of the command queue between connection handles and the driver.
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the lifecycle event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Well-known Chains
// ---------------------------------------------------------------------------

/// Local node, as shipped in witness_node's default config.
pub const DEFAULT_LOCAL_ENDPOINT: &str = "ws://localhost:8090";

/// Public BitShares mainnet endpoint.
pub const BITSHARES_ENDPOINT: &str = "wss://node.xbts.io/ws";

/// Public BitShares testnet endpoint.
pub const BITSHARES_TESTNET_ENDPOINT: &str = "wss://testnet.xbts.io/ws";

/// Chains with a known public endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    BitShares,
    BitSharesTestnet,
}

impl Chain {
    /// Public endpoint for the chain.
    pub fn endpoint(self) -> &'static str {
        match self {
            Chain::BitShares => BITSHARES_ENDPOINT,
            Chain::BitSharesTestnet => BITSHARES_TESTNET_ENDPOINT,
        }
    }

    /// How many object ids to request per `get_objects` call. The public
    /// testnet node rejects large batches, so it gets smaller chunks.
    pub fn object_chunk_size(self) -> usize {
        match self {
            Chain::BitShares => 50,
            Chain::BitSharesTestnet => 10,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::BitShares => f.write_str("bitshares"),
            Chain::BitSharesTestnet => f.write_str("bitshares_testnet"),
        }
    }
}

impl FromStr for Chain {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitshares" | "bts" => Ok(Chain::BitShares),
            "bitshares_testnet" | "testnet" | "test" => Ok(Chain::BitSharesTestnet),
            other => Err(ApiError::NotConfigured(format!("unknown chain: {}", other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Connect Options
// ---------------------------------------------------------------------------

/// Knobs for a single [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Time allowed for the socket to open (also used for the reconnect
    /// attempt).
    pub connect_timeout: Duration,
    /// Heartbeat tick period.
    pub heartbeat_interval: Duration,
    /// Idle ticks before a keepalive probe.
    pub max_send_life: u32,
    /// Silent ticks before the connection is force-closed.
    pub max_recv_life: u32,
    /// Try one reconnect after an involuntary drop.
    pub auto_reconnect: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_send_life: MAX_SEND_LIFE,
            max_recv_life: MAX_RECV_LIFE,
            auto_reconnect: false,
        }
    }
}

impl ConnectOptions {
    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the heartbeat period and budgets.
    pub fn with_heartbeat(
        mut self,
        interval: Duration,
        max_send_life: u32,
        max_recv_life: u32,
    ) -> Self {
        self.heartbeat_interval = interval;
        self.max_send_life = max_send_life;
        self.max_recv_life = max_recv_life;
        self
    }

    /// Enables or disables the single reconnect attempt.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Rejects budget combinations that would kill a live connection.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.max_send_life == 0 {
            return Err(ApiError::NotConfigured(
                "send budget must be at least one tick".to_string(),
            ));
        }
        if self.max_recv_life <= self.max_send_life {
            return Err(ApiError::NotConfigured(format!(
                "receive budget ({}) must exceed send budget ({})",
                self.max_recv_life, self.max_send_life
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ApiError::NotConfigured(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
