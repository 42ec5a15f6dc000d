//! Optional sub-APIs a session may enable.
//!
//! Graphene nodes expose several APIs behind the login API. A session
//! chooses which of them to bring up; the rest stay unreachable through it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// One logical sub-API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Database,
    History,
    NetworkBroadcast,
    Orders,
    Crypto,
}

impl Capability {
    /// Bring-up order. Deterministic so partial failures are reported the
    /// same way every time.
    pub const BRING_UP_ORDER: [Capability; 5] = [
        Capability::Database,
        Capability::History,
        Capability::NetworkBroadcast,
        Capability::Orders,
        Capability::Crypto,
    ];

    /// Name the node knows the API by.
    pub fn api_name(self) -> &'static str {
        match self {
            Capability::Database => "database",
            Capability::History => "history",
            Capability::NetworkBroadcast => "network_broadcast",
            Capability::Orders => "orders",
            Capability::Crypto => "crypto",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Capability::Database => "database",
            Capability::History => "history",
            Capability::NetworkBroadcast => "network",
            Capability::Orders => "orders",
            Capability::Crypto => "crypto",
        };
        f.write_str(label)
    }
}

impl FromStr for Capability {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "database" | "db" => Ok(Capability::Database),
            "history" => Ok(Capability::History),
            "network_broadcast" | "network" => Ok(Capability::NetworkBroadcast),
            "orders" => Ok(Capability::Orders),
            "crypto" => Ok(Capability::Crypto),
            other => Err(ApiError::NotConfigured(format!("unknown API: {}", other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability Set
// ---------------------------------------------------------------------------

/// The flag group of enabled sub-APIs. Fixed once a session connects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub database: bool,
    pub history: bool,
    pub network_broadcast: bool,
    pub orders: bool,
    pub crypto: bool,
}

impl CapabilitySet {
    /// Nothing enabled. Not a valid session configuration on its own.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every API enabled.
    pub fn all() -> Self {
        Self {
            database: true,
            history: true,
            network_broadcast: true,
            orders: true,
            crypto: true,
        }
    }

    /// Just the database API, which is what most read-only tools need.
    pub fn database_only() -> Self {
        Self::none().with(Capability::Database)
    }

    /// Returns a copy with `capability` enabled.
    pub fn with(mut self, capability: Capability) -> Self {
        self.set(capability, true);
        self
    }

    /// Enables or disables one capability.
    pub fn set(&mut self, capability: Capability, enabled: bool) {
        match capability {
            Capability::Database => self.database = enabled,
            Capability::History => self.history = enabled,
            Capability::NetworkBroadcast => self.network_broadcast = enabled,
            Capability::Orders => self.orders = enabled,
            Capability::Crypto => self.crypto = enabled,
        }
    }

    /// Whether `capability` is enabled.
    pub fn contains(&self, capability: Capability) -> bool {
        match capability {
            Capability::Database => self.database,
            Capability::History => self.history,
            Capability::NetworkBroadcast => self.network_broadcast,
            Capability::Orders => self.orders,
            Capability::Crypto => self.crypto,
        }
    }

    /// True when no capability is enabled.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Enabled capabilities in bring-up order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::BRING_UP_ORDER
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CapabilitySet::none(), |set, c| set.with(c))
    }
}
