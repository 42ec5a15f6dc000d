// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Graphene WebSocket Client
//!
//! A client for the WebSocket API exposed by Graphene-family nodes
//! (BitShares and friends). One persistent socket carries everything:
//! request/response calls, push subscriptions, and a heartbeat that notices
//! when the node has quietly stopped talking to us.
//!
//! ## Architecture
//!
//! - **wire**: JSON frames as they appear on the socket.
//! - **connection**: One socket, one driver task. Correlates replies by id,
//!   routes notices to subscription listeners, runs the heartbeat, reconnects.
//! - **proxy**: A named sub-API (`database`, `history`, ...) bound to a
//!   connection. Knows its name, its node-assigned api id, and nothing else.
//! - **session**: Login, capability bring-up, chain id discovery, and the
//!   reconnect/close reactions. This is what callers hold on to.
//! - **queries**: Chunked object fetches and friends, built on the database API.
//! - **config**: Constants and option structs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use graphene_client::{CapabilitySet, Session, SessionOptions};
//!
//! # async fn demo() -> Result<(), graphene_client::ApiError> {
//! let options = SessionOptions::new(CapabilitySet::database_only());
//! let session = Session::open("wss://node.xbts.io/ws", options).await?;
//!
//! let chain_id = session.chain_id()?;
//! let props = session
//!     .database_api()?
//!     .exec("get_dynamic_global_properties", vec![])
//!     .await?;
//! println!("{chain_id}: head block {}", props["head_block_number"]);
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod connection;
pub mod proxy;
pub mod queries;
pub mod session;
pub mod wire;

mod error;

pub use capability::{Capability, CapabilitySet};
pub use config::{Chain, ConnectOptions};
pub use connection::{CloseReason, Connection, ConnectionEvent, ConnectionState, Listener};
pub use error::ApiError;
pub use proxy::ServiceProxy;
pub use session::{ConnectionStatus, Session, SessionOptions, SessionState};
pub use wire::ServiceId;
