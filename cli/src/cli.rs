//! # CLI Interface
//!
//! Defines the command-line argument structure for `graphene` using `clap`
//! derive. Connection flags are global so they may appear before or after
//! the subcommand.

use clap::{Args, Parser, Subcommand};

use graphene_client::{Capability, Chain};

/// Query a Graphene-family blockchain node over its WebSocket API.
#[derive(Parser, Debug)]
#[command(
    name = "graphene",
    about = "Graphene WebSocket API client",
    version,
    propagate_version = true
)]
pub struct GrapheneCli {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, env = "GRAPHENE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Where to connect and how patiently.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// WebSocket endpoint of the node. Takes precedence over `--chain`.
    #[arg(long, short = 'e', global = true, env = "GRAPHENE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Known chain whose public endpoint (and query chunk size) to use.
    #[arg(long, global = true, env = "GRAPHENE_CHAIN", default_value = "bitshares")]
    pub chain: Chain,

    /// Time allowed for the socket to open, in milliseconds.
    #[arg(long, global = true, env = "GRAPHENE_CONNECT_TIMEOUT_MS", default_value_t = 4000)]
    pub connect_timeout_ms: u64,
}

impl NodeArgs {
    /// The endpoint to dial.
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.chain.endpoint().to_string())
    }
}

/// Top-level subcommands for the `graphene` binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the chain id reported by the node.
    ChainId,
    /// Call any method on any enabled API and print the reply.
    Call(CallArgs),
    /// Fetch objects by id (e.g. `1.3.0 2.1.0`).
    Objects(ObjectsArgs),
    /// List every asset on the chain.
    Assets,
    /// Print each applied block until interrupted.
    WatchBlocks,
    /// Print version information and exit.
    Version,
}

/// Arguments for the `call` subcommand.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// API to call: database, history, network, orders, or crypto.
    pub api: Capability,

    /// Method name, e.g. `get_dynamic_global_properties`.
    pub method: String,

    /// Arguments as a JSON array.
    #[arg(default_value = "[]")]
    pub args: String,
}

/// Arguments for the `objects` subcommand.
#[derive(Parser, Debug)]
pub struct ObjectsArgs {
    /// Object ids in `space.type.instance` form.
    #[arg(required = true)]
    pub ids: Vec<String>,
}
