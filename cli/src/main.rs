// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Graphene CLI
//!
//! Entry point for the `graphene` binary. Parses CLI arguments, initializes
//! logging, opens a session against the chosen node, and runs one query.
//!
//! - `chain-id`    : print the chain id
//! - `call`        : call any API method with JSON arguments
//! - `objects`     : fetch objects by id
//! - `assets`      : list every asset on the chain
//! - `watch-blocks`: stream applied blocks until Ctrl+C
//! - `version`     : print build version information

mod cli;
mod logging;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use tokio::signal;

use graphene_client::{
    config, queries, Capability, CapabilitySet, Listener, Session, SessionOptions,
};

use cli::{Commands, GrapheneCli, NodeArgs};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GrapheneCli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    logging::init_logging(
        "graphene=info,graphene_client=warn",
        LogFormat::from_str_lossy(&cli.log_format),
    );

    match cli.command {
        Commands::ChainId => chain_id(&cli.node).await,
        Commands::Call(args) => call(&cli.node, args).await,
        Commands::Objects(args) => objects(&cli.node, args).await,
        Commands::Assets => assets(&cli.node).await,
        Commands::WatchBlocks => watch_blocks(&cli.node).await,
        Commands::Version => Ok(()),
    }
}

/// Connects, logs in, and brings up `capabilities`.
async fn open_session(node: &NodeArgs, capabilities: CapabilitySet) -> Result<Session> {
    let endpoint = node.endpoint();
    let options = SessionOptions::new(capabilities)
        .with_connect_timeout(Duration::from_millis(node.connect_timeout_ms))
        .on_status(|status| tracing::debug!(%status, "connection status"));

    tracing::info!(%endpoint, chain = %node.chain, "opening session");
    Session::open(&endpoint, options)
        .await
        .with_context(|| format!("failed to open session with {}", endpoint))
}

async fn chain_id(node: &NodeArgs) -> Result<()> {
    let session = open_session(node, CapabilitySet::database_only()).await?;
    let chain_id = session.chain_id()?;
    println!("{}", chain_id);
    session.close().await;
    Ok(())
}

async fn call(node: &NodeArgs, args: cli::CallArgs) -> Result<()> {
    let params = match serde_json::from_str::<Value>(&args.args)
        .with_context(|| format!("arguments are not valid JSON: {}", args.args))?
    {
        Value::Array(params) => params,
        other => bail!("arguments must be a JSON array, got {}", other),
    };

    let session = open_session(node, CapabilitySet::none().with(args.api)).await?;
    let result = session
        .api(args.api)?
        .exec(&args.method, params)
        .await
        .with_context(|| format!("{}.{} failed", args.api.api_name(), args.method));
    session.close().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn objects(node: &NodeArgs, args: cli::ObjectsArgs) -> Result<()> {
    let session = open_session(node, CapabilitySet::database_only()).await?;
    let found = queries::get_objects(
        &session.database_api()?,
        &args.ids,
        node.chain.object_chunk_size(),
    )
    .await;
    session.close().await;

    for object in found.context("object lookup failed")? {
        println!("{}", object);
    }
    Ok(())
}

async fn assets(node: &NodeArgs) -> Result<()> {
    let session = open_session(node, CapabilitySet::database_only()).await?;
    let found =
        queries::fetch_all_assets(&session.database_api()?, node.chain.object_chunk_size()).await;
    session.close().await;

    let assets = found.context("asset listing failed")?;
    for asset in &assets {
        println!(
            "{}\t{}",
            asset["id"].as_str().unwrap_or("?"),
            asset["symbol"].as_str().unwrap_or("?")
        );
    }
    tracing::info!(count = assets.len(), "assets listed");
    Ok(())
}

async fn watch_blocks(node: &NodeArgs) -> Result<()> {
    let session = open_session(node, CapabilitySet::database_only()).await?;
    let database = session.api(Capability::Database)?;
    let (listener, mut blocks) = Listener::channel();

    database
        .subscribe("set_block_applied_callback", vec![], listener)
        .await
        .context("subscription failed")?;
    tracing::info!("watching applied blocks, Ctrl+C to stop");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            block = blocks.recv() => match block {
                Some(block) => println!("{}\t{}", chrono::Utc::now().to_rfc3339(), block),
                None => break,
            },
            res = &mut shutdown => {
                res?;
                tracing::info!("interrupted");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("graphene {}", env!("CARGO_PKG_VERSION"));
    println!("rustc    {}", rustc_version());
    println!("default  {}", config::BITSHARES_ENDPOINT);
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to install Ctrl+C handler")?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to install Ctrl+C handler")
    }
}
