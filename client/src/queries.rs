//! Chain queries built on the database API.
//!
//! Thin conveniences for the lookups most tools need. Bulk object fetches
//! are split into chunks because public nodes cap how many ids one
//! `get_objects` call may carry; a chunk that fails is skipped rather than
//! failing the whole fetch.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::proxy::ServiceProxy;

/// Object space of protocol objects (`1.x.y`).
pub const PROTOCOL_SPACE: u8 = 1;

/// Object type of assets within the protocol space (`1.3.y`).
pub const ASSET_TYPE: u8 = 3;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Every chunk failed or every requested object was missing.
    #[error("no objects could be retrieved")]
    NoObjects,

    #[error("malformed object id: {0}")]
    MalformedObjectId(String),
}

/// Fetches `ids` in chunks of `chunk_size`, dropping ids the node does not
/// know.
pub async fn get_objects(
    database: &ServiceProxy,
    ids: &[String],
    chunk_size: usize,
) -> Result<Vec<Value>, QueryError> {
    let mut objects = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(chunk_size.max(1)) {
        let reply = match database.exec("get_objects", vec![json!(chunk), json!(false)]).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    first = %chunk[0],
                    len = chunk.len(),
                    error = %e,
                    "object chunk failed, skipping"
                );
                continue;
            }
        };
        if let Value::Array(found) = reply {
            objects.extend(found.into_iter().filter(|object| !object.is_null()));
        }
    }

    debug!(requested = ids.len(), found = objects.len(), "objects fetched");
    if objects.is_empty() {
        return Err(QueryError::NoObjects);
    }
    Ok(objects)
}

/// Highest instance number currently allocated for `space.type`.
pub async fn max_object_id(
    database: &ServiceProxy,
    space: u8,
    kind: u8,
) -> Result<u64, QueryError> {
    let next = database
        .exec("get_next_object_id", vec![json!(space), json!(kind), json!(false)])
        .await?;
    let next = next
        .as_str()
        .ok_or_else(|| QueryError::MalformedObjectId(next.to_string()))?;
    let instance = parse_instance(next)?;
    instance
        .checked_sub(1)
        .ok_or_else(|| QueryError::MalformedObjectId(next.to_string()))
}

/// Every asset on the chain, `1.3.0` through the newest.
pub async fn fetch_all_assets(
    database: &ServiceProxy,
    chunk_size: usize,
) -> Result<Vec<Value>, QueryError> {
    let max = max_object_id(database, PROTOCOL_SPACE, ASSET_TYPE).await?;
    let ids: Vec<String> = (0..=max)
        .map(|instance| format!("{}.{}.{}", PROTOCOL_SPACE, ASSET_TYPE, instance))
        .collect();
    get_objects(database, &ids, chunk_size).await
}

/// Resolves asset symbols (or ids) to asset objects. Unknown symbols come
/// back as `null`.
pub async fn lookup_asset_symbols(
    database: &ServiceProxy,
    symbols: &[String],
) -> Result<Vec<Value>, QueryError> {
    let reply = database.exec("lookup_asset_symbols", vec![json!(symbols)]).await?;
    Ok(into_array(reply))
}

/// Resolves account names (or ids) to account objects.
pub async fn get_accounts(
    database: &ServiceProxy,
    names: &[String],
) -> Result<Vec<Value>, QueryError> {
    let reply = database.exec("get_accounts", vec![json!(names)]).await?;
    Ok(into_array(reply))
}

/// Accounts with their balances, orders, and statistics. Each element is a
/// `[name, full_account]` pair.
pub async fn get_full_accounts(
    database: &ServiceProxy,
    names: &[String],
    subscribe: bool,
) -> Result<Vec<Value>, QueryError> {
    let reply = database
        .exec("get_full_accounts", vec![json!(names), json!(subscribe)])
        .await?;
    Ok(into_array(reply))
}

/// Instance number of an `s.t.i` object id.
pub fn parse_instance(object_id: &str) -> Result<u64, QueryError> {
    let mut parts = object_id.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(space), Some(kind), Some(instance), None)
            if space.parse::<u8>().is_ok() && kind.parse::<u8>().is_ok() =>
        {
            instance
                .parse()
                .map_err(|_| QueryError::MalformedObjectId(object_id.to_string()))
        }
        _ => Err(QueryError::MalformedObjectId(object_id.to_string())),
    }
}

fn into_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
