//! JSON-RPC 2.0 passthrough to the remote node.
//!
//! [`HttpRpcClient`] posts `{jsonrpc, id, method, params}` to the configured
//! endpoint with `reqwest`, which uses `fetch` on `wasm32`. Calls are never
//! retried.
//!
//! The module also has helpers for the `0x`-prefixed hex quantities
//! Ethereum nodes exchange.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// JSON-RPC response structure.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A JSON-RPC endpoint.
#[async_trait(?Send)]
pub trait RpcClient: fmt::Debug {
    /// Calls `method` with `params` and returns the `result` member.
    ///
    /// A response without `result` or `error` yields [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] on transport failures, non-2xx responses and
    /// JSON-RPC errors.
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

/// A JSON-RPC client over HTTP.
#[derive(Debug)]
pub struct HttpRpcClient {
    client: Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Creates a client for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait(?Send)]
impl RpcClient for HttpRpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params: &params,
        };
        debug!(id, method, "sending RPC request");

        let rpc_error = |code: Option<i64>, message: String| Error::Rpc {
            method: method.to_string(),
            code,
            message,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| rpc_error(None, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(rpc_error(
                Some(i64::from(status.as_u16())),
                format!("HTTP error: {status}"),
            ));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| rpc_error(None, format!("failed to parse response: {e}")))?;

        body.into_result()
            .map_err(|error| rpc_error(Some(error.code), error.message))
    }
}

impl JsonRpcResponse {
    fn into_result(self) -> core::result::Result<Value, JsonRpcError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

/// Formats a number as a hex quantity (`0x0`, `0x1a`).
#[must_use]
pub fn format_quantity(value: U256) -> String {
    format!("{value:#x}")
}

/// Parses a hex quantity.
///
/// # Errors
///
/// Returns [`Error::HexDecodeFailed`] if `value` is not a `0x`-prefixed hex
/// number that fits in 256 bits.
pub fn parse_quantity(value: &str) -> Result<U256> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| Error::HexDecodeFailed(format!("quantity `{value}` lacks 0x prefix")))?;
    if digits.is_empty() {
        return Err(Error::HexDecodeFailed(format!("empty quantity `{value}`")));
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| Error::HexDecodeFailed(format!("quantity `{value}`: {e}")))
}

/// Parses a hex quantity that must fit in a `u64`.
///
/// # Errors
///
/// Returns [`Error::HexDecodeFailed`] if the quantity is malformed or too
/// large.
pub fn parse_quantity_u64(value: &str) -> Result<u64> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity)
        .map_err(|_| Error::HexDecodeFailed(format!("quantity `{value}` exceeds u64")))
}

/// Reads a hex quantity from an RPC result.
///
/// # Errors
///
/// Returns [`Error::Rpc`] if the result is not a quantity string.
pub fn quantity_result(method: &str, value: &Value) -> Result<U256> {
    value
        .as_str()
        .ok_or_else(|| Error::Rpc {
            method: method.to_string(),
            code: None,
            message: format!("expected a hex quantity, got {value}"),
        })
        .and_then(parse_quantity)
}
