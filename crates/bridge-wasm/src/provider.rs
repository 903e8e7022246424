//! The `LedgerProvider` JavaScript class.
//!
//! An EIP-1193 provider backed by a Ledger over WebUSB. Reads go to the
//! configured node; accounts and signatures come from the device.
//!
//! # Example
//!
//! ```javascript
//! const provider = new LedgerProvider({ chainId: 1, rpcUrl: "https://eth.example.org" });
//!
//! button.onclick = async () => {
//!     const address = await provider.requestAccess();
//!     const hash = await provider.request({
//!         method: "eth_sendTransaction",
//!         params: [{ from: address, to: "0x...", value: "0x1" }],
//!     });
//! };
//! ```
//!
//! Calls must not overlap: a second call while one is pending fails with a
//! recursive-use error.

use std::fmt;

use ledger_evm_bridge_core::{Bridge, BridgeConfig, DerivationPath, HttpRpcClient};
use serde_json::Value;
use tracing::info;
use wasm_bindgen::prelude::*;

use crate::device::WebUsbBackend;
use crate::error::{WasmError, WasmResult};

/// An EIP-1193 provider backed by a Ledger device.
#[wasm_bindgen]
pub struct LedgerProvider {
    bridge: Bridge<WebUsbBackend, HttpRpcClient>,
}

impl fmt::Debug for LedgerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerProvider")
            .field("chain_id", &self.bridge.chain().chain_id)
            .field("selected_address", &self.bridge.selected_address())
            .finish_non_exhaustive()
    }
}

#[wasm_bindgen]
impl LedgerProvider {
    /// Creates a provider from a configuration object or JSON string.
    ///
    /// # Errors
    ///
    /// Throws if the configuration is missing `chainId`/`rpcUrl` or invalid.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<LedgerProvider, JsValue> {
        Self::new_internal(&config).map_err(JsValue::from)
    }

    fn new_internal(config: &JsValue) -> WasmResult<Self> {
        let json = match config.as_string() {
            Some(text) => text,
            None => String::from(js_sys::JSON::stringify(config)?),
        };
        let config = BridgeConfig::from_json(&json)?;
        let rpc = HttpRpcClient::new(config.chain().rpc_url);
        info!(chain_id = config.chain_id, "provider created");
        let bridge = Bridge::new(config, WebUsbBackend::new(), rpc)?;
        Ok(Self { bridge })
    }

    /// Handles an EIP-1193 `request({ method, params })`.
    ///
    /// # Errors
    ///
    /// Rejects with an `Error` carrying `code`, and `stage` for send failures.
    pub async fn request(&mut self, args: JsValue) -> Result<JsValue, JsValue> {
        self.request_internal(&args).await.map_err(JsValue::from)
    }

    async fn request_internal(&mut self, args: &JsValue) -> WasmResult<JsValue> {
        let (method, params) = parse_request_args(from_js(args)?)?;
        let result = self.bridge.request(&method, params).await?;
        to_js(&result)
    }

    /// Shows the device picker and opens the default account.
    ///
    /// Must be called from a user gesture. Resolves to the account address.
    ///
    /// # Errors
    ///
    /// Rejects with code 4100 if no device was chosen.
    #[wasm_bindgen(js_name = "requestAccess")]
    pub async fn request_access(&mut self) -> Result<String, JsValue> {
        let address = self
            .bridge
            .request_access()
            .await
            .map_err(|e| JsValue::from(WasmError::from(e)))?;
        Ok(address.to_hex())
    }

    /// Reopens a previously granted device without a prompt.
    ///
    /// # Errors
    ///
    /// Rejects with code 4100 if no granted device is available.
    pub async fn reconnect(&mut self) -> Result<String, JsValue> {
        let address = self
            .bridge
            .reconnect()
            .await
            .map_err(|e| JsValue::from(WasmError::from(e)))?;
        Ok(address.to_hex())
    }

    /// Switches to the account at `path` (e.g. `m/44'/60'/0'/0/3`).
    ///
    /// # Errors
    ///
    /// Rejects if the path is invalid or the device fails.
    #[wasm_bindgen(js_name = "selectPath")]
    pub async fn select_path(&mut self, path: String) -> Result<String, JsValue> {
        self.select_path_internal(&path)
            .await
            .map_err(JsValue::from)
    }

    async fn select_path_internal(&mut self, path: &str) -> WasmResult<String> {
        let path: DerivationPath = path.parse()?;
        let address = self.bridge.select_path(path).await?;
        Ok(address.to_hex())
    }

    /// Derives `count` accounts below `base` (or the configured scan base),
    /// starting at index `start`. Resolves to `[{ path, address }]`.
    ///
    /// # Errors
    ///
    /// Rejects if the base path is invalid or the device fails.
    #[wasm_bindgen(js_name = "scanAccounts")]
    pub async fn scan_accounts(
        &mut self,
        base: Option<String>,
        start: u32,
        count: u32,
    ) -> Result<JsValue, JsValue> {
        self.scan_accounts_internal(base.as_deref(), start, count)
            .await
            .map_err(JsValue::from)
    }

    async fn scan_accounts_internal(
        &mut self,
        base: Option<&str>,
        start: u32,
        count: u32,
    ) -> WasmResult<JsValue> {
        let base = base.map(str::parse::<DerivationPath>).transpose()?;
        let accounts = self.bridge.scan_accounts(base, start, count).await?;
        let value = serde_json::to_value(accounts)
            .map_err(ledger_evm_bridge_core::Error::from)?;
        to_js(&value)
    }

    /// Closes the device session and forgets the device.
    pub async fn disconnect(&mut self) {
        self.bridge.disconnect().await;
    }

    /// Accepts an event subscription. No events are emitted.
    pub fn on(&self, event: &str, _listener: &js_sys::Function) {
        self.bridge.on(event);
    }

    /// Accepts an event unsubscription.
    #[wasm_bindgen(js_name = "removeListener")]
    pub fn remove_listener(&self, event: &str, _listener: &js_sys::Function) {
        self.bridge.remove_listener(event);
    }

    /// Returns the open account's address, or `undefined`.
    #[wasm_bindgen(js_name = "selectedAddress")]
    pub fn selected_address(&self) -> Option<String> {
        self.bridge.selected_address().map(|address| address.to_hex())
    }

    /// Returns the configured chain id as a hex quantity.
    #[wasm_bindgen(js_name = "chainId")]
    pub fn chain_id(&self) -> String {
        format!("{:#x}", self.bridge.chain().chain_id)
    }
}

/// Splits `{ method, params }` into its parts; missing params become `null`.
fn parse_request_args(args: Value) -> WasmResult<(String, Value)> {
    let Value::Object(mut args) = args else {
        return Err(WasmError::InvalidArgument(
            "request expects an object { method, params }".to_string(),
        ));
    };
    let method = match args.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => {
            return Err(WasmError::InvalidArgument(
                "request.method must be a non-empty string".to_string(),
            ));
        }
    };
    let params = args.remove("params").unwrap_or(Value::Null);
    Ok((method, params))
}

/// Converts a JavaScript value to JSON; `undefined` and `null` become `null`.
fn from_js(value: &JsValue) -> WasmResult<Value> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    let text = String::from(js_sys::JSON::stringify(value)?);
    serde_json::from_str(&text).map_err(|e| WasmError::InvalidArgument(e.to_string()))
}

/// Converts JSON to a JavaScript value.
fn to_js(value: &Value) -> WasmResult<JsValue> {
    let text = serde_json::to_string(value).map_err(ledger_evm_bridge_core::Error::from)?;
    Ok(js_sys::JSON::parse(&text)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_args_split() {
        let (method, params) =
            parse_request_args(json!({"method": "eth_chainId", "params": []})).unwrap();
        assert_eq!(method, "eth_chainId");
        assert_eq!(params, json!([]));
    }

    #[test]
    fn missing_params_are_null() {
        let (method, params) = parse_request_args(json!({"method": "eth_accounts"})).unwrap();
        assert_eq!(method, "eth_accounts");
        assert_eq!(params, Value::Null);
    }

    #[test]
    fn malformed_request_args() {
        assert!(matches!(
            parse_request_args(json!("eth_accounts")),
            Err(WasmError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_request_args(json!({"method": 1})),
            Err(WasmError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_request_args(json!({"method": ""})),
            Err(WasmError::InvalidArgument(_))
        ));
    }
}
