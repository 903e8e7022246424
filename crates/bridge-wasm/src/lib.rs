//! Ledger EVM Bridge WASM Library
//!
//! This crate provides WebAssembly bindings for the Ledger EVM bridge,
//! letting a web page use a Ledger hardware wallet running the Ethereum app
//! as an EIP-1193 provider. The device is reached over WebUSB; reads and
//! broadcasts go to a JSON-RPC node.
//!
//! # Browser Support
//!
//! This library requires WebUSB, which is only supported in Chromium-based
//! browsers (Chrome, Edge, Opera, Brave). Firefox and Safari do not support
//! WebUSB.
//!
//! # Security Requirements
//!
//! - HTTPS context required (WebUSB security requirement)
//! - User gesture required to open the device picker
//! - Ledger Live and other tabs must release the device first
//!
//! # Quick Start
//!
//! ```javascript
//! import init, { LedgerProvider, isWebUsbSupported } from 'ledger-evm-bridge-wasm';
//!
//! await init();
//! if (!isWebUsbSupported()) throw new Error("WebUSB unavailable");
//!
//! const provider = new LedgerProvider({
//!     chainId: 11155111,
//!     rpcUrl: "https://rpc.sepolia.org",
//! });
//!
//! // From a click handler:
//! await provider.requestAccess();
//!
//! const [account] = await provider.request({ method: "eth_accounts" });
//! const signature = await provider.request({
//!     method: "personal_sign",
//!     params: ["0x68656c6c6f", account],
//! });
//!
//! await provider.disconnect();
//! ```
//!
//! # API Reference
//!
//! ## [`LedgerProvider`]
//!
//! - `request({ method, params })` - EIP-1193 request
//! - `requestAccess()` - pick a device and open the default account (user gesture)
//! - `reconnect()` - reopen a previously granted device silently
//! - `selectPath(path)` - switch to another derivation path
//! - `scanAccounts(base, start, count)` - list addresses below a path
//! - `disconnect()` - close the session and forget the device
//! - `on(event, fn)` / `removeListener(event, fn)` - accepted, never fired
//! - `selectedAddress()` - the open account, if any

pub mod device;
pub mod error;
pub mod logging;
pub mod provider;
pub mod transport;

pub use device::WebUsbBackend;
pub use error::{WasmError, WasmResult};
pub use provider::LedgerProvider;
pub use transport::LedgerWebUsbTransport;

use tracing::Level;
use wasm_bindgen::prelude::*;

use crate::logging::ConsoleMakeWriter;

/// Initializes the WASM module.
///
/// Installs the panic hook and routes logs to the browser console. Runs
/// automatically when the module is loaded.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();

    // A subscriber may already be installed when the module is re-initialized.
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .with_writer(ConsoleMakeWriter)
        .try_init();
}

/// Checks if WebUSB is supported in the current browser.
///
/// # Returns
///
/// `true` if WebUSB is available, `false` otherwise.
///
/// # Example
///
/// ```javascript
/// if (!isWebUsbSupported()) {
///     alert("WebUSB is not supported. Please use Chrome, Edge, or another Chromium browser.");
/// }
/// ```
#[wasm_bindgen(js_name = "isWebUsbSupported")]
pub fn is_webusb_supported() -> bool {
    if let Some(window) = web_sys::window() {
        let navigator: web_sys::Navigator = window.navigator();
        js_sys::Reflect::has(&navigator, &JsValue::from_str("usb")).unwrap_or(false)
    } else {
        false
    }
}

/// Returns the library version.
///
/// # Returns
///
/// The version string (e.g., `"0.1.0"`).
#[wasm_bindgen(js_name = "getVersion")]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
