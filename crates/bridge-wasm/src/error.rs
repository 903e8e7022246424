//! JavaScript-friendly error types for WASM bindings.
//!
//! Every failure crossing into JavaScript becomes an `Error` object whose
//! `message` is readable and which carries the EIP-1193 `code`. Send
//! failures also carry the pipeline `stage`, and device failures a `remedy`
//! hint for the UI.
//!
//! # Example
//!
//! ```javascript
//! try {
//!     await provider.request({ method: "eth_sendTransaction", params: [tx] });
//! } catch (err) {
//!     if (err.code === 4001) console.log("rejected on the device");
//!     console.log(err.stage, err.remedy);
//! }
//! ```

use std::{error, fmt};

use js_sys::{Error as JsError, Reflect};
use ledger_evm_bridge_core::error::{Error as CoreError, SessionFailure};
use wasm_bindgen::prelude::*;

/// Error type for WASM operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WasmError {
    /// A failure reported by the bridge.
    Bridge {
        /// EIP-1193 / JSON-RPC error code.
        code: i64,
        /// Send pipeline stage, for send failures.
        stage: Option<String>,
        /// Suggested remedy for device failures.
        remedy: Option<&'static str>,
        /// Human-readable message.
        message: String,
    },

    /// An argument from JavaScript had the wrong shape.
    InvalidArgument(String),

    /// A JavaScript exception that is not a bridge failure.
    JsError(String),
}

impl WasmError {
    /// Returns the EIP-1193 error code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::Bridge { code, .. } => *code,
            Self::InvalidArgument(_) => -32602,
            Self::JsError(_) => -32603,
        }
    }
}

impl fmt::Display for WasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge { message, .. } => {
                write!(f, "{message}")
            }
            Self::InvalidArgument(msg) => {
                write!(f, "Invalid argument: {msg}")
            }
            Self::JsError(msg) => {
                write!(f, "JavaScript error: {msg}")
            }
        }
    }
}

impl error::Error for WasmError {}

impl From<WasmError> for JsValue {
    fn from(error: WasmError) -> Self {
        let js_error = JsError::new(&error.to_string());
        #[expect(clippy::cast_precision_loss, reason = "provider codes are small")]
        let code = error.code() as f64;
        let _ = Reflect::set(&js_error, &"code".into(), &JsValue::from_f64(code));
        if let WasmError::Bridge { stage, remedy, .. } = &error {
            if let Some(stage) = stage {
                let _ = Reflect::set(&js_error, &"stage".into(), &JsValue::from_str(stage));
            }
            if let Some(remedy) = remedy {
                let _ = Reflect::set(&js_error, &"remedy".into(), &JsValue::from_str(remedy));
            }
        }
        js_error.into()
    }
}

impl From<CoreError> for WasmError {
    fn from(error: CoreError) -> Self {
        Self::Bridge {
            code: error.provider_code(),
            stage: error.stage().map(|stage| stage.to_string()),
            remedy: error.remedy(),
            message: error.to_string(),
        }
    }
}

impl From<JsValue> for WasmError {
    fn from(value: JsValue) -> Self {
        Self::JsError(js_message(&value))
    }
}

/// Extracts a readable message from a thrown JavaScript value.
pub(crate) fn js_message(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        s
    } else if let Some(err) = value.dyn_ref::<JsError>() {
        err.message().into()
    } else {
        format!("{value:?}")
    }
}

/// Returns the `name` of a thrown `DOMException`, if it is one.
pub(crate) fn js_error_name(value: &JsValue) -> Option<String> {
    value.dyn_ref::<JsError>().map(|err| err.name().into())
}

/// Maps a failed WebUSB call to a hardware session error.
pub(crate) fn usb_failure(context: &str, value: &JsValue) -> CoreError {
    usb_failure_named(context, js_error_name(value).as_deref(), &js_message(value))
}

/// Classifies a WebUSB failure by its `DOMException` name.
///
/// `InvalidStateError` and `NetworkError` are what browsers raise when
/// another context holds the interface.
pub(crate) fn usb_failure_named(context: &str, name: Option<&str>, message: &str) -> CoreError {
    let reason = match name {
        Some("InvalidStateError" | "NetworkError") => SessionFailure::TransportBusy,
        _ => SessionFailure::Transport,
    };
    CoreError::session(reason, format!("{context}: {message}"))
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;
