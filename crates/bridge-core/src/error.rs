//! Error types for the Ledger EVM bridge.
//!
//! This module provides a single error type [`enum@Error`] covering every
//! failure mode between the calling application, the Ledger device and the
//! remote node.
//!
//! # Error Categories
//!
//! - **Device access errors**: no device chosen, permission not granted
//! - **Hardware session errors**: locked device, wrong app, busy transport
//! - **RPC errors**: HTTP or JSON-RPC level failures from the node
//! - **Provider errors**: unsupported methods, chain mismatches, bad params
//! - **Protocol errors**: malformed device responses, RLP, signatures
//!
//! # Example
//!
//! ```
//! use ledger_evm_bridge_core::Error;
//!
//! let err = Error::SigningRejected;
//! assert_eq!(err.provider_code(), 4001);
//! ```

use core::fmt;
use core::result::Result as CoreResult;

use hex::FromHexError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use url::ParseError as UrlParseError;

use crate::address::Address;

/// Why a hardware session could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionFailure {
    /// The device is locked or asleep.
    Locked,
    /// The Ethereum application is not open on the device.
    WrongApp,
    /// The transport is claimed by another tab or application.
    TransportBusy,
    /// Any other transport-level failure.
    Transport,
}

impl SessionFailure {
    /// Returns a short hint the UI can show next to the error.
    #[must_use]
    pub const fn remedy(self) -> &'static str {
        match self {
            Self::Locked => "unlock the device with its PIN and retry",
            Self::WrongApp => "open the Ethereum application on the device and retry",
            Self::TransportBusy => {
                "close other applications or tabs using the device (e.g. Ledger Live) and retry"
            }
            Self::Transport => "reconnect the device and retry",
        }
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Locked => "device is locked",
            Self::WrongApp => "Ethereum app is not open",
            Self::TransportBusy => "device transport is busy",
            Self::Transport => "device transport failed",
        };
        f.write_str(label)
    }
}

/// The stage of the send pipeline a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendStage {
    /// Nothing has happened yet.
    Idle,
    /// Resolving nonce, gas and fees.
    Building,
    /// Waiting for the user to confirm on the device.
    AwaitingDevice,
    /// Submitting the signed transaction to the node.
    Broadcasting,
    /// Finished.
    Done,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::AwaitingDevice => "awaiting-device",
            Self::Broadcasting => "broadcasting",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// The main error type for the bridge.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Device Access Errors
    // =========================================================================
    /// The user closed the device picker without choosing a device, or the
    /// picker was opened outside a user gesture.
    #[error("no device chosen: call requestAccess from a user gesture and select the device")]
    NoDeviceSelected,

    /// No previously granted device is available for a silent reconnect.
    #[error("device not authorized: repeat the connect flow from a user gesture")]
    DeviceNotAuthorized,

    /// WebUSB is not available in this environment.
    #[error("WebUSB is not available: {0}")]
    WebUsbUnavailable(String),

    // =========================================================================
    // Hardware Session Errors
    // =========================================================================
    /// The device could not be used for this request.
    #[error("{reason}: {message}")]
    HardwareSession {
        /// Normalized failure category.
        reason: SessionFailure,
        /// The underlying message, preserved for display.
        message: String,
    },

    /// The user declined the request on the device.
    #[error("request rejected on the device")]
    SigningRejected,

    /// The device answered with a status word the bridge does not map.
    #[error("unexpected status word: {0:#06x}")]
    UnexpectedStatusWord(u16),

    /// The device response could not be parsed.
    #[error("malformed device response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // RPC Errors
    // =========================================================================
    /// The node rejected or failed a JSON-RPC call.
    #[error("RPC {method} failed{}: {message}", .code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Rpc {
        /// The JSON-RPC method that failed.
        method: String,
        /// JSON-RPC error code or HTTP status, when known.
        code: Option<i64>,
        /// Error message.
        message: String,
    },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// The requested chain differs from the configured chain.
    #[error("unsupported chain {requested:#x}: bridge is configured for {configured:#x}")]
    ChainMismatch {
        /// The chain id the caller asked for.
        requested: u64,
        /// The configured chain id.
        configured: u64,
    },

    /// The provider method is not handled by the bridge.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The declared sender is not the session's address.
    #[error("sender {declared} does not match the connected account {session}")]
    SenderMismatch {
        /// The address the request declared.
        declared: Address,
        /// The active session address.
        session: Address,
    },

    /// The provider params could not be shaped for the method.
    #[error("invalid params for {method}: {reason}")]
    InvalidParams {
        /// The provider method.
        method: String,
        /// What was wrong.
        reason: String,
    },

    /// A failure in the send pipeline, tagged with the stage it happened in.
    #[error("send failed while {stage}: {source}")]
    SendFailed {
        /// Stage of the pipeline.
        stage: SendStage,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Cryptographic Errors
    // =========================================================================
    /// The public key is invalid or malformed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The signature is invalid or malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The signature recovery parameter (v) could not be determined.
    #[error("failed to determine signature recovery parameter from v={0}")]
    RecoveryParameterFailed(u8),

    /// The device signed with a key other than the session's.
    #[error("signature recovers to {recovered}, expected {expected}")]
    SignerMismatch {
        /// The session address.
        expected: Address,
        /// The address recovered from the signature.
        recovered: Address,
    },

    /// The derivation path is invalid.
    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    // =========================================================================
    // Transaction Errors
    // =========================================================================
    /// The transaction data is invalid.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    // =========================================================================
    // Serialization & Configuration Errors
    // =========================================================================
    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// The bridge configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Creates a [`Error::HardwareSession`] error.
    pub fn session(reason: SessionFailure, message: impl Into<String>) -> Self {
        Self::HardwareSession {
            reason,
            message: message.into(),
        }
    }

    /// Creates a [`Error::InvalidParams`] error.
    pub fn invalid_params(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Tags this error with the send stage it happened in.
    ///
    /// Errors that are already tagged keep their original stage.
    #[must_use]
    pub fn at(self, stage: SendStage) -> Self {
        match self {
            tagged @ Self::SendFailed { .. } => tagged,
            other => Self::SendFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the stage this error was tagged with, if any.
    #[must_use]
    pub const fn stage(&self) -> Option<SendStage> {
        match self {
            Self::SendFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns the underlying error, looking through stage tagging.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::SendFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the suggested remedy for hardware session failures.
    #[must_use]
    pub fn remedy(&self) -> Option<&'static str> {
        match self.root() {
            Self::HardwareSession { reason, .. } => Some(reason.remedy()),
            Self::NoDeviceSelected | Self::DeviceNotAuthorized => {
                Some("connect the device again from a button click")
            }
            _ => None,
        }
    }

    /// Maps this error to an EIP-1193 / JSON-RPC error code.
    #[must_use]
    pub fn provider_code(&self) -> i64 {
        match self.root() {
            Self::SigningRejected => 4001,
            Self::NoDeviceSelected | Self::DeviceNotAuthorized | Self::SenderMismatch { .. } => {
                4100
            }
            Self::UnsupportedMethod(_) => 4200,
            Self::WebUsbUnavailable(_) | Self::HardwareSession { .. } => 4900,
            Self::ChainMismatch { .. } => 4901,
            Self::InvalidParams { .. } | Self::InvalidTransaction(_) => -32602,
            Self::Rpc {
                code: Some(code), ..
            } if *code < 0 => *code,
            _ => -32603,
        }
    }
}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Self::HexDecodeFailed(err.to_string())
    }
}

impl From<SerdeJsonError> for Error {
    fn from(err: SerdeJsonError) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<UrlParseError> for Error {
    fn from(err: UrlParseError) -> Self {
        Self::InvalidConfig(format!("invalid RPC URL: {err}"))
    }
}

/// A specialized [`Result`] type for bridge operations.
pub type Result<T> = CoreResult<T, Error>;

#[cfg(test)]
mod tests {
    use serde_json::{Value, from_str};

    use super::*;

    #[test]
    fn error_display() {
        let err = Error::ChainMismatch {
            requested: 5,
            configured: 1,
        };
        assert_eq!(
            err.to_string(),
            "unsupported chain 0x5: bridge is configured for 0x1"
        );

        let err = Error::UnexpectedStatusWord(0x6a80);
        assert_eq!(err.to_string(), "unexpected status word: 0x6a80");

        let err = Error::Rpc {
            method: "eth_gasPrice".to_string(),
            code: Some(-32000),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "RPC eth_gasPrice failed (-32000): boom");
    }

    #[test]
    fn session_error_preserves_message() {
        let err = Error::session(SessionFailure::WrongApp, "CLA not supported");
        assert_eq!(
            err.to_string(),
            "Ethereum app is not open: CLA not supported"
        );
        assert_eq!(
            err.remedy(),
            Some("open the Ethereum application on the device and retry")
        );
    }

    #[test]
    fn stage_tagging() {
        let err = Error::SigningRejected.at(SendStage::AwaitingDevice);
        assert_eq!(err.stage(), Some(SendStage::AwaitingDevice));
        assert!(matches!(err.root(), Error::SigningRejected));
        assert_eq!(err.provider_code(), 4001);

        // Re-tagging keeps the first stage.
        let err = err.at(SendStage::Broadcasting);
        assert_eq!(err.stage(), Some(SendStage::AwaitingDevice));
    }

    #[test]
    fn provider_codes() {
        assert_eq!(Error::UnsupportedMethod("foo".into()).provider_code(), 4200);
        assert_eq!(Error::NoDeviceSelected.provider_code(), 4100);
        assert_eq!(
            Error::Rpc {
                method: "eth_call".into(),
                code: Some(-32000),
                message: "reverted".into(),
            }
            .provider_code(),
            -32000
        );
        assert_eq!(
            Error::Rpc {
                method: "eth_call".into(),
                code: Some(502),
                message: "bad gateway".into(),
            }
            .provider_code(),
            -32603
        );
    }

    #[test]
    fn from_hex_error() {
        let hex_err = FromHexError::InvalidHexCharacter { c: 'g', index: 0 };
        let err: Error = hex_err.into();
        assert!(matches!(err, Error::HexDecodeFailed(_)));
    }

    #[test]
    fn from_json_error() {
        let json_err = from_str::<Value>("not valid json{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::JsonError(_)));
    }
}
