//! Ledger device communication.
//!
//! This module speaks the Ledger Ethereum application's APDU protocol over
//! an abstract transport:
//!
//! - [`apdu`]: APDU command/response types and status word mapping
//! - [`path`]: BIP-32 derivation paths and their wire encoding
//! - [`framing`]: HID packet framing used by USB transports
//! - [`eth_app`]: the Ethereum application's instructions
//!
//! # Transport Abstraction
//!
//! The [`Transport`] trait hides how APDUs reach the device. The browser
//! crate implements it over WebUSB; tests implement it with an emulated
//! device.
//!
//! # Example
//!
//! ```ignore
//! use ledger_evm_bridge_core::ledger::{DerivationPath, EthApp, Transport};
//!
//! let transport: Box<dyn Transport> = /* opened by a DeviceBackend */;
//! let mut app = EthApp::new(transport);
//! let address = app.get_address(&DerivationPath::default(), true).await?;
//! ```

pub mod apdu;
pub mod eth_app;
pub mod framing;
pub mod path;

pub use apdu::{Apdu, ApduResponse};
pub use eth_app::{AppConfiguration, EthApp};
pub use path::DerivationPath;

use core::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// A channel that exchanges APDUs with one device.
///
/// Implementations run on a single-threaded executor, so futures are not
/// required to be `Send`.
#[async_trait(?Send)]
pub trait Transport: fmt::Debug {
    /// Sends an APDU command and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::HardwareSession`] if the exchange fails at the
    /// transport level. Non-success status words are returned as responses.
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse>;

    /// Releases the underlying device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be released cleanly.
    async fn close(&mut self) -> Result<()>;

    /// Checks if the transport is still open.
    fn is_connected(&self) -> bool;
}
