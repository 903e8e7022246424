//! APDU (Application Protocol Data Unit) command and response types.
//!
//! The Ledger Ethereum application speaks short-form ISO 7816-4 APDUs:
//!
//! ```text
//! | CLA | INS | P1 | P2 | Lc | Data    |
//! |-----|-----|----|----|----|---------|
//! | 1B  | 1B  | 1B | 1B | 1B | 0..255B |
//! ```
//!
//! `Lc` is always present, even for commands without data. Responses are
//! `data || SW1 || SW2`.
//!
//! # Example
//!
//! ```
//! use ledger_evm_bridge_core::ledger::{Apdu, ApduResponse};
//!
//! let apdu = Apdu::new(0xE0, 0x06, 0x00, 0x00, vec![]).unwrap();
//! assert_eq!(apdu.to_bytes(), vec![0xE0, 0x06, 0x00, 0x00, 0x00]);
//!
//! let response = ApduResponse::from_bytes(vec![0x01, 0x90, 0x00]).unwrap();
//! assert!(response.is_success());
//! ```

use crate::error::{Error, Result, SessionFailure};

/// An APDU command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// Class byte.
    cla: u8,

    /// Instruction byte.
    ins: u8,

    /// Parameter 1.
    p1: u8,

    /// Parameter 2.
    p2: u8,

    /// Command data.
    data: Vec<u8>,
}

impl Apdu {
    /// Maximum short APDU data length.
    pub const MAX_DATA: usize = 255;

    /// Creates a new APDU command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if `data` does not fit a short
    /// APDU.
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > Self::MAX_DATA {
            return Err(Error::MalformedResponse(format!(
                "APDU data of {} bytes exceeds {}",
                data.len(),
                Self::MAX_DATA
            )));
        }
        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    /// Returns the class byte.
    #[must_use]
    pub const fn cla(&self) -> u8 {
        self.cla
    }

    /// Returns the instruction byte.
    #[must_use]
    pub const fn ins(&self) -> u8 {
        self.ins
    }

    /// Returns parameter 1.
    #[must_use]
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Returns parameter 2.
    #[must_use]
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Returns the command data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serializes the APDU to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        #[expect(clippy::cast_possible_truncation, reason = "checked in Apdu::new")]
        bytes.push(self.data.len() as u8);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// An APDU response from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data.
    data: Vec<u8>,

    /// Status word 1.
    sw1: u8,

    /// Status word 2.
    sw2: u8,
}

impl ApduResponse {
    /// Success status word (0x9000).
    pub const SW_SUCCESS: u16 = 0x9000;

    /// The user declined the action on the device.
    pub const SW_DENIED: u16 = 0x6985;

    /// The device is locked (screen saver or PIN entry).
    pub const SW_LOCKED: u16 = 0x5515;

    /// Older firmware's locked status.
    pub const SW_LOCKED_LEGACY: u16 = 0x6b0c;

    /// Creates a new APDU response from raw `data || SW1 || SW2` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if fewer than two bytes are given.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::MalformedResponse(format!(
                "APDU response of {} bytes has no status word",
                bytes.len()
            )));
        }

        let sw2 = bytes.pop().unwrap_or_default();
        let sw1 = bytes.pop().unwrap_or_default();
        Ok(Self {
            data: bytes,
            sw1,
            sw2,
        })
    }

    /// Creates a response from data and a status word.
    #[must_use]
    pub fn with_status(data: Vec<u8>, status_word: u16) -> Self {
        let [sw1, sw2] = status_word.to_be_bytes();
        Self { data, sw1, sw2 }
    }

    /// Returns the response data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the response and returns the data.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the full status word as a [`u16`].
    #[must_use]
    pub const fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Checks if the response indicates success (`SW = 0x9000`).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_word() == Self::SW_SUCCESS
    }

    /// Checks the response status and returns an error if not successful.
    ///
    /// # Errors
    ///
    /// Returns the error [`ApduResponse::to_error`] maps the status word to.
    pub fn check(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self.to_error())
        }
    }

    /// Converts the status word to a descriptive error.
    #[must_use]
    pub fn to_error(&self) -> Error {
        let sw = self.status_word();
        match sw {
            Self::SW_DENIED => Error::SigningRejected,
            Self::SW_LOCKED | Self::SW_LOCKED_LEGACY => Error::session(
                SessionFailure::Locked,
                format!("device is locked (status {sw:#06x})"),
            ),
            // CLA/INS not supported, or the dashboard answered instead of an app.
            0x6d00 | 0x6e00 | 0x6e01 | 0x6511 => Error::session(
                SessionFailure::WrongApp,
                format!("Ethereum app is not open (status {sw:#06x})"),
            ),
            _ => Error::UnexpectedStatusWord(sw),
        }
    }
}
