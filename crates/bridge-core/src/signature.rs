//! secp256k1 ECDSA signatures as returned by the Ledger Ethereum app.
//!
//! The device answers every signing instruction with 65 bytes laid out as
//! `v (1 byte) || r (32 bytes) || s (32 bytes)`. The `v` byte is kept exactly
//! as the device sent it: depending on the instruction and the firmware it is
//! a raw recovery id (`0`/`1`), a legacy `27`/`28`, or the low byte of an
//! EIP-155 value. Callers derive the recovery parity with
//! [`crate::crypto::recovery_parity`] for the context they are in.
//!
//! # Wire Format
//!
//! For `personal_sign` results the signature is serialized the usual way:
//! `r (32 bytes) || s (32 bytes) || v (1 byte)`.
//!
//! # Example
//!
//! ```
//! use ledger_evm_bridge_core::Signature;
//!
//! let mut response = [0u8; 65];
//! response[0] = 0x25;
//! let sig = Signature::from_device_response(&response).unwrap();
//! assert_eq!(sig.v(), 0x25);
//! ```

use core::fmt;

use crate::error::{Error, Result};

/// An ECDSA signature over secp256k1 with the device's raw `v` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// The R component of the signature (32 bytes).
    r: [u8; 32],

    /// The S component of the signature (32 bytes).
    s: [u8; 32],

    /// The recovery byte as returned by the device.
    v: u8,
}

impl Signature {
    /// The length of a serialized signature in bytes.
    pub const BYTE_LEN: usize = 65;

    /// Creates a new signature from raw components.
    #[must_use]
    pub const fn new(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        Self { r, s, v }
    }

    /// Parses the `v || r || s` payload of a Ledger signing response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the payload is shorter than
    /// 65 bytes.
    pub fn from_device_response(data: &[u8]) -> Result<Self> {
        if data.len() < Self::BYTE_LEN {
            return Err(Error::MalformedResponse(format!(
                "signature response has {} bytes, expected {}",
                data.len(),
                Self::BYTE_LEN
            )));
        }

        let v = data[0];
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&data[1..33]);
        s.copy_from_slice(&data[33..65]);

        Ok(Self::new(r, s, v))
    }

    /// Serializes the signature to a 65-byte `r || s || v` array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0u8; Self::BYTE_LEN];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }

    /// Returns a copy of this signature with a different `v`.
    #[must_use]
    pub const fn with_v(self, v: u8) -> Self {
        Self { v, ..self }
    }

    /// Returns the R component of the signature.
    #[must_use]
    pub const fn r(&self) -> &[u8; 32] {
        &self.r
    }

    /// Returns the S component of the signature.
    #[must_use]
    pub const fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Returns the recovery byte as the device returned it.
    #[must_use]
    pub const fn v(&self) -> u8 {
        self.v
    }

    /// Encodes the `r || s || v` bytes as a hex string with `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
