//! Ethereum addresses and their derivation from secp256k1 public keys.
//!
//! The Ledger Ethereum application returns both the uncompressed public key
//! and the ASCII address for a derivation path. The bridge re-derives the
//! address from the key to make sure the two agree:
//!
//! 1. Take the uncompressed public key (65 bytes: `0x04 || x || y`)
//! 2. Remove the `0x04` prefix to get 64 bytes (`x || y`)
//! 3. Compute the Keccak-256 hash of the 64 bytes
//! 4. Take the last 20 bytes of the hash as the address
//!
//! # Example
//!
//! ```
//! use ledger_evm_bridge_core::Address;
//!
//! let addr: Address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse().unwrap();
//! assert_eq!(addr.to_checksum_hex(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
//! ```

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address as AlloyAddress, keccak256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An Ethereum address (20 bytes).
///
/// Equality is byte equality, so two addresses that differ only in hex
/// casing compare equal once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(AlloyAddress);

impl Address {
    /// The length of an Ethereum address in bytes.
    pub const BYTE_LEN: usize = 20;

    /// Creates a new address from a 20-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(AlloyAddress::new(bytes))
    }

    /// Returns the zero address (`0x0000...0000`).
    #[must_use]
    pub const fn zero() -> Self {
        Self(AlloyAddress::ZERO)
    }

    /// Derives an Ethereum address from raw uncompressed public key bytes.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Either 65 bytes (`0x04 || x || y`) or 64 bytes (`x || y`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if:
    /// - The byte length is not 64 or 65
    /// - For 65-byte input, the first byte is not `0x04`
    ///
    /// # Example
    ///
    /// ```
    /// use ledger_evm_bridge_core::Address;
    ///
    /// let pubkey_bytes = [0u8; 64];
    /// let addr = Address::from_public_key_bytes(&pubkey_bytes).unwrap();
    /// ```
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let pubkey_bytes = match bytes.len() {
            64 => bytes,
            65 => {
                if bytes[0] != 0x04 {
                    return Err(Error::InvalidPublicKey(
                        "65-byte public key must start with 0x04".to_string(),
                    ));
                }
                &bytes[1..]
            }
            len => {
                return Err(Error::InvalidPublicKey(format!(
                    "expected 64 or 65 bytes, got {len}"
                )));
            }
        };

        let hash = keccak256(pubkey_bytes);

        let mut address_bytes = [0u8; Self::BYTE_LEN];
        address_bytes.copy_from_slice(&hash[12..]);

        Ok(Self::new(address_bytes))
    }

    /// Returns the [`Address`] as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::BYTE_LEN] {
        self.0.as_ref()
    }

    /// Returns the [`Address`] as a 20-byte array.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        self.0.0.0
    }

    /// Returns the [`Address`] as an EIP-55 checksummed hex string.
    #[must_use]
    pub fn to_checksum_hex(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Returns the [`Address`] as a lowercase hex string with `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }

    /// Parses an [`Address`] from a hex string, optionally prefixed with `0x`.
    ///
    /// Casing is not validated against the EIP-55 checksum; dapps routinely
    /// send lowercase addresses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] if the hex string is invalid, or
    /// [`Error::InvalidTransaction`] if the decoded bytes are not 20 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str
            .strip_prefix("0x")
            .or_else(|| hex_str.strip_prefix("0X"))
            .unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;

        let address_bytes: [u8; Self::BYTE_LEN] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidTransaction(format!(
                "expected {} address bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::new(address_bytes))
    }

    /// Returns the inner [`alloy_primitives::Address`].
    #[must_use]
    pub const fn inner(&self) -> AlloyAddress {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_hex())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s.trim())
    }
}

impl From<AlloyAddress> for Address {
    fn from(addr: AlloyAddress) -> Self {
        Self(addr)
    }
}

impl From<Address> for AlloyAddress {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_zero() {
        let zero = Address::zero();
        assert_eq!(zero.as_bytes(), &[0u8; 20]);
    }

    #[test]
    fn address_from_public_key_bytes_64() {
        let pubkey_bytes = [7u8; 64];
        let addr = Address::from_public_key_bytes(&pubkey_bytes).unwrap();

        let expected_hash = keccak256(pubkey_bytes);
        let expected_addr: [u8; 20] = expected_hash[12..].try_into().unwrap();
        assert_eq!(addr.to_bytes(), expected_addr);
    }

    #[test]
    fn address_from_public_key_bytes_65() {
        let mut pubkey_bytes = [7u8; 65];
        pubkey_bytes[0] = 0x04;

        let addr = Address::from_public_key_bytes(&pubkey_bytes).unwrap();
        let addr_64 = Address::from_public_key_bytes(&[7u8; 64]).unwrap();
        assert_eq!(addr, addr_64);
    }

    #[test]
    fn address_from_public_key_bytes_invalid_prefix() {
        let mut pubkey_bytes = [0u8; 65];
        pubkey_bytes[0] = 0x02;

        let result = Address::from_public_key_bytes(&pubkey_bytes);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));
    }

    #[test]
    fn address_from_public_key_bytes_invalid_length() {
        let result = Address::from_public_key_bytes(&[0u8; 33]);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));
    }

    #[test]
    fn parse_is_case_insensitive() {
        let lower: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        let mixed: Address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse().unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(
            lower.to_checksum_hex(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let result = Address::from_hex("0x1234");
        assert!(matches!(result, Err(Error::InvalidTransaction(_))));

        let result = Address::from_hex("0xzz");
        assert!(matches!(result, Err(Error::HexDecodeFailed(_))));
    }

    #[test]
    fn address_display() {
        let addr = Address::new([0xab; 20]);
        let display = format!("{addr}");
        assert!(display.starts_with("0x"));
        assert_eq!(display.len(), 42);
    }

    #[test]
    fn serde_uses_hex_string() {
        let addr = Address::new([0x11; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
        assert!(json.starts_with("\"0x"));
    }
}
