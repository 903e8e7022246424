//! Cryptographic helpers for secp256k1 signatures produced by the device.
//!
//! This module provides:
//!
//! - EIP-191 personal message hashing
//! - Recovery parity extraction from the device's raw `v` byte
//! - EIP-155 `v` computation for legacy transactions
//! - Public key recovery, used to check the device signed with the
//!   session's key
//!
//! # The `v` byte
//!
//! The Ledger Ethereum app reports `v` differently depending on the request:
//!
//! | request | `v` returned |
//! |---|---|
//! | legacy transaction with chain id | low byte of `chainId * 2 + 35 + parity` |
//! | EIP-1559 transaction | `parity` (`0`/`1`), older firmware `27`/`28` |
//! | personal message | `27 + parity` |
//!
//! [`recovery_parity`] accepts all of these.
//!
//! # Example
//!
//! ```
//! use ledger_evm_bridge_core::crypto::{eip155_v, recovery_parity};
//!
//! // Mainnet legacy transaction, device returned 0x26.
//! let parity = recovery_parity(0x26, Some(1)).unwrap();
//! assert_eq!(parity, 1);
//! assert_eq!(eip155_v(parity, 1), 38);
//! ```

use alloy_primitives::{B256, keccak256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// The EIP-191 version `0x45` prefix used by `personal_sign`.
const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Hashes a message the way `personal_sign` does (EIP-191 version `0x45`).
///
/// `keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)`
#[must_use]
pub fn personal_message_hash(message: &[u8]) -> B256 {
    let mut data = format!("{PERSONAL_MESSAGE_PREFIX}{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data)
}

/// Extracts the recovery parity (`0` or `1`) from a device `v` byte.
///
/// When `chain_id` is given the byte is first interpreted as the (possibly
/// truncated) EIP-155 value `chainId * 2 + 35 + parity`.
///
/// # Errors
///
/// Returns [`Error::RecoveryParameterFailed`] if `v` matches none of the
/// known encodings.
pub fn recovery_parity(v: u8, chain_id: Option<u64>) -> Result<u8> {
    if let Some(chain_id) = chain_id {
        #[expect(clippy::cast_possible_truncation, reason = "reduced modulo 256")]
        let base = ((u128::from(chain_id) * 2 + 35) % 256) as u8;
        let parity = v.wrapping_sub(base);
        if parity <= 1 {
            return Ok(parity);
        }
    }

    match v {
        0 | 1 => Ok(v),
        27 | 28 => Ok(v - 27),
        _ => Err(Error::RecoveryParameterFailed(v)),
    }
}

/// Computes the EIP-155 `v` for a legacy transaction.
///
/// Computed in `u128` so every `u64` chain id is representable.
#[must_use]
pub const fn eip155_v(parity: u8, chain_id: u64) -> u128 {
    chain_id as u128 * 2 + 35 + parity as u128
}

/// Recovers the signer address of a prehashed message.
///
/// # Errors
///
/// - [`Error::RecoveryParameterFailed`] if `parity` is not `0` or `1`
/// - [`Error::InvalidSignature`] if `r`/`s` are out of range or recovery fails
pub fn recover_address(hash: &B256, signature: &Signature, parity: u8) -> Result<Address> {
    let recovery_id =
        RecoveryId::from_byte(parity).ok_or(Error::RecoveryParameterFailed(parity))?;

    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(signature.r());
    rs[32..].copy_from_slice(signature.s());
    let sig =
        K256Signature::from_slice(&rs).map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recovery_id)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    Address::from_public_key_bytes(key.to_encoded_point(false).as_bytes())
}

/// Checks that `signature` over `hash` was produced by `expected`.
///
/// # Errors
///
/// Returns [`Error::SignerMismatch`] if the recovered address differs, or
/// any error from [`recover_address`].
pub fn verify_signer(
    hash: &B256,
    signature: &Signature,
    parity: u8,
    expected: Address,
) -> Result<()> {
    let recovered = recover_address(hash, signature, parity)?;
    if recovered == expected {
        Ok(())
    } else {
        Err(Error::SignerMismatch {
            expected,
            recovered,
        })
    }
}
