//! Ethereum transaction types and the payloads sent to the device.
//!
//! This module supports:
//!
//! - **EIP-155 Legacy Transactions**: single gas price with chain ID replay protection
//! - **EIP-1559 Transactions**: Type 2 transactions with priority fees and max fees
//!
//! # Signing Flow
//!
//! 1. Build a [`Transaction`] (see [`crate::builder`])
//! 2. Send [`Transaction::unsigned_rlp`] to the device, which hashes and signs it
//! 3. Combine the returned signature with the fields via [`Transaction::signed_rlp`]
//! 4. Broadcast the signed bytes
//!
//! # Example
//!
//! ```
//! use ledger_evm_bridge_core::{Address, Eip1559Transaction, Transaction};
//! use alloy_primitives::U256;
//!
//! let tx = Transaction::Eip1559(Eip1559Transaction {
//!     chain_id: 1,
//!     nonce: 0,
//!     max_priority_fee_per_gas: U256::from(1_000_000_000u64),
//!     max_fee_per_gas: U256::from(100_000_000_000u64),
//!     gas_limit: 21000,
//!     to: Some(Address::zero()),
//!     value: U256::from(1_000_000_000_000_000_000u128),
//!     data: vec![],
//!     access_list: vec![],
//! });
//!
//! let payload = tx.unsigned_rlp();
//! assert_eq!(payload[0], 0x02);
//! ```

use alloy_primitives::{B256, U256, keccak256};
use alloy_rlp::{Encodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::crypto::{eip155_v, recovery_parity};
use crate::error::Result;
use crate::signature::Signature;

/// An access list entry for EIP-2930/EIP-1559 transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    /// The address being accessed.
    pub address: alloy_primitives::Address,

    /// The storage keys being accessed at this address.
    pub storage_keys: Vec<B256>,
}

/// An EIP-155 legacy transaction.
///
/// [EIP-155]: https://eips.ethereum.org/EIPS/eip-155
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTransaction {
    /// The chain ID for replay protection.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The gas price in wei.
    pub gas_price: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    /// Returns the EIP-155 signing payload.
    ///
    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`
    #[must_use]
    pub fn unsigned_rlp(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.data.len());

        encode_rlp_list(&mut buf, |buf| {
            self.nonce.encode(buf);
            encode_u256(&self.gas_price, buf);
            self.gas_limit.encode(buf);
            encode_optional_address(self.to.as_ref(), buf);
            encode_u256(&self.value, buf);
            self.data.as_slice().encode(buf);
            self.chain_id.encode(buf);
            0u8.encode(buf);
            0u8.encode(buf);
        });

        buf
    }

    /// Returns the encoded length of the trailing `chainId, 0, 0` items of
    /// the signing payload.
    #[must_use]
    pub fn eip155_tail_len(&self) -> usize {
        self.chain_id.length() + 2
    }

    /// Creates the broadcastable transaction from a device signature.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RecoveryParameterFailed`] if the signature's
    /// `v` byte cannot be mapped to a parity for this chain.
    pub fn signed_rlp(&self, signature: &Signature) -> Result<Vec<u8>> {
        let parity = recovery_parity(signature.v(), Some(self.chain_id))?;
        let v = eip155_v(parity, self.chain_id);

        let mut buf = Vec::with_capacity(192 + self.data.len());
        encode_rlp_list(&mut buf, |buf| {
            self.nonce.encode(buf);
            encode_u256(&self.gas_price, buf);
            self.gas_limit.encode(buf);
            encode_optional_address(self.to.as_ref(), buf);
            encode_u256(&self.value, buf);
            self.data.as_slice().encode(buf);
            v.encode(buf);
            encode_bytes32(signature.r(), buf);
            encode_bytes32(signature.s(), buf);
        });

        Ok(buf)
    }
}

/// An EIP-1559 (Type 2) transaction.
///
/// [EIP-1559]: https://eips.ethereum.org/EIPS/eip-1559
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip1559Transaction {
    /// The chain ID.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The maximum priority fee per gas (tip).
    pub max_priority_fee_per_gas: U256,

    /// The maximum total fee per gas.
    pub max_fee_per_gas: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Vec<u8>,

    /// The access list.
    pub access_list: Vec<AccessListEntry>,
}

impl Eip1559Transaction {
    /// The transaction type identifier for EIP-1559.
    pub const TX_TYPE: u8 = 0x02;

    /// Returns the typed signing payload.
    ///
    /// `0x02 || rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas,
    /// gasLimit, to, value, data, accessList])`
    #[must_use]
    pub fn unsigned_rlp(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256 + self.data.len());
        buf.push(Self::TX_TYPE);

        encode_rlp_list(&mut buf, |buf| self.encode_fields(buf));

        buf
    }

    /// Creates the broadcastable transaction from a device signature.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RecoveryParameterFailed`] if the signature's
    /// `v` byte is not a recognizable parity.
    pub fn signed_rlp(&self, signature: &Signature) -> Result<Vec<u8>> {
        let parity = recovery_parity(signature.v(), None)?;

        let mut buf = Vec::with_capacity(320 + self.data.len());
        buf.push(Self::TX_TYPE);

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
            parity.encode(buf);
            encode_bytes32(signature.r(), buf);
            encode_bytes32(signature.s(), buf);
        });

        Ok(buf)
    }

    fn encode_fields(&self, buf: &mut Vec<u8>) {
        self.chain_id.encode(buf);
        self.nonce.encode(buf);
        encode_u256(&self.max_priority_fee_per_gas, buf);
        encode_u256(&self.max_fee_per_gas, buf);
        self.gas_limit.encode(buf);
        encode_optional_address(self.to.as_ref(), buf);
        encode_u256(&self.value, buf);
        self.data.as_slice().encode(buf);
        encode_access_list(&self.access_list, buf);
    }
}

/// Encodes an RLP list using a closure to write elements.
fn encode_rlp_list<F>(out: &mut Vec<u8>, f: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let mut content = Vec::new();
    f(&mut content);

    let header = alloy_rlp::Header {
        list: true,
        payload_length: content.len(),
    };
    header.encode(out);
    out.extend_from_slice(&content);
}

/// Encodes a U256 as RLP (strips leading zeros).
fn encode_u256(value: &U256, out: &mut Vec<u8>) {
    encode_bytes32(&value.to_be_bytes::<32>(), out);
}

/// Encodes an optional address; `None` is the empty string (contract creation).
fn encode_optional_address(addr: Option<&Address>, out: &mut Vec<u8>) {
    match addr {
        Some(a) => a.inner().encode(out),
        None => out.push(alloy_rlp::EMPTY_STRING_CODE),
    }
}

/// Encodes a 32-byte big-endian integer, stripping leading zeros.
fn encode_bytes32(bytes: &[u8; 32], out: &mut Vec<u8>) {
    match bytes.iter().position(|&b| b != 0) {
        Some(start) => bytes[start..].encode(out),
        None => out.push(alloy_rlp::EMPTY_STRING_CODE),
    }
}

/// Encodes an access list to RLP.
fn encode_access_list(access_list: &[AccessListEntry], out: &mut Vec<u8>) {
    encode_rlp_list(out, |out| {
        for entry in access_list {
            entry.encode(out);
        }
    });
}

/// Which fee scheme a transaction uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeScheme {
    /// Single gas price.
    Legacy,
    /// Priority fee plus max fee.
    Dynamic,
}

/// A unified transaction type supporting both fee schemes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transaction {
    /// EIP-155 legacy transaction.
    #[serde(rename = "legacy")]
    Legacy(LegacyTransaction),
    /// EIP-1559 (Type 2) transaction.
    #[serde(rename = "eip1559")]
    Eip1559(Eip1559Transaction),
}

impl Transaction {
    /// Returns the payload the device signs.
    #[must_use]
    pub fn unsigned_rlp(&self) -> Vec<u8> {
        match self {
            Self::Legacy(tx) => tx.unsigned_rlp(),
            Self::Eip1559(tx) => tx.unsigned_rlp(),
        }
    }

    /// Returns the hash the device signs.
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        keccak256(self.unsigned_rlp())
    }

    /// Returns how many trailing payload bytes the device must receive in
    /// one chunk: the EIP-155 marker of a legacy transaction, none otherwise.
    #[must_use]
    pub fn eip155_tail_len(&self) -> usize {
        match self {
            Self::Legacy(tx) => tx.eip155_tail_len(),
            Self::Eip1559(_) => 0,
        }
    }

    /// Returns the recovery parity encoded in a device signature for this
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RecoveryParameterFailed`] for unknown encodings.
    pub fn signature_parity(&self, signature: &Signature) -> Result<u8> {
        match self {
            Self::Legacy(tx) => recovery_parity(signature.v(), Some(tx.chain_id)),
            Self::Eip1559(_) => recovery_parity(signature.v(), None),
        }
    }

    /// Creates the broadcastable transaction bytes from a device signature.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RecoveryParameterFailed`] for unknown `v` encodings.
    pub fn signed_rlp(&self, signature: &Signature) -> Result<Vec<u8>> {
        match self {
            Self::Legacy(tx) => tx.signed_rlp(signature),
            Self::Eip1559(tx) => tx.signed_rlp(signature),
        }
    }

    /// Returns the chain ID for this transaction.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.chain_id,
            Self::Eip1559(tx) => tx.chain_id,
        }
    }

    /// Returns the transaction nonce.
    #[must_use]
    pub const fn nonce(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.nonce,
            Self::Eip1559(tx) => tx.nonce,
        }
    }

    /// Returns the gas limit.
    #[must_use]
    pub const fn gas_limit(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.gas_limit,
            Self::Eip1559(tx) => tx.gas_limit,
        }
    }

    /// Returns the fee scheme in use.
    #[must_use]
    pub const fn fee_scheme(&self) -> FeeScheme {
        match self {
            Self::Legacy(_) => FeeScheme::Legacy,
            Self::Eip1559(_) => FeeScheme::Dynamic,
        }
    }
}
