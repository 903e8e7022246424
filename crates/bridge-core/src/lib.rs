//! Ledger EVM Bridge Core Library
//!
//! This crate lets a browser application use a Ledger hardware wallet running
//! the Ethereum app as an EIP-1193 provider. Reads and broadcasts go to a
//! remote node over JSON-RPC; anything that needs a signature goes to the
//! device.
//!
//! # Overview
//!
//! This library provides:
//!
//! - **Provider Dispatch**: EIP-1193 `request({method, params})` handling
//! - **Transaction Building**: nonce, fee and gas resolution for EIP-155 legacy
//!   and EIP-1559 transactions
//! - **Ledger Integration**: APDU protocol of the Ethereum app over an
//!   abstract transport, with HID framing for USB transports
//! - **Sessions**: device permission, transport lifetime and the derived account
//! - **Account Scanning**: batches of addresses below a derivation path
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Provider Dispatcher (Bridge)                 │
//! ├───────────────┬──────────────┬──────────────┬───────────────┤
//! │  Transaction  │   Hardware   │   Account    │      RPC      │
//! │    Builder    │    Signer    │   Scanner    │  Passthrough  │
//! ├───────────────┴──────────────┴──────────────┼───────────────┤
//! │        Session Manager / Peripheral Access   │   reqwest     │
//! │  ┌─────────┐  ┌─────────┐  ┌──────────────┐ │               │
//! │  │  Path   │  │  APDU   │  │ Ethereum App │ │               │
//! │  └─────────┘  └─────────┘  └──────────────┘ │               │
//! ├─────────────────────────────────────────────┴───────────────┤
//! │            Transport Layer (WebUSB + HID framing)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ## Creating a Transaction
//!
//! ```rust
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
//! // The payload sent to the device, and the hash it signs.
//! let payload = tx.unsigned_rlp();
//! assert_eq!(payload[0], 0x02);
//! let hash = tx.signing_hash();
//! ```
//!
//! ## Running the Bridge
//!
//! ```ignore
//! use ledger_evm_bridge_core::{Bridge, BridgeConfig, HttpRpcClient};
//!
//! let config = BridgeConfig::from_json(r#"{"chainId": 1, "rpcUrl": "https://eth.example.org"}"#)?;
//! let rpc = HttpRpcClient::new(config.rpc_url.clone());
//! let mut bridge = Bridge::new(config, backend, rpc)?;
//!
//! // From a button click:
//! bridge.request_access().await?;
//! let accounts = bridge.request("eth_requestAccounts", serde_json::Value::Null).await?;
//! ```
//!
//! The `backend` is a [`device::DeviceBackend`]; the browser implementation
//! lives in `ledger-evm-bridge-wasm`.
//!
//! # Security Considerations
//!
//! - Private keys never leave the device
//! - Requests declaring a sender other than the session account are rejected
//!   before reaching the node or the device
//! - Every signature is recovered and checked against the session account

// Modules
pub mod address;
pub mod builder;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod rpc;
pub mod scanner;
pub mod session;
pub mod signature;
pub mod signer;
pub mod transaction;

#[cfg(test)]
mod mock;

// Re-exports for convenience
pub use address::Address;
pub use builder::{GasPolicy, TxRequest};
pub use config::{BridgeConfig, ChainContext};
pub use device::{DeviceBackend, DeviceFilter, PeripheralAccess};
pub use error::{Error, Result, SendStage, SessionFailure};
pub use ledger::{DerivationPath, EthApp, Transport};
pub use provider::{Bridge, ProviderRequest};
pub use rpc::{HttpRpcClient, RpcClient};
pub use scanner::{AccountScanner, ScannedAccount};
pub use session::{Session, SessionManager};
pub use signature::Signature;
pub use transaction::{AccessListEntry, Eip1559Transaction, LegacyTransaction, Transaction};

// Re-export commonly used alloy types
pub use alloy_primitives::{B256, U256};
