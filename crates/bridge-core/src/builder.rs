//! Turns a dapp's transaction request into a fully specified transaction.
//!
//! Missing fields are filled from the node:
//!
//! | field | source when absent |
//! |---|---|
//! | nonce | `eth_getTransactionCount [from, "pending"]` |
//! | fees | see below |
//! | gas limit | `eth_estimateGas`, bumped by a percentage |
//!
//! Fees resolve to exactly one scheme:
//!
//! 1. `maxFeePerGas` given: dynamic fees. The priority fee is the caller's
//!    or `eth_maxPriorityFeePerGas`, never above the max fee.
//! 2. `gasPrice` given: legacy fees.
//! 3. Otherwise `eth_gasPrice`: legacy fees.
//!
//! A failed estimate falls back to the configured gas limit, unbumped.

use alloy_primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::rpc::{RpcClient, format_quantity, quantity_result};
use crate::transaction::{AccessListEntry, Eip1559Transaction, LegacyTransaction, Transaction};

const SEND_METHOD: &str = "eth_sendTransaction";

/// Transaction fields as sent to `eth_sendTransaction` and
/// `eth_estimateGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    /// Declared sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    /// Recipient; `None` creates a contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    /// Gas limit.
    #[serde(default, alias = "gasLimit", skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,

    /// Legacy gas price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,

    /// EIP-1559 max fee per gas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,

    /// EIP-1559 priority fee per gas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,

    /// Wei to transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,

    /// Call data.
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,

    /// Sender nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,

    /// Chain the caller expects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<U256>,

    /// EIP-2930 access list, used with dynamic fees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListEntry>>,
}

fn present(value: Option<U256>) -> Option<U256> {
    value.filter(|v| !v.is_zero())
}

impl TxRequest {
    /// Returns the request shaped for `eth_estimateGas`: zero or absent gas
    /// and fee fields are dropped, and `data`/`value` default to empty/zero.
    #[must_use]
    pub fn sanitize_for_estimate(&self) -> Self {
        Self {
            gas: present(self.gas),
            gas_price: present(self.gas_price),
            max_fee_per_gas: present(self.max_fee_per_gas),
            max_priority_fee_per_gas: present(self.max_priority_fee_per_gas),
            data: Some(self.data.clone().unwrap_or_default()),
            value: Some(self.value.unwrap_or_default()),
            ..self.clone()
        }
    }

    /// Returns the explicit chain id, if the caller gave one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if it does not fit in a `u64`.
    pub fn chain_id_u64(&self) -> Result<Option<u64>> {
        self.chain_id.map(|id| to_u64(id, "chainId")).transpose()
    }
}

fn to_u64(value: U256, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::invalid_params(SEND_METHOD, format!("{field} exceeds 64 bits")))
}

/// Applies a percentage bump to a gas estimate, rounding up.
///
/// The result saturates at `u64::MAX`.
#[must_use]
pub fn apply_gas_bump(gas: u64, percent: u32) -> u64 {
    let bumped = (u128::from(gas) * (100 + u128::from(percent))).div_ceil(100);
    u64::try_from(bumped).unwrap_or(u64::MAX)
}

/// Gas limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    /// Percentage added to estimates.
    pub bump_percent: u32,
    /// Gas limit used when estimation fails.
    pub fallback_gas_limit: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            bump_percent: 12,
            fallback_gas_limit: 250_000,
        }
    }
}

/// The resolved fee scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fees {
    /// A single gas price.
    Legacy {
        /// Wei per gas.
        gas_price: U256,
    },
    /// EIP-1559 fees.
    Dynamic {
        /// Fee cap in wei per gas.
        max_fee_per_gas: U256,
        /// Tip in wei per gas.
        max_priority_fee_per_gas: U256,
    },
}

/// Fills a [`TxRequest`] into a [`Transaction`].
#[derive(Debug)]
pub struct TransactionBuilder<'a> {
    rpc: &'a dyn RpcClient,
    chain_id: u64,
    policy: GasPolicy,
}

impl<'a> TransactionBuilder<'a> {
    /// Creates a builder for `chain_id`.
    #[must_use]
    pub const fn new(rpc: &'a dyn RpcClient, chain_id: u64, policy: GasPolicy) -> Self {
        Self {
            rpc,
            chain_id,
            policy,
        }
    }

    /// Builds the transaction `from` will sign.
    ///
    /// # Errors
    ///
    /// - [`Error::ChainMismatch`] if the request names another chain
    /// - [`Error::InvalidParams`] if a numeric field is out of range
    /// - [`Error::Rpc`] if the node fails to supply a nonce or fee
    pub async fn build(&self, from: Address, request: &TxRequest) -> Result<Transaction> {
        if let Some(requested) = request.chain_id_u64()? {
            if requested != self.chain_id {
                return Err(Error::ChainMismatch {
                    requested,
                    configured: self.chain_id,
                });
            }
        }

        let nonce = self.resolve_nonce(from, request).await?;
        let fees = self.resolve_fees(request).await?;
        let gas_limit = self.resolve_gas_limit(from, request).await?;
        debug!(nonce, gas_limit, ?fees, "transaction fields resolved");

        let to = request.to;
        let value = request.value.unwrap_or_default();
        let data = request.data.clone().unwrap_or_default().to_vec();

        Ok(match fees {
            Fees::Legacy { gas_price } => Transaction::Legacy(LegacyTransaction {
                chain_id: self.chain_id,
                nonce,
                gas_price,
                gas_limit,
                to,
                value,
                data,
            }),
            Fees::Dynamic {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Transaction::Eip1559(Eip1559Transaction {
                chain_id: self.chain_id,
                nonce,
                max_priority_fee_per_gas,
                max_fee_per_gas,
                gas_limit,
                to,
                value,
                data,
                access_list: request.access_list.clone().unwrap_or_default(),
            }),
        })
    }

    /// Uses the caller's nonce, else the pending count from the node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the node fails, or [`Error::InvalidParams`]
    /// if the nonce exceeds 64 bits.
    pub async fn resolve_nonce(&self, from: Address, request: &TxRequest) -> Result<u64> {
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => {
                let method = "eth_getTransactionCount";
                let result = self
                    .rpc
                    .call(method, json!([from.to_hex(), "pending"]))
                    .await?;
                quantity_result(method, &result)?
            }
        };
        to_u64(nonce, "nonce")
    }

    /// Picks the fee scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if a fee has to be fetched and the node fails.
    pub async fn resolve_fees(&self, request: &TxRequest) -> Result<Fees> {
        if let Some(max_fee_per_gas) = request.max_fee_per_gas {
            let priority = match request.max_priority_fee_per_gas {
                Some(priority) => priority,
                None => self.fetch_quantity("eth_maxPriorityFeePerGas").await?,
            };
            return Ok(Fees::Dynamic {
                max_fee_per_gas,
                max_priority_fee_per_gas: priority.min(max_fee_per_gas),
            });
        }

        let gas_price = match request.gas_price {
            Some(gas_price) => gas_price,
            None => self.fetch_quantity("eth_gasPrice").await?,
        };
        Ok(Fees::Legacy { gas_price })
    }

    /// Uses the caller's non-zero gas limit, else a bumped estimate, else
    /// the fallback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if the caller's gas exceeds 64 bits.
    /// Estimation failures are not errors.
    pub async fn resolve_gas_limit(&self, from: Address, request: &TxRequest) -> Result<u64> {
        if let Some(gas) = present(request.gas) {
            return to_u64(gas, "gas");
        }

        let mut candidate = request.sanitize_for_estimate();
        candidate.from = Some(from);

        match self.estimate(&candidate).await {
            Ok(estimate) => Ok(apply_gas_bump(estimate, self.policy.bump_percent)),
            Err(err) => {
                warn!(
                    error = %err,
                    fallback = self.policy.fallback_gas_limit,
                    "gas estimation failed, using fallback gas limit"
                );
                Ok(self.policy.fallback_gas_limit)
            }
        }
    }

    async fn estimate(&self, candidate: &TxRequest) -> Result<u64> {
        let method = "eth_estimateGas";
        let result = self.rpc.call(method, json!([candidate])).await?;
        let estimate = quantity_result(method, &result)?;
        u64::try_from(estimate).map_err(|_| Error::Rpc {
            method: method.to_string(),
            code: None,
            message: format!("estimate {} exceeds 64 bits", format_quantity(estimate)),
        })
    }

    async fn fetch_quantity(&self, method: &str) -> Result<U256> {
        let result = self.rpc.call(method, Value::Array(Vec::new())).await?;
        quantity_result(method, &result)
    }
}
