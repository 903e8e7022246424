//! Bridge configuration.
//!
//! The browser passes configuration as camelCase JSON:
//!
//! ```json
//! {
//!   "chainId": 11155111,
//!   "rpcUrl": "https://rpc.sepolia.org",
//!   "defaultPath": "m/44'/60'/0'/0/0",
//!   "gasBumpPercent": 12
//! }
//! ```
//!
//! Only `chainId` and `rpcUrl` are required. `chainId` may also be given as
//! a hex quantity string.

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::builder::GasPolicy;
use crate::error::{Error, Result};
use crate::ledger::DerivationPath;
use crate::rpc::parse_quantity_u64;
use crate::scanner::MAX_SCAN_LIMIT;

/// The chain the bridge serves. Fixed for the bridge's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
}

/// Largest chain id whose EIP-155 `v` (`chainId * 2 + 36`) fits in 64 bits.
pub const MAX_CHAIN_ID: u64 = (u64::MAX - 36) / 2;

const fn default_gas_bump_percent() -> u32 {
    12
}

const fn default_fallback_gas_limit() -> u64 {
    250_000
}

const fn default_scan_limit() -> u32 {
    MAX_SCAN_LIMIT
}

fn chain_id_number_or_hex<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> core::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(id) => Ok(id),
        Raw::Text(text) => parse_quantity_u64(&text)
            .or_else(|_| text.parse())
            .map_err(serde::de::Error::custom),
    }
}

/// Everything the bridge needs to know up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// EIP-155 chain id.
    #[serde(deserialize_with = "chain_id_number_or_hex")]
    pub chain_id: u64,

    /// JSON-RPC endpoint.
    pub rpc_url: Url,

    /// Path of the account opened by default.
    #[serde(default)]
    pub default_path: DerivationPath,

    /// Parent path for account scans.
    #[serde(default = "DerivationPath::ethereum_scan_base")]
    pub scan_base_path: DerivationPath,

    /// Percentage added to gas estimates.
    #[serde(default = "default_gas_bump_percent")]
    pub gas_bump_percent: u32,

    /// Gas limit used when estimation fails.
    #[serde(default = "default_fallback_gas_limit")]
    pub fallback_gas_limit: u64,

    /// Most accounts one scan derives.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: u32,
}

impl BridgeConfig {
    /// Creates a configuration with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the URL or chain id is invalid.
    pub fn new(chain_id: u64, rpc_url: &str) -> Result<Self> {
        let config = Self {
            chain_id,
            rpc_url: Url::parse(rpc_url)?,
            default_path: DerivationPath::ethereum_default(),
            scan_base_path: DerivationPath::ethereum_scan_base(),
            gas_bump_percent: default_gas_bump_percent(),
            fallback_gas_limit: default_fallback_gas_limit(),
            scan_limit: default_scan_limit(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the JSON is malformed or a
    /// setting is out of range.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first bad setting.
    pub fn validate(&self) -> Result<()> {
        if self.chain_id == 0 {
            return Err(Error::InvalidConfig("chainId must be non-zero".to_string()));
        }
        if self.chain_id > MAX_CHAIN_ID {
            return Err(Error::InvalidConfig(format!(
                "chainId {} exceeds {MAX_CHAIN_ID}",
                self.chain_id
            )));
        }
        if !matches!(self.rpc_url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "rpcUrl must use http or https, got {}",
                self.rpc_url.scheme()
            )));
        }
        if self.gas_bump_percent > 100 {
            return Err(Error::InvalidConfig(format!(
                "gasBumpPercent {} exceeds 100",
                self.gas_bump_percent
            )));
        }
        if self.fallback_gas_limit == 0 {
            return Err(Error::InvalidConfig(
                "fallbackGasLimit must be non-zero".to_string(),
            ));
        }
        if !(1..=MAX_SCAN_LIMIT).contains(&self.scan_limit) {
            return Err(Error::InvalidConfig(format!(
                "scanLimit must be between 1 and {MAX_SCAN_LIMIT}"
            )));
        }
        Ok(())
    }

    /// Returns the chain context.
    #[must_use]
    pub fn chain(&self) -> ChainContext {
        ChainContext {
            chain_id: self.chain_id,
            rpc_url: self.rpc_url.clone(),
        }
    }

    /// Returns the gas limit settings.
    #[must_use]
    pub const fn gas_policy(&self) -> GasPolicy {
        GasPolicy {
            bump_percent: self.gas_bump_percent,
            fallback_gas_limit: self.fallback_gas_limit,
        }
    }
}
