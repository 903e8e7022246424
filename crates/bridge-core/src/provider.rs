//! The EIP-1193 provider surface.
//!
//! Every `request({method, params})` is parsed at the boundary into a
//! [`ProviderRequest`] and dispatched by [`Bridge`]:
//!
//! | method | handled by |
//! |---|---|
//! | `eth_accounts`, `eth_requestAccounts` | hardware session |
//! | `eth_chainId` | configuration |
//! | `wallet_switchEthereumChain` | configuration (same chain only) |
//! | `eth_estimateGas` | node, after sanitizing the request |
//! | `eth_sendTransaction` | builder, device, node |
//! | `personal_sign` | device |
//! | other `eth_*`, `net_*`, `web3_*` | node |
//!
//! Methods that would need a key the node does not have (`eth_sign`,
//! `eth_signTransaction`, `eth_signTypedData*`) and everything else fail with
//! [`Error::UnsupportedMethod`].

use alloy_primitives::U256;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::address::Address;
use crate::builder::{TransactionBuilder, TxRequest};
use crate::config::{BridgeConfig, ChainContext};
use crate::device::{DeviceBackend, PeripheralAccess};
use crate::error::{Error, Result, SendStage};
use crate::ledger::DerivationPath;
use crate::rpc::{RpcClient, format_quantity, parse_quantity_u64};
use crate::scanner::{AccountScanner, ScannedAccount};
use crate::session::SessionManager;
use crate::signer::HardwareSigner;

/// A provider request, validated per method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequest {
    /// `eth_accounts` / `eth_requestAccounts`.
    Accounts,
    /// `eth_chainId`.
    ChainId,
    /// `wallet_switchEthereumChain`.
    SwitchChain {
        /// The requested chain.
        chain_id: u64,
    },
    /// `eth_estimateGas`.
    EstimateGas {
        /// The call to estimate.
        request: TxRequest,
        /// Optional block tag.
        block: Option<Value>,
    },
    /// `eth_sendTransaction`.
    SendTransaction(TxRequest),
    /// `personal_sign`.
    PersonalSign {
        /// Message bytes.
        message: Vec<u8>,
        /// Declared signer.
        address: Option<Address>,
    },
    /// Forwarded to the node as is.
    Passthrough {
        /// JSON-RPC method.
        method: String,
        /// JSON-RPC params.
        params: Value,
    },
}

const KEYED_METHODS: [&str; 5] = [
    "eth_sign",
    "eth_signTransaction",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
];

fn positional(method: &str, params: Value) -> Result<Vec<Value>> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Err(Error::invalid_params(
            method,
            format!("expected an array of params, got {other}"),
        )),
    }
}

fn tx_param(method: &str, value: Option<Value>) -> Result<TxRequest> {
    let value = value.ok_or_else(|| Error::invalid_params(method, "missing transaction object"))?;
    serde_json::from_value(value).map_err(|e| Error::invalid_params(method, e.to_string()))
}

fn string_arg<'a>(method: &str, args: &'a [Value], index: usize) -> Result<Option<&'a str>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(Error::invalid_params(
            method,
            format!("expected a string, got {other}"),
        )),
    }
}

fn looks_like_address(value: &str) -> bool {
    value.len() == 42 && value.parse::<Address>().is_ok()
}

/// Hex strings are signed as bytes, anything else as UTF-8 text.
fn message_bytes(message: &str) -> Vec<u8> {
    message
        .strip_prefix("0x")
        .and_then(|digits| hex::decode(digits).ok())
        .unwrap_or_else(|| message.as_bytes().to_vec())
}

impl ProviderRequest {
    /// Parses a raw `{method, params}` request.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedMethod`] for methods the bridge does not serve
    /// - [`Error::InvalidParams`] if the params do not fit the method
    pub fn parse(method: &str, params: Value) -> Result<Self> {
        match method {
            "eth_accounts" | "eth_requestAccounts" => Ok(Self::Accounts),
            "eth_chainId" => Ok(Self::ChainId),
            "wallet_switchEthereumChain" => {
                let args = positional(method, params)?;
                let chain_id = args
                    .first()
                    .and_then(|arg| arg.get("chainId"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_params(method, "missing chainId"))?;
                let chain_id = parse_quantity_u64(chain_id)
                    .map_err(|e| Error::invalid_params(method, e.to_string()))?;
                Ok(Self::SwitchChain { chain_id })
            }
            "eth_estimateGas" => {
                let mut args = positional(method, params)?.into_iter();
                let request = tx_param(method, args.next())?;
                Ok(Self::EstimateGas {
                    request,
                    block: args.next(),
                })
            }
            "eth_sendTransaction" => {
                let args = positional(method, params)?;
                Ok(Self::SendTransaction(tx_param(
                    method,
                    args.into_iter().next(),
                )?))
            }
            "personal_sign" => Self::parse_personal_sign(positional(method, params)?),
            m if KEYED_METHODS.contains(&m) => Err(Error::UnsupportedMethod(m.to_string())),
            m if m.starts_with("eth_") || m.starts_with("net_") || m.starts_with("web3_") => {
                Ok(Self::Passthrough {
                    method: m.to_string(),
                    params: if params.is_null() { json!([]) } else { params },
                })
            }
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }

    fn parse_personal_sign(args: Vec<Value>) -> Result<Self> {
        let method = "personal_sign";
        let first = string_arg(method, &args, 0)?
            .ok_or_else(|| Error::invalid_params(method, "missing message"))?;
        let second = string_arg(method, &args, 1)?;

        let (message, address) = match second {
            Some(second) if looks_like_address(first) && !looks_like_address(second) => {
                (second, Some(first))
            }
            _ => (first, second),
        };

        let address = address
            .map(|a| {
                a.parse::<Address>()
                    .map_err(|e| Error::invalid_params(method, format!("bad address: {e}")))
            })
            .transpose()?;

        Ok(Self::PersonalSign {
            message: message_bytes(message),
            address,
        })
    }

    /// Returns the JSON-RPC method name.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Accounts => "eth_accounts",
            Self::ChainId => "eth_chainId",
            Self::SwitchChain { .. } => "wallet_switchEthereumChain",
            Self::EstimateGas { .. } => "eth_estimateGas",
            Self::SendTransaction(_) => "eth_sendTransaction",
            Self::PersonalSign { .. } => "personal_sign",
            Self::Passthrough { method, .. } => method,
        }
    }
}

/// The signing bridge: session, node client and configuration.
#[derive(Debug)]
pub struct Bridge<B: DeviceBackend, R: RpcClient> {
    config: BridgeConfig,
    chain: ChainContext,
    sessions: SessionManager<B>,
    rpc: R,
    scanner: AccountScanner,
}

impl<B: DeviceBackend, R: RpcClient> Bridge<B, R> {
    /// Creates a bridge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: BridgeConfig, backend: B, rpc: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sessions: SessionManager::new(
                PeripheralAccess::new(backend),
                config.default_path.clone(),
            ),
            scanner: AccountScanner::new(config.scan_limit),
            chain: config.chain(),
            config,
            rpc,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the chain this bridge serves.
    #[must_use]
    pub const fn chain(&self) -> &ChainContext {
        &self.chain
    }

    /// Returns the session manager.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager<B> {
        &self.sessions
    }

    /// Returns the live session's address, if any.
    #[must_use]
    pub fn selected_address(&self) -> Option<Address> {
        self.sessions.address()
    }

    /// Handles a raw provider request.
    ///
    /// # Errors
    ///
    /// Returns the typed failure of the method; see [`ProviderRequest::parse`]
    /// and [`Bridge::dispatch`].
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        debug!(method, "provider request");
        let request = ProviderRequest::parse(method, params)?;
        self.dispatch(request).await
    }

    /// Handles a parsed provider request.
    ///
    /// # Errors
    ///
    /// Returns device, node or validation failures of the method.
    pub async fn dispatch(&mut self, request: ProviderRequest) -> Result<Value> {
        match request {
            ProviderRequest::Accounts => {
                let session = self.sessions.get_or_create_session().await?;
                Ok(json!([session.address().to_hex()]))
            }
            ProviderRequest::ChainId => Ok(json!(format_quantity(U256::from(self.chain.chain_id)))),
            ProviderRequest::SwitchChain { chain_id } => {
                if chain_id == self.chain.chain_id {
                    Ok(Value::Null)
                } else {
                    Err(Error::ChainMismatch {
                        requested: chain_id,
                        configured: self.chain.chain_id,
                    })
                }
            }
            ProviderRequest::EstimateGas { request, block } => {
                let mut candidate = request.sanitize_for_estimate();
                if candidate.from.is_none() {
                    candidate.from = self.sessions.address();
                }
                let mut params = vec![serde_json::to_value(candidate)?];
                params.extend(block);
                self.rpc.call("eth_estimateGas", Value::Array(params)).await
            }
            ProviderRequest::SendTransaction(request) => self.send_transaction(&request).await,
            ProviderRequest::PersonalSign { message, address } => {
                let session = self.sessions.get_or_create_session().await?;
                if let Some(declared) = address {
                    if declared != session.address() {
                        return Err(Error::SenderMismatch {
                            declared,
                            session: session.address(),
                        });
                    }
                }
                let signature = HardwareSigner::new(session)
                    .sign_personal_message(&message)
                    .await?;
                Ok(json!(signature.to_hex()))
            }
            ProviderRequest::Passthrough { method, params } => self.rpc.call(&method, params).await,
        }
    }

    /// Builds, signs and broadcasts a transaction; returns the node's
    /// transaction hash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendFailed`] carrying the stage the failure happened
    /// in.
    pub async fn send_transaction(&mut self, request: &TxRequest) -> Result<Value> {
        let mut stage = SendStage::Idle;
        debug!(%stage, "send pipeline started");

        let chain_id = self.chain.chain_id;
        let policy = self.config.gas_policy();

        let session = self
            .sessions
            .get_or_create_session()
            .await
            .map_err(|e| e.at(stage))?;
        let from = session.address();
        if let Some(declared) = request.from {
            if declared != from {
                return Err(Error::SenderMismatch {
                    declared,
                    session: from,
                }
                .at(stage));
            }
        }

        stage = SendStage::Building;
        debug!(%stage, %from, "send pipeline stage");
        let tx = TransactionBuilder::new(&self.rpc, chain_id, policy)
            .build(from, request)
            .await
            .map_err(|e| e.at(stage))?;

        stage = SendStage::AwaitingDevice;
        debug!(%stage, "send pipeline stage");
        let raw = HardwareSigner::new(session)
            .sign_transaction(&tx)
            .await
            .map_err(|e| e.at(stage))?;

        stage = SendStage::Broadcasting;
        debug!(%stage, "send pipeline stage");
        let hash = self
            .rpc
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(&raw))]),
            )
            .await
            .map_err(|e| e.at(stage))?;

        stage = SendStage::Done;
        info!(%stage, %hash, nonce = tx.nonce(), "transaction broadcast");
        Ok(hash)
    }

    /// Shows the device picker and opens a session at the default path.
    ///
    /// Must be called from a user gesture.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDeviceSelected`] if the user picked nothing, or a
    /// device failure while opening the session.
    pub async fn request_access(&mut self) -> Result<Address> {
        self.sessions.access_mut().request_access().await?;
        let path = self.session_path();
        self.sessions.open_session(path).await
    }

    /// Restores a session on a previously granted device without a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotAuthorized`] if no granted device is found.
    pub async fn reconnect(&mut self) -> Result<Address> {
        self.sessions.access_mut().reconnect().await?;
        let path = self.session_path();
        self.sessions.open_session(path).await
    }

    /// Switches the session to the account at `path`.
    ///
    /// # Errors
    ///
    /// Returns a device failure while opening the session.
    pub async fn select_path(&mut self, path: DerivationPath) -> Result<Address> {
        self.sessions.open_session(path).await
    }

    /// Derives up to the configured limit of accounts below `base`, or the
    /// configured scan base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDerivationPath`] for indices in the hardened
    /// range, or a device failure.
    pub async fn scan_accounts(
        &mut self,
        base: Option<DerivationPath>,
        start: u32,
        count: u32,
    ) -> Result<Vec<ScannedAccount>> {
        let base = base.unwrap_or_else(|| self.config.scan_base_path.clone());
        self.scanner
            .scan(&mut self.sessions, &base, start, count)
            .await
    }

    /// Closes the session and forgets the device.
    pub async fn disconnect(&mut self) {
        self.sessions.close().await;
        self.sessions.access_mut().forget();
    }

    /// Subscribes to a provider event. Events are never emitted.
    pub fn on(&self, event: &str) {
        debug!(event, "ignoring event subscription");
    }

    /// Removes an event subscription.
    pub fn remove_listener(&self, event: &str) {
        debug!(event, "ignoring event unsubscription");
    }

    fn session_path(&self) -> DerivationPath {
        self.sessions.active().map_or_else(
            || self.config.default_path.clone(),
            |session| session.path().clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeBackend, FakeRpc, LedgerControl, rlp_items};

    const TARGET: &str = "0x3535353535353535353535353535353535353535";

    struct Harness {
        bridge: Bridge<FakeBackend, FakeRpc>,
        ledger: LedgerControl,
        rpc: FakeRpc,
        address: Address,
    }

    fn harness(chain_id: u64) -> Harness {
        let backend = FakeBackend::new(chain_id);
        let ledger = backend.ledger();
        let address = ledger.address_at(&DerivationPath::default());
        let rpc = FakeRpc::new();
        let config = BridgeConfig::new(chain_id, "http://localhost:8545").unwrap();
        Harness {
            bridge: Bridge::new(config, backend, rpc.clone()).unwrap(),
            ledger,
            rpc,
            address,
        }
    }

    #[test]
    fn parse_routes_methods() {
        assert_eq!(
            ProviderRequest::parse("eth_requestAccounts", Value::Null).unwrap(),
            ProviderRequest::Accounts
        );
        assert_eq!(
            ProviderRequest::parse("wallet_switchEthereumChain", json!([{"chainId": "0x89"}]))
                .unwrap(),
            ProviderRequest::SwitchChain { chain_id: 137 }
        );
        assert_eq!(
            ProviderRequest::parse("eth_blockNumber", Value::Null).unwrap(),
            ProviderRequest::Passthrough {
                method: "eth_blockNumber".to_string(),
                params: json!([])
            }
        );
        assert!(matches!(
            ProviderRequest::parse("eth_signTypedData_v4", json!([])),
            Err(Error::UnsupportedMethod(_))
        ));
        assert!(matches!(
            ProviderRequest::parse("wallet_addEthereumChain", json!([])),
            Err(Error::UnsupportedMethod(_))
        ));
        assert!(matches!(
            ProviderRequest::parse("eth_sendTransaction", json!([])),
            Err(Error::InvalidParams { .. })
        ));
        assert!(matches!(
            ProviderRequest::parse("eth_sendTransaction", json!({"to": TARGET})),
            Err(Error::InvalidParams { .. })
        ));
    }

    #[test]
    fn personal_sign_params_in_either_order() {
        let expected = ProviderRequest::PersonalSign {
            message: b"hello".to_vec(),
            address: Some(TARGET.parse().unwrap()),
        };
        assert_eq!(
            ProviderRequest::parse("personal_sign", json!(["0x68656c6c6f", TARGET])).unwrap(),
            expected
        );
        assert_eq!(
            ProviderRequest::parse("personal_sign", json!([TARGET, "hello"])).unwrap(),
            expected
        );
        assert_eq!(
            ProviderRequest::parse("personal_sign", json!(["plain text"])).unwrap(),
            ProviderRequest::PersonalSign {
                message: b"plain text".to_vec(),
                address: None
            }
        );
        assert!(matches!(
            ProviderRequest::parse("personal_sign", json!([])),
            Err(Error::InvalidParams { .. })
        ));
    }

    #[tokio::test]
    async fn accounts_return_session_address() {
        let mut h = harness(1);
        let accounts = h.bridge.request("eth_accounts", Value::Null).await.unwrap();
        assert_eq!(accounts, json!([h.address.to_hex()]));
        assert_eq!(h.bridge.selected_address(), Some(h.address));

        let again = h
            .bridge
            .request("eth_requestAccounts", json!([]))
            .await
            .unwrap();
        assert_eq!(again, accounts);
    }

    #[tokio::test]
    async fn chain_id_is_stable_and_switch_only_accepts_it() {
        let mut h = harness(11_155_111);
        for _ in 0..2 {
            let id = h.bridge.request("eth_chainId", Value::Null).await.unwrap();
            assert_eq!(id, json!("0xaa36a7"));
        }

        let same = h
            .bridge
            .request("wallet_switchEthereumChain", json!([{"chainId": "0xaa36a7"}]))
            .await
            .unwrap();
        assert_eq!(same, Value::Null);

        let err = h
            .bridge
            .request("wallet_switchEthereumChain", json!([{"chainId": "0x1"}]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChainMismatch { requested: 1, .. }));
        assert_eq!(err.provider_code(), 4901);
        assert_eq!(h.bridge.chain().chain_id, 11_155_111);
        assert!(h.rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn estimate_gas_is_sanitized() {
        let mut h = harness(1);
        h.rpc.respond("eth_estimateGas", json!("0x5208"));

        let result = h
            .bridge
            .request(
                "eth_estimateGas",
                json!([{"to": TARGET, "gas": "0x0", "gasPrice": "0x0"}, "latest"]),
            )
            .await
            .unwrap();
        assert_eq!(result, json!("0x5208"));
        assert_eq!(
            h.rpc.params_of("eth_estimateGas").unwrap(),
            json!([{"to": TARGET, "value": "0x0", "data": "0x"}, "latest"])
        );
    }

    #[tokio::test]
    async fn send_transaction_full_pipeline() {
        let mut h = harness(1);
        h.rpc
            .respond("eth_getTransactionCount", json!("0x9"))
            .respond("eth_gasPrice", json!("0x4a817c800"))
            .respond("eth_estimateGas", json!("0x5208"))
            .respond("eth_sendRawTransaction", json!("0xabc123"));

        let hash = h
            .bridge
            .request(
                "eth_sendTransaction",
                json!([{"from": h.address.to_hex(), "to": TARGET, "value": "0x1"}]),
            )
            .await
            .unwrap();
        assert_eq!(hash, json!("0xabc123"));
        assert_eq!(
            h.rpc.methods(),
            vec![
                "eth_getTransactionCount",
                "eth_gasPrice",
                "eth_estimateGas",
                "eth_sendRawTransaction"
            ]
        );

        let raw = h.rpc.params_of("eth_sendRawTransaction").unwrap()[0]
            .as_str()
            .unwrap()
            .to_string();
        let raw = hex::decode(raw.trim_start_matches("0x")).unwrap();
        let items = rlp_items(&raw);
        assert_eq!(items[0], vec![0x09]);
        // 21000 bumped by 12%.
        assert_eq!(items[2], vec![0x5b, 0xe0]);
        assert!(items[6] == [37] || items[6] == [38]);
        assert_eq!(h.ledger.signed_payloads().len(), 1);
    }

    #[tokio::test]
    async fn send_with_max_fee_is_dynamic() {
        let mut h = harness(1);
        h.rpc
            .respond("eth_maxPriorityFeePerGas", json!("0x3b9aca00"))
            .respond("eth_sendRawTransaction", json!("0xfeed"));

        h.bridge
            .request(
                "eth_sendTransaction",
                json!([{
                    "to": TARGET,
                    "gas": "0x5208",
                    "nonce": "0x0",
                    "maxFeePerGas": "0x77359400",
                }]),
            )
            .await
            .unwrap();

        let payload = &h.ledger.signed_payloads()[0];
        assert_eq!(payload[0], 0x02);
        assert!(!h.rpc.methods().contains(&"eth_gasPrice".to_string()));
    }

    #[tokio::test]
    async fn sender_mismatch_fails_before_any_exchange() {
        let mut h = harness(1);
        h.bridge.request("eth_accounts", Value::Null).await.unwrap();
        let exchanges = h.ledger.exchanges();

        let err = h
            .bridge
            .request(
                "eth_sendTransaction",
                json!([{"from": "0x0000000000000000000000000000000000000001", "to": TARGET}]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::SenderMismatch { .. }));
        assert_eq!(err.stage(), Some(SendStage::Idle));
        assert_eq!(err.provider_code(), 4100);
        assert!(h.rpc.calls().is_empty());
        assert_eq!(h.ledger.exchanges(), exchanges);
    }

    #[tokio::test]
    async fn explicit_other_chain_is_rejected_while_building() {
        let mut h = harness(1);
        let err = h
            .bridge
            .request("eth_sendTransaction", json!([{"to": TARGET, "chainId": "0x5"}]))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(SendStage::Building));
        assert!(matches!(err.root(), Error::ChainMismatch { .. }));
        assert!(h.ledger.signed_payloads().is_empty());
    }

    #[tokio::test]
    async fn rejection_on_device_is_tagged() {
        let mut h = harness(1);
        h.ledger.set_reject_signing(true);
        h.rpc
            .respond("eth_getTransactionCount", json!("0x0"))
            .respond("eth_gasPrice", json!("0x1"));

        let err = h
            .bridge
            .request("eth_sendTransaction", json!([{"to": TARGET, "gas": "0x5208"}]))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(SendStage::AwaitingDevice));
        assert_eq!(err.provider_code(), 4001);
        assert!(!h.rpc.methods().contains(&"eth_sendRawTransaction".to_string()));
    }

    #[tokio::test]
    async fn broadcast_failure_keeps_rpc_code() {
        let mut h = harness(1);
        h.rpc
            .respond("eth_getTransactionCount", json!("0x0"))
            .respond("eth_gasPrice", json!("0x1"))
            .fail("eth_sendRawTransaction", -32000, "insufficient funds");

        let err = h
            .bridge
            .request("eth_sendTransaction", json!([{"to": TARGET, "gas": "0x5208"}]))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(SendStage::Broadcasting));
        assert_eq!(err.provider_code(), -32000);
    }

    #[tokio::test]
    async fn personal_sign_checks_declared_signer() {
        let mut h = harness(1);
        let sig = h
            .bridge
            .request("personal_sign", json!(["0x68656c6c6f", h.address.to_hex()]))
            .await
            .unwrap();
        let sig = sig.as_str().unwrap();
        assert_eq!(sig.len(), 132);
        assert!(sig.ends_with("1b") || sig.ends_with("1c"));

        let err = h
            .bridge
            .request("personal_sign", json!(["0x68656c6c6f", TARGET]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SenderMismatch { .. }));
    }

    #[tokio::test]
    async fn passthrough_forwards_params() {
        let mut h = harness(1);
        h.rpc.respond("eth_getBalance", json!("0x10"));
        let balance = h
            .bridge
            .request("eth_getBalance", json!([TARGET, "latest"]))
            .await
            .unwrap();
        assert_eq!(balance, json!("0x10"));
        assert_eq!(
            h.rpc.params_of("eth_getBalance").unwrap(),
            json!([TARGET, "latest"])
        );
    }

    #[tokio::test]
    async fn access_select_and_disconnect() {
        let mut h = harness(1);
        assert_eq!(h.bridge.request_access().await.unwrap(), h.address);

        let path: DerivationPath = "m/44'/60'/0'/0/4".parse().unwrap();
        let selected = h.bridge.select_path(path.clone()).await.unwrap();
        assert_eq!(selected, h.ledger.address_at(&path));
        assert_eq!(h.bridge.selected_address(), Some(selected));

        let accounts = h.bridge.scan_accounts(None, 0, 3).await.unwrap();
        assert_eq!(accounts.len(), 3);
        assert_eq!(accounts[0].address, h.address);

        h.bridge.disconnect().await;
        assert!(h.bridge.selected_address().is_none());
        assert!(h.bridge.sessions().access().handle().is_none());
        h.bridge.on("accountsChanged");
        h.bridge.remove_listener("accountsChanged");
    }

    #[tokio::test]
    async fn request_access_without_selection() {
        let h = harness(1);
        let mut bridge = h.bridge;
        bridge.sessions.access().backend().set_pickable(None);

        let err = bridge.request_access().await.unwrap_err();
        assert!(matches!(err, Error::NoDeviceSelected));
        assert!(bridge.sessions().access().handle().is_none());
        assert!(bridge.selected_address().is_none());
    }

    #[tokio::test]
    async fn busy_transport_surfaces_as_session_failure() {
        let h = harness(1);
        let mut bridge = h.bridge;
        bridge.sessions.access().backend().set_busy(true);

        let err = bridge.request("eth_accounts", Value::Null).await.unwrap_err();
        assert_eq!(err.provider_code(), 4900);
        assert!(err.remedy().is_some());
    }
}
