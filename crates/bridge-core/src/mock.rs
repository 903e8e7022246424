//! Test doubles.
//!
//! - [`FakeLedger`]: emulates the Ethereum app with real secp256k1 keys,
//!   one per derivation path
//! - [`FakeBackend`]: hands out [`FakeLedger`] transports
//! - [`ScriptedTransport`]: replays canned responses and records commands
//! - [`FakeRpc`]: answers RPC calls from a table and records them

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use alloy_primitives::keccak256;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde_json::Value;

use crate::address::Address;
use crate::crypto::personal_message_hash;
use crate::device::{DeviceBackend, DeviceFilter};
use crate::error::{Error, Result, SessionFailure};
use crate::ledger::{Apdu, ApduResponse, DerivationPath, Transport};
use crate::rpc::RpcClient;

fn status(sw: u16) -> ApduResponse {
    ApduResponse::with_status(Vec::new(), sw)
}

fn signing_key(path: &DerivationPath) -> SigningKey {
    SigningKey::from_slice(keccak256(path.to_apdu_bytes()).as_slice()).unwrap()
}

fn key_address(key: &SigningKey) -> Address {
    Address::from_public_key_bytes(key.verifying_key().to_encoded_point(false).as_bytes()).unwrap()
}

fn parse_path(data: &[u8]) -> Option<(DerivationPath, &[u8])> {
    let depth = usize::from(*data.first()?);
    let body = data.get(1..1 + 4 * depth)?;
    let segments = body
        .chunks(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some((DerivationPath::new(segments).ok()?, &data[1 + 4 * depth..]))
}

/// Whether a (possibly type-prefixed) RLP payload has fully arrived.
fn transaction_complete(payload: &[u8]) -> bool {
    let body = match payload.first() {
        Some(0x02) => &payload[1..],
        Some(_) => payload,
        None => return false,
    };
    let mut buf = body;
    match alloy_rlp::Header::decode(&mut buf) {
        Ok(header) => buf.len() >= header.payload_length,
        Err(_) => false,
    }
}

/// Encoded length of the last three items of a legacy signing payload.
fn legacy_tail_len(payload: &[u8]) -> Option<usize> {
    let mut buf = payload;
    alloy_rlp::Header::decode(&mut buf).ok()?;
    let mut lens = Vec::new();
    while !buf.is_empty() {
        let before = buf.len();
        let header = alloy_rlp::Header::decode(&mut buf).ok()?;
        buf = buf.get(header.payload_length..)?;
        lens.push(before - buf.len());
    }
    Some(lens.iter().rev().take(3).sum())
}

/// Splits an RLP list into its items' payloads.
pub(crate) fn rlp_items(raw: &[u8]) -> Vec<Vec<u8>> {
    let mut buf = raw;
    let list = alloy_rlp::Header::decode(&mut buf).unwrap();
    assert!(list.list);
    let mut items = Vec::new();
    while !buf.is_empty() {
        let header = alloy_rlp::Header::decode(&mut buf).unwrap();
        items.push(buf[..header.payload_length].to_vec());
        buf = &buf[header.payload_length..];
    }
    items
}

#[derive(Debug, Default)]
struct LedgerState {
    chain_id: u64,
    locked: bool,
    wrong_app: bool,
    reject_signing: bool,
    foreign_key: bool,
    close_fails: bool,
    closes: usize,
    exchanges: usize,
    address_requests: Vec<bool>,
    signed_payloads: Vec<Vec<u8>>,
}

/// Shared switches and counters of an emulated device.
#[derive(Debug, Clone)]
pub(crate) struct LedgerControl(Rc<RefCell<LedgerState>>);

impl LedgerControl {
    fn new(chain_id: u64) -> Self {
        Self(Rc::new(RefCell::new(LedgerState {
            chain_id,
            ..LedgerState::default()
        })))
    }

    pub(crate) fn set_locked(&self, locked: bool) {
        self.0.borrow_mut().locked = locked;
    }

    pub(crate) fn set_wrong_app(&self, wrong_app: bool) {
        self.0.borrow_mut().wrong_app = wrong_app;
    }

    pub(crate) fn set_reject_signing(&self, reject: bool) {
        self.0.borrow_mut().reject_signing = reject;
    }

    /// Signs with a key unrelated to the requested path.
    pub(crate) fn set_foreign_key(&self, foreign: bool) {
        self.0.borrow_mut().foreign_key = foreign;
    }

    pub(crate) fn set_close_fails(&self, fails: bool) {
        self.0.borrow_mut().close_fails = fails;
    }

    pub(crate) fn closes(&self) -> usize {
        self.0.borrow().closes
    }

    pub(crate) fn exchanges(&self) -> usize {
        self.0.borrow().exchanges
    }

    /// The display flag of every address request, in order.
    pub(crate) fn address_requests(&self) -> Vec<bool> {
        self.0.borrow().address_requests.clone()
    }

    /// Every payload the device signed, without the path prefix.
    pub(crate) fn signed_payloads(&self) -> Vec<Vec<u8>> {
        self.0.borrow().signed_payloads.clone()
    }

    pub(crate) fn address_at(&self, path: &DerivationPath) -> Address {
        key_address(&signing_key(path))
    }
}

#[derive(Debug)]
struct Pending {
    ins: u8,
    path: DerivationPath,
    data: Vec<u8>,
}

/// An emulated Ledger running the Ethereum app.
#[derive(Debug)]
pub(crate) struct FakeLedger {
    control: LedgerControl,
    pending: Option<Pending>,
    connected: bool,
}

impl FakeLedger {
    pub(crate) fn new(chain_id: u64) -> Self {
        Self::with_control(LedgerControl::new(chain_id))
    }

    fn with_control(control: LedgerControl) -> Self {
        Self {
            control,
            pending: None,
            connected: true,
        }
    }

    pub(crate) fn address_at(&self, path: &DerivationPath) -> Address {
        self.control.address_at(path)
    }

    fn get_address(&self, apdu: &Apdu) -> ApduResponse {
        let Some((path, _)) = parse_path(apdu.data()) else {
            return status(0x6a80);
        };
        self.control
            .0
            .borrow_mut()
            .address_requests
            .push(apdu.p1() == 0x01);

        let key = signing_key(&path);
        let pubkey = key.verifying_key().to_encoded_point(false);
        let ascii = hex::encode(key_address(&key).as_bytes());

        let mut data = vec![65];
        data.extend_from_slice(pubkey.as_bytes());
        data.push(40);
        data.extend_from_slice(ascii.as_bytes());
        ApduResponse::with_status(data, 0x9000)
    }

    fn sign_chunk(&mut self, apdu: &Apdu) -> ApduResponse {
        let received;
        if apdu.p1() == 0x00 {
            let Some((path, rest)) = parse_path(apdu.data()) else {
                return status(0x6a80);
            };
            received = rest.len();
            self.pending = Some(Pending {
                ins: apdu.ins(),
                path,
                data: rest.to_vec(),
            });
        } else {
            match self.pending.as_mut() {
                Some(pending) if pending.ins == apdu.ins() => {
                    pending.data.extend_from_slice(apdu.data());
                    received = apdu.data().len();
                }
                _ => return status(0x6a80),
            }
        }

        let complete = self.pending.as_ref().is_some_and(|pending| {
            if pending.ins == 0x08 {
                pending.data.len() >= 4
                    && pending.data.len() - 4
                        >= u32::from_be_bytes([
                            pending.data[0],
                            pending.data[1],
                            pending.data[2],
                            pending.data[3],
                        ]) as usize
            } else {
                transaction_complete(&pending.data)
            }
        });
        if !complete {
            return status(0x9000);
        }

        let Some(pending) = self.pending.take() else {
            return status(0x6a80);
        };
        // The app parses the EIP-155 marker from the final chunk only.
        if pending.ins == 0x04
            && pending.data[0] != 0x02
            && legacy_tail_len(&pending.data).is_none_or(|tail| received < tail)
        {
            return status(0x6a80);
        }
        self.sign(pending)
    }

    fn sign(&self, pending: Pending) -> ApduResponse {
        let mut state = self.control.0.borrow_mut();
        if state.reject_signing {
            return status(0x6985);
        }

        let key = if state.foreign_key {
            SigningKey::from_slice(&[0x42; 32]).unwrap()
        } else {
            signing_key(&pending.path)
        };

        let (hash, typed) = if pending.ins == 0x08 {
            (personal_message_hash(&pending.data[4..]), false)
        } else {
            (keccak256(&pending.data), pending.data[0] == 0x02)
        };
        let (sig, recid) = key.sign_prehash_recoverable(hash.as_slice()).unwrap();
        let parity = recid.to_byte();

        let v = if pending.ins == 0x08 {
            27 + parity
        } else if typed {
            parity
        } else {
            ((u128::from(state.chain_id) * 2 + 35 + u128::from(parity)) % 256) as u8
        };

        state.signed_payloads.push(pending.data);
        let mut data = vec![v];
        data.extend_from_slice(&sig.to_bytes());
        ApduResponse::with_status(data, 0x9000)
    }
}

#[async_trait(?Send)]
impl Transport for FakeLedger {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        {
            let mut state = self.control.0.borrow_mut();
            state.exchanges += 1;
            if state.locked {
                return Ok(status(0x5515));
            }
            if state.wrong_app {
                return Ok(status(0x6e00));
            }
        }

        Ok(match apdu.ins() {
            0x02 => self.get_address(apdu),
            0x04 | 0x08 => self.sign_chunk(apdu),
            0x06 => ApduResponse::with_status(vec![0x01, 1, 12, 0], 0x9000),
            _ => status(0x6d00),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        let mut state = self.control.0.borrow_mut();
        state.closes += 1;
        if state.close_fails {
            return Err(Error::session(
                SessionFailure::Transport,
                "failed to release interface",
            ));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Debug)]
struct BackendState {
    pickable: Option<u32>,
    granted: Vec<u32>,
    opens: usize,
    busy: bool,
}

/// A device backend whose devices are [`FakeLedger`]s sharing one state.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    ledger: LedgerControl,
    state: RefCell<BackendState>,
}

impl FakeBackend {
    pub(crate) fn new(chain_id: u64) -> Self {
        Self {
            ledger: LedgerControl::new(chain_id),
            state: RefCell::new(BackendState {
                pickable: Some(1),
                granted: vec![1],
                opens: 0,
                busy: false,
            }),
        }
    }

    pub(crate) fn set_pickable(&self, handle: Option<u32>) {
        self.state.borrow_mut().pickable = handle;
    }

    pub(crate) fn set_granted(&self, handles: Vec<u32>) {
        self.state.borrow_mut().granted = handles;
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.state.borrow_mut().busy = busy;
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.borrow().opens
    }

    pub(crate) fn ledger(&self) -> LedgerControl {
        self.ledger.clone()
    }

    pub(crate) fn address_at(&self, path: &DerivationPath) -> Address {
        self.ledger.address_at(path)
    }
}

#[async_trait(?Send)]
impl DeviceBackend for FakeBackend {
    type Handle = u32;

    async fn request_device(&self, _filter: &DeviceFilter) -> Result<Option<u32>> {
        Ok(self.state.borrow().pickable)
    }

    async fn granted_devices(&self, _filter: &DeviceFilter) -> Result<Vec<u32>> {
        Ok(self.state.borrow().granted.clone())
    }

    async fn open(&self, _handle: &u32) -> Result<Box<dyn Transport>> {
        let mut state = self.state.borrow_mut();
        if state.busy {
            return Err(Error::session(
                SessionFailure::TransportBusy,
                "interface is claimed by another program",
            ));
        }
        state.opens += 1;
        Ok(Box::new(FakeLedger::with_control(self.ledger.clone())))
    }
}

/// Replays canned responses.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    responses: VecDeque<ApduResponse>,
    sent: Rc<RefCell<Vec<Apdu>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<ApduResponse>) -> Self {
        Self {
            responses: responses.into(),
            sent: Rc::default(),
        }
    }

    pub(crate) fn sent(&self) -> Rc<RefCell<Vec<Apdu>>> {
        Rc::clone(&self.sent)
    }
}

#[async_trait(?Send)]
impl Transport for ScriptedTransport {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        self.sent.borrow_mut().push(apdu.clone());
        self.responses
            .pop_front()
            .ok_or_else(|| Error::session(SessionFailure::Transport, "no scripted response"))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct RpcState {
    responses: HashMap<String, core::result::Result<Value, (i64, String)>>,
    calls: Vec<(String, Value)>,
}

/// An RPC client answering from a table.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeRpc(Rc<RefCell<RpcState>>);

impl FakeRpc {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, method: &str, result: Value) -> &Self {
        self.0
            .borrow_mut()
            .responses
            .insert(method.to_string(), Ok(result));
        self
    }

    pub(crate) fn fail(&self, method: &str, code: i64, message: &str) -> &Self {
        self.0
            .borrow_mut()
            .responses
            .insert(method.to_string(), Err((code, message.to_string())));
        self
    }

    /// Every call made, in order.
    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.0.borrow().calls.clone()
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.0.borrow().calls.iter().map(|(m, _)| m.clone()).collect()
    }

    pub(crate) fn params_of(&self, method: &str) -> Option<Value> {
        self.0
            .borrow()
            .calls
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait(?Send)]
impl RpcClient for FakeRpc {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut state = self.0.borrow_mut();
        state.calls.push((method.to_string(), params));
        match state.responses.get(method) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err((code, message))) => Err(Error::Rpc {
                method: method.to_string(),
                code: Some(*code),
                message: message.clone(),
            }),
            None => Err(Error::Rpc {
                method: method.to_string(),
                code: Some(-32601),
                message: "method not found".to_string(),
            }),
        }
    }
}
