//! Client for the Ledger Ethereum application.
//!
//! The [`EthApp`] type wraps a [`Transport`] and issues the app's
//! instructions:
//!
//! | INS | instruction | P1 |
//! |---|---|---|
//! | `0x02` | get public address | `0x01` confirm on device, `0x00` silent |
//! | `0x04` | sign transaction | `0x00` first chunk, `0x80` continuation |
//! | `0x06` | get app configuration | `0x00` |
//! | `0x08` | sign personal message | `0x00` first chunk, `0x80` continuation |
//!
//! Payloads longer than one APDU are split into 255-byte chunks. The first
//! chunk starts with the encoded derivation path. The `chainId, 0, 0` tail of
//! a legacy transaction must arrive whole in the last chunk, so the chunk
//! before it may be cut short.

use core::fmt;

use tracing::debug;

use super::Transport;
use super::apdu::Apdu;
use super::path::DerivationPath;
use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// Ethereum application class byte.
const CLA: u8 = 0xE0;

/// Ethereum application instruction codes.
mod ins {
    /// `GET_ETH_PUBLIC_ADDRESS`.
    pub(super) const GET_ADDRESS: u8 = 0x02;

    /// `SIGN_ETH_TRANSACTION`.
    pub(super) const SIGN_TRANSACTION: u8 = 0x04;

    /// `GET_APP_CONFIGURATION`.
    pub(super) const GET_CONFIGURATION: u8 = 0x06;

    /// `SIGN_ETH_PERSONAL_MESSAGE`.
    pub(super) const SIGN_PERSONAL_MESSAGE: u8 = 0x08;
}

/// P1 values.
mod p1 {
    pub(super) const FIRST_CHUNK: u8 = 0x00;
    pub(super) const MORE_CHUNK: u8 = 0x80;
    pub(super) const NO_DISPLAY: u8 = 0x00;
    pub(super) const DISPLAY: u8 = 0x01;
}

/// P2 for `GET_ETH_PUBLIC_ADDRESS` without chain code.
const P2_NO_CHAINCODE: u8 = 0x00;

/// The Ethereum app's reported configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfiguration {
    /// Raw flags byte.
    pub flags: u8,
    /// Application version as `major.minor.patch`.
    pub version: String,
}

impl AppConfiguration {
    /// Whether blind signing of contract data is enabled on the device.
    #[must_use]
    pub const fn arbitrary_data_enabled(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

/// A client for the Ledger Ethereum application.
pub struct EthApp {
    /// The underlying transport.
    transport: Box<dyn Transport>,
}

impl fmt::Debug for EthApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthApp")
            .field("transport", &self.transport)
            .finish()
    }
}

impl EthApp {
    /// Creates a new client over the given transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Sends one APDU and returns the data of a successful response.
    async fn exchange(&mut self, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Vec<u8>> {
        let apdu = Apdu::new(CLA, ins, p1, p2, data)?;
        debug!(ins, p1, len = apdu.data().len(), "sending APDU");

        let response = self.transport.exchange(&apdu).await?;
        debug!(status = response.status_word(), "received APDU response");

        response.check()?;
        Ok(response.into_data())
    }

    /// Sends `header || body` in chunks and returns the last response.
    async fn exchange_chunked(
        &mut self,
        ins: u8,
        header: &[u8],
        body: &[u8],
        tail: usize,
    ) -> Result<Vec<u8>> {
        let chunks = chunk_payload(header, body, tail);
        let mut last = Vec::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let p1 = if i == 0 { p1::FIRST_CHUNK } else { p1::MORE_CHUNK };
            last = self.exchange(ins, p1, 0x00, chunk).await?;
        }
        Ok(last)
    }

    /// Reads the application configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or the response is too short.
    pub async fn app_configuration(&mut self) -> Result<AppConfiguration> {
        let data = self
            .exchange(ins::GET_CONFIGURATION, 0x00, 0x00, Vec::new())
            .await?;
        if data.len() < 4 {
            return Err(Error::MalformedResponse(format!(
                "app configuration has {} bytes",
                data.len()
            )));
        }
        Ok(AppConfiguration {
            flags: data[0],
            version: format!("{}.{}.{}", data[1], data[2], data[3]),
        })
    }

    /// Derives the address at `path`.
    ///
    /// With `display` set the device shows the address and waits for the
    /// user to confirm it.
    ///
    /// # Errors
    ///
    /// - [`Error::SigningRejected`] if the user declines on the device
    /// - [`Error::MalformedResponse`] if the response cannot be parsed or the
    ///   reported address does not match the reported public key
    pub async fn get_address(&mut self, path: &DerivationPath, display: bool) -> Result<Address> {
        let p1 = if display { p1::DISPLAY } else { p1::NO_DISPLAY };
        let data = self
            .exchange(ins::GET_ADDRESS, p1, P2_NO_CHAINCODE, path.to_apdu_bytes())
            .await?;
        parse_address_response(&data)
    }

    /// Signs an unsigned transaction payload (RLP, type-prefixed for typed
    /// transactions).
    ///
    /// The last `tail` bytes of the payload are sent together in the final
    /// chunk; see [`crate::Transaction::eip155_tail_len`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SigningRejected`] if the user declines on the device,
    /// or a protocol error if the response is malformed.
    pub async fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        payload: &[u8],
        tail: usize,
    ) -> Result<Signature> {
        let data = self
            .exchange_chunked(ins::SIGN_TRANSACTION, &path.to_apdu_bytes(), payload, tail)
            .await?;
        Signature::from_device_response(&data)
    }

    /// Signs a message with the EIP-191 personal message prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SigningRejected`] if the user declines on the device,
    /// [`Error::InvalidParams`] if the message length does not fit in a `u32`,
    /// or a protocol error if the response is malformed.
    pub async fn sign_personal_message(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
    ) -> Result<Signature> {
        let len = u32::try_from(message.len())
            .map_err(|_| Error::invalid_params("personal_sign", "message is too long"))?;
        let mut header = path.to_apdu_bytes();
        header.extend_from_slice(&len.to_be_bytes());

        let data = self
            .exchange_chunked(ins::SIGN_PERSONAL_MESSAGE, &header, message, 0)
            .await?;
        Signature::from_device_response(&data)
    }

    /// Closes the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport could not be released cleanly.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Checks if the underlying transport is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

/// Splits `header || body` into APDU-sized chunks.
///
/// The header always travels whole in the first chunk. A chunk boundary never
/// falls inside the last `tail` bytes of the body.
fn chunk_payload(header: &[u8], body: &[u8], tail: usize) -> Vec<Vec<u8>> {
    let tail_start = body.len().saturating_sub(tail);
    let mut chunks = Vec::new();
    let mut offset = 0;
    loop {
        let mut chunk = if chunks.is_empty() {
            header.to_vec()
        } else {
            Vec::new()
        };
        let mut end = body.len().min(offset + Apdu::MAX_DATA - chunk.len());
        if end < body.len() && end > tail_start && tail_start > offset {
            end = tail_start;
        }
        chunk.extend_from_slice(&body[offset..end]);
        chunks.push(chunk);
        offset = end;
        if offset >= body.len() {
            return chunks;
        }
    }
}

/// Parses `pubkey_len || pubkey || addr_len || ascii address`.
fn parse_address_response(data: &[u8]) -> Result<Address> {
    let malformed = || Error::MalformedResponse("truncated address response".to_string());

    let pubkey_len = usize::from(*data.first().ok_or_else(malformed)?);
    let pubkey = data.get(1..1 + pubkey_len).ok_or_else(malformed)?;
    let addr_len = usize::from(*data.get(1 + pubkey_len).ok_or_else(malformed)?);
    let ascii = data
        .get(2 + pubkey_len..2 + pubkey_len + addr_len)
        .ok_or_else(malformed)?;

    let ascii = core::str::from_utf8(ascii)
        .map_err(|_| Error::MalformedResponse("address is not ASCII".to_string()))?;
    let reported = Address::from_hex(ascii)
        .map_err(|e| Error::MalformedResponse(format!("invalid address: {e}")))?;

    let derived = Address::from_public_key_bytes(pubkey)?;
    if derived != reported {
        return Err(Error::MalformedResponse(format!(
            "device reported {reported} but its public key hashes to {derived}"
        )));
    }
    Ok(derived)
}
