//! Signing through the hardware session.
//!
//! The [`HardwareSigner`] sends payloads to the device at the session's
//! derivation path and checks every returned signature against the session
//! address before it is used.
//!
//! # Example
//!
//! ```ignore
//! let session = sessions.get_or_create_session().await?;
//! let raw = HardwareSigner::new(session).sign_transaction(&tx).await?;
//! ```

use tracing::debug;

use crate::address::Address;
use crate::crypto::{personal_message_hash, recovery_parity, verify_signer};
use crate::error::Result;
use crate::ledger::{DerivationPath, EthApp};
use crate::session::Session;
use crate::signature::Signature;
use crate::transaction::Transaction;

/// Signs with the key behind a live session.
#[derive(Debug)]
pub struct HardwareSigner<'a> {
    app: &'a mut EthApp,
    path: &'a DerivationPath,
    address: Address,
}

impl<'a> HardwareSigner<'a> {
    /// Creates a signer for the session's account.
    pub fn new(session: &'a mut Session) -> Self {
        let address = session.address();
        let (path, app) = session.parts_mut();
        Self { app, path, address }
    }

    /// Returns the signing address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Signs a transaction and returns the raw signed transaction bytes.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::SigningRejected`] if the user declines
    /// - [`crate::Error::SignerMismatch`] if the device signed with another key
    /// - any protocol error from the device exchange
    pub async fn sign_transaction(&mut self, tx: &Transaction) -> Result<Vec<u8>> {
        let payload = tx.unsigned_rlp();
        debug!(len = payload.len(), scheme = ?tx.fee_scheme(), "sending transaction to device");

        let signature = self
            .app
            .sign_transaction(self.path, &payload, tx.eip155_tail_len())
            .await?;
        let parity = tx.signature_parity(&signature)?;
        verify_signer(&tx.signing_hash(), &signature, parity, self.address)?;

        tx.signed_rlp(&signature)
    }

    /// Signs a message with the EIP-191 personal message prefix.
    ///
    /// The returned signature's `v` is `27` or `28`.
    ///
    /// # Errors
    ///
    /// Same as [`HardwareSigner::sign_transaction`].
    pub async fn sign_personal_message(&mut self, message: &[u8]) -> Result<Signature> {
        debug!(len = message.len(), "sending personal message to device");

        let signature = self.app.sign_personal_message(self.path, message).await?;
        let parity = recovery_parity(signature.v(), None)?;
        verify_signer(
            &personal_message_hash(message),
            &signature,
            parity,
            self.address,
        )?;

        Ok(signature.with_v(27 + parity))
    }
}
