//! Account discovery over consecutive derivation indices.
//!
//! Addresses are derived with on-device display disabled, so a scan does not
//! need user interaction. The live session's transport is reused when there
//! is one; otherwise a temporary transport is opened and always closed.

use serde::Serialize;
use tracing::debug;

use crate::address::Address;
use crate::device::DeviceBackend;
use crate::error::{Error, Result};
use crate::ledger::{DerivationPath, EthApp};
use crate::session::{SessionManager, close_quietly};

/// The most addresses one scan derives.
pub const MAX_SCAN_LIMIT: u32 = 25;

/// One derived account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedAccount {
    /// The account's derivation path.
    pub path: DerivationPath,
    /// The derived address.
    pub address: Address,
}

/// Derives batches of accounts below a base path.
#[derive(Debug, Clone, Copy)]
pub struct AccountScanner {
    limit: u32,
}

impl AccountScanner {
    /// Creates a scanner deriving at most `limit` accounts per scan.
    ///
    /// The limit itself is capped at [`MAX_SCAN_LIMIT`].
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.clamp(1, MAX_SCAN_LIMIT),
        }
    }

    /// Returns the per-scan limit.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Lists the paths `base/start .. base/start+count`, with `count`
    /// clamped to the limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDerivationPath`] if an index would enter the
    /// hardened range or the path would be too deep.
    pub fn paths(&self, base: &DerivationPath, start: u32, count: u32) -> Result<Vec<DerivationPath>> {
        (0..count.min(self.limit))
            .map(|offset| {
                let index = start.checked_add(offset).ok_or_else(|| {
                    Error::InvalidDerivationPath(format!("index {start} + {offset} overflows"))
                })?;
                base.child(index)
            })
            .collect()
    }

    /// Derives `count` accounts starting at `base/start`, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDerivationPath`] for out-of-range indices
    /// (before touching the device), or any device error.
    pub async fn scan<B: DeviceBackend>(
        &self,
        sessions: &mut SessionManager<B>,
        base: &DerivationPath,
        start: u32,
        count: u32,
    ) -> Result<Vec<ScannedAccount>> {
        let paths = self.paths(base, start, count)?;
        debug!(%base, start, count = paths.len(), "scanning accounts");

        if let Some(session) = sessions.active_mut() {
            return derive_all(session.app_mut(), paths).await;
        }

        let mut app = sessions.open_app().await?;
        let result = derive_all(&mut app, paths).await;
        close_quietly(&mut app).await;
        result
    }
}

impl Default for AccountScanner {
    fn default() -> Self {
        Self::new(MAX_SCAN_LIMIT)
    }
}

async fn derive_all(app: &mut EthApp, paths: Vec<DerivationPath>) -> Result<Vec<ScannedAccount>> {
    let mut accounts = Vec::with_capacity(paths.len());
    for path in paths {
        let address = app.get_address(&path, false).await?;
        accounts.push(ScannedAccount { path, address });
    }
    Ok(accounts)
}
