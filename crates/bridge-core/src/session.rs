//! Hardware sessions: an open transport, the Ethereum app client on top of
//! it, and the address derived at the session's path.
//!
//! The [`SessionManager`] owns at most one [`Session`]. Opening a new one
//! first closes the old transport, since a USB interface can only be claimed
//! once. Closing is best effort: failures are logged and swallowed.

use tracing::{debug, info, warn};

use crate::address::Address;
use crate::device::{DeviceBackend, PeripheralAccess};
use crate::error::{Error, Result};
use crate::ledger::{DerivationPath, EthApp};

/// A live connection to the Ethereum app at one derivation path.
#[derive(Debug)]
pub struct Session {
    app: EthApp,
    address: Address,
    path: DerivationPath,
}

impl Session {
    /// Returns the address the device derived for this session.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Returns the session's derivation path.
    #[must_use]
    pub const fn path(&self) -> &DerivationPath {
        &self.path
    }

    /// Returns the Ethereum app client.
    pub const fn app_mut(&mut self) -> &mut EthApp {
        &mut self.app
    }

    /// Returns the path and the app client together.
    pub(crate) const fn parts_mut(&mut self) -> (&DerivationPath, &mut EthApp) {
        (&self.path, &mut self.app)
    }
}

/// Closes an app client, logging instead of failing.
pub(crate) async fn close_quietly(app: &mut EthApp) {
    if let Err(err) = app.close().await {
        warn!(error = %err, "failed to close device transport");
    }
}

/// Checks the Ethereum app is running, then derives the address at `path`
/// with on-device confirmation.
async fn handshake(app: &mut EthApp, path: &DerivationPath) -> Result<Address> {
    let config = app.app_configuration().await?;
    debug!(
        version = %config.version,
        arbitrary_data = config.arbitrary_data_enabled(),
        "Ethereum app configuration"
    );
    app.get_address(path, true).await
}

/// Owns the device access layer and the live session.
#[derive(Debug)]
pub struct SessionManager<B: DeviceBackend> {
    access: PeripheralAccess<B>,
    default_path: DerivationPath,
    session: Option<Session>,
}

impl<B: DeviceBackend> SessionManager<B> {
    /// Creates a manager with no session.
    #[must_use]
    pub const fn new(access: PeripheralAccess<B>, default_path: DerivationPath) -> Self {
        Self {
            access,
            default_path,
            session: None,
        }
    }

    /// Returns the device access layer.
    pub const fn access_mut(&mut self) -> &mut PeripheralAccess<B> {
        &mut self.access
    }

    /// Returns the device access layer.
    #[must_use]
    pub const fn access(&self) -> &PeripheralAccess<B> {
        &self.access
    }

    /// Returns the path new sessions use by default.
    #[must_use]
    pub const fn default_path(&self) -> &DerivationPath {
        &self.default_path
    }

    /// Returns the live session, if any.
    #[must_use]
    pub const fn active(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Returns the live session, if any.
    pub const fn active_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Returns the live session's address, if any.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        self.session.as_ref().map(Session::address)
    }

    /// Opens an app client on the device without creating a session.
    ///
    /// # Errors
    ///
    /// Returns any error from [`PeripheralAccess::open`].
    pub async fn open_app(&mut self) -> Result<EthApp> {
        let transport = self.access.open().await?;
        Ok(EthApp::new(transport))
    }

    /// Opens a session at `path`, replacing any live session.
    ///
    /// Reads the app configuration first; the device then shows the derived
    /// address for confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotAuthorized`] if there is no device to open,
    /// or the device error that prevented deriving the address. No session
    /// is live afterwards in either case.
    pub async fn open_session(&mut self, path: DerivationPath) -> Result<Address> {
        self.close().await;

        let mut app = self.open_app().await?;
        let address = match handshake(&mut app, &path).await {
            Ok(address) => address,
            Err(err) => {
                close_quietly(&mut app).await;
                return Err(err);
            }
        };

        info!(%address, %path, "hardware session opened");
        self.session = Some(Session { app, address, path });
        Ok(address)
    }

    /// Returns the live session, opening one at the default path if needed.
    ///
    /// # Errors
    ///
    /// Returns any error from [`SessionManager::open_session`].
    pub async fn get_or_create_session(&mut self) -> Result<&mut Session> {
        if self.session.is_none() {
            let path = self.default_path.clone();
            self.open_session(path).await?;
        }
        self.session.as_mut().ok_or(Error::DeviceNotAuthorized)
    }

    /// Closes the live session, if any.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            close_quietly(&mut session.app).await;
            info!(address = %session.address, "hardware session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionFailure;
    use crate::mock::FakeBackend;

    fn manager(backend: FakeBackend) -> SessionManager<FakeBackend> {
        SessionManager::new(PeripheralAccess::new(backend), DerivationPath::default())
    }

    #[tokio::test]
    async fn open_session_derives_address() {
        let backend = FakeBackend::new(1);
        let expected = backend.address_at(&DerivationPath::default());
        let mut sessions = manager(backend);

        let address = sessions
            .open_session(DerivationPath::default())
            .await
            .unwrap();
        assert_eq!(address, expected);
        assert_eq!(sessions.address(), Some(expected));
        assert_eq!(sessions.active().unwrap().path(), &DerivationPath::default());
    }

    #[tokio::test]
    async fn replacing_a_session_closes_the_old_transport() {
        let backend = FakeBackend::new(1);
        let ledger = backend.ledger();
        let mut sessions = manager(backend);

        sessions
            .open_session(DerivationPath::default())
            .await
            .unwrap();
        let other: DerivationPath = "m/44'/60'/0'/0/1".parse().unwrap();
        let address = sessions.open_session(other.clone()).await.unwrap();

        assert_eq!(ledger.closes(), 1);
        assert_eq!(sessions.active().unwrap().path(), &other);
        assert_eq!(address, ledger.address_at(&other));
    }

    #[tokio::test]
    async fn close_failures_are_swallowed() {
        let backend = FakeBackend::new(1);
        let ledger = backend.ledger();
        let mut sessions = manager(backend);
        sessions
            .open_session(DerivationPath::default())
            .await
            .unwrap();

        ledger.set_close_fails(true);
        sessions.close().await;
        assert!(sessions.active().is_none());
    }

    #[tokio::test]
    async fn failed_derivation_closes_transport() {
        let backend = FakeBackend::new(1);
        let ledger = backend.ledger();
        ledger.set_locked(true);
        let mut sessions = manager(backend);

        let err = sessions
            .open_session(DerivationPath::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::HardwareSession {
                reason: SessionFailure::Locked,
                ..
            }
        ));
        assert_eq!(ledger.closes(), 1);
        assert!(sessions.active().is_none());
    }

    #[tokio::test]
    async fn wrong_app_fails_before_address_is_shown() {
        let backend = FakeBackend::new(1);
        let ledger = backend.ledger();
        ledger.set_wrong_app(true);
        let mut sessions = manager(backend);

        let err = sessions
            .open_session(DerivationPath::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::HardwareSession {
                reason: SessionFailure::WrongApp,
                ..
            }
        ));
        assert_eq!(ledger.exchanges(), 1);
        assert!(ledger.address_requests().is_empty());
        assert_eq!(ledger.closes(), 1);
    }

    #[tokio::test]
    async fn open_session_reads_app_configuration_first() {
        let backend = FakeBackend::new(1);
        let ledger = backend.ledger();
        let mut sessions = manager(backend);

        sessions
            .open_session(DerivationPath::default())
            .await
            .unwrap();
        assert_eq!(ledger.exchanges(), 2);
        assert_eq!(ledger.address_requests(), vec![true]);
    }

    #[tokio::test]
    async fn get_or_create_reuses_session() {
        let backend = FakeBackend::new(1);
        let mut sessions = manager(backend);

        let first = sessions.get_or_create_session().await.unwrap().address();
        let second = sessions.get_or_create_session().await.unwrap().address();
        assert_eq!(first, second);
        assert_eq!(sessions.access().backend().opens(), 1);
    }
}
