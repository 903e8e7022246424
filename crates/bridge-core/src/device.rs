//! Peripheral access: obtaining permission for, and handles to, a device.
//!
//! Browsers only hand out USB devices the user picked in a permission
//! prompt, and the prompt may only be opened from a user gesture. The
//! [`DeviceBackend`] trait captures the two ways to get a handle:
//!
//! - [`DeviceBackend::request_device`]: interactive, shows the picker
//! - [`DeviceBackend::granted_devices`]: silent, lists earlier grants
//!
//! [`PeripheralAccess`] caches the chosen handle until it is forgotten.

use async_trait::async_trait;
use core::fmt;
use tracing::info;

use crate::error::{Error, Result};
use crate::ledger::Transport;

/// Selects which USB devices a backend offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    /// USB vendor id.
    pub vendor_id: u16,
    /// Optional USB product id.
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Ledger's USB vendor id.
    pub const LEDGER_VENDOR_ID: u16 = 0x2c97;

    /// Matches every Ledger device.
    #[must_use]
    pub const fn ledger() -> Self {
        Self {
            vendor_id: Self::LEDGER_VENDOR_ID,
            product_id: None,
        }
    }

    /// Checks whether a device with these ids passes the filter.
    #[must_use]
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id.is_none_or(|p| p == product_id)
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::ledger()
    }
}

/// A platform's way of discovering and opening devices.
#[async_trait(?Send)]
pub trait DeviceBackend: fmt::Debug {
    /// An opaque reference to one physical device.
    type Handle: Clone + fmt::Debug;

    /// Asks the user to pick a device. Resolves to `None` when the user
    /// picked nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebUsbUnavailable`] if the platform has no USB access.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Option<Self::Handle>>;

    /// Lists devices the user granted access to earlier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebUsbUnavailable`] if the platform has no USB access.
    async fn granted_devices(&self, filter: &DeviceFilter) -> Result<Vec<Self::Handle>>;

    /// Opens a transport to the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HardwareSession`] if the device cannot be claimed.
    async fn open(&self, handle: &Self::Handle) -> Result<Box<dyn Transport>>;
}

/// Caches the device handle granted by the user.
#[derive(Debug)]
pub struct PeripheralAccess<B: DeviceBackend> {
    backend: B,
    filter: DeviceFilter,
    handle: Option<B::Handle>,
}

impl<B: DeviceBackend> PeripheralAccess<B> {
    /// Creates an access layer for Ledger devices.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_filter(backend, DeviceFilter::ledger())
    }

    /// Creates an access layer with a custom filter.
    #[must_use]
    pub const fn with_filter(backend: B, filter: DeviceFilter) -> Self {
        Self {
            backend,
            filter,
            handle: None,
        }
    }

    /// Shows the device picker and caches the chosen device.
    ///
    /// Must be called from a user gesture.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDeviceSelected`] if the user picked nothing; the
    /// cache is left untouched.
    pub async fn request_access(&mut self) -> Result<B::Handle> {
        let handle = self
            .backend
            .request_device(&self.filter)
            .await?
            .ok_or(Error::NoDeviceSelected)?;
        info!(device = ?handle, "device access granted");
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Restores access to a previously granted device without a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotAuthorized`] if no granted device matches.
    pub async fn reconnect(&mut self) -> Result<B::Handle> {
        let handle = self
            .backend
            .granted_devices(&self.filter)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotAuthorized)?;
        info!(device = ?handle, "reconnected to granted device");
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Drops the cached handle.
    pub fn forget(&mut self) {
        self.handle = None;
    }

    /// Returns the cached handle.
    #[must_use]
    pub const fn handle(&self) -> Option<&B::Handle> {
        self.handle.as_ref()
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Opens a transport to the cached device, reconnecting silently when
    /// nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotAuthorized`] if there is no device to open,
    /// or any error from [`DeviceBackend::open`].
    pub async fn open(&mut self) -> Result<Box<dyn Transport>> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => self.reconnect().await?,
        };
        self.backend.open(&handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeBackend;

    #[test]
    fn ledger_filter_matches_vendor() {
        let filter = DeviceFilter::ledger();
        assert!(filter.matches(0x2c97, 0x4011));
        assert!(!filter.matches(0x1050, 0x0407));

        let narrow = DeviceFilter {
            product_id: Some(0x4011),
            ..filter
        };
        assert!(!narrow.matches(0x2c97, 0x1011));
    }

    #[tokio::test]
    async fn request_access_without_selection_caches_nothing() {
        let backend = FakeBackend::new(1);
        backend.set_pickable(None);
        let mut access = PeripheralAccess::new(backend);

        let result = access.request_access().await;
        assert!(matches!(result, Err(Error::NoDeviceSelected)));
        assert!(access.handle().is_none());
    }

    #[tokio::test]
    async fn request_access_caches_selection() {
        let mut access = PeripheralAccess::new(FakeBackend::new(1));
        let handle = access.request_access().await.unwrap();
        assert_eq!(access.handle(), Some(&handle));

        access.forget();
        assert!(access.handle().is_none());
    }

    #[tokio::test]
    async fn reconnect_requires_a_grant() {
        let backend = FakeBackend::new(1);
        backend.set_granted(vec![]);
        let mut access = PeripheralAccess::new(backend);

        assert!(matches!(
            access.reconnect().await,
            Err(Error::DeviceNotAuthorized)
        ));
        assert!(matches!(access.open().await, Err(Error::DeviceNotAuthorized)));
    }

    #[tokio::test]
    async fn open_reconnects_silently() {
        let backend = FakeBackend::new(1);
        backend.set_granted(vec![7]);
        let mut access = PeripheralAccess::new(backend);

        let transport = access.open().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(access.handle(), Some(&7));
        assert_eq!(access.backend().opens(), 1);
    }
}
