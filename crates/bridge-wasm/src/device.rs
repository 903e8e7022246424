//! Browser device discovery over `navigator.usb`.
//!
//! [`WebUsbBackend`] implements the core [`DeviceBackend`] trait:
//!
//! - `request_device` opens the browser's picker, filtered to Ledger's
//!   vendor id. It must run inside a user gesture.
//! - `granted_devices` lists devices the origin was granted earlier, for
//!   silent reconnects.
//! - `open` claims the device and returns a [`LedgerWebUsbTransport`].

use async_trait::async_trait;
use js_sys::Array;
use ledger_evm_bridge_core::device::{DeviceBackend, DeviceFilter};
use ledger_evm_bridge_core::error::{Error, Result};
use ledger_evm_bridge_core::ledger::Transport;
use tracing::{debug, info};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Usb, UsbDevice, UsbDeviceFilter, UsbDeviceRequestOptions};

use crate::error::{js_error_name, js_message};
use crate::transport::LedgerWebUsbTransport;

/// Device discovery through the WebUSB API.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebUsbBackend;

impl WebUsbBackend {
    /// Creates a backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns `navigator.usb`.
    fn usb() -> Result<Usb> {
        let window = web_sys::window()
            .ok_or_else(|| Error::WebUsbUnavailable("no window object".to_string()))?;
        let navigator = window.navigator();
        let present = js_sys::Reflect::has(&navigator, &JsValue::from_str("usb")).unwrap_or(false);
        if !present {
            return Err(Error::WebUsbUnavailable(
                "navigator.usb is missing; use a Chromium-based browser over HTTPS".to_string(),
            ));
        }
        Ok(navigator.usb())
    }
}

/// Whether a `requestDevice` rejection means the user picked nothing.
///
/// `NotFoundError` is raised when the picker is dismissed, `SecurityError`
/// when it is opened outside a user gesture.
fn is_no_selection(name: Option<&str>) -> bool {
    matches!(name, Some("NotFoundError" | "SecurityError"))
}

#[async_trait(?Send)]
impl DeviceBackend for WebUsbBackend {
    type Handle = UsbDevice;

    async fn request_device(&self, filter: &DeviceFilter) -> Result<Option<UsbDevice>> {
        let usb = Self::usb()?;

        let device_filter = UsbDeviceFilter::new();
        device_filter.set_vendor_id(filter.vendor_id);
        if let Some(product_id) = filter.product_id {
            device_filter.set_product_id(product_id);
        }
        let options = UsbDeviceRequestOptions::new(&[device_filter]);

        match JsFuture::from(usb.request_device(&options)).await {
            Ok(device) => {
                let device: UsbDevice = device.unchecked_into();
                info!(product = ?device.product_name(), "device selected");
                Ok(Some(device))
            }
            Err(e) if is_no_selection(js_error_name(&e).as_deref()) => {
                debug!(error = %js_message(&e), "device picker closed without a selection");
                Ok(None)
            }
            Err(e) => Err(Error::WebUsbUnavailable(js_message(&e))),
        }
    }

    async fn granted_devices(&self, filter: &DeviceFilter) -> Result<Vec<UsbDevice>> {
        let usb = Self::usb()?;
        let devices = JsFuture::from(usb.get_devices())
            .await
            .map_err(|e| Error::WebUsbUnavailable(js_message(&e)))?;

        let devices: Array = devices.unchecked_into();
        let granted: Vec<UsbDevice> = devices
            .iter()
            .map(|device| device.unchecked_into::<UsbDevice>())
            .filter(|device| filter.matches(device.vendor_id(), device.product_id()))
            .collect();
        debug!(count = granted.len(), "granted devices");
        Ok(granted)
    }

    async fn open(&self, handle: &UsbDevice) -> Result<Box<dyn Transport>> {
        let transport = LedgerWebUsbTransport::open(handle.clone()).await?;
        Ok(Box::new(transport))
    }
}
