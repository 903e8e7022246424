//! WebUSB transport implementation for Ledger communication.
//!
//! This module provides a WebUSB-based transport layer that implements
//! the [`Transport`] trait from the core library. APDUs are split into
//! 64-byte HID packets with [`wrap_command`] and responses reassembled with
//! [`ResponseAssembler`].
//!
//! # Browser Support
//!
//! WebUSB is only supported in Chromium-based browsers (Chrome, Edge, Opera).
//! Firefox and Safari do not support WebUSB.
//!
//! # Exclusive Access
//!
//! Only one context can claim the device's interface at a time. If Ledger
//! Live or another tab holds it, opening fails with
//! [`SessionFailure::TransportBusy`].

use std::fmt;

use async_trait::async_trait;
use ledger_evm_bridge_core::error::{Error, Result, SessionFailure};
use ledger_evm_bridge_core::ledger::framing::{PACKET_SIZE, ResponseAssembler, wrap_command};
use ledger_evm_bridge_core::ledger::{Apdu, ApduResponse, Transport};
use tracing::{debug, trace, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{UsbAlternateInterface, UsbDevice, UsbDirection, UsbEndpoint, UsbInterface};

use crate::error::{js_message, usb_failure};

/// Vendor-specific interface class of the Ledger WebUSB interface.
const LEDGER_INTERFACE_CLASS: u8 = 0xFF;

/// Endpoint used by Ledger firmware when the descriptor does not list one.
const DEFAULT_ENDPOINT: u8 = 3;

/// Length requested per IN transfer, one HID packet.
const TRANSFER_LENGTH: u32 = 64;

/// Upper bound on response packets, well above the largest APDU response.
const MAX_RESPONSE_PACKETS: usize = 128;

/// WebUSB transport for Ledger devices.
pub struct LedgerWebUsbTransport {
    /// The USB device handle.
    device: UsbDevice,

    /// The claimed interface number.
    interface_number: u8,

    /// The OUT endpoint number.
    endpoint_out: u8,

    /// The IN endpoint number.
    endpoint_in: u8,

    /// Whether the device is currently connected.
    connected: bool,
}

impl fmt::Debug for LedgerWebUsbTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerWebUsbTransport")
            .field("product_name", &self.device.product_name())
            .field("interface_number", &self.interface_number)
            .field("endpoint_out", &self.endpoint_out)
            .field("endpoint_in", &self.endpoint_in)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl LedgerWebUsbTransport {
    /// Opens a device the user granted access to and claims its Ledger
    /// interface.
    ///
    /// # Errors
    ///
    /// - [`SessionFailure::TransportBusy`] if the interface is claimed elsewhere
    /// - [`SessionFailure::Transport`] if the device cannot be opened or has
    ///   no Ledger interface
    pub async fn open(device: UsbDevice) -> Result<Self> {
        if !device.opened() {
            JsFuture::from(device.open())
                .await
                .map_err(|e| usb_failure("open", &e))?;
        }

        if device.configuration().is_none() {
            JsFuture::from(device.select_configuration(1))
                .await
                .map_err(|e| usb_failure("selectConfiguration", &e))?;
        }

        let (interface_number, endpoint_out, endpoint_in) = Self::find_ledger_interface(&device)?;

        if let Err(e) = JsFuture::from(device.claim_interface(interface_number)).await {
            let closed = JsFuture::from(device.close()).await;
            let close_error = closed.err().map(|e| js_message(&e));
            return Err(claim_failure(&js_message(&e), close_error.as_deref()));
        }

        debug!(
            interface_number,
            endpoint_out, endpoint_in, "claimed Ledger interface"
        );

        Ok(Self {
            device,
            interface_number,
            endpoint_out,
            endpoint_in,
            connected: true,
        })
    }

    /// Finds the vendor-specific interface and its endpoints.
    fn find_ledger_interface(device: &UsbDevice) -> Result<(u8, u8, u8)> {
        let config = device.configuration().ok_or_else(|| {
            Error::session(SessionFailure::Transport, "device has no configuration")
        })?;

        let interfaces = config.interfaces();
        for i in 0..interfaces.length() {
            let interface: UsbInterface = interfaces.get(i).unchecked_into();
            let alternates = interface.alternates();

            for j in 0..alternates.length() {
                let alt: UsbAlternateInterface = alternates.get(j).unchecked_into();
                if alt.interface_class() != LEDGER_INTERFACE_CLASS {
                    continue;
                }

                let endpoints = alt.endpoints();
                let mut endpoint_out = None;
                let mut endpoint_in = None;
                for k in 0..endpoints.length() {
                    let ep: UsbEndpoint = endpoints.get(k).unchecked_into();
                    match ep.direction() {
                        UsbDirection::Out => endpoint_out = Some(ep.endpoint_number()),
                        UsbDirection::In => endpoint_in = Some(ep.endpoint_number()),
                        _ => {}
                    }
                }

                return Ok((
                    interface.interface_number(),
                    endpoint_out.unwrap_or(DEFAULT_ENDPOINT),
                    endpoint_in.unwrap_or(DEFAULT_ENDPOINT),
                ));
            }
        }

        Err(Error::session(
            SessionFailure::Transport,
            "Ledger interface not found",
        ))
    }

    /// Sends one packet to the device.
    async fn send_packet(&self, packet: &[u8]) -> Result<()> {
        let mut data = packet.to_vec();
        let promise = self
            .device
            .transfer_out_with_u8_slice(self.endpoint_out, &mut data)
            .map_err(|e| usb_failure("transferOut", &e))?;

        let result = JsFuture::from(promise)
            .await
            .map_err(|e| usb_failure("transferOut", &e))?;

        let transfer: web_sys::UsbOutTransferResult = result.unchecked_into();
        if transfer.status() != web_sys::UsbTransferStatus::Ok {
            return Err(Error::session(
                SessionFailure::Transport,
                format!("transferOut status: {:?}", transfer.status()),
            ));
        }

        Ok(())
    }

    /// Receives one packet from the device.
    async fn receive_packet(&self) -> Result<Vec<u8>> {
        let promise = self.device.transfer_in(self.endpoint_in, TRANSFER_LENGTH);

        let result = JsFuture::from(promise)
            .await
            .map_err(|e| usb_failure("transferIn", &e))?;

        let transfer: web_sys::UsbInTransferResult = result.unchecked_into();
        if transfer.status() != web_sys::UsbTransferStatus::Ok {
            return Err(Error::session(
                SessionFailure::Transport,
                format!("transferIn status: {:?}", transfer.status()),
            ));
        }

        Ok(transfer.data().map_or_else(Vec::new, |view| {
            let mut buffer = vec![0u8; view.byte_length()];
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = view.get_uint8(i);
            }
            buffer
        }))
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::session(
                SessionFailure::Transport,
                "transport is closed",
            ))
        }
    }
}

#[async_trait(?Send)]
impl Transport for LedgerWebUsbTransport {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        self.ensure_connected()?;

        let packets = wrap_command(&apdu.to_bytes(), PACKET_SIZE)?;
        trace!(packets = packets.len(), "sending APDU");
        for packet in &packets {
            self.send_packet(packet).await?;
        }

        let mut assembler = ResponseAssembler::new();
        for _ in 0..MAX_RESPONSE_PACKETS {
            let packet = self.receive_packet().await?;
            if let Some(response) = assembler.push(&packet)? {
                return ApduResponse::from_bytes(response);
            }
        }

        Err(Error::MalformedResponse(format!(
            "response exceeds {MAX_RESPONSE_PACKETS} packets"
        )))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        if let Err(e) = JsFuture::from(self.device.release_interface(self.interface_number)).await
        {
            warn!(error = %js_message(&e), "failed to release Ledger interface");
        }
        JsFuture::from(self.device.close())
            .await
            .map_err(|e| usb_failure("close", &e))?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// The error for a refused `claimInterface`. A failed close of the device
/// afterwards is logged, not returned.
fn claim_failure(claim_error: &str, close_error: Option<&str>) -> Error {
    if let Some(close_error) = close_error {
        warn!(error = close_error, "failed to close device after claim failure");
    }
    Error::session(
        SessionFailure::TransportBusy,
        format!("claimInterface: {claim_error}"),
    )
}
