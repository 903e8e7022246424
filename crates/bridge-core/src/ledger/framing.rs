//! Ledger HID framing.
//!
//! APDUs travel over the device's USB interface in fixed-size packets:
//!
//! ```text
//! first packet:  | channel (2) | tag 0x05 | seq = 0 (2) | total len (2) | data ... |
//! later packets: | channel (2) | tag 0x05 | seq = n (2) | data ...                 |
//! ```
//!
//! All integers are big-endian and packets are zero-padded to the packet size.
//! Responses use the same framing.

use crate::error::{Error, Result};

/// Size of one USB packet.
pub const PACKET_SIZE: usize = 64;

/// Channel id used by the Ledger host libraries.
pub const CHANNEL: u16 = 0x0101;

/// Packet tag for APDU payloads.
const TAG_APDU: u8 = 0x05;

/// Channel, tag and sequence index.
const HEADER_LEN: usize = 5;

/// Splits an encoded APDU into HID packets.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] if the APDU is longer than a `u16`
/// length prefix allows.
pub fn wrap_command(apdu: &[u8], packet_size: usize) -> Result<Vec<Vec<u8>>> {
    let total = u16::try_from(apdu.len())
        .map_err(|_| Error::MalformedResponse(format!("APDU of {} bytes", apdu.len())))?;

    let mut payload = Vec::with_capacity(apdu.len() + 2);
    payload.extend_from_slice(&total.to_be_bytes());
    payload.extend_from_slice(apdu);

    let chunk_len = packet_size - HEADER_LEN;
    let mut packets = Vec::with_capacity(payload.len().div_ceil(chunk_len));
    for (sequence, chunk) in payload.chunks(chunk_len).enumerate() {
        let sequence = u16::try_from(sequence)
            .map_err(|_| Error::MalformedResponse("too many packets".to_string()))?;
        let mut packet = Vec::with_capacity(packet_size);
        packet.extend_from_slice(&CHANNEL.to_be_bytes());
        packet.push(TAG_APDU);
        packet.extend_from_slice(&sequence.to_be_bytes());
        packet.extend_from_slice(chunk);
        packet.resize(packet_size, 0);
        packets.push(packet);
    }
    Ok(packets)
}

/// Reassembles a response from HID packets as they arrive.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    expected: Option<usize>,
    sequence: u16,
    data: Vec<u8>,
}

impl ResponseAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet; returns the full response once it is complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] on a wrong channel, tag or
    /// sequence index, or a truncated packet.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>> {
        if packet.len() < HEADER_LEN {
            return Err(Error::MalformedResponse(format!(
                "HID packet of {} bytes",
                packet.len()
            )));
        }

        let channel = u16::from_be_bytes([packet[0], packet[1]]);
        if channel != CHANNEL {
            return Err(Error::MalformedResponse(format!(
                "unexpected channel {channel:#06x}"
            )));
        }
        if packet[2] != TAG_APDU {
            return Err(Error::MalformedResponse(format!(
                "unexpected tag {:#04x}",
                packet[2]
            )));
        }
        let sequence = u16::from_be_bytes([packet[3], packet[4]]);
        if sequence != self.sequence {
            return Err(Error::MalformedResponse(format!(
                "expected packet {}, got {sequence}",
                self.sequence
            )));
        }

        let mut body = &packet[HEADER_LEN..];
        let expected = match self.expected {
            Some(expected) => expected,
            None => {
                if body.len() < 2 {
                    return Err(Error::MalformedResponse(
                        "first packet has no length".to_string(),
                    ));
                }
                let expected = usize::from(u16::from_be_bytes([body[0], body[1]]));
                body = &body[2..];
                self.expected = Some(expected);
                expected
            }
        };

        let take = body.len().min(expected - self.data.len());
        self.data.extend_from_slice(&body[..take]);
        self.sequence = self.sequence.wrapping_add(1);

        if self.data.len() == expected {
            Ok(Some(std::mem::take(&mut self.data)))
        } else {
            Ok(None)
        }
    }
}
