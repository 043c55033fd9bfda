//! CI-V frame codec for the IC-705 BLE link.
//!
//! Over Bluetooth each GATT write or notification carries exactly one
//! frame, so there is no stream reassembly: a frame is either well formed
//! or it is not. This module holds the pure byte-level pieces: frame
//! assembly, packed-decimal (BCD) conversion, tone packing, and response
//! matching.
//!
//! # Frame format
//!
//! ```text
//! <preamble: 4 bytes> <opcode> [<sub-opcode>] [<payload>...] 0xFD
//! ```
//!
//! - Host to radio: `0xFE 0xFE <radio> 0xE0`
//! - Radio to host: `0xFE 0xFE 0xE0 <radio>`
//! - Pairing frames use `0xFE 0xF1 0x00` and a one-byte opcode instead.

use bytes::{BufMut, BytesMut};
use sathunter_core::EncodingError;

/// CI-V preamble byte, repeated twice at the start of every CI-V frame.
pub const PREAMBLE: u8 = 0xFE;

/// Frame terminator byte.
pub const TERMINATOR: u8 = 0xFD;

/// Standard PC controller CI-V address.
pub const CONTROLLER_ADDR: u8 = 0xE0;

/// ACK opcode: positive acknowledgement from the rig.
pub const ACK: u8 = 0xFB;

/// NAK opcode: negative acknowledgement from the rig.
pub const NAK: u8 = 0xFA;

/// Preamble of the Bluetooth pairing frames.
pub const PAIRING_PREAMBLE: [u8; 3] = [0xFE, 0xF1, 0x00];

/// Length of a CI-V preamble in bytes.
pub const PREAMBLE_LEN: usize = 4;

/// Largest value that fits in five BCD bytes.
pub const BCD_MAX: u64 = 999_999_999;

/// Host-to-radio preamble for a radio at `radio_addr`.
pub fn host_preamble(radio_addr: u8) -> [u8; 4] {
    [PREAMBLE, PREAMBLE, radio_addr, CONTROLLER_ADDR]
}

/// Radio-to-host preamble for a radio at `radio_addr`.
///
/// Differs from [`host_preamble`] only in the order of the two address bytes.
pub fn radio_preamble(radio_addr: u8) -> [u8; 4] {
    [PREAMBLE, PREAMBLE, CONTROLLER_ADDR, radio_addr]
}

/// Assemble a frame: `preamble ++ opcode ++ payload ++ 0xFD`.
///
/// # Example
///
/// ```
/// use sathunter_icom::civ::{encode_command, host_preamble};
///
/// // Read VFO A on an IC-705 (addr 0xA4).
/// let bytes = encode_command(&host_preamble(0xA4), &[0x25, 0x00], &[]);
/// assert_eq!(bytes, vec![0xFE, 0xFE, 0xA4, 0xE0, 0x25, 0x00, 0xFD]);
/// ```
pub fn encode_command(preamble: &[u8], opcode: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(preamble.len() + opcode.len() + payload.len() + 1);
    buf.put_slice(preamble);
    buf.put_slice(opcode);
    buf.put_slice(payload);
    buf.put_u8(TERMINATOR);
    buf.to_vec()
}

/// Convert a frequency in hertz to 5-byte BCD (least-significant pair first).
///
/// Fails with [`EncodingError::Overflow`] for values of one billion or more,
/// which would need a tenth digit.
///
/// # Example
///
/// ```
/// use sathunter_icom::civ::encode_bcd;
///
/// assert_eq!(encode_bcd(145_900_500).unwrap(), [0x00, 0x05, 0x90, 0x45, 0x01]);
/// assert!(encode_bcd(1_000_000_000).is_err());
/// ```
pub fn encode_bcd(freq_hz: u64) -> Result<[u8; 5], EncodingError> {
    if freq_hz > BCD_MAX {
        return Err(EncodingError::Overflow(freq_hz));
    }

    let mut result = [0u8; 5];
    let mut freq = freq_hz;

    for byte in &mut result {
        let lo = (freq % 10) as u8;
        freq /= 10;
        let hi = (freq % 10) as u8;
        freq /= 10;
        *byte = (hi << 4) | lo;
    }

    Ok(result)
}

/// Convert 5-byte BCD (least-significant pair first) back to hertz.
///
/// Fails with [`EncodingError::InvalidDigit`] if any nibble is 10 or more.
pub fn decode_bcd(bcd: &[u8; 5]) -> Result<u64, EncodingError> {
    let mut freq: u64 = 0;
    let mut multiplier: u64 = 1;

    for (index, &byte) in bcd.iter().enumerate() {
        let lo = u64::from(byte & 0x0F);
        let hi = u64::from(byte >> 4);
        if lo > 9 || hi > 9 {
            return Err(EncodingError::InvalidDigit { index, byte });
        }
        freq += lo * multiplier;
        multiplier *= 10;
        freq += hi * multiplier;
        multiplier *= 10;
    }

    Ok(freq)
}

/// Pack a CTCSS tone (tenths of a hertz) into two bytes of decimal digits.
///
/// The thousands digit goes in the high nibble of byte 0 and the ones digit
/// in the low nibble of byte 1, so 88.5 Hz (`885`) packs as `08 85`.
pub fn encode_tone(tenths_hz: u16) -> Result<[u8; 2], EncodingError> {
    if tenths_hz > 9999 {
        return Err(EncodingError::Overflow(u64::from(tenths_hz)));
    }
    let digit = |div: u16| (tenths_hz / div % 10) as u8;
    Ok([
        (digit(1000) << 4) | digit(100),
        (digit(10) << 4) | digit(1),
    ])
}

/// Shape of the response a correlated request waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedResponse {
    /// Opcode and sub-opcode bytes that follow the preamble.
    pub prefix: Vec<u8>,
    /// Number of payload bytes between the prefix and the terminator.
    pub payload_len: usize,
}

impl ExpectedResponse {
    /// Describe a response with the given prefix and payload length.
    pub fn new(prefix: &[u8], payload_len: usize) -> Self {
        ExpectedResponse {
            prefix: prefix.to_vec(),
            payload_len,
        }
    }

    /// A bare `FB` acknowledgement.
    pub fn ack() -> Self {
        Self::new(&[ACK], 0)
    }

    /// Total frame length of a matching response.
    pub fn frame_len(&self) -> usize {
        PREAMBLE_LEN + self.prefix.len() + self.payload_len + 1
    }

    /// Extract the payload from a frame already accepted by [`match_response`].
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let start = PREAMBLE_LEN + self.prefix.len();
        &frame[start..start + self.payload_len]
    }
}

/// Returns `true` iff `frame` is exactly the response described by `expected`.
///
/// The frame must have the expected total length, start with the
/// radio-to-host preamble, end with the terminator, and carry the expected
/// prefix immediately after the preamble.
pub fn match_response(frame: &[u8], radio_preamble: &[u8; 4], expected: &ExpectedResponse) -> bool {
    let prefix_end = PREAMBLE_LEN + expected.prefix.len();
    frame.len() == expected.frame_len()
        && frame[..PREAMBLE_LEN] == radio_preamble[..]
        && frame.last() == Some(&TERMINATOR)
        && frame[PREAMBLE_LEN..prefix_end] == expected.prefix[..]
}

/// A structurally valid radio-to-host frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// `FB`: the radio accepted a command.
    Ack,
    /// `FA`: the radio rejected a command.
    Nak,
    /// Any other reply; the slice is everything between preamble and terminator.
    Data(&'a [u8]),
}

/// Classify a notification as a well-formed inbound frame.
///
/// Returns a description of the structural fault for frames that are too
/// short, carry the wrong preamble, or lack the terminator.
pub fn classify<'a>(frame: &'a [u8], radio_preamble: &[u8; 4]) -> Result<Inbound<'a>, String> {
    if frame.len() < PREAMBLE_LEN + 2 {
        return Err(format!("frame too short ({} bytes)", frame.len()));
    }
    if frame[..PREAMBLE_LEN] != radio_preamble[..] {
        return Err(format!("unexpected preamble {:02X?}", &frame[..PREAMBLE_LEN]));
    }
    if frame.last() != Some(&TERMINATOR) {
        return Err(format!(
            "missing terminator, last byte 0x{:02X}",
            frame[frame.len() - 1]
        ));
    }

    let body = &frame[PREAMBLE_LEN..frame.len() - 1];
    Ok(match body {
        [ACK] => Inbound::Ack,
        [NAK] => Inbound::Nak,
        _ => Inbound::Data(body),
    })
}
