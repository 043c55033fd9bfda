//! CI-V command builders and response parsers for the IC-705.
//!
//! All functions are pure: they produce or consume byte vectors without
//! performing any I/O. The IO task writes the bytes to the BLE
//! characteristic and feeds notifications back into the parsers.
//!
//! Only the commands the satellite workflow needs are implemented: per-VFO
//! frequency and mode (the `0x25`/`0x26` family, which address a VFO
//! directly without switching to it), split, VFO select, and the repeater
//! tone, plus the three Bluetooth pairing frames.

use uuid::Uuid;

use sathunter_core::{Error, Mode, Result, ToneFrequency, Vfo};

use crate::civ::{
    ExpectedResponse, PAIRING_PREAMBLE, decode_bcd, encode_bcd, encode_command, encode_tone,
    host_preamble,
};

// ---------------------------------------------------------------
// CI-V opcode constants
// ---------------------------------------------------------------

/// Read/set the frequency of a specific VFO (cmd 0x25). Sub: 0x00 A, 0x01 B.
pub const CMD_VFO_FREQ: u8 = 0x25;

/// Set the mode of a specific VFO (cmd 0x26). Data: mode byte + data-mode byte.
const CMD_VFO_MODE: u8 = 0x26;

/// VFO select (cmd 0x07).
const CMD_VFO_SELECT: u8 = 0x07;

/// Split operation (cmd 0x0F).
const CMD_SPLIT: u8 = 0x0F;

/// Function on/off (cmd 0x16).
const CMD_FUNC: u8 = 0x16;

/// Repeater tone settings (cmd 0x1B).
const CMD_TONE: u8 = 0x1B;

// Sub-command constants
const SUB_SPLIT_ON: u8 = 0x01;
const SUB_REPEATER_TONE: u8 = 0x42;
const SUB_REPEATER_TONE_FREQ: u8 = 0x00;

/// Data-mode byte for `0x26`: data mode off.
const DATA_MODE_OFF: u8 = 0x00;

// ---------------------------------------------------------------
// Pairing opcodes
// ---------------------------------------------------------------

const PAIR_IDENTIFY: u8 = 0x61;
const PAIR_NAME: u8 = 0x62;
const PAIR_TOKEN: u8 = 0x63;

/// Width of the name field in the pairing name frame.
pub const DEVICE_NAME_LEN: usize = 16;

// ---------------------------------------------------------------
// CI-V mode byte mapping
// ---------------------------------------------------------------

/// CI-V mode byte for LSB.
const CIV_MODE_LSB: u8 = 0x00;
/// CI-V mode byte for USB.
const CIV_MODE_USB: u8 = 0x01;
/// CI-V mode byte for CW.
const CIV_MODE_CW: u8 = 0x03;
/// CI-V mode byte for FM.
const CIV_MODE_FM: u8 = 0x05;

/// Map a [`Mode`] to its CI-V mode byte.
pub fn mode_to_civ(mode: Mode) -> u8 {
    match mode {
        Mode::LSB => CIV_MODE_LSB,
        Mode::USB => CIV_MODE_USB,
        Mode::CW => CIV_MODE_CW,
        Mode::FM => CIV_MODE_FM,
    }
}

// ---------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------

/// Build a "read VFO frequency" command (`0x25 <vfo>`).
pub fn cmd_read_vfo_frequency(addr: u8, vfo: Vfo) -> Vec<u8> {
    encode_command(&host_preamble(addr), &[CMD_VFO_FREQ, vfo.selector()], &[])
}

/// The response to [`cmd_read_vfo_frequency`]: `0x25 <vfo>` + 5 BCD bytes.
pub fn expected_vfo_frequency(vfo: Vfo) -> ExpectedResponse {
    ExpectedResponse::new(&[CMD_VFO_FREQ, vfo.selector()], 5)
}

/// Build a "set VFO frequency" command (`0x25 <vfo> <5 BCD>`).
///
/// Fails with [`Error::Encoding`] if `freq_hz` does not fit in 5 BCD bytes.
pub fn cmd_set_vfo_frequency(addr: u8, vfo: Vfo, freq_hz: u64) -> Result<Vec<u8>> {
    let bcd = encode_bcd(freq_hz)?;
    Ok(encode_command(
        &host_preamble(addr),
        &[CMD_VFO_FREQ, vfo.selector()],
        &bcd,
    ))
}

/// Build a "set VFO mode" command (`0x26 <vfo> <mode> 0x00`).
pub fn cmd_set_mode(addr: u8, vfo: Vfo, mode: Mode) -> Vec<u8> {
    encode_command(
        &host_preamble(addr),
        &[CMD_VFO_MODE, vfo.selector()],
        &[mode_to_civ(mode), DATA_MODE_OFF],
    )
}

/// Build a "split on" command (`0x0F 0x01`).
pub fn cmd_enable_split(addr: u8) -> Vec<u8> {
    encode_command(&host_preamble(addr), &[CMD_SPLIT, SUB_SPLIT_ON], &[])
}

/// Build a "select VFO" command (`0x07 <vfo>`).
pub fn cmd_select_vfo(addr: u8, vfo: Vfo) -> Vec<u8> {
    encode_command(&host_preamble(addr), &[CMD_VFO_SELECT, vfo.selector()], &[])
}

/// Build a "repeater tone on/off" command (`0x16 0x42 <00|01>`).
pub fn cmd_repeater_tone(addr: u8, on: bool) -> Vec<u8> {
    encode_command(
        &host_preamble(addr),
        &[CMD_FUNC, SUB_REPEATER_TONE],
        &[u8::from(on)],
    )
}

/// Build a "repeater tone frequency" command (`0x1B 0x00 <b1> <b2>`).
pub fn cmd_set_tone_frequency(addr: u8, tone: ToneFrequency) -> Result<Vec<u8>> {
    let packed = encode_tone(tone.tenths())?;
    Ok(encode_command(
        &host_preamble(addr),
        &[CMD_TONE, SUB_REPEATER_TONE_FREQ],
        &packed,
    ))
}

/// Build the pairing "identify" frame: `FE F1 00 61` + 16-byte device id.
pub fn cmd_identify(device_id: &Uuid) -> Vec<u8> {
    encode_command(&PAIRING_PREAMBLE, &[PAIR_IDENTIFY], device_id.as_bytes())
}

/// Build the pairing "name" frame: `FE F1 00 62` + 16-byte space-padded name.
///
/// The name must be ASCII and at most [`DEVICE_NAME_LEN`] characters.
pub fn cmd_device_name(name: &str) -> Result<Vec<u8>> {
    let field = pad_device_name(name)?;
    Ok(encode_command(&PAIRING_PREAMBLE, &[PAIR_NAME], &field))
}

/// Build the pairing "token" frame: `FE F1 00 63` + 4-byte token.
pub fn cmd_token(token: [u8; 4]) -> Vec<u8> {
    encode_command(&PAIRING_PREAMBLE, &[PAIR_TOKEN], &token)
}

/// Validate a device name and pad it with spaces to the field width.
pub fn pad_device_name(name: &str) -> Result<[u8; DEVICE_NAME_LEN]> {
    if !name.is_ascii() {
        return Err(Error::InvalidParameter(format!(
            "device name must be ASCII: {name:?}"
        )));
    }
    if name.len() > DEVICE_NAME_LEN {
        return Err(Error::InvalidParameter(format!(
            "device name longer than {DEVICE_NAME_LEN} characters: {name:?}"
        )));
    }
    let mut field = [b' '; DEVICE_NAME_LEN];
    field[..name.len()].copy_from_slice(name.as_bytes());
    Ok(field)
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Parse a VFO frequency report.
///
/// `body` is the frame contents between preamble and terminator:
/// `0x25 <vfo> <5 BCD>`. Returns `Ok(None)` for frames of another command so
/// the caller can treat them as unrelated traffic.
pub fn parse_vfo_frequency_response(body: &[u8]) -> Result<Option<(Vfo, u64)>> {
    let [CMD_VFO_FREQ, sel, rest @ ..] = body else {
        return Ok(None);
    };
    let vfo = Vfo::from_selector(*sel).ok_or_else(|| {
        Error::MalformedResponse(format!("unknown VFO selector 0x{sel:02X}"))
    })?;
    let bcd: &[u8; 5] = rest.try_into().map_err(|_| {
        Error::MalformedResponse(format!(
            "VFO frequency payload is {} bytes, expected 5",
            rest.len()
        ))
    })?;
    let freq_hz = decode_bcd(bcd)?;
    Ok(Some((vfo, freq_hz)))
}
