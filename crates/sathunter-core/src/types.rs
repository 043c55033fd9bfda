//! Core types used throughout SatHunter.
//!
//! These are the radio-facing value types: which VFO, which mode, which
//! CTCSS tone, and where the link is in its lifecycle.

use std::fmt;
use std::str::FromStr;

/// One of the two independently tunable VFOs on the radio.
///
/// In satellite work VFO A carries the downlink (receive) and VFO B the
/// uplink (transmit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vfo {
    /// Downlink / receive VFO.
    A,
    /// Uplink / transmit VFO.
    B,
}

impl Vfo {
    /// The sub-selector byte used on the wire (`0x00` for A, `0x01` for B).
    pub fn selector(self) -> u8 {
        match self {
            Vfo::A => 0x00,
            Vfo::B => 0x01,
        }
    }

    /// Parse a wire sub-selector byte.
    pub fn from_selector(byte: u8) -> Option<Vfo> {
        match byte {
            0x00 => Some(Vfo::A),
            0x01 => Some(Vfo::B),
            _ => None,
        }
    }
}

impl fmt::Display for Vfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vfo::A => write!(f, "VFO-A"),
            Vfo::B => write!(f, "VFO-B"),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`Vfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVfoError(String);

impl fmt::Display for ParseVfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown VFO: {}", self.0)
    }
}

impl std::error::Error for ParseVfoError {}

impl FromStr for Vfo {
    type Err = ParseVfoError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" | "VFO-A" | "VFOA" => Ok(Vfo::A),
            "B" | "VFO-B" | "VFOB" => Ok(Vfo::B),
            _ => Err(ParseVfoError(s.to_string())),
        }
    }
}

/// Operating mode supported by the satellite workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Lower sideband.
    LSB,
    /// Upper sideband.
    USB,
    /// Frequency modulation.
    FM,
    /// CW (morse).
    CW,
}

impl Mode {
    /// The sideband-inverted counterpart of this mode.
    ///
    /// Inverting transponders flip the sideband between uplink and
    /// downlink, so the uplink VFO runs USB when the downlink runs LSB and
    /// vice versa. FM and CW are unaffected.
    pub fn inverted(self) -> Mode {
        match self {
            Mode::USB => Mode::LSB,
            Mode::LSB => Mode::USB,
            other => other,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::LSB => "LSB",
            Mode::USB => "USB",
            Mode::FM => "FM",
            Mode::CW => "CW",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode: {}", self.0)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LSB" => Ok(Mode::LSB),
            "USB" => Ok(Mode::USB),
            "FM" => Ok(Mode::FM),
            "CW" => Ok(Mode::CW),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// A CTCSS tone in tenths of a hertz (`885` is 88.5 Hz).
///
/// Zero means no tone is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ToneFrequency(u16);

impl ToneFrequency {
    /// No tone.
    pub const NOT_SET: ToneFrequency = ToneFrequency(0);
    /// 67.0 Hz, used by many FM birds.
    pub const F67_0: ToneFrequency = ToneFrequency(670);
    /// 88.5 Hz.
    pub const F88_5: ToneFrequency = ToneFrequency(885);
    /// 141.3 Hz.
    pub const F141_3: ToneFrequency = ToneFrequency(1413);

    /// The presets offered to the operator, in display order.
    pub const PRESETS: [ToneFrequency; 4] = [
        ToneFrequency::NOT_SET,
        ToneFrequency::F67_0,
        ToneFrequency::F88_5,
        ToneFrequency::F141_3,
    ];

    /// Create a tone from a value in tenths of a hertz.
    pub const fn from_tenths(tenths_hz: u16) -> Self {
        ToneFrequency(tenths_hz)
    }

    /// The tone in tenths of a hertz.
    pub fn tenths(&self) -> u16 {
        self.0
    }

    /// Returns `true` if a tone is configured.
    pub fn is_set(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ToneFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}.{} Hz", self.0 / 10, self.0 % 10)
        } else {
            write!(f, "Not set")
        }
    }
}

/// Error returned when a string cannot be parsed into a [`ToneFrequency`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseToneError(String);

impl fmt::Display for ParseToneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tone: {}", self.0)
    }
}

impl std::error::Error for ParseToneError {}

impl FromStr for ToneFrequency {
    type Err = ParseToneError;

    /// Parses `"88.5"`, `"88.5 Hz"`, `"67"`, or `"none"`/`"off"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_lowercase();
        if matches!(lower.as_str(), "none" | "off" | "0" | "not set") {
            return Ok(ToneFrequency::NOT_SET);
        }
        let number = lower.trim_end_matches("hz").trim();
        let hz: f64 = number
            .parse()
            .map_err(|_| ParseToneError(s.to_string()))?;
        let tenths = (hz * 10.0).round();
        if !(0.0..=9999.0).contains(&tenths) {
            return Err(ParseToneError(s.to_string()));
        }
        Ok(ToneFrequency(tenths as u16))
    }
}

/// Lifecycle state of the link to the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No BLE session.
    #[default]
    NotConnected,
    /// Transport connected, pairing handshake in progress.
    Connecting,
    /// Handshake complete; commands are accepted.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::NotConnected => "not connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        write!(f, "{s}")
    }
}

/// Last-known VFO frequencies, in hertz. Zero means not yet observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VfoState {
    /// VFO A (downlink).
    pub vfo_a_hz: u64,
    /// VFO B (uplink).
    pub vfo_b_hz: u64,
}

impl VfoState {
    /// The cached frequency of one VFO.
    pub fn get(&self, vfo: Vfo) -> u64 {
        match vfo {
            Vfo::A => self.vfo_a_hz,
            Vfo::B => self.vfo_b_hz,
        }
    }

    /// Update the cached frequency of one VFO.
    pub fn set(&mut self, vfo: Vfo, freq_hz: u64) {
        match vfo {
            Vfo::A => self.vfo_a_hz = freq_hz,
            Vfo::B => self.vfo_b_hz = freq_hz,
        }
    }
}
