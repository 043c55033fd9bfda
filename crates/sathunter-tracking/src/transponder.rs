//! Satellite transponder definitions and the downlink-to-uplink band mapping.
//!
//! A linear transponder relays a slice of its uplink band onto its downlink
//! band, optionally flipped end for end. Given where the operator has tuned
//! VFO A on the downlink, [`Transponder::map_uplink`] finds the uplink
//! frequency that lands on the same spot.

use std::fmt;

use sathunter_core::types::Mode;

/// Modulation listed for one direction of a transponder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransponderMode {
    Lsb,
    Usb,
    Cw,
    Fm,
    Unknown,
}

impl TransponderMode {
    /// Parse a transponder-database mode string. Anything unrecognised is
    /// [`TransponderMode::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "lsb" => TransponderMode::Lsb,
            "usb" => TransponderMode::Usb,
            "cw" => TransponderMode::Cw,
            "fm" => TransponderMode::Fm,
            _ => TransponderMode::Unknown,
        }
    }

    /// Rig mode to use for this direction. Unknown defaults to LSB.
    pub fn rig_mode(self) -> Mode {
        match self {
            TransponderMode::Lsb | TransponderMode::Unknown => Mode::LSB,
            TransponderMode::Usb => Mode::USB,
            TransponderMode::Cw => Mode::CW,
            TransponderMode::Fm => Mode::FM,
        }
    }
}

impl From<&str> for TransponderMode {
    fn from(s: &str) -> Self {
        TransponderMode::parse(s)
    }
}

impl fmt::Display for TransponderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransponderMode::Lsb => "LSB",
            TransponderMode::Usb => "USB",
            TransponderMode::Cw => "CW",
            TransponderMode::Fm => "FM",
            TransponderMode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One transponder of a satellite. Frequencies are in Hz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transponder {
    pub description: String,
    pub downlink_lower: i64,
    /// Zero for a single-frequency downlink.
    pub downlink_upper: i64,
    /// Zero when the transponder has no uplink.
    pub uplink_lower: i64,
    pub uplink_upper: i64,
    pub downlink_mode: TransponderMode,
    pub uplink_mode: TransponderMode,
    pub inverted: bool,
    pub active: bool,
}

/// Result of mapping a downlink frequency onto the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// Tune the uplink here.
    Uplink(i64),
    /// The downlink frequency is outside the passband.
    OutOfRange,
    /// Receive-only transponder.
    NoUplink,
}

impl Transponder {
    /// A single-frequency downlink (e.g. an FM repeater or beacon).
    pub fn is_fixed_downlink(&self) -> bool {
        self.downlink_upper == 0
    }

    pub fn has_uplink(&self) -> bool {
        self.uplink_lower > 0
    }

    /// Middle of the downlink passband, or the downlink itself when fixed.
    pub fn downlink_center(&self) -> i64 {
        if self.downlink_upper > self.downlink_lower {
            (self.downlink_lower + self.downlink_upper) / 2
        } else {
            self.downlink_lower
        }
    }

    /// Middle of the uplink passband; `None` without an uplink.
    pub fn uplink_center(&self) -> Option<i64> {
        if !self.has_uplink() {
            return None;
        }
        Some(if self.uplink_upper > self.uplink_lower {
            (self.uplink_lower + self.uplink_upper) / 2
        } else {
            self.uplink_lower
        })
    }

    /// Map a ground downlink frequency to the matching ground uplink.
    ///
    /// `downlink_shift` and `uplink_shift` are the current Doppler offsets of
    /// the two passbands; pass zero when no correction applies.
    pub fn map_uplink(&self, downlink_hz: i64, downlink_shift: i64, uplink_shift: i64) -> Mapping {
        if !self.has_uplink() {
            return Mapping::NoUplink;
        }

        let down_lower = self.downlink_lower + downlink_shift;
        let up_lower = self.uplink_lower + uplink_shift;

        if self.is_fixed_downlink() {
            let delta = downlink_hz - down_lower;
            let up = if self.inverted {
                up_lower - delta
            } else {
                up_lower + delta
            };
            return Mapping::Uplink(up);
        }

        let down_upper = self.downlink_upper + downlink_shift;
        if !(down_lower..=down_upper).contains(&downlink_hz) {
            return Mapping::OutOfRange;
        }
        let delta = downlink_hz - down_lower;
        if self.inverted {
            Mapping::Uplink(self.uplink_upper + uplink_shift - delta)
        } else {
            Mapping::Uplink(up_lower + delta)
        }
    }
}

impl fmt::Display for Transponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)?;
        if !self.active {
            f.write_str(" (inactive)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_fm() -> Transponder {
        Transponder {
            description: "FM voice".into(),
            downlink_lower: 145_900_000,
            downlink_upper: 0,
            uplink_lower: 435_900_000,
            uplink_upper: 0,
            downlink_mode: TransponderMode::Fm,
            uplink_mode: TransponderMode::Fm,
            inverted: false,
            active: true,
        }
    }

    fn inverting_linear() -> Transponder {
        Transponder {
            description: "Mode U/V linear".into(),
            downlink_lower: 145_800_000,
            downlink_upper: 145_900_000,
            uplink_lower: 435_900_000,
            uplink_upper: 436_000_000,
            downlink_mode: TransponderMode::Usb,
            uplink_mode: TransponderMode::Lsb,
            inverted: true,
            active: true,
        }
    }

    #[test]
    fn fixed_non_inverted_follows_offset() {
        assert_eq!(
            fixed_fm().map_uplink(145_900_500, 0, 0),
            Mapping::Uplink(435_900_500)
        );
    }

    #[test]
    fn fixed_inverted_subtracts_offset() {
        let t = Transponder {
            inverted: true,
            ..fixed_fm()
        };
        assert_eq!(t.map_uplink(145_900_500, 0, 0), Mapping::Uplink(435_899_500));
    }

    #[test]
    fn inverted_ranged_maps_from_top_of_uplink() {
        assert_eq!(
            inverting_linear().map_uplink(145_850_000, 0, 0),
            Mapping::Uplink(435_950_000)
        );
    }

    #[test]
    fn ranged_edges_are_inclusive() {
        let t = inverting_linear();
        assert_eq!(t.map_uplink(145_800_000, 0, 0), Mapping::Uplink(436_000_000));
        assert_eq!(t.map_uplink(145_900_000, 0, 0), Mapping::Uplink(435_900_000));
    }

    #[test]
    fn ranged_non_inverted_maps_from_bottom() {
        let t = Transponder {
            inverted: false,
            ..inverting_linear()
        };
        assert_eq!(t.map_uplink(145_810_000, 0, 0), Mapping::Uplink(435_910_000));
    }

    #[test]
    fn outside_window_is_out_of_range() {
        let t = inverting_linear();
        assert_eq!(t.map_uplink(145_799_999, 0, 0), Mapping::OutOfRange);
        assert_eq!(t.map_uplink(145_950_000, 0, 0), Mapping::OutOfRange);
    }

    #[test]
    fn shifts_move_both_windows() {
        let t = inverting_linear();
        // Downlink window shifted up 3 kHz: 145.803..145.903 MHz.
        assert_eq!(t.map_uplink(145_801_000, 3_000, 0), Mapping::OutOfRange);
        // delta = 145_853_000 - 145_803_000 = 50 kHz; top of uplink shifted down 9 kHz.
        assert_eq!(
            t.map_uplink(145_853_000, 3_000, -9_000),
            Mapping::Uplink(435_941_000)
        );
    }

    #[test]
    fn receive_only_has_no_uplink() {
        let t = Transponder {
            uplink_lower: 0,
            uplink_upper: 0,
            ..inverting_linear()
        };
        assert_eq!(t.map_uplink(145_850_000, 0, 0), Mapping::NoUplink);
        assert_eq!(t.uplink_center(), None);
    }

    #[test]
    fn centers() {
        assert_eq!(inverting_linear().downlink_center(), 145_850_000);
        assert_eq!(inverting_linear().uplink_center(), Some(435_950_000));
        assert_eq!(fixed_fm().downlink_center(), 145_900_000);
        assert_eq!(fixed_fm().uplink_center(), Some(435_900_000));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(TransponderMode::parse("USB"), TransponderMode::Usb);
        assert_eq!(TransponderMode::parse(" lsb "), TransponderMode::Lsb);
        assert_eq!(TransponderMode::from("fm"), TransponderMode::Fm);
        assert_eq!(TransponderMode::parse("BPSK"), TransponderMode::Unknown);
    }

    #[test]
    fn mode_to_rig() {
        assert_eq!(TransponderMode::Usb.rig_mode(), Mode::USB);
        assert_eq!(TransponderMode::Cw.rig_mode(), Mode::CW);
        assert_eq!(TransponderMode::Unknown.rig_mode(), Mode::LSB);
    }
}
