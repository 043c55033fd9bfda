//! Formatting helpers for frequency display.

/// Format a frequency in hertz as MHz with six decimal places.
///
/// # Example
///
/// ```
/// use sathunter_core::format_freq_mhz;
///
/// assert_eq!(format_freq_mhz(145_900_500), "145.900500");
/// assert_eq!(format_freq_mhz(435_900_000), "435.900000");
/// ```
pub fn format_freq_mhz(freq_hz: u64) -> String {
    format!("{}.{:06}", freq_hz / 1_000_000, freq_hz % 1_000_000)
}

/// Format a frequency in hertz as MHz truncated to kilohertz.
///
/// # Example
///
/// ```
/// use sathunter_core::format_freq_short;
///
/// assert_eq!(format_freq_short(145_900_500), "145.900");
/// ```
pub fn format_freq_short(freq_hz: u64) -> String {
    format!("{}.{:03}", freq_hz / 1_000_000, (freq_hz % 1_000_000) / 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_freq_mhz_vhf_uhf() {
        assert_eq!(format_freq_mhz(145_900_500), "145.900500");
        assert_eq!(format_freq_mhz(436_795_000), "436.795000");
    }

    #[test]
    fn format_freq_mhz_zero() {
        assert_eq!(format_freq_mhz(0), "0.000000");
    }

    #[test]
    fn format_freq_short_truncates() {
        assert_eq!(format_freq_short(145_900_999), "145.900");
        assert_eq!(format_freq_short(29_400_000), "29.400");
    }
}
