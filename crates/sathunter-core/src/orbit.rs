//! Orbit propagation port.
//!
//! SatHunter does not propagate orbits itself. The [`OrbitTracker`] trait is
//! the seam to whatever SGP4 implementation the application links in; the
//! Doppler model only needs look angles, a Doppler shift for a given carrier,
//! and pass times.

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Geodetic observer position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverLocation {
    /// Latitude in degrees, north positive.
    pub lat_deg: f64,
    /// Longitude in degrees, east positive.
    pub lon_deg: f64,
    /// Altitude above the ellipsoid in metres.
    pub alt_m: f64,
}

impl ObserverLocation {
    /// Create an observer location.
    pub fn new(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Self {
        ObserverLocation {
            lat_deg,
            lon_deg,
            alt_m,
        }
    }

    /// Four-character Maidenhead locator (e.g. `"CM87"`).
    pub fn grid_square(&self) -> String {
        let lon = (self.lon_deg + 180.0).clamp(0.0, 359.999_999);
        let lat = (self.lat_deg + 90.0).clamp(0.0, 179.999_999);

        let field_lon = (lon / 20.0).floor() as u8;
        let field_lat = (lat / 10.0).floor() as u8;
        let square_lon = ((lon % 20.0) / 2.0).floor() as u8;
        let square_lat = (lat % 10.0).floor() as u8;

        let mut grid = String::with_capacity(4);
        grid.push((b'A' + field_lon) as char);
        grid.push((b'A' + field_lat) as char);
        grid.push((b'0' + square_lon) as char);
        grid.push((b'0' + square_lat) as char);
        grid
    }
}

/// Two-line element set for one satellite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrbitalElements {
    /// Satellite common name.
    pub name: String,
    /// TLE line 1.
    pub line1: String,
    /// TLE line 2.
    pub line2: String,
}

/// Look angles of a satellite at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Instant of the observation.
    pub time: DateTime<Utc>,
    /// Azimuth in degrees clockwise from true north.
    pub azimuth_deg: f64,
    /// Elevation in degrees above the horizon.
    pub elevation_deg: f64,
    /// Range rate in km/s, positive when receding.
    pub range_rate_km_s: f64,
}

impl Observation {
    /// Returns `true` if the satellite is above the horizon.
    pub fn is_visible(&self) -> bool {
        self.elevation_deg > 0.0
    }
}

/// One predicted pass over the observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatellitePass {
    /// Acquisition of signal.
    pub aos: DateTime<Utc>,
    /// Loss of signal.
    pub los: DateTime<Utc>,
    /// Observation at culmination.
    pub max_elevation: Observation,
}

/// Opaque orbital propagation capability.
pub trait OrbitTracker: Send + Sync {
    /// Look angles of the satellite from the observer at `time`.
    fn propagate(
        &self,
        elements: &OrbitalElements,
        observer: &ObserverLocation,
        time: DateTime<Utc>,
    ) -> Result<Observation>;

    /// Doppler shift in hertz seen on the ground for a carrier of
    /// `freq_hz` transmitted by the satellite at `observation`.
    fn doppler_shift(&self, observation: &Observation, freq_hz: i64) -> i64;

    /// Next pass starting at or after `from`.
    fn next_pass(
        &self,
        elements: &OrbitalElements,
        observer: &ObserverLocation,
        from: DateTime<Utc>,
    ) -> Result<SatellitePass>;

    /// Loss of signal for the pass in progress at `from`.
    fn next_los(
        &self,
        elements: &OrbitalElements,
        observer: &ObserverLocation,
        from: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_square_san_francisco() {
        let loc = ObserverLocation::new(37.7749, -122.4194, 0.0);
        assert_eq!(loc.grid_square(), "CM87");
    }

    #[test]
    fn grid_square_london() {
        let loc = ObserverLocation::new(51.5, -0.12, 0.0);
        assert_eq!(loc.grid_square(), "IO91");
    }

    #[test]
    fn grid_square_southern_hemisphere() {
        // Sydney.
        let loc = ObserverLocation::new(-33.87, 151.21, 0.0);
        assert_eq!(loc.grid_square(), "QF56");
    }

    #[test]
    fn grid_square_extremes_stay_in_range() {
        assert_eq!(ObserverLocation::new(90.0, 180.0, 0.0).grid_square(), "RR99");
        assert_eq!(ObserverLocation::new(-90.0, -180.0, 0.0).grid_square(), "AA00");
    }

    #[test]
    fn observation_visibility() {
        let obs = Observation {
            time: Utc::now(),
            azimuth_deg: 120.0,
            elevation_deg: 0.0,
            range_rate_km_s: 0.0,
        };
        assert!(!obs.is_visible());
        let obs = Observation {
            elevation_deg: 0.1,
            ..obs
        };
        assert!(obs.is_visible());
    }
}
