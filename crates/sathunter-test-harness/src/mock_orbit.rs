//! Scriptable [`OrbitTracker`] for Doppler and tracking tests.
//!
//! The mock reports a fixed elevation and azimuth and a Doppler shift
//! proportional to the carrier (`freq_hz * ratio`, rounded). Tests change
//! the script through a cloned handle while the model under test holds
//! another clone.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

use sathunter_core::error::{Error, Result};
use sathunter_core::orbit::{
    Observation, ObserverLocation, OrbitTracker, OrbitalElements, SatellitePass,
};

#[derive(Debug)]
struct Script {
    elevation_deg: f64,
    azimuth_deg: f64,
    shift_ratio: f64,
    fail: bool,
    pass_offset: Duration,
    pass_length: Duration,
    max_elevation_deg: f64,
    propagate_calls: usize,
}

/// A scriptable orbit tracker.
#[derive(Debug, Clone)]
pub struct MockOrbitTracker {
    script: Arc<Mutex<Script>>,
}

impl MockOrbitTracker {
    /// Satellite overhead-ish (45 degrees) with no Doppler shift.
    pub fn new() -> Self {
        MockOrbitTracker {
            script: Arc::new(Mutex::new(Script {
                elevation_deg: 45.0,
                azimuth_deg: 180.0,
                shift_ratio: 0.0,
                fail: false,
                pass_offset: Duration::minutes(30),
                pass_length: Duration::minutes(10),
                max_elevation_deg: 62.0,
                propagate_calls: 0,
            })),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the reported elevation in degrees.
    pub fn set_elevation(&self, elevation_deg: f64) {
        self.script().elevation_deg = elevation_deg;
    }

    /// Set the reported azimuth in degrees.
    pub fn set_azimuth(&self, azimuth_deg: f64) {
        self.script().azimuth_deg = azimuth_deg;
    }

    /// Set the shift as a fraction of the carrier (e.g. `1e-5` is 10 ppm).
    pub fn set_shift_ratio(&self, ratio: f64) {
        self.script().shift_ratio = ratio;
    }

    /// Make propagation fail.
    pub fn set_fail(&self, fail: bool) {
        self.script().fail = fail;
    }

    /// Shape the pass returned by `next_pass`: starts `offset` after the
    /// query time and lasts `length`.
    pub fn set_pass(&self, offset: Duration, length: Duration, max_elevation_deg: f64) {
        let mut s = self.script();
        s.pass_offset = offset;
        s.pass_length = length;
        s.max_elevation_deg = max_elevation_deg;
    }

    /// Number of `propagate` calls so far.
    pub fn propagate_calls(&self) -> usize {
        self.script().propagate_calls
    }
}

impl Default for MockOrbitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OrbitTracker for MockOrbitTracker {
    fn propagate(
        &self,
        elements: &OrbitalElements,
        _observer: &ObserverLocation,
        time: DateTime<Utc>,
    ) -> Result<Observation> {
        let mut s = self.script();
        s.propagate_calls += 1;
        if s.fail {
            return Err(Error::Propagation(format!("{}: decayed", elements.name)));
        }
        Ok(Observation {
            time,
            azimuth_deg: s.azimuth_deg,
            elevation_deg: s.elevation_deg,
            range_rate_km_s: 0.0,
        })
    }

    fn doppler_shift(&self, _observation: &Observation, freq_hz: i64) -> i64 {
        (freq_hz as f64 * self.script().shift_ratio).round() as i64
    }

    fn next_pass(
        &self,
        elements: &OrbitalElements,
        _observer: &ObserverLocation,
        from: DateTime<Utc>,
    ) -> Result<SatellitePass> {
        let s = self.script();
        if s.fail {
            return Err(Error::Propagation(format!("{}: no pass found", elements.name)));
        }
        let aos = from + s.pass_offset;
        let los = aos + s.pass_length;
        Ok(SatellitePass {
            aos,
            los,
            max_elevation: Observation {
                time: aos + s.pass_length / 2,
                azimuth_deg: s.azimuth_deg,
                elevation_deg: s.max_elevation_deg,
                range_rate_km_s: 0.0,
            },
        })
    }

    fn next_los(
        &self,
        elements: &OrbitalElements,
        _observer: &ObserverLocation,
        from: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let s = self.script();
        if s.fail {
            return Err(Error::Propagation(format!("{}: no LOS found", elements.name)));
        }
        Ok(from + s.pass_length / 2)
    }
}
