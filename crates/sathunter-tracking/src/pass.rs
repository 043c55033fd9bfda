//! Where the satellite is now, or when it comes back.

use std::fmt;

use chrono::{DateTime, Utc};

use sathunter_core::error::Result;
use sathunter_core::orbit::{ObserverLocation, OrbitTracker, OrbitalElements, SatellitePass};

/// Visibility of a satellite at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassStatus {
    /// Above the horizon.
    Visible {
        azimuth_deg: f64,
        elevation_deg: f64,
        los: DateTime<Utc>,
    },
    /// Below the horizon; the next pass.
    Upcoming(SatellitePass),
}

/// Current pass status of `elements` as seen from `observer` at `now`.
pub fn pass_status(
    tracker: &dyn OrbitTracker,
    elements: &OrbitalElements,
    observer: &ObserverLocation,
    now: DateTime<Utc>,
) -> Result<PassStatus> {
    let obs = tracker.propagate(elements, observer, now)?;
    if obs.is_visible() {
        let los = tracker.next_los(elements, observer, now)?;
        return Ok(PassStatus::Visible {
            azimuth_deg: obs.azimuth_deg,
            elevation_deg: obs.elevation_deg,
            los,
        });
    }
    Ok(PassStatus::Upcoming(tracker.next_pass(elements, observer, now)?))
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassStatus::Visible {
                azimuth_deg,
                elevation_deg,
                los,
            } => write!(
                f,
                "Az {azimuth_deg:.0}° El {elevation_deg:.0}°, LOS {}",
                los.format("%H:%M:%S")
            ),
            PassStatus::Upcoming(p) => write!(
                f,
                "AOS {} LOS {} max El {:.0}°",
                p.aos.format("%H:%M:%S"),
                p.los.format("%H:%M:%S"),
                p.max_elevation.elevation_deg
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sathunter_core::Error;
    use sathunter_test_harness::MockOrbitTracker;

    fn elements() -> OrbitalElements {
        OrbitalElements {
            name: "TESTSAT".into(),
            line1: String::new(),
            line2: String::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn visible_reports_position_and_los() {
        let tracker = MockOrbitTracker::new();
        tracker.set_elevation(30.0);
        tracker.set_azimuth(210.0);
        let observer = ObserverLocation::new(51.5, -0.1, 10.0);

        let status = pass_status(&tracker, &elements(), &observer, now()).unwrap();
        assert_eq!(
            status,
            PassStatus::Visible {
                azimuth_deg: 210.0,
                elevation_deg: 30.0,
                los: now() + Duration::minutes(5),
            }
        );
        assert_eq!(status.to_string(), "Az 210° El 30°, LOS 12:05:00");
    }

    #[test]
    fn below_horizon_reports_next_pass() {
        let tracker = MockOrbitTracker::new();
        tracker.set_elevation(-20.0);
        tracker.set_pass(Duration::minutes(40), Duration::minutes(12), 71.0);
        let observer = ObserverLocation::new(51.5, -0.1, 10.0);

        match pass_status(&tracker, &elements(), &observer, now()).unwrap() {
            PassStatus::Upcoming(p) => {
                assert_eq!(p.aos, now() + Duration::minutes(40));
                assert_eq!(p.los, now() + Duration::minutes(52));
                assert_eq!(p.max_elevation.elevation_deg, 71.0);
            }
            other => panic!("expected upcoming pass, got {other:?}"),
        }
    }

    #[test]
    fn propagation_error_is_returned() {
        let tracker = MockOrbitTracker::new();
        tracker.set_fail(true);
        let observer = ObserverLocation::new(0.0, 0.0, 0.0);
        let result = pass_status(&tracker, &elements(), &observer, now());
        assert!(matches!(result, Err(Error::Propagation(_))));
    }
}
