//! Doppler correction model.
//!
//! Holds the satellite-frame ("nominal") downlink and uplink frequencies and
//! recomputes their ground-frame equivalents from the current observation.
//! The satellite moving toward the observer raises the received downlink, so
//! the downlink correction adds the shift; the uplink is pre-compensated the
//! other way so it arrives at the satellite on frequency.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sathunter_core::orbit::{Observation, ObserverLocation, OrbitTracker, OrbitalElements};

use crate::transponder::Transponder;

/// Link direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Satellite to ground.
    Downlink,
    /// Ground to satellite.
    Uplink,
}

/// Snapshot of the model's frequencies, in Hz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DopplerState {
    pub nominal_downlink_hz: i64,
    pub nominal_uplink_hz: i64,
    /// Ground frequency to receive on; `None` below the horizon.
    pub corrected_downlink_hz: Option<i64>,
    /// Ground frequency to transmit on; `None` below the horizon.
    pub corrected_uplink_hz: Option<i64>,
    /// Shift of the selected transponder's downlink passband.
    pub transponder_downlink_shift: Option<i64>,
    /// Shift of the selected transponder's uplink passband.
    pub transponder_uplink_shift: Option<i64>,
}

/// Ground-frame frequency for `nominal_hz`, or `None` when the satellite is
/// not above the horizon.
pub fn corrected_frequency(
    nominal_hz: i64,
    direction: Direction,
    observation: &Observation,
    tracker: &dyn OrbitTracker,
) -> Option<i64> {
    if !observation.is_visible() {
        return None;
    }
    let shift = tracker.doppler_shift(observation, nominal_hz);
    Some(match direction {
        Direction::Downlink => nominal_hz + shift,
        Direction::Uplink => nominal_hz - shift,
    })
}

struct Inner {
    elements: Option<OrbitalElements>,
    observer: ObserverLocation,
    transponder: Option<Transponder>,
    observation: Option<Observation>,
    state: DopplerState,
}

/// Shared Doppler state, refreshed on a timer and read by the tracking loop.
pub struct DopplerModel {
    tracker: Arc<dyn OrbitTracker>,
    inner: Mutex<Inner>,
}

impl DopplerModel {
    pub fn new(tracker: Arc<dyn OrbitTracker>, observer: ObserverLocation) -> Self {
        DopplerModel {
            tracker,
            inner: Mutex::new(Inner {
                elements: None,
                observer,
                transponder: None,
                observation: None,
                state: DopplerState::default(),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new satellite, or none. Clears any current correction.
    pub fn set_satellite(&self, elements: Option<OrbitalElements>) {
        let mut inner = self.inner();
        inner.elements = elements;
        inner.observation = None;
        clear_corrections(&mut inner.state);
    }

    pub fn set_observer(&self, observer: ObserverLocation) {
        self.inner().observer = observer;
    }

    pub fn observer(&self) -> ObserverLocation {
        self.inner().observer
    }

    pub fn set_transponder(&self, transponder: Option<Transponder>) {
        self.inner().transponder = transponder;
    }

    /// Set the satellite-frame frequency for one direction.
    pub fn set_nominal(&self, direction: Direction, hz: i64) {
        let mut inner = self.inner();
        match direction {
            Direction::Downlink => inner.state.nominal_downlink_hz = hz,
            Direction::Uplink => inner.state.nominal_uplink_hz = hz,
        }
    }

    /// Adopt a ground frequency (e.g. a VFO reading) as the new nominal,
    /// removing the Doppler correction that applies at `now`.
    ///
    /// When the satellite is not visible, or no satellite is set, the ground
    /// frequency is taken as-is.
    pub fn observe_ground_frequency(&self, direction: Direction, ground_hz: i64, now: DateTime<Utc>) {
        let nominal = match self.observe(now) {
            Some(obs) if obs.is_visible() => {
                let shift = self.tracker.doppler_shift(&obs, ground_hz);
                match direction {
                    Direction::Downlink => ground_hz - shift,
                    Direction::Uplink => ground_hz + shift,
                }
            }
            _ => ground_hz,
        };
        self.set_nominal(direction, nominal);
    }

    /// Propagate to `now` and recompute every corrected frequency.
    pub fn refresh(&self, now: DateTime<Utc>) {
        let observation = self.observe(now);
        let mut inner = self.inner();
        inner.observation = observation;

        let Some(obs) = observation.filter(Observation::is_visible) else {
            clear_corrections(&mut inner.state);
            return;
        };

        let tracker = self.tracker.as_ref();
        let correct = |nominal: i64, direction| {
            if nominal > 0 {
                corrected_frequency(nominal, direction, &obs, tracker)
            } else {
                None
            }
        };
        let corrected_down = correct(inner.state.nominal_downlink_hz, Direction::Downlink);
        let corrected_up = correct(inner.state.nominal_uplink_hz, Direction::Uplink);

        let (down_shift, up_shift) = match &inner.transponder {
            Some(t) => (
                Some(tracker.doppler_shift(&obs, t.downlink_center())),
                t.uplink_center().map(|c| -tracker.doppler_shift(&obs, c)),
            ),
            None => (None, None),
        };

        let state = &mut inner.state;
        state.corrected_downlink_hz = corrected_down;
        state.corrected_uplink_hz = corrected_up;
        state.transponder_downlink_shift = down_shift;
        state.transponder_uplink_shift = up_shift;
    }

    /// Latest snapshot.
    pub fn state(&self) -> DopplerState {
        self.inner().state
    }

    /// Observation from the last refresh.
    pub fn observation(&self) -> Option<Observation> {
        self.inner().observation
    }

    /// Drop nominal and corrected frequencies.
    pub fn clear(&self) {
        let mut inner = self.inner();
        inner.state = DopplerState::default();
        inner.observation = None;
    }

    /// Refresh every `period` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.refresh(Utc::now()),
                }
            }
            debug!("doppler refresh stopped");
        })
    }

    fn observe(&self, now: DateTime<Utc>) -> Option<Observation> {
        let (elements, observer) = {
            let inner = self.inner();
            (inner.elements.clone()?, inner.observer)
        };
        match self.tracker.propagate(&elements, &observer, now) {
            Ok(obs) => Some(obs),
            Err(e) => {
                warn!(satellite = %elements.name, error = %e, "propagation failed");
                None
            }
        }
    }
}

fn clear_corrections(state: &mut DopplerState) {
    state.corrected_downlink_hz = None;
    state.corrected_uplink_hz = None;
    state.transponder_downlink_shift = None;
    state.transponder_uplink_shift = None;
}
