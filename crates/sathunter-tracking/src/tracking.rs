//! The band-mapping control loop.
//!
//! Every tick, while the rig is connected, the loop reads the cached VFO
//! pair and either:
//!
//! - **tracking**: pushes the Doppler-corrected downlink to VFO A and the
//!   corrected uplink to VFO B, or
//! - **following**: treats VFO A as the operator's ground downlink, feeds it
//!   back into the [`DopplerModel`], and derives VFO B from it through the
//!   selected transponder's mapping.
//!
//! Rig and propagation failures are logged and never stop the loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sathunter_core::error::Result;
use sathunter_core::rig::Rig;
use sathunter_core::types::{ConnectionState, Mode, ToneFrequency, Vfo, VfoState};

use crate::doppler::{Direction, DopplerModel, DopplerState};
use crate::transponder::{Mapping, Transponder};

/// Tick periods for the control loop and the Doppler refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Control loop period.
    pub tick_period: Duration,
    /// Doppler recompute period.
    pub doppler_period: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            tick_period: Duration::from_millis(500),
            doppler_period: Duration::from_millis(500),
        }
    }
}

/// Point-in-time view of the session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    pub transponder: Option<Transponder>,
    pub tracking: bool,
    pub vfo: VfoState,
    pub out_of_range: bool,
    pub vfo_a_mode: Mode,
    pub vfo_b_mode: Mode,
    pub tone: ToneFrequency,
    pub doppler: DopplerState,
}

#[derive(Debug)]
struct Session {
    transponder: Option<Transponder>,
    tracking: bool,
    vfo: VfoState,
    out_of_range: bool,
    vfo_a_mode: Mode,
    vfo_b_mode: Mode,
    tone: ToneFrequency,
    connected: bool,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            transponder: None,
            tracking: false,
            vfo: VfoState::default(),
            out_of_range: false,
            vfo_a_mode: Mode::LSB,
            vfo_b_mode: Mode::LSB,
            tone: ToneFrequency::NOT_SET,
            connected: false,
        }
    }
}

/// Drives the rig from the Doppler model and the selected transponder.
pub struct TrackingLoop {
    rig: Arc<dyn Rig>,
    doppler: Arc<DopplerModel>,
    config: TrackingConfig,
    session: Mutex<Session>,
}

impl TrackingLoop {
    pub fn new(rig: Arc<dyn Rig>, doppler: Arc<DopplerModel>, config: TrackingConfig) -> Self {
        TrackingLoop {
            rig,
            doppler,
            config,
            session: Mutex::new(Session::default()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn doppler(&self) -> &Arc<DopplerModel> {
        &self.doppler
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        let doppler = self.doppler.state();
        let s = self.session();
        TrackingSnapshot {
            transponder: s.transponder.clone(),
            tracking: s.tracking,
            vfo: s.vfo,
            out_of_range: s.out_of_range,
            vfo_a_mode: s.vfo_a_mode,
            vfo_b_mode: s.vfo_b_mode,
            tone: s.tone,
            doppler,
        }
    }

    /// Lock both VFOs to the Doppler model (`true`) or let VFO B follow
    /// VFO A (`false`).
    pub fn set_tracking(&self, on: bool) {
        let mut s = self.session();
        if s.tracking != on {
            info!(tracking = on, "tracking mode changed");
        }
        s.tracking = on;
    }

    /// Select a transponder (or none) and retune to it.
    ///
    /// With a transponder: the nominal frequencies move to its passband
    /// centres, the VFO modes follow its modes, the rig is reconfigured and
    /// tracking is enabled. Without one: the uplink nominal is dropped and
    /// the downlink nominal follows VFO A.
    pub async fn select_transponder(&self, transponder: Option<Transponder>, now: DateTime<Utc>) {
        self.doppler.set_transponder(transponder.clone());
        match &transponder {
            Some(t) => {
                info!(transponder = %t, "transponder selected");
                let down = t.downlink_center();
                self.doppler.set_nominal(Direction::Downlink, down);
                self.doppler
                    .set_nominal(Direction::Uplink, t.uplink_center().unwrap_or(down));
                {
                    let mut s = self.session();
                    s.vfo_a_mode = t.downlink_mode.rig_mode();
                    s.vfo_b_mode = t.uplink_mode.rig_mode();
                    s.transponder = Some(t.clone());
                    s.out_of_range = false;
                    s.tracking = true;
                }
                if let Err(e) = self.configure_rig().await {
                    warn!(error = %e, "failed to configure rig for transponder");
                }
            }
            None => {
                info!("transponder cleared");
                self.doppler.set_nominal(Direction::Uplink, 0);
                let vfo_a = {
                    let mut s = self.session();
                    s.transponder = None;
                    s.out_of_range = false;
                    s.vfo.vfo_a_hz
                };
                if vfo_a > 0 {
                    self.doppler
                        .observe_ground_frequency(Direction::Downlink, vfo_a as i64, now);
                }
            }
        }
        self.doppler.refresh(now);
        let vfo = self.rig.vfo_state();
        self.push_corrected(&self.doppler.state(), vfo).await;
    }

    /// Change the operator's VFO modes and apply them.
    pub async fn set_modes(&self, vfo_a: Mode, vfo_b: Mode) -> Result<()> {
        {
            let mut s = self.session();
            s.vfo_a_mode = vfo_a;
            s.vfo_b_mode = vfo_b;
        }
        self.configure_rig().await
    }

    /// Split on, then the VFO modes. Skipped while disconnected.
    pub async fn configure_rig(&self) -> Result<()> {
        if self.rig.connection_state() != ConnectionState::Connected {
            return Ok(());
        }
        let (a, b) = {
            let s = self.session();
            (s.vfo_a_mode, s.vfo_b_mode)
        };
        debug!(vfo_a = %a, vfo_b = %b, "configuring split operation");
        self.rig.enable_split().await?;
        self.rig.set_mode(Vfo::A, a).await?;
        self.rig.set_mode(Vfo::B, b).await
    }

    /// Change the uplink CTCSS tone and apply it.
    pub async fn set_tone(&self, tone: ToneFrequency) -> Result<()> {
        self.session().tone = tone;
        self.configure_tone().await
    }

    /// Program the tone on VFO B, leaving VFO A selected. Skipped while
    /// disconnected.
    pub async fn configure_tone(&self) -> Result<()> {
        if self.rig.connection_state() != ConnectionState::Connected {
            return Ok(());
        }
        let tone = self.session().tone;
        debug!(tone = %tone, "configuring uplink tone");
        self.rig.select_active_vfo(Vfo::B).await?;
        if tone.is_set() {
            self.rig.enable_repeater_tone(true).await?;
            self.rig.set_tone_frequency(tone).await?;
        } else {
            self.rig.enable_repeater_tone(false).await?;
        }
        self.rig.select_active_vfo(Vfo::A).await
    }

    /// One control loop iteration.
    pub async fn tick(&self, now: DateTime<Utc>) {
        if self.rig.connection_state() != ConnectionState::Connected {
            let mut s = self.session();
            if s.connected {
                debug!("rig disconnected, clearing session readings");
                s.connected = false;
                s.vfo = VfoState::default();
                s.out_of_range = false;
            }
            return;
        }

        let just_connected = !std::mem::replace(&mut self.session().connected, true);
        if just_connected {
            if let Err(e) = self.configure_rig().await {
                warn!(error = %e, "failed to configure rig");
            }
            if let Err(e) = self.configure_tone().await {
                warn!(error = %e, "failed to configure tone");
            }
        }

        let vfo = self.rig.vfo_state();
        let (tracking, transponder) = {
            let mut s = self.session();
            s.vfo = vfo;
            (s.tracking, s.transponder.clone())
        };

        if tracking {
            self.push_corrected(&self.doppler.state(), vfo).await;
            return;
        }

        if transponder.is_none() {
            self.set_out_of_range(false);
        }
        if vfo.vfo_a_hz == 0 {
            return;
        }
        let vfo_a = vfo.vfo_a_hz as i64;
        self.doppler
            .observe_ground_frequency(Direction::Downlink, vfo_a, now);

        let Some(t) = transponder else {
            return;
        };
        let state = self.doppler.state();
        let mapping = t.map_uplink(
            vfo_a,
            state.transponder_downlink_shift.unwrap_or(0),
            state.transponder_uplink_shift.unwrap_or(0),
        );
        match mapping {
            Mapping::Uplink(hz) => {
                self.set_out_of_range(false);
                if hz > 0 {
                    self.push(Vfo::B, hz, vfo.vfo_b_hz).await;
                    self.doppler
                        .observe_ground_frequency(Direction::Uplink, hz, now);
                }
            }
            Mapping::OutOfRange => self.set_out_of_range(true),
            Mapping::NoUplink => self.set_out_of_range(false),
        }
    }

    /// Run the control loop and the Doppler refresh until `cancel` fires.
    ///
    /// Session readings are cleared on exit.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let refresh = Arc::clone(&self.doppler).spawn(self.config.doppler_period, cancel.child_token());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.tick(Utc::now()).await,
                }
            }
            let _ = refresh.await;
            {
                let mut s = self.session();
                s.vfo = VfoState::default();
                s.out_of_range = false;
                s.connected = false;
            }
            debug!("tracking loop stopped");
        })
    }

    fn set_out_of_range(&self, out: bool) {
        let mut s = self.session();
        if s.out_of_range != out {
            if out {
                info!(vfo_a_hz = s.vfo.vfo_a_hz, "VFO A outside transponder passband");
            } else {
                info!("VFO A back inside transponder passband");
            }
            s.out_of_range = out;
        }
    }

    async fn push_corrected(&self, state: &DopplerState, vfo: VfoState) {
        if let Some(hz) = state.corrected_downlink_hz {
            self.push(Vfo::A, hz, vfo.vfo_a_hz).await;
        }
        if let Some(hz) = state.corrected_uplink_hz {
            self.push(Vfo::B, hz, vfo.vfo_b_hz).await;
        }
    }

    /// Tune `vfo` to `target_hz` unless it is already there.
    async fn push(&self, vfo: Vfo, target_hz: i64, current_hz: u64) {
        let Ok(hz) = u64::try_from(target_hz) else {
            return;
        };
        if hz == 0 || hz == current_hz {
            return;
        }
        if let Err(e) = self.rig.set_vfo_frequency(vfo, hz).await {
            warn!(vfo = %vfo, freq_hz = hz, error = %e, "failed to set VFO frequency");
        }
    }
}
