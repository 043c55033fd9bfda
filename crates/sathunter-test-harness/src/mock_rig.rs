//! A [`Rig`] that records every call.
//!
//! Used to test the tracking loop without the protocol engine. Setters
//! update the recorded VFO state the way a cooperative radio would, so a
//! subsequent cache read observes them.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use sathunter_core::error::{Error, Result};
use sathunter_core::events::RigEvent;
use sathunter_core::rig::Rig;
use sathunter_core::types::{ConnectionState, Mode, ToneFrequency, Vfo, VfoState};

/// One recorded [`Rig`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigCall {
    Connect,
    Disconnect,
    GetVfoFrequency(Vfo),
    SetVfoFrequency(Vfo, u64),
    SetMode(Vfo, Mode),
    EnableSplit,
    SelectActiveVfo(Vfo),
    EnableRepeaterTone(bool),
    SetToneFrequency(ToneFrequency),
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<RigCall>,
    vfo: VfoState,
    state: ConnectionState,
    fail_sets: bool,
}

/// Recording fake rig. Clones share state.
#[derive(Debug, Clone)]
pub struct RecordingRig {
    inner: Arc<Mutex<Recorded>>,
    event_tx: broadcast::Sender<RigEvent>,
}

impl RecordingRig {
    /// A connected rig with both VFOs at 0 Hz.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let rig = RecordingRig {
            inner: Arc::new(Mutex::new(Recorded::default())),
            event_tx,
        };
        rig.lock().state = ConnectionState::Connected;
        rig
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the cached VFO frequency without recording a call.
    pub fn set_cached(&self, vfo: Vfo, freq_hz: u64) {
        self.lock().vfo.set(vfo, freq_hz);
    }

    /// Force the reported connection state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.lock().state = state;
    }

    /// Make every setter fail with a transport error.
    pub fn set_fail_sets(&self, fail: bool) {
        self.lock().fail_sets = fail;
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<RigCall> {
        self.lock().calls.clone()
    }

    /// Only the `set_vfo_frequency` calls, in order.
    pub fn frequency_sets(&self) -> Vec<(Vfo, u64)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RigCall::SetVfoFrequency(vfo, hz) => Some((*vfo, *hz)),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record_set(&self, call: RigCall) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_sets {
            return Err(Error::Transport("recording rig set to fail".into()));
        }
        if let RigCall::SetVfoFrequency(vfo, hz) = call {
            inner.vfo.set(vfo, hz);
        }
        inner.calls.push(call);
        Ok(())
    }
}

impl Default for RecordingRig {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Rig for RecordingRig {
    fn connection_state(&self) -> ConnectionState {
        self.lock().state
    }

    async fn connect(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(RigCall::Connect);
        inner.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(RigCall::Disconnect);
        inner.state = ConnectionState::NotConnected;
        Ok(())
    }

    async fn get_vfo_frequency(&self, vfo: Vfo) -> Result<u64> {
        let mut inner = self.lock();
        inner.calls.push(RigCall::GetVfoFrequency(vfo));
        Ok(inner.vfo.get(vfo))
    }

    fn vfo_state(&self) -> VfoState {
        self.lock().vfo
    }

    async fn set_vfo_frequency(&self, vfo: Vfo, freq_hz: u64) -> Result<()> {
        if freq_hz == 0 {
            return Ok(());
        }
        self.record_set(RigCall::SetVfoFrequency(vfo, freq_hz))
    }

    async fn set_mode(&self, vfo: Vfo, mode: Mode) -> Result<()> {
        self.record_set(RigCall::SetMode(vfo, mode))
    }

    async fn enable_split(&self) -> Result<()> {
        self.record_set(RigCall::EnableSplit)
    }

    async fn select_active_vfo(&self, vfo: Vfo) -> Result<()> {
        self.record_set(RigCall::SelectActiveVfo(vfo))
    }

    async fn enable_repeater_tone(&self, on: bool) -> Result<()> {
        self.record_set(RigCall::EnableRepeaterTone(on))
    }

    async fn set_tone_frequency(&self, tone: ToneFrequency) -> Result<()> {
        self.record_set(RigCall::SetToneFrequency(tone))
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<RigEvent>> {
        Ok(self.event_tx.subscribe())
    }
}
