//! Ic705Rig -- the [`Rig`] trait implementation for the IC-705 over BLE.
//!
//! This module ties the CI-V command builders ([`commands`]) to the IO task
//! ([`io`](crate::io)) and the background VFO poller. Reads go through the
//! correlated request channel; every set is fire-and-forget.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use sathunter_core::error::{Error, Result};
use sathunter_core::events::RigEvent;
use sathunter_core::rig::Rig;
use sathunter_core::transport::BleTransport;
use sathunter_core::types::*;

use crate::civ;
use crate::commands;
use crate::io::{RigIo, SharedState};
use crate::models::BleRigModel;
use crate::poll::{self, PollerHandle};

/// An IC-705 controlled over its BLE CI-V bridge.
///
/// Constructed via [`Ic705Builder`](crate::builder::Ic705Builder). All radio
/// traffic goes through the [`BleTransport`] provided at build time.
pub struct Ic705Rig {
    io: RigIo,
    model: BleRigModel,
    civ_address: u8,
    shared: Arc<SharedState>,
    event_tx: broadcast::Sender<RigEvent>,
    poll_interval: Duration,
    poller: Mutex<Option<PollerHandle>>,
}

impl Drop for Ic705Rig {
    fn drop(&mut self) {
        self.stop_poller();
        // Graceful: signal the IO loop to exit at the next select iteration.
        self.io.cancel.cancel();
        // Safety net: abort the task in case it's stuck in a transport call
        // that doesn't respect the cancellation token.
        self.io.task.abort();
    }
}

impl Ic705Rig {
    /// Create a new `Ic705Rig` from its constituent parts.
    ///
    /// This is called by [`Ic705Builder`](crate::builder::Ic705Builder);
    /// callers should use the builder API instead.
    pub(crate) fn new(
        io: RigIo,
        model: BleRigModel,
        civ_address: u8,
        shared: Arc<SharedState>,
        event_tx: broadcast::Sender<RigEvent>,
        poll_interval: Duration,
    ) -> Self {
        Ic705Rig {
            io,
            model,
            civ_address,
            shared,
            event_tx,
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    /// The model this rig was built for.
    pub fn model(&self) -> &BleRigModel {
        &self.model
    }

    /// CI-V address in use.
    pub fn civ_address(&self) -> u8 {
        self.civ_address
    }

    /// Disconnect, stop the IO task, and recover the transport.
    ///
    /// The rig is unusable afterwards.
    pub async fn shutdown(&self) -> Result<Box<dyn BleTransport>> {
        self.stop_poller();
        self.io.shutdown().await
    }

    fn poller(&self) -> MutexGuard<'_, Option<PollerHandle>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_poller(&self) {
        let handle = poll::spawn_poller(
            self.io.cmd_tx.clone(),
            self.civ_address,
            self.poll_interval,
            Arc::clone(&self.shared),
            self.io.cancel.child_token(),
        );
        if let Some(old) = self.poller().replace(handle) {
            old.stop();
        }
    }

    fn stop_poller(&self) {
        if let Some(handle) = self.poller().take() {
            handle.stop();
        }
    }

    /// Queue an uncorrelated write. Fails fast when the link is down.
    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        if self.shared.connection() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        self.io.send(bytes).await
    }
}

// ---------------------------------------------------------------------------
// Rig trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Rig for Ic705Rig {
    fn connection_state(&self) -> ConnectionState {
        self.shared.connection()
    }

    async fn connect(&self) -> Result<()> {
        self.io.connect().await?;
        self.start_poller();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_poller();
        self.io.disconnect().await
    }

    async fn get_vfo_frequency(&self, vfo: Vfo) -> Result<u64> {
        let frame = self
            .io
            .request(
                commands::cmd_read_vfo_frequency(self.civ_address, vfo),
                commands::expected_vfo_frequency(vfo),
            )
            .await?;
        let body = &frame[civ::PREAMBLE_LEN..frame.len() - 1];
        match commands::parse_vfo_frequency_response(body)? {
            Some((got, freq_hz)) if got == vfo => Ok(freq_hz),
            _ => Err(Error::MalformedResponse(format!(
                "no {vfo} frequency in response"
            ))),
        }
    }

    fn vfo_state(&self) -> VfoState {
        self.shared.vfo()
    }

    async fn set_vfo_frequency(&self, vfo: Vfo, freq_hz: u64) -> Result<()> {
        if freq_hz == 0 {
            return Ok(());
        }
        let cmd = commands::cmd_set_vfo_frequency(self.civ_address, vfo, freq_hz)?;
        debug!(vfo = %vfo, freq_hz, "setting VFO frequency");
        self.send(cmd).await
    }

    async fn set_mode(&self, vfo: Vfo, mode: Mode) -> Result<()> {
        debug!(vfo = %vfo, mode = %mode, "setting mode");
        self.send(commands::cmd_set_mode(self.civ_address, vfo, mode))
            .await
    }

    async fn enable_split(&self) -> Result<()> {
        self.send(commands::cmd_enable_split(self.civ_address)).await
    }

    async fn select_active_vfo(&self, vfo: Vfo) -> Result<()> {
        self.send(commands::cmd_select_vfo(self.civ_address, vfo))
            .await
    }

    async fn enable_repeater_tone(&self, on: bool) -> Result<()> {
        self.send(commands::cmd_repeater_tone(self.civ_address, on))
            .await
    }

    async fn set_tone_frequency(&self, tone: ToneFrequency) -> Result<()> {
        let cmd = commands::cmd_set_tone_frequency(self.civ_address, tone)?;
        debug!(tone = %tone, "setting tone frequency");
        self.send(cmd).await
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<RigEvent>> {
        Ok(self.event_tx.subscribe())
    }
}
