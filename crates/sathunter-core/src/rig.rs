//! The `Rig` trait -- domain operations on a dual-VFO satellite transceiver.
//!
//! The tracking loop and the CLI program against `dyn Rig` so that the
//! control logic can be exercised against a recording fake without a radio
//! or a BLE adapter.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::RigEvent;
use crate::types::*;

/// Asynchronous interface for controlling a satellite-capable transceiver.
///
/// Setters are fire-and-forget on the wire: `Ok(())` means the command was
/// handed to the link, not that the radio applied it. Frequency readback is
/// push-based; [`cached_vfo_frequency()`](Rig::cached_vfo_frequency) and
/// [`vfo_state()`](Rig::vfo_state) return the last report without a round
/// trip.
#[async_trait]
pub trait Rig: Send + Sync {
    /// Current lifecycle state of the link.
    fn connection_state(&self) -> ConnectionState;

    /// Connect to the radio and complete the pairing handshake.
    async fn connect(&self) -> Result<()>;

    /// Tear down the link. Idempotent from any state.
    async fn disconnect(&self) -> Result<()>;

    /// Read a VFO frequency from the radio with a correlated round trip.
    async fn get_vfo_frequency(&self, vfo: Vfo) -> Result<u64>;

    /// Last-known frequency of a VFO in hertz, or 0 if none was reported.
    fn cached_vfo_frequency(&self, vfo: Vfo) -> u64 {
        self.vfo_state().get(vfo)
    }

    /// Last-known frequencies of both VFOs.
    fn vfo_state(&self) -> VfoState;

    /// Tune a VFO. A frequency of 0 is silently ignored.
    async fn set_vfo_frequency(&self, vfo: Vfo, freq_hz: u64) -> Result<()>;

    /// Set the operating mode of a VFO.
    async fn set_mode(&self, vfo: Vfo, mode: Mode) -> Result<()>;

    /// Turn split operation on (receive on A, transmit on B).
    async fn enable_split(&self) -> Result<()>;

    /// Make a VFO the active context for subsequent tone commands.
    async fn select_active_vfo(&self, vfo: Vfo) -> Result<()>;

    /// Enable or disable the repeater (CTCSS encode) tone on the active VFO.
    async fn enable_repeater_tone(&self, on: bool) -> Result<()>;

    /// Set the repeater tone frequency on the active VFO.
    async fn set_tone_frequency(&self, tone: ToneFrequency) -> Result<()>;

    /// Subscribe to asynchronous rig events.
    fn subscribe(&self) -> Result<broadcast::Receiver<RigEvent>>;
}
