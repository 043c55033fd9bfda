//! Asynchronous rig event types.
//!
//! Events are emitted by the rig driver through a [`tokio::sync::broadcast`]
//! channel when the radio's state changes. The tracking loop and the CLI
//! monitor subscribe to these instead of polling the cache.

use crate::types::{ConnectionState, Vfo};

/// An event emitted by a rig driver when radio state changes.
///
/// Subscribe via [`crate::rig::Rig::subscribe()`]. Delivery is best-effort
/// through a bounded broadcast channel; slow consumers may miss events while
/// the operator spins the dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigEvent {
    /// A frequency report for one VFO arrived from the radio.
    FrequencyChanged {
        /// Which VFO reported.
        vfo: Vfo,
        /// New frequency in hertz.
        freq_hz: u64,
    },

    /// The link moved to a new lifecycle state.
    ConnectionStateChanged {
        /// The state just entered.
        state: ConnectionState,
    },

    /// The pairing handshake completed.
    Connected,

    /// The BLE link dropped without a local disconnect request.
    Disconnected,
}
