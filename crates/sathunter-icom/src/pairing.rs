//! Bluetooth pairing handshake.
//!
//! Before the IC-705 accepts CI-V traffic over BLE, the controller must
//! identify itself with three frames, each sent only after the previous
//! write was acknowledged:
//!
//! ```text
//! Init --subscribed--> [identify] IdSent --ack--> [name] NameSent
//!      --ack--> [token] TokenSent --ack--> Started
//! ```
//!
//! [`PairingStateMachine`] is pure: it consumes transport events and tells
//! the IO task what to write next. It never performs I/O itself.

use tracing::{debug, warn};
use uuid::Uuid;

use sathunter_core::Result;

use crate::commands;

/// Handshake progress. Only ever moves forward until [`reset`](PairingStateMachine::reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Waiting for notifications to be enabled.
    Init,
    /// Identify frame written, awaiting its acknowledgement.
    IdSent,
    /// Name frame written, awaiting its acknowledgement.
    NameSent,
    /// Token frame written, awaiting its acknowledgement.
    TokenSent,
    /// Handshake complete.
    Started,
}

/// What the IO task should do after feeding an event to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingAction {
    /// Write this frame to the characteristic.
    Write(Vec<u8>),
    /// The handshake just completed.
    Started,
    /// Nothing to do.
    None,
}

/// Handshake state machine for one BLE session.
#[derive(Debug, Clone)]
pub struct PairingStateMachine {
    state: HandshakeState,
    identify: Vec<u8>,
    name: Vec<u8>,
    token: Vec<u8>,
}

impl PairingStateMachine {
    /// Prepare the three handshake frames.
    ///
    /// Fails if `device_name` is not ASCII or is longer than 16 characters.
    pub fn new(device_id: Uuid, device_name: &str, token: [u8; 4]) -> Result<Self> {
        Ok(PairingStateMachine {
            state: HandshakeState::Init,
            identify: commands::cmd_identify(&device_id),
            name: commands::cmd_device_name(device_name)?,
            token: commands::cmd_token(token),
        })
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Returns `true` once the handshake has completed.
    pub fn is_started(&self) -> bool {
        self.state == HandshakeState::Started
    }

    /// Notifications are enabled; start the handshake.
    pub fn on_subscribed(&mut self) -> PairingAction {
        if self.state != HandshakeState::Init {
            warn!(state = ?self.state, "subscription confirmed mid-handshake, ignoring");
            return PairingAction::None;
        }
        self.state = HandshakeState::IdSent;
        debug!("pairing: sending identify");
        PairingAction::Write(self.identify.clone())
    }

    /// The last write was acknowledged; advance one step.
    pub fn on_write_ack(&mut self) -> PairingAction {
        match self.state {
            HandshakeState::Init => {
                warn!("write ack before handshake started, ignoring");
                PairingAction::None
            }
            HandshakeState::IdSent => {
                self.state = HandshakeState::NameSent;
                debug!("pairing: sending name");
                PairingAction::Write(self.name.clone())
            }
            HandshakeState::NameSent => {
                self.state = HandshakeState::TokenSent;
                debug!("pairing: sending token");
                PairingAction::Write(self.token.clone())
            }
            HandshakeState::TokenSent => {
                self.state = HandshakeState::Started;
                debug!("pairing: handshake complete");
                PairingAction::Started
            }
            HandshakeState::Started => PairingAction::None,
        }
    }

    /// Return to [`HandshakeState::Init`] for a fresh session.
    pub fn reset(&mut self) {
        self.state = HandshakeState::Init;
    }
}
