//! Ic705Builder -- fluent builder for constructing [`Ic705Rig`] instances.
//!
//! Separates configuration from construction so that callers can set up the
//! pairing identity, CI-V address override, timeouts, and poll rate before
//! the IO task is spawned.
//!
//! # Example
//!
//! ```no_run
//! use sathunter_icom::builder::Ic705Builder;
//! use sathunter_icom::models::ic_705;
//! use std::time::Duration;
//!
//! # async fn example() -> sathunter_core::Result<()> {
//! let rig = Ic705Builder::new(ic_705())
//!     .device_name("Shack Laptop")
//!     .command_timeout(Duration::from_millis(500))
//!     .build_with_transport(todo!())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use sathunter_core::error::Result;
use sathunter_core::transport::BleTransport;

use crate::io::{self, IoConfig, SharedState};
use crate::models::BleRigModel;
use crate::pairing::PairingStateMachine;
use crate::rig::Ic705Rig;

/// Device id presented during pairing unless overridden.
pub const DEFAULT_DEVICE_ID: Uuid = Uuid::from_u128(0xD91B0B94_C3C4_4540_8234_5BA06D25AA4F);

/// Device name presented during pairing unless overridden.
pub const DEFAULT_DEVICE_NAME: &str = "SatHunter";

/// Fluent builder for [`Ic705Rig`].
///
/// All configuration has sensible defaults derived from the [`BleRigModel`],
/// so the simplest usage is:
///
/// ```ignore
/// let rig = Ic705Builder::new(ic_705()).build().await?;
/// ```
pub struct Ic705Builder {
    model: BleRigModel,
    civ_address: Option<u8>,
    device_id: Uuid,
    device_name: String,
    pairing_token: Option<[u8; 4]>,
    command_timeout: Duration,
    handshake_timeout: Duration,
    poll_interval: Duration,
    event_capacity: usize,
    #[cfg(feature = "btleplug")]
    scan_timeout: Duration,
}

impl Ic705Builder {
    /// Create a new builder for the given model.
    pub fn new(model: BleRigModel) -> Self {
        Ic705Builder {
            model,
            civ_address: None,
            device_id: DEFAULT_DEVICE_ID,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            pairing_token: None,
            command_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            event_capacity: 256,
            #[cfg(feature = "btleplug")]
            scan_timeout: Duration::from_secs(10),
        }
    }

    /// Override the default CI-V address for this model.
    pub fn civ_address(mut self, addr: u8) -> Self {
        self.civ_address = Some(addr);
        self
    }

    /// Set the 16-byte id sent in the pairing identify frame.
    ///
    /// The radio remembers paired controllers by this id, so keep it stable
    /// across runs.
    pub fn device_id(mut self, id: Uuid) -> Self {
        self.device_id = id;
        self
    }

    /// Set the controller name shown on the radio (ASCII, up to 16 chars).
    pub fn device_name(mut self, name: &str) -> Self {
        self.device_name = name.to_string();
        self
    }

    /// Override the model's pairing token.
    pub fn pairing_token(mut self, token: [u8; 4]) -> Self {
        self.pairing_token = Some(token);
        self
    }

    /// Deadline for a single request/response exchange (default: 1s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Deadline for the whole pairing handshake (default: 10s).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How often the VFOs are polled while connected (default: 250ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Capacity of the [`RigEvent`](sathunter_core::RigEvent) broadcast
    /// channel (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// How long to scan for the radio before giving up (default: 10s).
    #[cfg(feature = "btleplug")]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Build an [`Ic705Rig`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockBleTransport` from `sathunter-test-harness`). The rig starts
    /// disconnected; call [`connect`](sathunter_core::Rig::connect).
    pub async fn build_with_transport(self, transport: Box<dyn BleTransport>) -> Result<Ic705Rig> {
        let civ_address = self.civ_address.unwrap_or(self.model.default_civ_address);
        let token = self.pairing_token.unwrap_or(self.model.pairing_token);
        let pairing = PairingStateMachine::new(self.device_id, &self.device_name, token)?;

        let config = IoConfig {
            civ_address,
            target: self.model.gatt_target(),
            command_timeout: self.command_timeout,
            handshake_timeout: self.handshake_timeout,
        };
        let shared = Arc::new(SharedState::default());
        let (event_tx, _) = broadcast::channel(self.event_capacity);
        let rig_io = io::spawn_io_task(
            transport,
            pairing,
            config,
            Arc::clone(&shared),
            event_tx.clone(),
        );

        Ok(Ic705Rig::new(
            rig_io,
            self.model,
            civ_address,
            shared,
            event_tx,
            self.poll_interval,
        ))
    }

    /// Build an [`Ic705Rig`] on the host's Bluetooth adapter.
    #[cfg(feature = "btleplug")]
    pub async fn build(self) -> Result<Ic705Rig> {
        let transport =
            sathunter_transport::BtleplugTransport::new(sathunter_transport::BtleplugConfig {
                scan_timeout: self.scan_timeout,
            })
            .await?;
        self.build_with_transport(Box::new(transport)).await
    }
}
