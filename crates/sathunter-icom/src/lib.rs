//! Icom IC-705 BLE backend for sathunter.
//!
//! This crate implements the IC-705's Bluetooth LE control link: CI-V
//! frames tunnelled through a single GATT characteristic, preceded by a
//! pairing exchange. It provides:
//!
//! - **Frame codec** ([`civ`]) -- encode CI-V frames, BCD frequency and tone
//!   conversion, response matching and frame classification.
//! - **Command builders** ([`commands`]) -- VFO frequency, mode, split, VFO
//!   selection, repeater tone, and the three pairing frames.
//! - **Model definitions** ([`models`]) -- GATT identifiers, advertised name,
//!   and pairing token of supported rigs.
//! - **Pairing** ([`pairing`]) -- the handshake state machine.
//! - **Ic705Rig** ([`rig`]) -- the [`Rig`](sathunter_core::Rig) trait
//!   implementation that ties the protocol to a
//!   [`BleTransport`](sathunter_core::BleTransport).
//! - **Ic705Builder** ([`builder`]) -- fluent builder for `Ic705Rig`.
//!
//! # Example
//!
//! ```
//! use sathunter_core::Vfo;
//! use sathunter_icom::civ::{classify, radio_preamble, Inbound};
//! use sathunter_icom::commands::cmd_set_vfo_frequency;
//!
//! // Tune VFO A to 145.900 MHz
//! let cmd = cmd_set_vfo_frequency(0xA4, Vfo::A, 145_900_000).unwrap();
//! assert_eq!(
//!     cmd,
//!     vec![0xFE, 0xFE, 0xA4, 0xE0, 0x25, 0x00, 0x00, 0x00, 0x90, 0x45, 0x01, 0xFD]
//! );
//!
//! // The radio acknowledges
//! let ack = [0xFE, 0xFE, 0xE0, 0xA4, 0xFB, 0xFD];
//! assert!(matches!(classify(&ack, &radio_preamble(0xA4)), Ok(Inbound::Ack)));
//! ```

pub mod builder;
pub mod civ;
pub mod commands;
pub(crate) mod io;
pub mod models;
pub mod pairing;
pub(crate) mod poll;
pub mod rig;

pub use builder::Ic705Builder;
pub use rig::Ic705Rig;
