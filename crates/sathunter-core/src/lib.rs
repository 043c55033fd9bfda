//! sathunter-core: Core traits, types, and error definitions for SatHunter.
//!
//! This crate defines the seams between the radio protocol engine, the
//! Bluetooth transport, the orbit propagator, and the tracking control loop.
//! Each side can be swapped for a mock without touching the others.
//!
//! # Key types
//!
//! - [`Rig`] -- domain operations on a dual-VFO satellite transceiver
//! - [`BleTransport`] -- notify/write BLE link with an inbound event channel
//! - [`OrbitTracker`] -- opaque orbital propagation and Doppler capability
//! - [`RigEvent`] -- asynchronous state change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod helpers;
pub mod orbit;
pub mod rig;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use sathunter_core::*`.
pub use error::{EncodingError, Error, Result};
pub use events::RigEvent;
pub use helpers::{format_freq_mhz, format_freq_short};
pub use orbit::{Observation, ObserverLocation, OrbitTracker, OrbitalElements, SatellitePass};
pub use rig::Rig;
pub use transport::{BleTransport, GattTarget, TransportEvent};
pub use types::*;
