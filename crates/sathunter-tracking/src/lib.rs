//! Satellite Doppler correction and transponder band mapping.
//!
//! - [`transponder`] -- transponder passbands and the downlink-to-uplink
//!   mapping.
//! - [`doppler`] -- nominal/corrected frequency model, refreshed on a timer.
//! - [`tracking`] -- the control loop that drives a [`Rig`](sathunter_core::Rig)
//!   from the Doppler model.
//! - [`pass`] -- current visibility or next pass of a satellite.
//!
//! Orbital propagation itself is supplied by an
//! [`OrbitTracker`](sathunter_core::OrbitTracker) implementation.

pub mod doppler;
pub mod pass;
pub mod tracking;
pub mod transponder;

pub use doppler::{corrected_frequency, Direction, DopplerModel, DopplerState};
pub use pass::{pass_status, PassStatus};
pub use tracking::{TrackingConfig, TrackingLoop, TrackingSnapshot};
pub use transponder::{Mapping, Transponder, TransponderMode};
