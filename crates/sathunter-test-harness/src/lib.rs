//! sathunter-test-harness: Test utilities for SatHunter.
//!
//! This crate provides [`MockBleTransport`], a simulated IC-705 on the far
//! side of a BLE characteristic, [`MockOrbitTracker`] with a scriptable
//! satellite, and [`RecordingRig`] for exercising the tracking loop without
//! the protocol engine.

pub mod mock_ble;
pub mod mock_orbit;
pub mod mock_rig;

pub use mock_ble::{MockBleHandle, MockBleTransport};
pub use mock_orbit::MockOrbitTracker;
pub use mock_rig::{RecordingRig, RigCall};
