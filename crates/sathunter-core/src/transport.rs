//! Transport trait for the BLE link to the radio.
//!
//! The [`BleTransport`] trait abstracts over a notify/write GATT
//! characteristic. Unlike a byte stream, the link is event driven: write
//! acknowledgements and notifications arrive asynchronously on a channel the
//! transport pushes into, and the protocol engine consumes them from its IO
//! task. The backend's own callback path never blocks on protocol logic.
//!
//! A btleplug implementation lives in `sathunter-transport`; a simulated
//! radio for tests lives in `sathunter-test-harness`.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Identifies the peripheral and characteristic to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattTarget {
    /// Exact advertised local name to match during scanning.
    pub advertised_name: String,
    /// Primary service UUID.
    pub service: Uuid,
    /// Control characteristic UUID (write-with-response + notify).
    pub characteristic: Uuid,
}

/// Asynchronous event delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Notifications are enabled on the control characteristic.
    Subscribed,
    /// The peripheral acknowledged the last write-with-response.
    WriteAck,
    /// A write-with-response failed.
    WriteFailed(String),
    /// A notification arrived on the control characteristic.
    Notification(Vec<u8>),
    /// The notification stream reported an error.
    NotifyFailed(String),
    /// The peripheral went away.
    Disconnected,
}

/// Asynchronous notify/write link to the radio.
///
/// `connect()` covers scan-by-name, connection, and service/characteristic
/// discovery. `subscribe()` enables notifications and results in a
/// [`TransportEvent::Subscribed`] event. Each successful `write()` results in
/// a [`TransportEvent::WriteAck`] event.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan for, connect to, and discover the target peripheral.
    async fn connect(&mut self, target: &GattTarget) -> Result<()>;

    /// Enable notifications on the control characteristic.
    async fn subscribe(&mut self) -> Result<()>;

    /// Write bytes to the control characteristic with response.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Tear down the link. Calling this while disconnected is not an error.
    async fn disconnect(&mut self) -> Result<()>;

    /// Check whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Take the inbound event receiver.
    ///
    /// Returns `None` once taken; the IO task owns the receiver for the
    /// lifetime of the transport.
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;
}
