//! Transport implementations for sathunter.
//!
//! This crate provides concrete implementations of the
//! [`BleTransport`](sathunter_core::BleTransport) trait from `sathunter-core`:
//!
//! - [`BtleplugTransport`] (feature `btleplug`): the host's Bluetooth adapter
//!   via `btleplug`, with name-filtered discovery, write-with-response and
//!   notification forwarding.
//!
//! Without the feature the crate only re-exports the trait and its types, so
//! test builds and CI never need a Bluetooth stack.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "btleplug")]
//! # async fn example() -> sathunter_core::Result<()> {
//! use sathunter_core::BleTransport;
//! use sathunter_transport::{BtleplugConfig, BtleplugTransport};
//! use uuid::Uuid;
//!
//! let mut transport = BtleplugTransport::new(BtleplugConfig::default()).await?;
//! let mut events = transport.take_events().unwrap();
//! transport
//!     .connect(&sathunter_core::GattTarget {
//!         advertised_name: "ICOM BT(IC-705)".into(),
//!         service: Uuid::from_u128(0x14CF8001_1EC2_D408_1B04_2EB270F14203),
//!         characteristic: Uuid::from_u128(0x14CF8002_1EC2_D408_1B04_2EB270F14203),
//!     })
//!     .await?;
//! transport.subscribe().await?;
//! let first = events.recv().await;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "btleplug")]
pub mod ble;

#[cfg(feature = "btleplug")]
pub use ble::{BtleplugConfig, BtleplugTransport};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

pub use sathunter_core::transport::{BleTransport, GattTarget, TransportEvent};

/// Capacity of the inbound event channel every transport hands to its owner.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Queue an event the transport generates itself, such as `WriteAck`.
///
/// Never blocks: the caller is usually the IO task that drains the channel.
/// When the channel is full the event is handed to a background task that
/// waits for room, so it arrives late but is never lost.
pub fn push_event(tx: &mpsc::Sender<TransportEvent>, event: TransportEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            debug!("event channel full, delivering in the background");
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
        Err(TrySendError::Closed(_)) => debug!("event receiver dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channel_still_delivers_write_ack() {
        let (tx, mut rx) = mpsc::channel(1);
        push_event(&tx, TransportEvent::Notification(vec![0xFE]));
        push_event(&tx, TransportEvent::WriteAck);

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Notification(vec![0xFE]))
        );
        assert_eq!(rx.recv().await, Some(TransportEvent::WriteAck));
    }

    #[tokio::test]
    async fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        push_event(&tx, TransportEvent::Subscribed);
    }
}
