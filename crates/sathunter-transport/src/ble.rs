//! BLE transport on the host adapter via `btleplug`.
//!
//! Discovery scans until a peripheral advertises the exact local name in the
//! [`GattTarget`]; the first match wins and scanning stops. The control
//! characteristic is written with response, so a successful write doubles as
//! the peripheral's acknowledgement. Notifications and link loss are
//! forwarded by background tasks that only push into the event channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sathunter_core::error::{Error, Result};
use sathunter_core::transport::{BleTransport, GattTarget, TransportEvent};

use crate::{push_event, EVENT_CHANNEL_CAPACITY};

/// Configuration for [`BtleplugTransport`].
#[derive(Debug, Clone)]
pub struct BtleplugConfig {
    /// How long to scan for the advertised name before giving up.
    pub scan_timeout: Duration,
}

impl Default for BtleplugConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
        }
    }
}

/// A connected (or connectable) peripheral and its control characteristic.
struct Link {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

/// [`BleTransport`] backed by the first Bluetooth adapter on the host.
pub struct BtleplugTransport {
    adapter: Adapter,
    config: BtleplugConfig,
    link: Option<Link>,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    notify_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
}

fn ble_err(context: &str, e: btleplug::Error) -> Error {
    Error::Transport(format!("{context}: {e}"))
}

impl BtleplugTransport {
    /// Open the first available adapter.
    pub async fn new(config: BtleplugConfig) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| ble_err("bluetooth manager unavailable", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| ble_err("listing adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Transport("no bluetooth adapter found".into()))?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            adapter,
            config,
            link: None,
            connected: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx: Some(events_rx),
            notify_task: None,
            watch_task: None,
        })
    }

    /// Scan until a peripheral advertises `name`.
    async fn find_peripheral(&self, name: &str) -> Result<Peripheral> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| ble_err("adapter events", e))?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ble_err("start scan", e))?;
        debug!(name, "scanning for peripheral");

        let found = tokio::time::timeout(self.config.scan_timeout, async {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                    continue;
                };
                let local_name = match peripheral.properties().await {
                    Ok(Some(props)) => props.local_name,
                    _ => None,
                };
                if local_name.as_deref() == Some(name) {
                    return Some(peripheral);
                }
            }
            None
        })
        .await;

        if let Err(e) = self.adapter.stop_scan().await {
            debug!(error = %e, "stop scan failed");
        }

        match found {
            Ok(Some(peripheral)) => Ok(peripheral),
            Ok(None) => Err(Error::Transport("adapter event stream ended".into())),
            Err(_) => Err(Error::Transport(format!("no peripheral named {name:?} found"))),
        }
    }

    /// Watch the adapter for loss of this peripheral.
    async fn spawn_watcher(&mut self, peripheral: &Peripheral) -> Result<()> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| ble_err("adapter events", e))?;
        let id = peripheral.id();
        let tx = self.events_tx.clone();
        let connected = Arc::clone(&self.connected);

        self.watch_task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        connected.store(false, Ordering::SeqCst);
                        warn!("peripheral disconnected");
                        let _ = tx.send(TransportEvent::Disconnected).await;
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop_tasks(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn connect(&mut self, target: &GattTarget) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.stop_tasks();

        let peripheral = self.find_peripheral(&target.advertised_name).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| ble_err("connect", e))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| ble_err("service discovery", e))?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == target.characteristic && c.service_uuid == target.service)
            .ok_or_else(|| {
                Error::Transport(format!(
                    "characteristic {} not found on service {}",
                    target.characteristic, target.service
                ))
            })?;

        self.spawn_watcher(&peripheral).await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(name = %target.advertised_name, "peripheral connected");
        self.link = Some(Link {
            peripheral,
            characteristic,
        });
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        let peripheral = link.peripheral.clone();
        let characteristic = link.characteristic.clone();

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| ble_err("notification stream", e))?;
        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| ble_err("subscribe", e))?;

        let tx = self.events_tx.clone();
        let uuid = characteristic.uuid;
        self.notify_task = Some(tokio::spawn(async move {
            while let Some(n) = notifications.next().await {
                if n.uuid != uuid {
                    continue;
                }
                if tx.send(TransportEvent::Notification(n.value)).await.is_err() {
                    break;
                }
            }
            debug!("notification stream ended");
        }));

        push_event(&self.events_tx, TransportEvent::Subscribed);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        link.peripheral
            .write(&link.characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| ble_err("write", e))?;
        push_event(&self.events_tx, TransportEvent::WriteAck);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop_tasks();
        self.connected.store(false, Ordering::SeqCst);
        if let Some(link) = self.link.take() {
            if let Err(e) = link.peripheral.disconnect().await {
                debug!(error = %e, "peripheral disconnect failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }
}
