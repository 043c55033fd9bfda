//! Simulated IC-705 behind a mock BLE link.
//!
//! [`MockBleTransport`] implements [`BleTransport`] and behaves like the
//! radio end of the GATT characteristic: it acknowledges every write, answers
//! VFO frequency reads from its own simulated dial, and acknowledges set
//! commands with `FB`. Every write is recorded. A cloneable [`MockBleHandle`]
//! lets a test inspect traffic, turn the dial, inject raw events, and switch
//! failure modes while the IO task owns the transport.
//!
//! # Example
//!
//! ```
//! use sathunter_test_harness::MockBleTransport;
//!
//! let mock = MockBleTransport::new();
//! let handle = mock.handle();
//! handle.set_dial(sathunter_core::Vfo::A, 145_900_000);
//! assert_eq!(handle.dial(sathunter_core::Vfo::A), 145_900_000);
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use sathunter_core::error::{Error, Result};
use sathunter_core::transport::{BleTransport, GattTarget, TransportEvent};
use sathunter_core::types::{Vfo, VfoState};

/// CI-V address of the simulated radio.
pub const RADIO_ADDR: u8 = 0xA4;

/// Controller address the radio answers to.
pub const HOST_ADDR: u8 = 0xE0;

const EVENT_CAPACITY: usize = 256;

/// Shared state between the transport and its handles.
#[derive(Debug)]
struct SimState {
    connected: bool,
    target: Option<GattTarget>,
    dial: VfoState,
    sent_log: Vec<Vec<u8>>,
    auto_ack: bool,
    answer_reads: bool,
    ack_sets: bool,
    fail_connect: bool,
    connect_delay: Duration,
    fail_writes: bool,
    connect_count: usize,
    disconnect_count: usize,
}

impl Default for SimState {
    fn default() -> Self {
        SimState {
            connected: false,
            target: None,
            dial: VfoState::default(),
            sent_log: Vec::new(),
            auto_ack: true,
            answer_reads: true,
            ack_sets: true,
            fail_connect: false,
            connect_delay: Duration::ZERO,
            fail_writes: false,
            connect_count: 0,
            disconnect_count: 0,
        }
    }
}

/// A simulated radio implementing [`BleTransport`].
#[derive(Debug)]
pub struct MockBleTransport {
    state: Arc<Mutex<SimState>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
}

/// Test-side handle onto a [`MockBleTransport`].
#[derive(Debug, Clone)]
pub struct MockBleHandle {
    state: Arc<Mutex<SimState>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    // A panicking test thread must not poison the simulation for the others.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockBleTransport {
    /// Create a disconnected simulated radio with both VFOs at 0 Hz.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        MockBleTransport {
            state: Arc::new(Mutex::new(SimState::default())),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Create a simulated radio with its dial preset.
    pub fn with_dial(vfo_a_hz: u64, vfo_b_hz: u64) -> Self {
        let mock = Self::new();
        {
            let mut st = lock(&mock.state);
            st.dial = VfoState { vfo_a_hz, vfo_b_hz };
        }
        mock
    }

    /// Obtain a handle that stays valid after the transport is moved.
    pub fn handle(&self) -> MockBleHandle {
        MockBleHandle {
            state: Arc::clone(&self.state),
            events_tx: self.events_tx.clone(),
        }
    }

    fn push(&self, event: TransportEvent) {
        if let Err(TrySendError::Full(event)) = self.events_tx.try_send(event) {
            warn!("mock BLE event channel full, delivering late");
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
    }

    /// React to one host frame the way the radio would.
    fn respond(&self, data: &[u8]) {
        let mut st = lock(&self.state);
        let is_civ = data.len() >= 6
            && data[..4] == [0xFE, 0xFE, RADIO_ADDR, HOST_ADDR]
            && data.last() == Some(&0xFD);
        if !is_civ {
            return;
        }
        let body = &data[4..data.len() - 1];

        let reply = match body {
            [0x25, sel] => {
                let Some(vfo) = Vfo::from_selector(*sel) else {
                    return;
                };
                if !st.answer_reads {
                    return;
                }
                let digits = encode_bcd(st.dial.get(vfo));
                let mut frame = vec![0xFE, 0xFE, HOST_ADDR, RADIO_ADDR, 0x25, *sel];
                frame.extend_from_slice(&digits);
                frame.push(0xFD);
                Some(frame)
            }
            [0x25, sel, bcd @ ..] if bcd.len() == 5 => {
                if let (Some(vfo), Some(hz)) = (Vfo::from_selector(*sel), decode_bcd(bcd)) {
                    st.dial.set(vfo, hz);
                }
                st.ack_sets.then(ack_frame)
            }
            _ => st.ack_sets.then(ack_frame),
        };
        drop(st);

        if let Some(frame) = reply {
            self.push(TransportEvent::Notification(frame));
        }
    }
}

impl Default for MockBleTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn ack_frame() -> Vec<u8> {
    vec![0xFE, 0xFE, HOST_ADDR, RADIO_ADDR, 0xFB, 0xFD]
}

fn encode_bcd(mut n: u64) -> [u8; 5] {
    let mut out = [0u8; 5];
    for byte in out.iter_mut() {
        let lo = (n % 10) as u8;
        n /= 10;
        let hi = (n % 10) as u8;
        n /= 10;
        *byte = (hi << 4) | lo;
    }
    out
}

fn decode_bcd(bytes: &[u8]) -> Option<u64> {
    let mut n = 0u64;
    for &b in bytes.iter().rev() {
        let (hi, lo) = (b >> 4, b & 0x0F);
        if hi > 9 || lo > 9 {
            return None;
        }
        n = n * 100 + u64::from(hi) * 10 + u64::from(lo);
    }
    Some(n)
}

#[async_trait]
impl BleTransport for MockBleTransport {
    async fn connect(&mut self, target: &GattTarget) -> Result<()> {
        let delay = lock(&self.state).connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut st = lock(&self.state);
        st.connect_count += 1;
        if st.fail_connect {
            return Err(Error::Transport(format!(
                "peripheral {:?} not found",
                target.advertised_name
            )));
        }
        st.connected = true;
        st.target = Some(target.clone());
        debug!(name = %target.advertised_name, "mock peripheral connected");
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        if !lock(&self.state).connected {
            return Err(Error::NotConnected);
        }
        self.push(TransportEvent::Subscribed);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let auto_ack = {
            let mut st = lock(&self.state);
            if !st.connected {
                return Err(Error::NotConnected);
            }
            st.sent_log.push(data.to_vec());
            if st.fail_writes {
                return Err(Error::Transport("write rejected by peripheral".into()));
            }
            st.auto_ack
        };

        if auto_ack {
            self.push(TransportEvent::WriteAck);
        }
        self.respond(data);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut st = lock(&self.state);
        st.connected = false;
        st.disconnect_count += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }
}

impl MockBleHandle {
    /// All frames written so far, in order.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_log.clone()
    }

    /// Forget recorded writes.
    pub fn clear_sent(&self) {
        lock(&self.state).sent_log.clear();
    }

    /// Turn the simulated dial, as the operator would on the radio.
    pub fn set_dial(&self, vfo: Vfo, freq_hz: u64) {
        lock(&self.state).dial.set(vfo, freq_hz);
    }

    /// Current simulated dial frequency.
    pub fn dial(&self, vfo: Vfo) -> u64 {
        lock(&self.state).dial.get(vfo)
    }

    /// Whether writes produce a [`TransportEvent::WriteAck`].
    pub fn set_auto_ack(&self, on: bool) {
        lock(&self.state).auto_ack = on;
    }

    /// Whether VFO reads are answered.
    pub fn set_answer_reads(&self, on: bool) {
        lock(&self.state).answer_reads = on;
    }

    /// Whether set commands are answered with `FB`.
    pub fn set_ack_sets(&self, on: bool) {
        lock(&self.state).ack_sets = on;
    }

    /// Make the next `connect()` calls fail.
    pub fn set_fail_connect(&self, on: bool) {
        lock(&self.state).fail_connect = on;
    }

    /// Stretch every `connect()` as if the scan took this long.
    pub fn set_connect_delay(&self, delay: Duration) {
        lock(&self.state).connect_delay = delay;
    }

    /// Make writes fail.
    pub fn set_fail_writes(&self, on: bool) {
        lock(&self.state).fail_writes = on;
    }

    /// Whether the simulated link is up.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// The target passed to the last successful `connect()`.
    pub fn target(&self) -> Option<GattTarget> {
        lock(&self.state).target.clone()
    }

    /// Number of `connect()` calls.
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connect_count
    }

    /// Number of `disconnect()` calls.
    pub fn disconnect_count(&self) -> usize {
        lock(&self.state).disconnect_count
    }

    /// Push a raw event as if the peripheral produced it.
    pub async fn inject(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Push a raw notification payload.
    pub async fn notify(&self, frame: &[u8]) {
        self.inject(TransportEvent::Notification(frame.to_vec())).await;
    }

    /// Simulate the peripheral going out of range.
    pub async fn drop_link(&self) {
        lock(&self.state).connected = false;
        self.inject(TransportEvent::Disconnected).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn target() -> GattTarget {
        GattTarget {
            advertised_name: "ICOM BT(IC-705)".into(),
            service: Uuid::nil(),
            characteristic: Uuid::nil(),
        }
    }

    #[tokio::test]
    async fn write_before_connect_fails() {
        let mut mock = MockBleTransport::new();
        let result = mock.write(&[0x01]).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn subscribe_emits_subscribed() {
        let mut mock = MockBleTransport::new();
        let mut events = mock.take_events().unwrap();
        mock.connect(&target()).await.unwrap();
        mock.subscribe().await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Subscribed));
        assert!(mock.take_events().is_none());
    }

    #[tokio::test]
    async fn read_is_acked_and_answered() {
        let mut mock = MockBleTransport::with_dial(145_900_500, 0);
        let mut events = mock.take_events().unwrap();
        mock.connect(&target()).await.unwrap();

        mock.write(&[0xFE, 0xFE, 0xA4, 0xE0, 0x25, 0x00, 0xFD])
            .await
            .unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::WriteAck));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Notification(vec![
                0xFE, 0xFE, 0xE0, 0xA4, 0x25, 0x00, 0x00, 0x05, 0x90, 0x45, 0x01, 0xFD
            ]))
        );
    }

    #[tokio::test]
    async fn set_frequency_turns_dial() {
        let mut mock = MockBleTransport::new();
        let handle = mock.handle();
        let mut events = mock.take_events().unwrap();
        mock.connect(&target()).await.unwrap();

        // 435.900500 MHz on VFO B.
        mock.write(&[
            0xFE, 0xFE, 0xA4, 0xE0, 0x25, 0x01, 0x00, 0x05, 0x90, 0x35, 0x04, 0xFD,
        ])
        .await
        .unwrap();

        assert_eq!(handle.dial(Vfo::B), 435_900_500);
        assert_eq!(events.recv().await, Some(TransportEvent::WriteAck));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Notification(ack_frame()))
        );
        assert_eq!(handle.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn pairing_frames_are_acked_without_reply() {
        let mut mock = MockBleTransport::new();
        let mut events = mock.take_events().unwrap();
        mock.connect(&target()).await.unwrap();

        mock.write(&[0xFE, 0xF1, 0x00, 0x63, 0xEE, 0x39, 0x09, 0x10, 0xFD])
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::WriteAck));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn silent_radio_records_but_does_not_answer() {
        let mut mock = MockBleTransport::new();
        let handle = mock.handle();
        let mut events = mock.take_events().unwrap();
        mock.connect(&target()).await.unwrap();
        handle.set_auto_ack(false);
        handle.set_answer_reads(false);

        mock.write(&[0xFE, 0xFE, 0xA4, 0xE0, 0x25, 0x00, 0xFD])
            .await
            .unwrap();
        assert!(events.try_recv().is_err());
        assert_eq!(handle.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn failing_writes_return_transport_error() {
        let mut mock = MockBleTransport::new();
        let handle = mock.handle();
        mock.connect(&target()).await.unwrap();
        handle.set_fail_writes(true);

        let result = mock.write(&[0x01]).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn failing_connect() {
        let mut mock = MockBleTransport::new();
        mock.handle().set_fail_connect(true);
        assert!(mock.connect(&target()).await.is_err());
        assert!(!mock.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connect_waits_for_delay() {
        let mut mock = MockBleTransport::new();
        mock.handle().set_connect_delay(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        mock.connect(&target()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(mock.is_connected());
    }

    #[tokio::test]
    async fn drop_link_emits_disconnected() {
        let mut mock = MockBleTransport::new();
        let handle = mock.handle();
        let mut events = mock.take_events().unwrap();
        mock.connect(&target()).await.unwrap();

        handle.drop_link().await;
        assert!(!mock.is_connected());
        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));
    }

    #[test]
    fn bcd_helpers_agree() {
        assert_eq!(encode_bcd(145_900_500), [0x00, 0x05, 0x90, 0x45, 0x01]);
        assert_eq!(decode_bcd(&[0x00, 0x05, 0x90, 0x45, 0x01]), Some(145_900_500));
        assert_eq!(decode_bcd(&[0x0A, 0, 0, 0, 0]), None);
    }
}
