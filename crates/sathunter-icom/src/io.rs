//! IO task for the IC-705 BLE link.
//!
//! A single spawned task owns the [`BleTransport`] and its inbound event
//! channel. Rig methods talk to it through two channels:
//!
//! - a command channel for lifecycle requests and fire-and-forget writes;
//! - a capacity-1 channel for correlated request/response exchanges. The
//!   task only pulls the next exchange once the pending slot is empty, so a
//!   second caller's write is withheld until the first one resolves.
//!
//! The task also drives the pairing handshake from transport events, keeps
//! the VFO frequency cache current from unsolicited reports, and enforces
//! deadlines on both the handshake and every correlated request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sathunter_core::error::{Error, Result};
use sathunter_core::events::RigEvent;
use sathunter_core::transport::{BleTransport, GattTarget, TransportEvent};
use sathunter_core::types::{ConnectionState, Vfo, VfoState};

use crate::civ::{self, ExpectedResponse, Inbound};
use crate::commands;
use crate::pairing::{PairingAction, PairingStateMachine};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the IO task.
pub(crate) struct IoConfig {
    /// CI-V address of the radio.
    pub civ_address: u8,
    /// Peripheral and characteristic to connect to.
    pub target: GattTarget,
    /// Deadline for a single correlated exchange, measured from its write.
    pub command_timeout: Duration,
    /// Deadline for the whole pairing handshake, measured from subscribe.
    pub handshake_timeout: Duration,
}

/// State shared between the IO task and synchronous rig accessors.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    vfo: Mutex<VfoState>,
    connection: Mutex<ConnectionState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedState {
    /// Snapshot of the VFO cache.
    pub fn vfo(&self) -> VfoState {
        *lock(&self.vfo)
    }

    /// Current connection state.
    pub fn connection(&self) -> ConnectionState {
        *lock(&self.connection)
    }

    /// Returns `true` if the state actually changed.
    fn set_connection(&self, state: ConnectionState) -> bool {
        let mut guard = lock(&self.connection);
        let changed = *guard != state;
        *guard = state;
        changed
    }

    /// Returns `true` if the cached value actually changed.
    fn set_vfo(&self, vfo: Vfo, freq_hz: u64) -> bool {
        let mut guard = lock(&self.vfo);
        let changed = guard.get(vfo) != freq_hz;
        guard.set(vfo, freq_hz);
        changed
    }

    fn clear_vfo(&self) {
        *lock(&self.vfo) = VfoState::default();
    }
}

/// A lifecycle request or fire-and-forget write.
pub(crate) enum Request {
    /// Connect and run the pairing handshake.
    Connect { reply: oneshot::Sender<Result<()>> },
    /// Tear the link down. Always succeeds.
    Disconnect { reply: oneshot::Sender<Result<()>> },
    /// Write without correlation. `acked` marks commands the radio answers
    /// with a bare `FB`/`FA` rather than a data frame.
    Send { bytes: Vec<u8>, acked: bool },
    /// Graceful shutdown; returns the transport for test recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn BleTransport>>,
    },
}

/// A correlated request/response exchange.
pub(crate) struct Exchange {
    bytes: Vec<u8>,
    expected: ExpectedResponse,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// Handle to the IO task. Stored inside `Ic705Rig`.
pub(crate) struct RigIo {
    /// Lifecycle and fire-and-forget channel.
    pub cmd_tx: mpsc::Sender<Request>,
    /// Correlated exchange channel, capacity 1.
    pub req_tx: mpsc::Sender<Exchange>,
    /// Cancellation token for graceful shutdown.
    pub cancel: CancellationToken,
    /// Join handle for the IO task.
    pub task: JoinHandle<()>,
}

impl RigIo {
    /// Connect and complete the pairing handshake.
    pub async fn connect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Connect { reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Tear the link down.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Disconnect { reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Hand a set command to the IO task for an uncorrelated write.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.cmd_tx
            .send(Request::Send { bytes, acked: true })
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Write a frame and wait for the notification matching `expected`.
    ///
    /// Returns the full response frame.
    pub async fn request(&self, bytes: Vec<u8>, expected: ExpectedResponse) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.req_tx
            .send(Exchange {
                bytes,
                expected,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Shut down the IO task and recover the transport.
    ///
    /// The task exits after handing the transport back; later calls on this
    /// handle fail with [`Error::NotConnected`].
    pub async fn shutdown(&self) -> Result<Box<dyn BleTransport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task. Returns the handle for sending requests.
pub(crate) fn spawn_io_task(
    mut transport: Box<dyn BleTransport>,
    pairing: PairingStateMachine,
    config: IoConfig,
    shared: Arc<SharedState>,
    event_tx: broadcast::Sender<RigEvent>,
) -> RigIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let (req_tx, req_rx) = mpsc::channel::<Exchange>(1);
    let cancel = CancellationToken::new();
    let events = transport.take_events();
    if events.is_none() {
        warn!("transport event channel already taken; notifications will not be seen");
    }

    let ctx = IoContext {
        transport,
        pairing,
        config,
        shared,
        event_tx,
        pending: None,
        connecting: None,
        unacked: 0,
    };
    let task = tokio::spawn(io_loop(ctx, cmd_rx, req_rx, events, cancel.clone()));

    RigIo {
        cmd_tx,
        req_tx,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// The single outstanding correlated exchange.
struct Pending {
    expected: ExpectedResponse,
    reply: oneshot::Sender<Result<Vec<u8>>>,
    deadline: Instant,
    /// `FB`/`FA` replies still owed to writes issued before this request.
    writes_ahead: u32,
}

/// A connect request waiting for the handshake to finish.
struct ConnectAttempt {
    reply: oneshot::Sender<Result<()>>,
    deadline: Instant,
}

struct IoContext {
    transport: Box<dyn BleTransport>,
    pairing: PairingStateMachine,
    config: IoConfig,
    shared: Arc<SharedState>,
    event_tx: broadcast::Sender<RigEvent>,
    pending: Option<Pending>,
    connecting: Option<ConnectAttempt>,
    /// Uncorrelated set commands whose `FB`/`FA` has not arrived yet.
    unacked: u32,
}

/// A lifecycle request that arrived while the BLE link was still opening.
enum Interrupt {
    Cancelled,
    Disconnect(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<Box<dyn BleTransport>>),
}

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Lifecycle requests and fire-and-forget writes
/// 3. Transport events (so a response beats its own deadline)
/// 4. Deadlines
/// 5. The next correlated exchange, only while the pending slot is empty
async fn io_loop(
    mut ctx: IoContext,
    mut cmd_rx: mpsc::Receiver<Request>,
    mut req_rx: mpsc::Receiver<Exchange>,
    mut events: Option<mpsc::Receiver<TransportEvent>>,
    cancel: CancellationToken,
) {
    loop {
        let pending_deadline = ctx.pending.as_ref().map(|p| p.deadline);
        let handshake_deadline = ctx.connecting.as_ref().map(|c| c.deadline);
        let slot_free = ctx.pending.is_none();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Request::Connect { reply }) => {
                        match ctx.begin_connect(reply, &mut cmd_rx, &cancel).await {
                            None => {}
                            Some(Interrupt::Cancelled) => {
                                debug!("IO task stopped while connecting");
                                break;
                            }
                            Some(Interrupt::Disconnect(reply)) => {
                                ctx.teardown().await;
                                let _ = reply.send(Ok(()));
                            }
                            Some(Interrupt::Shutdown(reply)) => {
                                debug!("IO task shutdown requested while connecting");
                                ctx.teardown().await;
                                let _ = reply.send(ctx.transport);
                                return;
                            }
                        }
                    }
                    Some(Request::Disconnect { reply }) => {
                        ctx.teardown().await;
                        let _ = reply.send(Ok(()));
                    }
                    Some(Request::Send { bytes, acked }) => {
                        ctx.write_uncorrelated(&bytes, acked).await
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        ctx.teardown().await;
                        let _ = reply.send(ctx.transport);
                        return;
                    }
                    None => {
                        debug!("all command senders dropped, exiting IO task");
                        break;
                    }
                }
            }

            event = next_event(&mut events) => {
                match event {
                    Some(event) => ctx.handle_event(event).await,
                    None => {
                        debug!("transport event channel closed");
                        events = None;
                        ctx.link_lost().await;
                    }
                }
            }

            _ = wait_until(pending_deadline) => ctx.expire_pending(),

            _ = wait_until(handshake_deadline) => ctx.expire_handshake().await,

            exchange = req_rx.recv(), if slot_free => {
                match exchange {
                    Some(exchange) => ctx.start_exchange(exchange).await,
                    None => {
                        debug!("exchange channel closed, exiting IO task");
                        break;
                    }
                }
            }
        }
    }
}

async fn next_event(
    events: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl IoContext {
    fn set_state(&self, state: ConnectionState) {
        if self.shared.set_connection(state) {
            debug!(state = ?state, "connection state changed");
            let _ = self
                .event_tx
                .send(RigEvent::ConnectionStateChanged { state });
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the link and arm the handshake deadline.
    ///
    /// Returns the lifecycle request that cut the scan short, if any. The
    /// connect caller has already been answered with `ConnectionLost` then.
    async fn begin_connect(
        &mut self,
        reply: oneshot::Sender<Result<()>>,
        cmd_rx: &mut mpsc::Receiver<Request>,
        cancel: &CancellationToken,
    ) -> Option<Interrupt> {
        match self.shared.connection() {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(()));
                return None;
            }
            ConnectionState::Connecting => {
                let _ = reply.send(Err(Error::Protocol("connect already in progress".into())));
                return None;
            }
            ConnectionState::NotConnected => {}
        }

        self.pairing.reset();
        self.set_state(ConnectionState::Connecting);
        info!(name = %self.config.target.advertised_name, "connecting to rig");

        match self.open_link(cmd_rx, cancel).await {
            Ok(Ok(())) => {
                self.connecting = Some(ConnectAttempt {
                    reply,
                    deadline: Instant::now() + self.config.handshake_timeout,
                });
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to open BLE link");
                self.close_transport().await;
                self.set_state(ConnectionState::NotConnected);
                let _ = reply.send(Err(e));
                None
            }
            Err(interrupt) => {
                info!("connect abandoned before the link came up");
                self.close_transport().await;
                self.set_state(ConnectionState::NotConnected);
                let _ = reply.send(Err(Error::ConnectionLost));
                Some(interrupt)
            }
        }
    }

    /// Scan, connect, and subscribe, while still serving the command channel.
    async fn open_link(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<Request>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Result<()>, Interrupt> {
        let transport = &mut self.transport;
        let target = &self.config.target;
        let link = async move {
            transport.connect(target).await?;
            transport.subscribe().await
        };
        tokio::pin!(link);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),

                cmd = cmd_rx.recv() => match cmd {
                    Some(Request::Disconnect { reply }) => return Err(Interrupt::Disconnect(reply)),
                    Some(Request::Shutdown { reply }) => return Err(Interrupt::Shutdown(reply)),
                    Some(Request::Connect { reply }) => {
                        let _ = reply.send(Err(Error::Protocol("connect already in progress".into())));
                    }
                    Some(Request::Send { .. }) => {
                        debug!("dropping uncorrelated write while not connected");
                    }
                    None => return Err(Interrupt::Cancelled),
                },

                result = &mut link => return Ok(result),
            }
        }
    }

    async fn close_transport(&mut self) {
        if self.transport.is_connected() {
            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "transport disconnect failed");
            }
        }
    }

    /// Fail everything outstanding and return to `NotConnected`. Idempotent.
    async fn teardown(&mut self) {
        if let Some(p) = self.pending.take() {
            let _ = p.reply.send(Err(Error::ConnectionLost));
        }
        self.unacked = 0;
        if let Some(c) = self.connecting.take() {
            let _ = c.reply.send(Err(Error::ConnectionLost));
        }
        self.pairing.reset();
        self.close_transport().await;
        self.shared.clear_vfo();
        self.set_state(ConnectionState::NotConnected);
    }

    async fn link_lost(&mut self) {
        let was = self.shared.connection();
        self.teardown().await;
        if was != ConnectionState::NotConnected {
            warn!("link to rig lost");
            let _ = self.event_tx.send(RigEvent::Disconnected);
        }
    }

    async fn abort_handshake(&mut self, attempt: ConnectAttempt, err: Error) {
        warn!(error = %err, state = ?self.pairing.state(), "pairing handshake failed");
        self.pairing.reset();
        self.close_transport().await;
        self.set_state(ConnectionState::NotConnected);
        let _ = attempt.reply.send(Err(err));
    }

    async fn expire_handshake(&mut self) {
        if let Some(attempt) = self.connecting.take() {
            self.abort_handshake(attempt, Error::Timeout).await;
        }
    }

    async fn apply_pairing(&mut self, action: PairingAction) {
        match action {
            PairingAction::Write(frame) => {
                if let Err(e) = self.transport.write(&frame).await {
                    if let Some(attempt) = self.connecting.take() {
                        self.abort_handshake(attempt, e).await;
                    }
                }
            }
            PairingAction::Started => {
                if let Some(attempt) = self.connecting.take() {
                    self.set_state(ConnectionState::Connected);
                    info!("pairing handshake complete");
                    let _ = self.event_tx.send(RigEvent::Connected);
                    let _ = attempt.reply.send(Ok(()));
                }
            }
            PairingAction::None => {}
        }
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Subscribed => {
                if self.connecting.is_some() {
                    let action = self.pairing.on_subscribed();
                    self.apply_pairing(action).await;
                } else {
                    debug!("subscription confirmed outside a handshake");
                }
            }
            TransportEvent::WriteAck => {
                if self.connecting.is_some() {
                    let action = self.pairing.on_write_ack();
                    self.apply_pairing(action).await;
                }
            }
            TransportEvent::WriteFailed(msg) | TransportEvent::NotifyFailed(msg) => {
                self.transport_failure(msg).await;
            }
            TransportEvent::Notification(frame) => self.handle_notification(&frame),
            TransportEvent::Disconnected => self.link_lost().await,
        }
    }

    async fn transport_failure(&mut self, msg: String) {
        warn!(error = %msg, "transport reported a failure");
        if let Some(p) = self.pending.take() {
            let _ = p.reply.send(Err(Error::Transport(msg)));
        } else if let Some(attempt) = self.connecting.take() {
            self.abort_handshake(attempt, Error::Transport(msg)).await;
        }
    }

    fn handle_notification(&mut self, frame: &[u8]) {
        let preamble = civ::radio_preamble(self.config.civ_address);
        let inbound = civ::classify(frame, &preamble);

        // The radio answers in order: replies owed to earlier set commands
        // arrive before anything for the pending request.
        if let Ok(reply @ (Inbound::Ack | Inbound::Nak)) = inbound {
            if self.settle_earlier_write(reply) {
                return;
            }
        }

        if let Some(p) = self
            .pending
            .take_if(|p| civ::match_response(frame, &preamble, &p.expected))
        {
            self.update_cache(&frame[civ::PREAMBLE_LEN..frame.len() - 1]);
            let _ = p.reply.send(Ok(frame.to_vec()));
            return;
        }

        match inbound {
            Err(reason) => self.reject_pending(Error::MalformedResponse(reason)),
            Ok(Inbound::Nak) if self.pending.is_some() => {
                self.reject_pending(Error::Protocol("rig returned NAK".into()))
            }
            Ok(reply @ (Inbound::Ack | Inbound::Nak)) => self.settle_uncorrelated(reply),
            Ok(Inbound::Data(body)) => {
                let wrong_length = self
                    .pending
                    .as_ref()
                    .is_some_and(|p| body.starts_with(&p.expected.prefix));
                if wrong_length {
                    self.reject_pending(Error::MalformedResponse(format!(
                        "response is {} bytes, expected {}",
                        frame.len(),
                        self.pending.as_ref().map_or(0, |p| p.expected.frame_len())
                    )));
                } else {
                    self.update_cache(body);
                }
            }
        }
    }

    /// Consume an `FB`/`FA` owed to a write issued before the pending request.
    fn settle_earlier_write(&mut self, reply: Inbound<'_>) -> bool {
        match self.pending.as_mut() {
            Some(p) if p.writes_ahead > 0 => {
                p.writes_ahead -= 1;
                self.settle_uncorrelated(reply);
                true
            }
            _ => false,
        }
    }

    fn settle_uncorrelated(&mut self, reply: Inbound<'_>) {
        self.unacked = self.unacked.saturating_sub(1);
        if reply == Inbound::Nak {
            warn!("rig rejected a set command");
        } else {
            debug!("ack for uncorrelated command");
        }
    }

    fn expire_pending(&mut self) {
        if let Some(p) = self.pending.take() {
            warn!(prefix = ?p.expected.prefix, "request timed out");
            let _ = p.reply.send(Err(Error::Timeout));
        }
        // Lost replies leave the count unreliable.
        self.unacked = 0;
    }

    fn reject_pending(&mut self, err: Error) {
        match self.pending.take() {
            Some(p) => {
                warn!(error = %err, "request failed");
                let _ = p.reply.send(Err(err));
            }
            None => debug!(error = %err, "dropping unsolicited frame"),
        }
    }

    fn update_cache(&self, body: &[u8]) {
        match commands::parse_vfo_frequency_response(body) {
            Ok(Some((vfo, freq_hz))) => {
                if self.shared.set_vfo(vfo, freq_hz) {
                    debug!(vfo = %vfo, freq_hz, "VFO frequency changed");
                    let _ = self
                        .event_tx
                        .send(RigEvent::FrequencyChanged { vfo, freq_hz });
                }
            }
            Ok(None) => debug!(opcode = ?body.first(), "ignoring unsolicited frame"),
            Err(e) => warn!(error = %e, "bad frequency report"),
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    async fn write_uncorrelated(&mut self, bytes: &[u8], acked: bool) {
        if self.shared.connection() != ConnectionState::Connected {
            debug!("dropping uncorrelated write while not connected");
            return;
        }
        match self.transport.write(bytes).await {
            Ok(()) if acked => self.unacked += 1,
            Ok(()) => {}
            Err(e) => warn!(error = %e, "uncorrelated write failed"),
        }
    }

    async fn start_exchange(&mut self, exchange: Exchange) {
        if self.shared.connection() != ConnectionState::Connected {
            let _ = exchange.reply.send(Err(Error::NotConnected));
            return;
        }
        if let Err(e) = self.transport.write(&exchange.bytes).await {
            warn!(error = %e, "request write failed");
            let _ = exchange.reply.send(Err(e));
            return;
        }
        debug!(prefix = ?exchange.expected.prefix, "request written, awaiting response");
        self.pending = Some(Pending {
            expected: exchange.expected,
            reply: exchange.reply,
            deadline: Instant::now() + self.config.command_timeout,
            writes_ahead: self.unacked,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ic_705;
    use sathunter_test_harness::{MockBleHandle, MockBleTransport};
    use uuid::Uuid;

    const IC705: u8 = 0xA4;

    fn test_config(command_timeout: Duration) -> IoConfig {
        IoConfig {
            civ_address: IC705,
            target: ic_705().gatt_target(),
            command_timeout,
            handshake_timeout: Duration::from_secs(2),
        }
    }

    fn pairing() -> PairingStateMachine {
        PairingStateMachine::new(Uuid::nil(), "SatHunter", [0xEE, 0x39, 0x09, 0x10]).unwrap()
    }

    struct Fixture {
        io: RigIo,
        handle: MockBleHandle,
        shared: Arc<SharedState>,
        events: broadcast::Receiver<RigEvent>,
    }

    fn spawn_with(mock: MockBleTransport, config: IoConfig) -> Fixture {
        let handle = mock.handle();
        let shared = Arc::new(SharedState::default());
        let (event_tx, events) = broadcast::channel(64);
        let io = spawn_io_task(
            Box::new(mock),
            pairing(),
            config,
            Arc::clone(&shared),
            event_tx,
        );
        Fixture {
            io,
            handle,
            shared,
            events,
        }
    }

    async fn connected(mock: MockBleTransport, command_timeout: Duration) -> Fixture {
        let fx = spawn_with(mock, test_config(command_timeout));
        fx.io.connect().await.unwrap();
        settle().await;
        fx.handle.clear_sent();
        fx
    }

    /// Let the IO task drain its queues.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn freq_frame(sel: u8, bcd: [u8; 5]) -> Vec<u8> {
        let mut f = vec![0xFE, 0xFE, 0xE0, IC705, 0x25, sel];
        f.extend_from_slice(&bcd);
        f.push(0xFD);
        f
    }

    // =======================================================================
    // Handshake
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn connect_runs_pairing_handshake() {
        let mut fx = spawn_with(MockBleTransport::new(), test_config(Duration::from_secs(1)));
        fx.io.connect().await.unwrap();

        let sent = fx.handle.sent_data();
        let opcodes: Vec<u8> = sent.iter().map(|f| f[3]).collect();
        assert_eq!(opcodes, vec![0x61, 0x62, 0x63]);
        assert_eq!(fx.shared.connection(), ConnectionState::Connected);
        assert_eq!(
            fx.handle.target().unwrap().advertised_name,
            "ICOM BT(IC-705)"
        );

        assert_eq!(
            fx.events.recv().await.unwrap(),
            RigEvent::ConnectionStateChanged {
                state: ConnectionState::Connecting
            }
        );
        assert_eq!(
            fx.events.recv().await.unwrap(),
            RigEvent::ConnectionStateChanged {
                state: ConnectionState::Connected
            }
        );
        assert_eq!(fx.events.recv().await.unwrap(), RigEvent::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_when_connected_is_noop() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(1)).await;
        fx.io.connect().await.unwrap();
        assert!(fx.handle.sent_data().is_empty());
        assert_eq!(fx.handle.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_stalls_then_times_out() {
        let mock = MockBleTransport::new();
        mock.handle().set_auto_ack(false);
        let mut config = test_config(Duration::from_secs(1));
        config.handshake_timeout = Duration::from_millis(50);
        let fx = spawn_with(mock, config);

        let result = fx.io.connect().await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(fx.shared.connection(), ConnectionState::NotConnected);
        assert!(!fx.handle.is_connected());
        // Only the identify frame went out.
        assert_eq!(fx.handle.sent_data().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_resets_state() {
        let mock = MockBleTransport::new();
        mock.handle().set_fail_connect(true);
        let fx = spawn_with(mock, test_config(Duration::from_secs(1)));

        let result = fx.io.connect().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(fx.shared.connection(), ConnectionState::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_abandons_slow_scan() {
        let mock = MockBleTransport::new();
        mock.handle().set_connect_delay(Duration::from_secs(30));
        let fx = spawn_with(mock, test_config(Duration::from_secs(1)));
        let io = Arc::new(fx.io);

        let attempt = {
            let io = Arc::clone(&io);
            tokio::spawn(async move { io.connect().await })
        };
        settle().await;
        assert_eq!(fx.shared.connection(), ConnectionState::Connecting);

        io.disconnect().await.unwrap();
        assert!(matches!(attempt.await.unwrap(), Err(Error::ConnectionLost)));
        assert_eq!(fx.shared.connection(), ConnectionState::NotConnected);
        assert!(!fx.handle.is_connected());
        assert!(fx.handle.sent_data().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_scan_returns_transport() {
        let mock = MockBleTransport::new();
        mock.handle().set_connect_delay(Duration::from_secs(30));
        let fx = spawn_with(mock, test_config(Duration::from_secs(1)));
        let io = Arc::new(fx.io);

        let attempt = {
            let io = Arc::clone(&io);
            tokio::spawn(async move { io.connect().await })
        };
        settle().await;

        let transport = io.shutdown().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(attempt.await.unwrap(), Err(Error::ConnectionLost)));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_disconnect_repeats_handshake() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(1)).await;
        fx.io.disconnect().await.unwrap();
        fx.io.connect().await.unwrap();
        let opcodes: Vec<u8> = fx.handle.sent_data().iter().map(|f| f[3]).collect();
        assert_eq!(opcodes, vec![0x61, 0x62, 0x63]);
    }

    // =======================================================================
    // Correlated exchanges
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn request_returns_matching_frame_and_updates_cache() {
        let fx = connected(
            MockBleTransport::with_dial(145_900_500, 0),
            Duration::from_secs(1),
        )
        .await;

        let frame = fx
            .io
            .request(
                commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                commands::expected_vfo_frequency(Vfo::A),
            )
            .await
            .unwrap();
        assert_eq!(frame, freq_frame(0x00, [0x00, 0x05, 0x90, 0x45, 0x01]));
        assert_eq!(fx.shared.vfo().vfo_a_hz, 145_900_500);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_is_withheld_until_first_resolves() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        let first = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                    commands::expected_vfo_frequency(Vfo::A),
                )
                .await
            })
        };
        settle().await;
        let second = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::B),
                    commands::expected_vfo_frequency(Vfo::B),
                )
                .await
            })
        };
        settle().await;

        // Only the first read has been written.
        let sent = fx.handle.sent_data();
        assert_eq!(sent, vec![commands::cmd_read_vfo_frequency(IC705, Vfo::A)]);

        fx.handle
            .notify(&freq_frame(0x00, [0x00, 0x00, 0x90, 0x45, 0x01]))
            .await;
        let first = first.await.unwrap().unwrap();
        assert_eq!(first[5], 0x00);
        settle().await;

        // Now the second read goes out.
        assert_eq!(fx.handle.sent_data().len(), 2);
        fx.handle
            .notify(&freq_frame(0x01, [0x00, 0x00, 0x90, 0x35, 0x04]))
            .await;
        let second = second.await.unwrap().unwrap();
        assert_eq!(second[5], 0x01);
        assert_eq!(fx.shared.vfo().vfo_b_hz, 435_900_000);
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_and_frees_slot() {
        let fx = connected(
            MockBleTransport::with_dial(7_074_000, 0),
            Duration::from_millis(50),
        )
        .await;
        fx.handle.set_answer_reads(false);

        let result = fx
            .io
            .request(
                commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                commands::expected_vfo_frequency(Vfo::A),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        fx.handle.set_answer_reads(true);
        let result = fx
            .io
            .request(
                commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                commands::expected_vfo_frequency(Vfo::A),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_length_response_is_malformed() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                    commands::expected_vfo_frequency(Vfo::A),
                )
                .await
            })
        };
        settle().await;
        fx.handle
            .notify(&[0xFE, 0xFE, 0xE0, IC705, 0x25, 0x00, 0x00, 0x90, 0xFD])
            .await;

        assert!(matches!(
            req.await.unwrap(),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn broken_frame_is_malformed() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::B),
                    commands::expected_vfo_frequency(Vfo::B),
                )
                .await
            })
        };
        settle().await;
        // Right length, wrong terminator.
        let mut frame = freq_frame(0x01, [0; 5]);
        *frame.last_mut().unwrap() = 0x00;
        fx.handle.notify(&frame).await;

        assert!(matches!(
            req.await.unwrap(),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn nak_is_protocol_error() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                    commands::expected_vfo_frequency(Vfo::A),
                )
                .await
            })
        };
        settle().await;
        fx.handle.notify(&[0xFE, 0xFE, 0xE0, IC705, 0xFA, 0xFD]).await;

        assert!(matches!(req.await.unwrap(), Err(Error::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn nak_for_earlier_set_does_not_fail_read() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_ack_sets(false);
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        io.send(commands::cmd_enable_split(IC705)).await.unwrap();
        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                    commands::expected_vfo_frequency(Vfo::A),
                )
                .await
            })
        };
        settle().await;

        // The radio refuses the split command, then answers the read.
        fx.handle.notify(&[0xFE, 0xFE, 0xE0, IC705, 0xFA, 0xFD]).await;
        fx.handle
            .notify(&freq_frame(0x00, [0x00, 0x00, 0x90, 0x45, 0x01]))
            .await;

        assert!(req.await.unwrap().is_ok());
        assert_eq!(fx.shared.vfo().vfo_a_hz, 145_900_000);
    }

    #[tokio::test(start_paused = true)]
    async fn nak_after_earlier_set_ack_fails_read() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_ack_sets(false);
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        io.send(commands::cmd_enable_split(IC705)).await.unwrap();
        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::B),
                    commands::expected_vfo_frequency(Vfo::B),
                )
                .await
            })
        };
        settle().await;

        fx.handle.notify(&[0xFE, 0xFE, 0xE0, IC705, 0xFB, 0xFD]).await;
        fx.handle.notify(&[0xFE, 0xFE, 0xE0, IC705, 0xFA, 0xFD]).await;

        assert!(matches!(req.await.unwrap(), Err(Error::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_reads_do_not_expect_acks() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        fx.io
            .cmd_tx
            .send(Request::Send {
                bytes: commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                acked: false,
            })
            .await
            .unwrap();
        let io = Arc::new(fx.io);

        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::B),
                    commands::expected_vfo_frequency(Vfo::B),
                )
                .await
            })
        };
        settle().await;
        fx.handle.notify(&[0xFE, 0xFE, 0xE0, IC705, 0xFA, 0xFD]).await;

        assert!(matches!(req.await.unwrap(), Err(Error::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_report_does_not_resolve_request() {
        let mut fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        let mut req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                    commands::expected_vfo_frequency(Vfo::A),
                )
                .await
            })
        };
        settle().await;

        // A poll answer for VFO B and a bare ACK arrive first.
        fx.handle
            .notify(&freq_frame(0x01, [0x00, 0x00, 0x90, 0x35, 0x04]))
            .await;
        fx.handle.notify(&[0xFE, 0xFE, 0xE0, IC705, 0xFB, 0xFD]).await;
        settle().await;
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut req)
            .await
            .is_err());
        assert_eq!(fx.shared.vfo().vfo_b_hz, 435_900_000);

        fx.handle
            .notify(&freq_frame(0x00, [0x00, 0x00, 0x90, 0x45, 0x01]))
            .await;
        assert!(req.await.unwrap().is_ok());

        // Drain the event stream: one FrequencyChanged per VFO.
        let mut changes = Vec::new();
        while let Ok(ev) = fx.events.try_recv() {
            if let RigEvent::FrequencyChanged { vfo, freq_hz } = ev {
                changes.push((vfo, freq_hz));
            }
        }
        assert_eq!(
            changes,
            vec![(Vfo::B, 435_900_000), (Vfo::A, 145_900_000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_is_transport_error() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(1)).await;
        fx.handle.set_fail_writes(true);

        let result = fx
            .io
            .request(
                commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                commands::expected_vfo_frequency(Vfo::A),
            )
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn notify_failure_event_fails_pending_request() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                    commands::expected_vfo_frequency(Vfo::A),
                )
                .await
            })
        };
        settle().await;
        fx.handle
            .inject(TransportEvent::NotifyFailed("gatt error 0x85".into()))
            .await;

        assert!(matches!(req.await.unwrap(), Err(Error::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn request_while_disconnected_fails() {
        let fx = spawn_with(MockBleTransport::new(), test_config(Duration::from_secs(1)));
        let result = fx
            .io
            .request(
                commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                commands::expected_vfo_frequency(Vfo::A),
            )
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(fx.handle.sent_data().is_empty());
    }

    // =======================================================================
    // Fire-and-forget and unsolicited traffic
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn uncorrelated_write_reaches_radio() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(1)).await;
        let cmd = commands::cmd_set_vfo_frequency(IC705, Vfo::B, 435_900_500).unwrap();
        fx.io.send(cmd.clone()).await.unwrap();
        settle().await;
        assert_eq!(fx.handle.sent_data(), vec![cmd]);
        assert_eq!(fx.handle.dial(Vfo::B), 435_900_500);
    }

    #[tokio::test(start_paused = true)]
    async fn uncorrelated_write_dropped_while_disconnected() {
        let fx = spawn_with(MockBleTransport::new(), test_config(Duration::from_secs(1)));
        fx.io.send(commands::cmd_enable_split(IC705)).await.unwrap();
        settle().await;
        assert!(fx.handle.sent_data().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_response_updates_cache() {
        let fx = connected(
            MockBleTransport::with_dial(145_950_000, 435_850_000),
            Duration::from_secs(1),
        )
        .await;
        for vfo in [Vfo::A, Vfo::B] {
            fx.io
                .cmd_tx
                .send(Request::Send {
                    bytes: commands::cmd_read_vfo_frequency(IC705, vfo),
                    acked: false,
                })
                .await
                .unwrap();
        }
        settle().await;
        assert_eq!(
            fx.shared.vfo(),
            VfoState {
                vfo_a_hz: 145_950_000,
                vfo_b_hz: 435_850_000
            }
        );
    }

    // =======================================================================
    // Teardown
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn disconnect_fails_pending_and_is_idempotent() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(5)).await;
        fx.handle.set_answer_reads(false);
        let io = Arc::new(fx.io);

        let req = {
            let io = Arc::clone(&io);
            tokio::spawn(async move {
                io.request(
                    commands::cmd_read_vfo_frequency(IC705, Vfo::A),
                    commands::expected_vfo_frequency(Vfo::A),
                )
                .await
            })
        };
        settle().await;

        io.disconnect().await.unwrap();
        assert!(matches!(req.await.unwrap(), Err(Error::ConnectionLost)));
        assert_eq!(fx.shared.connection(), ConnectionState::NotConnected);
        assert!(!fx.handle.is_connected());

        io.disconnect().await.unwrap();
        assert_eq!(fx.shared.connection(), ConnectionState::NotConnected);
        assert_eq!(fx.handle.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_emits_disconnected() {
        let mut fx = connected(
            MockBleTransport::with_dial(145_900_000, 0),
            Duration::from_secs(1),
        )
        .await;
        while fx.events.try_recv().is_ok() {}

        fx.handle.drop_link().await;
        settle().await;

        assert_eq!(fx.shared.connection(), ConnectionState::NotConnected);
        assert_eq!(fx.shared.vfo(), VfoState::default());
        let mut saw_disconnected = false;
        while let Ok(ev) = fx.events.try_recv() {
            if ev == RigEvent::Disconnected {
                saw_disconnected = true;
            }
        }
        assert!(saw_disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_transport() {
        let fx = connected(MockBleTransport::new(), Duration::from_secs(1)).await;
        let transport = fx.io.shutdown().await.unwrap();
        assert!(!transport.is_connected());
    }
}
