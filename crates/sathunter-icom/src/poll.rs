//! Background VFO poller.
//!
//! The IC-705 does not push dial changes over BLE, so the rig keeps its VFO
//! cache fresh by asking. Every tick the poller queues a read of VFO A and
//! then VFO B as uncorrelated writes; the IO task routes the answers into
//! the cache like any other unsolicited frequency report.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sathunter_core::types::{ConnectionState, Vfo};

use crate::commands;
use crate::io::{Request, SharedState};

/// Handle to a running poller. Dropping it does not stop the task; call
/// [`stop`](PollerHandle::stop).
pub(crate) struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Spawn the poller. It exits on its own when the link leaves `Connected`
/// or the IO task goes away.
pub(crate) fn spawn_poller(
    cmd_tx: mpsc::Sender<Request>,
    civ_address: u8,
    period: Duration,
    shared: Arc<SharedState>,
    cancel: CancellationToken,
) -> PollerHandle {
    let task = tokio::spawn(poll_loop(
        cmd_tx,
        civ_address,
        period,
        shared,
        cancel.clone(),
    ));
    PollerHandle { cancel, task }
}

async fn poll_loop(
    cmd_tx: mpsc::Sender<Request>,
    civ_address: u8,
    period: Duration,
    shared: Arc<SharedState>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(period_ms = period.as_millis() as u64, "VFO poller started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if shared.connection() != ConnectionState::Connected {
            debug!("link is down, VFO poller exiting");
            break;
        }

        for vfo in [Vfo::A, Vfo::B] {
            let bytes = commands::cmd_read_vfo_frequency(civ_address, vfo);
            if cmd_tx
                .send(Request::Send { bytes, acked: false })
                .await
                .is_err()
            {
                debug!("IO task gone, VFO poller exiting");
                return;
            }
        }
    }
    debug!("VFO poller stopped");
}
