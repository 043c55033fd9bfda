// sathunter -- command-line controller for the IC-705 over Bluetooth LE.
//
// Usage:
//   sathunter --mock freq get --vfo b
//   sathunter --mock freq set 145900000
//   sathunter mode usb --vfo a
//   sathunter split
//   sathunter tone 88.5
//   sathunter monitor --duration 30
//   sathunter follow --down-low 145800000 --down-high 145900000 \
//       --up-low 435900000 --up-high 436000000 --inverted
//
// Real radios need the `ble` feature; without it only `--mock` is usable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sathunter_core::{
    Error, Mode, Observation, ObserverLocation, OrbitTracker, OrbitalElements, Rig,
    SatellitePass, ToneFrequency, Vfo, format_freq_mhz,
};
use sathunter_icom::Ic705Builder;
use sathunter_icom::models::ic_705;
use sathunter_test_harness::MockBleTransport;
use sathunter_tracking::{
    DopplerModel, TrackingConfig, TrackingLoop, Transponder, TransponderMode,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// sathunter -- satellite transponder control for the IC-705.
#[derive(Parser)]
#[command(name = "sathunter", version, about)]
struct Cli {
    /// Talk to a simulated radio instead of scanning for a real one.
    #[arg(long)]
    mock: bool,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short)]
    verbose: bool,

    /// Override the default CI-V address (hex, e.g. 0xA4).
    #[arg(long, value_parser = parse_hex_u8)]
    civ_addr: Option<u8>,

    /// Controller name shown on the radio.
    #[arg(long)]
    device_name: Option<String>,

    /// Controller id the radio remembers this host by.
    #[arg(long)]
    device_id: Option<Uuid>,

    /// Per-command response timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    command_timeout_ms: u64,

    /// VFO poll period in milliseconds.
    #[arg(long, default_value_t = 250)]
    poll_ms: u64,

    /// How long to scan for the radio, in seconds.
    #[cfg(feature = "ble")]
    #[arg(long, default_value_t = 10)]
    scan_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

/// Parse a hex string like "0xA4" or "a4" into a u8.
fn parse_hex_u8(s: &str) -> std::result::Result<u8, String> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(s, 16).map_err(|e| format!("invalid hex byte: {e}"))
}

#[derive(Subcommand)]
enum Command {
    /// Frequency operations.
    Freq {
        #[command(subcommand)]
        action: FreqAction,
    },

    /// Set the operating mode of a VFO.
    Mode {
        /// Mode name (LSB, USB, FM, CW).
        mode: Mode,

        /// VFO to set (a or b).
        #[arg(long, default_value = "a")]
        vfo: Vfo,
    },

    /// Enable split operation (receive on A, transmit on B).
    Split,

    /// Program the uplink CTCSS tone on VFO B ("none" turns it off).
    Tone {
        /// Tone in Hz, e.g. 67.0, 88.5, 141.3, or "none".
        tone: ToneFrequency,
    },

    /// Subscribe to rig events and print them in real time.
    Monitor {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Keep VFO B on the transponder uplink matching VFO A.
    Follow {
        /// Lower edge of the downlink passband in Hz.
        #[arg(long)]
        down_low: i64,

        /// Upper edge of the downlink passband (0 = single frequency).
        #[arg(long, default_value_t = 0)]
        down_high: i64,

        /// Lower edge of the uplink passband in Hz.
        #[arg(long)]
        up_low: i64,

        /// Upper edge of the uplink passband (0 = single frequency).
        #[arg(long, default_value_t = 0)]
        up_high: i64,

        /// The transponder inverts (LSB up, USB down).
        #[arg(long)]
        inverted: bool,

        /// Downlink mode (lsb, usb, cw, fm).
        #[arg(long, default_value = "usb")]
        down_mode: String,

        /// Uplink mode (lsb, usb, cw, fm).
        #[arg(long, default_value = "lsb")]
        up_mode: String,

        /// Uplink CTCSS tone.
        #[arg(long, default_value = "none")]
        tone: ToneFrequency,

        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

#[derive(Subcommand)]
enum FreqAction {
    /// Read a VFO frequency from the radio.
    Get {
        /// VFO to read (a or b).
        #[arg(long, default_value = "a")]
        vfo: Vfo,
    },
    /// Tune a VFO (in Hz).
    Set {
        /// Frequency in hertz (e.g. 145900000).
        freq_hz: u64,

        /// VFO to tune (a or b).
        #[arg(long, default_value = "a")]
        vfo: Vfo,
    },
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Orbit data
// ---------------------------------------------------------------------------

/// Stand-in propagator for sessions without orbital elements.
///
/// No satellite is ever set on the Doppler model, so the model takes VFO
/// readings as-is and never asks for a correction.
struct NoOrbitData;

impl NoOrbitData {
    fn unavailable() -> Error {
        Error::Propagation("no orbital elements loaded".into())
    }
}

impl OrbitTracker for NoOrbitData {
    fn propagate(
        &self,
        _elements: &OrbitalElements,
        _observer: &ObserverLocation,
        _time: DateTime<Utc>,
    ) -> sathunter_core::Result<Observation> {
        Err(Self::unavailable())
    }

    fn doppler_shift(&self, _observation: &Observation, _freq_hz: i64) -> i64 {
        0
    }

    fn next_pass(
        &self,
        _elements: &OrbitalElements,
        _observer: &ObserverLocation,
        _from: DateTime<Utc>,
    ) -> sathunter_core::Result<SatellitePass> {
        Err(Self::unavailable())
    }

    fn next_los(
        &self,
        _elements: &OrbitalElements,
        _observer: &ObserverLocation,
        _from: DateTime<Utc>,
    ) -> sathunter_core::Result<DateTime<Utc>> {
        Err(Self::unavailable())
    }
}

fn tracking_loop(rig: Arc<dyn Rig>) -> Arc<TrackingLoop> {
    let doppler = Arc::new(DopplerModel::new(
        Arc::new(NoOrbitData),
        ObserverLocation::new(0.0, 0.0, 0.0),
    ));
    Arc::new(TrackingLoop::new(rig, doppler, TrackingConfig::default()))
}

// ---------------------------------------------------------------------------
// Rig construction
// ---------------------------------------------------------------------------

/// Build the rig from CLI arguments and run the pairing handshake.
async fn create_rig(cli: &Cli) -> Result<Arc<dyn Rig>> {
    let model = ic_705();
    let mut builder = Ic705Builder::new(model.clone())
        .command_timeout(Duration::from_millis(cli.command_timeout_ms))
        .poll_interval(Duration::from_millis(cli.poll_ms));
    if let Some(addr) = cli.civ_addr {
        builder = builder.civ_address(addr);
    }
    if let Some(name) = &cli.device_name {
        builder = builder.device_name(name);
    }
    if let Some(id) = cli.device_id {
        builder = builder.device_id(id);
    }

    let rig = if cli.mock {
        let mock = MockBleTransport::with_dial(145_900_000, 435_900_000);
        let rig = builder
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to build Ic705Rig with mock transport")?;
        println!("Using simulated radio -- Icom {}", model.name);
        rig
    } else {
        build_ble(cli, builder).await?
    };

    rig.connect()
        .await
        .with_context(|| format!("pairing with {} failed", model.advertised_name))?;
    println!("Connected -- Icom {}", model.name);
    Ok(Arc::new(rig))
}

#[cfg(feature = "ble")]
async fn build_ble(cli: &Cli, builder: Ic705Builder) -> Result<sathunter_icom::Ic705Rig> {
    builder
        .scan_timeout(Duration::from_secs(cli.scan_timeout))
        .build()
        .await
        .context("failed to open Bluetooth adapter")
}

#[cfg(not(feature = "ble"))]
async fn build_ble(_cli: &Cli, _builder: Ic705Builder) -> Result<sathunter_icom::Ic705Rig> {
    bail!("built without Bluetooth support; rebuild with --features ble or pass --mock")
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_freq_get(rig: &dyn Rig, vfo: Vfo) -> Result<()> {
    let freq = rig.get_vfo_frequency(vfo).await?;
    println!("{vfo}: {} MHz", format_freq_mhz(freq));
    Ok(())
}

async fn cmd_freq_set(rig: &dyn Rig, vfo: Vfo, freq_hz: u64) -> Result<()> {
    rig.set_vfo_frequency(vfo, freq_hz).await?;
    println!("{vfo}: set to {} MHz", format_freq_mhz(freq_hz));
    Ok(())
}

async fn cmd_mode(rig: &dyn Rig, vfo: Vfo, mode: Mode) -> Result<()> {
    rig.set_mode(vfo, mode).await?;
    println!("{vfo}: mode set to {mode}");
    Ok(())
}

async fn cmd_split(rig: &dyn Rig) -> Result<()> {
    rig.enable_split().await?;
    println!("Split: ON");
    Ok(())
}

async fn cmd_tone(rig: Arc<dyn Rig>, tone: ToneFrequency) -> Result<()> {
    tracking_loop(rig).set_tone(tone).await?;
    if tone.is_set() {
        println!("Uplink tone: {tone}");
    } else {
        println!("Uplink tone: OFF");
    }
    Ok(())
}

async fn cmd_monitor(rig: &dyn Rig, duration_secs: u64) -> Result<()> {
    let mut event_rx = rig.subscribe()?;

    println!("Monitoring rig events (Ctrl-C to stop)...");

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = tokio::time::timeout(timeout, event_rx.recv()) => match received {
                Ok(Ok(event)) => println!("[event] {event:?}"),
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                    println!("Event channel closed.");
                    break;
                }
                Err(_) => {
                    if deadline.is_some() {
                        println!("Monitor duration elapsed.");
                    }
                    break;
                }
            },
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_follow(
    rig: Arc<dyn Rig>,
    down_low: i64,
    down_high: i64,
    up_low: i64,
    up_high: i64,
    inverted: bool,
    down_mode: &str,
    up_mode: &str,
    tone: ToneFrequency,
    duration_secs: u64,
) -> Result<()> {
    if down_low <= 0 || up_low <= 0 {
        bail!("--down-low and --up-low must be positive");
    }
    if (down_high != 0 && down_high < down_low) || (up_high != 0 && up_high < up_low) {
        bail!("passband upper edge is below its lower edge");
    }
    let transponder = Transponder {
        description: "command line".into(),
        downlink_lower: down_low,
        downlink_upper: down_high,
        uplink_lower: up_low,
        uplink_upper: up_high,
        downlink_mode: TransponderMode::parse(down_mode),
        uplink_mode: TransponderMode::parse(up_mode),
        inverted,
        active: true,
    };

    let tl = tracking_loop(rig);
    tl.select_transponder(Some(transponder.clone()), Utc::now())
        .await;
    tl.set_tracking(false);
    tl.set_tone(tone).await?;
    info!(transponder = %transponder, inverted, "following VFO A");

    let cancel = CancellationToken::new();
    let task = Arc::clone(&tl).spawn(cancel.clone());

    println!("Following VFO A onto the uplink (Ctrl-C to stop)...");
    let started = Instant::now();
    let mut report = tokio::time::interval(Duration::from_secs(1));
    let mut last = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                if duration_secs > 0 && started.elapsed() >= Duration::from_secs(duration_secs) {
                    println!("Follow duration elapsed.");
                    break;
                }
                let snap = tl.snapshot();
                let line = if snap.out_of_range {
                    format!(
                        "A {} MHz  outside passband, B unchanged",
                        format_freq_mhz(snap.vfo.vfo_a_hz)
                    )
                } else {
                    format!(
                        "A {} MHz  B {} MHz",
                        format_freq_mhz(snap.vfo.vfo_a_hz),
                        format_freq_mhz(snap.vfo.vfo_b_hz)
                    )
                };
                if last.as_ref() != Some(&line) {
                    println!("{line}");
                    last = Some(line);
                }
            }
        }
    }

    cancel.cancel();
    task.await.context("tracking loop panicked")?;
    debug!("follow stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rig = create_rig(&cli).await?;

    let result = match &cli.command {
        Command::Freq { action } => match action {
            FreqAction::Get { vfo } => cmd_freq_get(rig.as_ref(), *vfo).await,
            FreqAction::Set { freq_hz, vfo } => cmd_freq_set(rig.as_ref(), *vfo, *freq_hz).await,
        },
        Command::Mode { mode, vfo } => cmd_mode(rig.as_ref(), *vfo, *mode).await,
        Command::Split => cmd_split(rig.as_ref()).await,
        Command::Tone { tone } => cmd_tone(Arc::clone(&rig), *tone).await,
        Command::Monitor { duration } => cmd_monitor(rig.as_ref(), *duration).await,
        Command::Follow {
            down_low,
            down_high,
            up_low,
            up_high,
            inverted,
            down_mode,
            up_mode,
            tone,
            duration,
        } => {
            cmd_follow(
                Arc::clone(&rig),
                *down_low,
                *down_high,
                *up_low,
                *up_high,
                *inverted,
                down_mode,
                up_mode,
                *tone,
                *duration,
            )
            .await
        }
    };

    rig.disconnect().await.ok();
    result
}
