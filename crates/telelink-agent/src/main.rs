//! Telelink field agent
//!
//! Runs on the device that owns the cellular module.
//!
//! - Brings the uplink up over a serial device, a TCP serial bridge, or the
//!   built-in simulator (`--simulate`)
//! - Sends one sensor reading per cycle, pacing cycles by channel quality
//! - Appends delivered records to a JSON-lines store
//! - Carries undelivered records across restarts in a spill file

mod report;
mod sensor;
mod settings;
mod spill;
mod store;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use rand::Rng;
use telelink::sim::SimModem;
use telelink::{Connector, SendOutcome, SessionConfig, TelemetryStore, Uplink};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use settings::AgentConfig;

/// Telelink field agent.
#[derive(Parser, Debug)]
#[command(name = "telelink-agent", about = "Cellular telemetry uplink agent")]
struct Cli {
    /// TOML config file (session sections plus `[agent]`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial device or `tcp://host:port`.
    #[arg(long)]
    device: Option<String>,

    /// Serial baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Run against the built-in module simulator.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Base seconds between readings.
    #[arg(long)]
    interval: Option<u64>,

    /// Stop after this many readings.
    #[arg(long)]
    cycles: Option<u64>,

    /// JSON-lines file for delivered records.
    #[arg(long)]
    store: Option<PathBuf>,

    /// JSON-lines file for records still pending at exit.
    #[arg(long)]
    spill: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (mut session_cfg, mut agent_cfg) = load_config(cli.config.as_ref())?;
    apply_overrides(&cli, &mut session_cfg, &mut agent_cfg)?;

    info!(
        device = %session_cfg.serial.device,
        baud = session_cfg.serial.baud,
        server = %format_args!("{}:{}", session_cfg.server.host, session_cfg.server.port),
        simulate = cli.simulate,
        "telelink-agent starting"
    );

    let store: Option<Arc<dyn TelemetryStore>> = match &agent_cfg.store_path {
        Some(path) => Some(Arc::new(store::JsonlStore::open(path)?)),
        None => None,
    };

    let sim = cli.simulate.then(SimModem::new);
    let sim_connector = sim.as_ref().map(SimModem::connector);
    let connector: &dyn Connector = match &sim_connector {
        Some(c) => c,
        None => &transport::DeviceConnector,
    };

    // Installed before the spill file is taken.
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing interrupt handler")?;

    let mut uplink = start_uplink(session_cfg, connector, store, &agent_cfg.spill_path)?;

    run_cycles(&uplink, &agent_cfg, sim.as_ref(), &stop_rx);

    let session = uplink.session().clone();
    let pending = uplink.shutdown();
    spill::save(&agent_cfg.spill_path, &pending)?;

    let channel = session.channel_state();
    println!(
        "{}",
        report::final_report(
            &session.stats().snapshot(),
            channel.tier,
            channel.quality_score,
            pending.len(),
            session.queue_dropped(),
        )
    );
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(SessionConfig, AgentConfig)> {
    let text = match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("reading config {}", p.display()))?,
        None => String::new(),
    };
    let session = SessionConfig::from_toml_str(&text).map_err(anyhow::Error::msg)?;
    let agent = AgentConfig::from_toml_str(&text).map_err(anyhow::Error::msg)?;
    Ok((session, agent))
}

/// Start the uplink with the spilled backlog. If start fails the backlog is
/// written back so the next run still has it.
fn start_uplink(
    config: SessionConfig,
    connector: &dyn Connector,
    store: Option<Arc<dyn TelemetryStore>>,
    spill_path: &Path,
) -> anyhow::Result<Uplink> {
    let backlog = spill::take(spill_path)?;
    match Uplink::start_with_backlog(config, connector, store, backlog.clone()) {
        Ok(u) => Ok(u),
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "uplink start failed");
            spill::save(spill_path, &backlog)?;
            Err(e).context("starting uplink")
        }
    }
}

fn apply_overrides(
    cli: &Cli,
    session: &mut SessionConfig,
    agent: &mut AgentConfig,
) -> anyhow::Result<()> {
    if let Some(device) = &cli.device {
        let device = device.trim();
        if device.is_empty() {
            anyhow::bail!("--device must not be empty");
        }
        session.serial.device = device.to_string();
    }
    if let Some(baud) = cli.baud.filter(|&b| b > 0) {
        session.serial.baud = baud;
    }
    if let Some(secs) = cli.interval.filter(|&s| s > 0) {
        agent.interval = std::time::Duration::from_secs(secs);
        agent.min_interval = agent.min_interval.min(agent.interval);
    }
    if let Some(cycles) = cli.cycles {
        agent.cycles = (cycles > 0).then_some(cycles);
    }
    if let Some(path) = &cli.store {
        agent.store_path = Some(path.clone());
    }
    if let Some(path) = &cli.spill {
        agent.spill_path = path.clone();
    }
    Ok(())
}

// ─── Send Loop ──────────────────────────────────────────────────────────────

fn run_cycles(
    uplink: &Uplink,
    agent: &AgentConfig,
    sim: Option<&SimModem>,
    stop: &crossbeam_channel::Receiver<()>,
) {
    let session = uplink.session();
    let source = sensor::SensorSource::new(&agent.device_id, &agent.location);
    let mut weather = sim.map(|_| SimWeather::default());
    let mut cycle = 0u64;

    loop {
        cycle += 1;
        if let (Some(sim), Some(w)) = (sim, weather.as_mut()) {
            w.step(sim);
        }

        let channel = session.channel_state();
        let reading = source.read(channel.signal_level, channel.quality_score);
        match uplink.send(&reading) {
            Ok(SendOutcome::Delivered { sequence, attempts }) => {
                info!(cycle, sequence, attempts, "reading delivered");
            }
            Ok(SendOutcome::Deferred { quality_score }) => {
                info!(cycle, quality_score, "reading deferred");
            }
            Err(e) => warn!(cycle, error = %e, "reading not delivered"),
        }
        report::log_cycle(cycle, &session.stats().snapshot(), session.queue_len());

        if agent.cycles.is_some_and(|n| cycle >= n) {
            break;
        }
        let wait = report::cycle_interval(
            agent.interval,
            agent.min_interval,
            session.channel_state().quality_score,
        );
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }
}

/// Random walk of the simulated signal so `--simulate` runs through
/// every tier.
struct SimWeather {
    level: u8,
}

impl Default for SimWeather {
    fn default() -> Self {
        SimWeather { level: 20 }
    }
}

impl SimWeather {
    fn step(&mut self, sim: &SimModem) {
        let mut rng = rand::rng();
        let delta: i16 = rng.random_range(-6..=6);
        self.level = (i16::from(self.level) + delta).clamp(2, 31) as u8;
        sim.set_signal(self.level, rng.random_range(0..=3));
    }
}
