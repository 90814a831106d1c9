//! relaywatch - health harness for the WSL socket-to-pipe relay
//!
//! Wires together:
//! - Argument and environment parsing
//! - Logging
//! - The process supervisor that launches the relay
//! - The health poller and signal-driven shutdown

use anyhow::{Context, Result};
use clap::Parser;
use relaywatch_core::{Harness, HarnessConfig, RelayConfig, SignalListener};
use relaywatch_host::ProcessSupervisor;
use relaywatch_host_api::Supervisor;
use relaywatch_util::{
    DEFAULT_BASE_URL, DEFAULT_LAUNCHER, DEFAULT_NAMED_PIPE, DEFAULT_PID_FILE,
    DEFAULT_RELAY_PROGRAM, DEFAULT_RELAY_WINDOWS_PROGRAM, DEFAULT_UNIX_SOCKET,
    default_probe_address,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// relaywatch - Launch the WSL relay and check that it answers
#[derive(Parser, Debug)]
#[command(name = "relaywatch")]
#[command(about = "Launch the WSL relay and poll its health endpoint", long_about = None)]
struct Args {
    /// Unix socket the relay serves inside the distribution
    #[arg(long, env = "RELAYWATCH_SOCKET", default_value = DEFAULT_UNIX_SOCKET)]
    socket: String,

    /// Named pipe the relay exposes on the Windows side
    #[arg(long, env = "RELAYWATCH_PIPE", default_value = DEFAULT_NAMED_PIPE)]
    pipe: String,

    /// Address to probe (default: the pipe on Windows, the socket elsewhere)
    #[arg(long, env = "RELAYWATCH_PROBE_SOCKET")]
    probe_socket: Option<String>,

    /// Base URL for probe requests; only its host and path are used
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Milliseconds between probes
    #[arg(long, env = "RELAYWATCH_INTERVAL_MS", default_value_t = 1500)]
    interval_ms: u64,

    /// Milliseconds before a single probe gives up
    #[arg(long, env = "RELAYWATCH_TIMEOUT_MS", default_value_t = 60_000)]
    timeout_ms: u64,

    /// Only poll an already running relay
    #[arg(long)]
    no_launch: bool,

    /// Program that enters the WSL session
    #[arg(long, default_value = DEFAULT_LAUNCHER)]
    launcher: String,

    /// WSL distribution (default distribution when unset)
    #[arg(long, env = "WSL_DISTRO_NAME")]
    distribution: Option<String>,

    /// Relay program inside the distribution
    #[arg(long, default_value = DEFAULT_RELAY_PROGRAM)]
    relay: String,

    /// Windows-side relay executable handed to the relay
    #[arg(long, default_value = DEFAULT_RELAY_WINDOWS_PROGRAM)]
    relay_program_path: String,

    /// PID file written by the relay
    #[arg(long, default_value = DEFAULT_PID_FILE)]
    pid_file: String,

    /// Extra argument for the relay (repeatable)
    #[arg(long = "relay-arg", value_name = "ARG", allow_hyphen_values = true)]
    relay_args: Vec<String>,

    /// Keep probing after the launched relay exits
    #[arg(long)]
    keep_polling_after_exit: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn harness_config(&self) -> Result<HarnessConfig> {
        let probe_address = self
            .probe_socket
            .clone()
            .unwrap_or_else(default_probe_address);

        let mut config = HarnessConfig::new(&probe_address, &self.base_url)
            .with_context(|| format!("Failed to configure probe for {}", probe_address))?;

        config.interval = Duration::from_millis(self.interval_ms);
        config.timeout = Duration::from_millis(self.timeout_ms);
        config.keep_polling_after_exit = self.keep_polling_after_exit;
        config.relay = (!self.no_launch).then(|| RelayConfig {
            launcher: self.launcher.clone(),
            distribution: self.distribution.clone(),
            relay: self.relay.clone(),
            socket: self.socket.clone(),
            pipe: self.pipe.clone(),
            relay_program_path: self.relay_program_path.clone(),
            pid_file: self.pid_file.clone(),
            extra_args: self.relay_args.clone(),
        });

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "relaywatch starting");

    let config = args.harness_config()?;

    // Registered before launch so an early signal still cleans up
    let mut signals = SignalListener::new().context("Failed to register signal handlers")?;

    let supervisor: Arc<dyn Supervisor> = Arc::new(ProcessSupervisor::new());
    let harness = Harness::new(config, supervisor);

    let exit = harness.run(async move { signals.recv().await }).await;

    info!(exit = ?exit, "relaywatch exiting");
    std::process::exit(exit.code());
}
