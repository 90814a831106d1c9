//! Harness configuration

use relaywatch_host_api::LaunchCommand;
use relaywatch_probe::{
    DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_TIMEOUT, ProbeEndpoint, ProbeError, TransportAddr,
};
use relaywatch_util::{
    DEFAULT_LAUNCHER, DEFAULT_NAMED_PIPE, DEFAULT_PID_FILE, DEFAULT_RELAY_PROGRAM,
    DEFAULT_RELAY_WINDOWS_PROGRAM, DEFAULT_UNIX_SOCKET,
};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, reported before anything starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },

    #[error("Invalid probe endpoint: {0}")]
    Endpoint(#[from] ProbeError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How the relay is started inside WSL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Program that enters the WSL session
    pub launcher: String,
    /// Target distribution; the default distribution when absent
    pub distribution: Option<String>,
    /// Relay program, resolved inside the distribution
    pub relay: String,
    pub socket: String,
    pub pipe: String,
    /// Windows-side relay executable
    pub relay_program_path: String,
    pub pid_file: String,
    /// Appended after the standard arguments
    pub extra_args: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            launcher: DEFAULT_LAUNCHER.to_string(),
            distribution: None,
            relay: DEFAULT_RELAY_PROGRAM.to_string(),
            socket: DEFAULT_UNIX_SOCKET.to_string(),
            pipe: DEFAULT_NAMED_PIPE.to_string(),
            relay_program_path: DEFAULT_RELAY_WINDOWS_PROGRAM.to_string(),
            pid_file: DEFAULT_PID_FILE.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// `wsl.exe [--distribution X] --exec <relay> --socket=.. --pipe=.. ...`
    pub fn command(&self) -> LaunchCommand {
        let mut command = LaunchCommand::new(&self.launcher);

        if let Some(distribution) = &self.distribution {
            command = command.args(["--distribution", distribution.as_str()]);
        }

        command
            .args(["--exec", self.relay.as_str()])
            .arg(format!("--socket={}", self.socket))
            .arg(format!("--pipe={}", self.pipe))
            .arg(format!("--relay-program-path={}", self.relay_program_path))
            .args(["--pid-file", self.pid_file.as_str()])
            .args(self.extra_args.iter().cloned())
    }
}

/// Everything the harness needs to run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub endpoint: ProbeEndpoint,
    pub interval: Duration,
    pub timeout: Duration,
    /// `None` runs in connect-only mode against an already running relay
    pub relay: Option<RelayConfig>,
    /// Keep probing after the launched relay exits
    pub keep_polling_after_exit: bool,
}

impl HarnessConfig {
    /// Configuration with default timings that launches the default relay
    pub fn new(probe_address: &str, base_url: &str) -> ConfigResult<Self> {
        let endpoint = ProbeEndpoint::new(TransportAddr::parse(probe_address), base_url)?;

        Ok(Self {
            endpoint,
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_PROBE_TIMEOUT,
            relay: Some(RelayConfig::default()),
            keep_polling_after_exit: false,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "interval" });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "timeout" });
        }
        Ok(())
    }
}
