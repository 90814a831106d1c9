//! Default endpoints and program names for the WSL relay
//!
//! The relay bridges a Unix domain socket inside a WSL distribution to a
//! Windows named pipe. Defaults:
//! - Socket: `/var/run/docker.sock`
//! - Pipe: `\\.\pipe\container-desktop-wsl-relay-test`
//! - Launcher: `wsl.exe`, running `./container-desktop-wsl-relay`

/// Docker-compatible engine socket inside the distribution
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/docker.sock";

/// Named pipe the relay exposes on the Windows side
pub const DEFAULT_NAMED_PIPE: &str = r"\\.\pipe\container-desktop-wsl-relay-test";

/// Program used to enter the WSL session
pub const DEFAULT_LAUNCHER: &str = "wsl.exe";

/// Relay program, resolved inside the distribution
pub const DEFAULT_RELAY_PROGRAM: &str = "./container-desktop-wsl-relay";

/// Windows-side relay executable handed to the Linux relay
pub const DEFAULT_RELAY_WINDOWS_PROGRAM: &str = "./container-desktop-wsl-relay.exe";

/// PID file the relay writes (Linux file-system path)
pub const DEFAULT_PID_FILE: &str = "container-desktop-wsl-relay.pid";

/// Liveness path answered by Docker-compatible engines
pub const PING_PATH: &str = "/_ping";

/// Placeholder base URL; the host part is only used for the `Host` header
pub const DEFAULT_BASE_URL: &str = "http://d";

/// Address of the endpoint probed from this side of the WSL boundary.
///
/// On Windows that is the named pipe; everywhere else it is the Unix socket.
pub fn default_probe_address() -> String {
    if cfg!(windows) {
        DEFAULT_NAMED_PIPE.to_string()
    } else {
        DEFAULT_UNIX_SOCKET.to_string()
    }
}

/// Whether an address names a Windows named pipe rather than a socket path
pub fn is_named_pipe(address: &str) -> bool {
    let lowered = address.to_ascii_lowercase();
    lowered.starts_with(r"\\.\pipe\") || lowered.starts_with(r"\\?\pipe\")
}
