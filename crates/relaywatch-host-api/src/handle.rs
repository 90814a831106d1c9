//! Child process handle abstraction

use relaywatch_util::LaunchId;
use std::fmt;

/// Program plus argument list used to start a child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Space-joined command line, for logs only
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Snapshot of a launched child
///
/// Handles are values: the supervisor hands out copies and keeps the
/// authoritative one in its registry until the exit has been reported.
#[derive(Debug, Clone)]
pub struct ChildHandle {
    pub launch_id: LaunchId,
    pub pid: u32,
    pub command: LaunchCommand,
    /// Absent while the child is running
    pub exit_status: Option<ExitStatus>,
}

impl ChildHandle {
    pub fn new(launch_id: LaunchId, pid: u32, command: LaunchCommand) -> Self {
        Self {
            launch_id,
            pid,
            command,
            exit_status: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none()
    }

    /// Last known exit code, if the child exited normally
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.as_ref().and_then(|s| s.code)
    }

    pub fn mark_exited(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
    }
}

/// Exit status of a child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,

    /// Signal number if the process was killed by one (Unix)
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            signal: None,
        }
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// Which standard stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_program_and_args() {
        let command = LaunchCommand::new("wsl.exe")
            .arg("--exec")
            .args(["./relay", "--pid-file", "relay.pid"]);

        assert_eq!(command.args.len(), 4);
        assert_eq!(
            command.command_line(),
            "wsl.exe --exec ./relay --pid-file relay.pid"
        );
        assert_eq!(command.to_string(), command.command_line());
    }

    #[test]
    fn handle_liveness() {
        let mut handle = ChildHandle::new(LaunchId::new(), 42, LaunchCommand::new("sleep"));
        assert!(handle.is_alive());
        assert_eq!(handle.exit_code(), None);

        handle.mark_exited(ExitStatus::with_code(3));
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_code(), Some(3));
    }

    #[test]
    fn exit_status() {
        assert!(ExitStatus::success().is_success());
        assert!(!ExitStatus::with_code(1).is_success());
        assert!(!ExitStatus::signaled(9).is_success());
        assert_eq!(ExitStatus::signaled(15).to_string(), "signal 15");
    }
}
