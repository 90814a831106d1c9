//! Termination signal handling
//!
//! The first interrupt, terminate or quit tears down the supervised relay
//! and ends the harness with exit code 0.

use relaywatch_host_api::Supervisor;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Exit code after a signal-driven shutdown, whatever cleanup managed to do
pub const SHUTDOWN_EXIT_CODE: i32 = 0;

/// Signals that end the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Quit,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// OS signal streams, registered up front so no signal is missed
#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    pub fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next shutdown signal
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.quit.recv() => ShutdownSignal::Quit,
        }
    }
}

/// Console control events standing in for the POSIX signals
#[cfg(windows)]
pub struct SignalListener {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_break: tokio::signal::windows::CtrlBreak,
    ctrl_close: tokio::signal::windows::CtrlClose,
}

#[cfg(windows)]
impl SignalListener {
    pub fn new() -> io::Result<Self> {
        use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close};

        Ok(Self {
            ctrl_c: ctrl_c()?,
            ctrl_break: ctrl_break()?,
            ctrl_close: ctrl_close()?,
        })
    }

    /// Wait for the next shutdown signal
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.ctrl_c.recv() => ShutdownSignal::Interrupt,
            _ = self.ctrl_close.recv() => ShutdownSignal::Terminate,
            _ = self.ctrl_break.recv() => ShutdownSignal::Quit,
        }
    }
}

/// Drives cleanup of the supervised child on shutdown
pub struct SignalCoordinator {
    supervisor: Arc<dyn Supervisor>,
    shutting_down: AtomicBool,
}

impl SignalCoordinator {
    pub fn new(supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            supervisor,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Terminate the current child, if any, and return the exit code.
    ///
    /// Only the first call does any work. Termination failures are logged
    /// and never change the exit code.
    pub async fn shutdown(&self, signal: ShutdownSignal) -> i32 {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!(signal = %signal, "Shutdown already in progress");
            return SHUTDOWN_EXIT_CODE;
        }

        info!(signal = %signal, "Received exit signal");

        match self.supervisor.current() {
            Some(child) => {
                info!(pid = child.pid, launch_id = %child.launch_id, "Killing child");
                if let Err(e) = self.supervisor.terminate(&child.launch_id).await {
                    warn!(pid = child.pid, error = %e, "Unable to kill child");
                }
            }
            None => debug!("No child to kill"),
        }

        SHUTDOWN_EXIT_CODE
    }
}
