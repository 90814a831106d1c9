//! Process management utilities

use relaywatch_host_api::{
    ExitStatus, HostError, HostResult, LaunchCommand, OutputStream, SupervisorEvent,
};
use relaywatch_util::LaunchId;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::Registry;

/// Size of the buffer each output pump reads into
const OUTPUT_CHUNK_SIZE: usize = 8 * 1024;

/// How long the output pumps may keep draining after the child exits
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

type KillRequest = oneshot::Sender<HostResult<()>>;

/// Managed child process, detached into its own session
///
/// The `Child` itself lives in a watcher task that reaps it; this value
/// only carries the PID and a channel for asking the watcher to kill it.
#[derive(Clone, Debug)]
pub struct ManagedProcess {
    pub pid: u32,
    kill_tx: mpsc::UnboundedSender<KillRequest>,
}

impl ManagedProcess {
    /// Spawn `command` and start its output pumps and exit watcher.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        launch_id: &LaunchId,
        command: &LaunchCommand,
        registry: Arc<Registry>,
    ) -> HostResult<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        detach(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            HostError::SpawnFailed(format!("Failed to spawn {}: {}", command.program, e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| HostError::Internal("Spawned child has no PID".into()))?;

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_output(
                stdout,
                launch_id.clone(),
                OutputStream::Stdout,
                registry.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_output(
                stderr,
                launch_id.clone(),
                OutputStream::Stderr,
                registry.clone(),
            )));
        }

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        tokio::spawn(watch(child, pid, launch_id.clone(), kill_rx, pumps, registry));

        debug!(pid = pid, launch_id = %launch_id, program = %command.program, "Process spawned");

        Ok(Self { pid, kill_tx })
    }

    /// Ask the OS to terminate the process (SIGTERM to its process group on Unix)
    pub async fn terminate(&self) -> HostResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.kill_tx
            .send(reply_tx)
            .map_err(|_| HostError::ChildNotFound)?;
        reply_rx.await.map_err(|_| HostError::ChildNotFound)?
    }
}

/// Start the child in its own session so it outlives ours
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    // SAFETY: setsid is async-signal-safe and touches no parent state
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

/// Forward raw chunks from one of the child's pipes until EOF
async fn pump_output<R>(mut reader: R, launch_id: LaunchId, stream: OutputStream, registry: Arc<Registry>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => registry.deliver(SupervisorEvent::Output {
                launch_id: launch_id.clone(),
                stream,
                chunk: buf[..n].to_vec(),
            }),
            Err(e) => {
                debug!(launch_id = %launch_id, stream = %stream, error = %e, "Output read error");
                break;
            }
        }
    }
}

/// Reap the child, serving kill requests until it exits
async fn watch(
    mut child: Child,
    pid: u32,
    launch_id: LaunchId,
    mut kill_rx: mpsc::UnboundedReceiver<KillRequest>,
    pumps: Vec<JoinHandle<()>>,
    registry: Arc<Registry>,
) {
    let result = loop {
        tokio::select! {
            result = child.wait() => break result,
            Some(reply) = kill_rx.recv() => {
                let _ = reply.send(send_terminate(&mut child, pid));
            }
        }
    };

    for pump in pumps {
        let abort = pump.abort_handle();
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, pump).await.is_err() {
            debug!(pid = pid, "Output still open after exit, abandoning pump");
            abort.abort();
        }
    }

    let status = match result {
        Ok(status) => convert_status(status),
        Err(e) => {
            warn!(pid = pid, error = %e, "Wait failed");
            ExitStatus {
                code: None,
                signal: None,
            }
        }
    };

    registry.complete(&launch_id, status);
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) -> HostResult<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    // After setsid, pid == pgid; negative targets the whole group
    let pgid = Pid::from_raw(-(pid as i32));

    match signal::kill(pgid, Signal::SIGTERM) {
        Ok(()) => {
            debug!(pgid = pid, "Sent SIGTERM to process group");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            // Process already gone
            Ok(())
        }
        Err(e) => Err(HostError::StopFailed(format!(
            "Failed to send SIGTERM: {}",
            e
        ))),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, pid: u32) -> HostResult<()> {
    child
        .start_kill()
        .map_err(|e| HostError::StopFailed(format!("Failed to kill {}: {}", pid, e)))
}

fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::with_code(code);
    }

    // Killed by signal
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitStatus::signaled(sig);
        }
    }

    ExitStatus::with_code(-1)
}
