//! Supervisor trait and events

use async_trait::async_trait;
use relaywatch_util::LaunchId;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{ChildHandle, ExitStatus, LaunchCommand, OutputStream};

/// Errors from supervisor operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Child not found")]
    ChildNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Events from the supervisor
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A chunk of bytes read from the child's stdout or stderr
    Output {
        launch_id: LaunchId,
        stream: OutputStream,
        chunk: Vec<u8>,
    },

    /// The child exited; delivered once per successful launch
    Exited {
        handle: ChildHandle,
        status: ExitStatus,
    },

    /// The OS could not create the child; delivered instead of `Exited`
    SpawnFailed {
        launch_id: LaunchId,
        command: LaunchCommand,
        error: String,
    },
}

impl SupervisorEvent {
    pub fn launch_id(&self) -> &LaunchId {
        match self {
            SupervisorEvent::Output { launch_id, .. } => launch_id,
            SupervisorEvent::Exited { handle, .. } => &handle.launch_id,
            SupervisorEvent::SpawnFailed { launch_id, .. } => launch_id,
        }
    }
}

/// Supervisor trait - implemented by the platform process supervisor and the mock
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Launch a child, superseding any child that is still tracked
    async fn launch(&self, command: LaunchCommand) -> HostResult<ChildHandle>;

    /// Ask the OS to terminate a tracked child (best-effort)
    async fn terminate(&self, launch_id: &LaunchId) -> HostResult<()>;

    /// The most recently launched child, while it is still tracked
    fn current(&self) -> Option<ChildHandle>;

    /// Take the event receiver; `None` once it has been taken
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SupervisorEvent>>;
}
