//! Process supervisor for relaywatch
//!
//! Provides:
//! - Process spawning detached from the harness's session
//! - stdout/stderr capture as raw chunks
//! - Exit observation, reported exactly once per launch
//! - Best-effort termination
//! - A registry of launches keyed by `LaunchId`

mod process;
mod registry;
mod supervisor;

pub use process::*;
pub use supervisor::*;
