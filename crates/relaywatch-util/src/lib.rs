//! Shared utilities for relaywatch
//!
//! This crate provides:
//! - ID types (LaunchId)
//! - Default endpoints and relay program names

mod ids;
mod paths;

pub use ids::*;
pub use paths::*;
