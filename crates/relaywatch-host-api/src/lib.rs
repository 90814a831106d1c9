//! Process supervisor interfaces for relaywatch
//!
//! This crate defines the seam between the harness and the platform code
//! that launches and tracks the relay. It contains no platform code itself.

mod handle;
mod mock;
mod traits;

pub use handle::*;
pub use mock::*;
pub use traits::*;
