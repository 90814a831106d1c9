//! Harness composition for relaywatch
//!
//! This crate ties the pieces together:
//! - Harness configuration and the relay launch command line
//! - Signal handling (interrupt, terminate, quit) with child cleanup
//! - The harness loop: optional launch, health polling, event routing

mod config;
mod harness;
mod signals;

pub use config::*;
pub use harness::*;
pub use signals::*;
