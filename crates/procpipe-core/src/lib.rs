//! Procpipe core - platform-independent stream lifecycle types
//!
//! This crate provides the configuration, error taxonomy, lifecycle events,
//! the event-sequencer state machine, and the process-execution collaborator
//! traits shared across platform-specific implementations.

mod config;
mod error;
mod event;
mod process;
mod sequencer;

pub use config::*;
pub use error::*;
pub use event::*;
pub use process::*;
pub use sequencer::*;
