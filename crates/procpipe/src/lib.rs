//! Procpipe - duplex byte-stream abstraction over spawned processes
//!
//! A [`ProcessStream`] is a bidirectional endpoint over an externally spawned
//! process: writes become the process's input, process output becomes data the
//! stream emits, and lifecycle events (`readable`, `data`, `end`, `error`,
//! `close`) fire in a strictly defined order regardless of how the process
//! terminates. A stream can be constructed before any process exists, wired
//! into a pipeline, and bound to a concrete process later.
//!
//! ```rust,no_run
//! use procpipe::ProcessStream;
//!
//! async fn example() -> Result<(), procpipe::StreamError> {
//!     let stream = ProcessStream::spawn("identify", ["-format", "%m", "-"]).await?;
//!     let mut events = stream.events().expect("events already taken");
//!     let output = events.collect_output().await?;
//!     println!("format: {}", String::from_utf8_lossy(&output));
//!     Ok(())
//! }
//! ```

mod pipe;
mod platform;
mod pump;
mod stream;

pub use platform::{PlatformSpawnerFactory, default_spawner};
pub use procpipe_core::*;
pub use stream::{EventReceiver, ProcessStream};
