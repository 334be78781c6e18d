use crate::config::SpawnConfig;
use crate::error::StreamError;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Unique identifier for a process
pub type ProcessId = u32;

/// Final disposition of a process, as observed by the event sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Process exited with code 0
    Clean,
    /// Process exited with a non-zero code
    Code(i32),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Signal(i32),
}

impl ExitDisposition {
    /// Non-zero exit codes and signal deaths are abnormal terminations
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitDisposition::Clean)
    }

    /// Decode a raw exit status into a disposition
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitDisposition::Signal(signal);
            }
        }

        match status.code() {
            Some(0) => ExitDisposition::Clean,
            Some(code) => ExitDisposition::Code(code),
            // Neither a code nor a decodable signal: forced termination
            None => ExitDisposition::Signal(9),
        }
    }
}

impl fmt::Display for ExitDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitDisposition::Clean => write!(f, "exit code 0"),
            ExitDisposition::Code(code) => write!(f, "exit code {code}"),
            ExitDisposition::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Kill request forwarded verbatim to the platform spawner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// Graceful termination request (SIGTERM on Unix)
    Term,
    /// Forced kill (SIGKILL on Unix, forced termination on Windows)
    Kill,
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if the process has exited)
    fn pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn command(&self) -> &str;

    /// Wait for the process to exit and report its disposition
    async fn wait(&mut self) -> std::io::Result<ExitDisposition>;
}

/// Implementation of ProcessHandle for boxed trait objects to enable associated type usage
#[async_trait]
impl ProcessHandle for Box<dyn ProcessHandle> {
    fn pid(&self) -> Option<ProcessId> {
        (**self).pid()
    }

    fn command(&self) -> &str {
        (**self).command()
    }

    async fn wait(&mut self) -> std::io::Result<ExitDisposition> {
        (**self).wait().await
    }
}

/// Kill forwarding, independent of the exit-waiting handle so a kill can be
/// delivered while a wait is in flight.
///
/// A process that has already exited is not an error.
#[async_trait]
pub trait ProcessKiller: Send + Sync {
    async fn kill(&self, signal: KillSignal) -> std::io::Result<()>;
}

#[async_trait]
impl ProcessKiller for Box<dyn ProcessKiller> {
    async fn kill(&self, signal: KillSignal) -> std::io::Result<()> {
        (**self).kill(signal).await
    }
}

/// The three independent byte channels and the termination handle obtained
/// from the process-execution collaborator for one spawned process.
///
/// The stream holds these only until its terminal event; the reaper releases
/// every one of them once `close` has fired.
pub struct SpawnedProcess {
    /// The process's input channel (caller -> process)
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    /// The process's output channel (process -> caller)
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    /// The process's error-output channel, accumulated for diagnostics
    pub error_output: Box<dyn AsyncRead + Send + Unpin>,
    /// Exit-notification handle
    pub handle: Box<dyn ProcessHandle>,
    /// Kill forwarding for this process
    pub killer: Box<dyn ProcessKiller>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess").finish_non_exhaustive()
    }
}

/// The process-execution collaborator: given a command and argument list,
/// produces the three byte channels plus a termination handle.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, config: &SpawnConfig) -> Result<SpawnedProcess, StreamError>;
}

/// Factory trait for creating platform-specific spawners
pub trait SpawnerFactory {
    /// The type of spawner this factory creates
    type Spawner: ProcessSpawner;

    /// Create a spawner for the current platform
    fn create_spawner() -> Self::Spawner;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
