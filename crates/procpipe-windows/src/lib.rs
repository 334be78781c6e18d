//! Windows implementation of the procpipe process-execution collaborator.
//!
//! Windows has no signal numbers; both kill signals map to forced
//! termination, and a forcibly terminated process is reported as a signal
//! death so the event contract matches the Unix implementation.

#[cfg(windows)]
mod windows_impl {
    use async_trait::async_trait;
    use procpipe_core::{
        ExitDisposition, KillSignal, ProcessHandle, ProcessId, ProcessKiller, ProcessSpawner,
        SpawnConfig, SpawnedProcess, SpawnerFactory, StreamError,
    };
    use std::process::Stdio;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Windows-specific process handle implementation
    pub struct WindowsProcessHandle {
        child: Child,
        command: String,
        terminated: Arc<AtomicBool>,
    }

    impl WindowsProcessHandle {
        pub fn new(child: Child, command: String, terminated: Arc<AtomicBool>) -> Self {
            Self {
                child,
                command,
                terminated,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for WindowsProcessHandle {
        fn pid(&self) -> Option<ProcessId> {
            self.child.id()
        }

        fn command(&self) -> &str {
            &self.command
        }

        async fn wait(&mut self) -> std::io::Result<ExitDisposition> {
            let status = self.child.wait().await?;
            if self.terminated.load(Ordering::Acquire) {
                // Forced termination surfaces with an arbitrary exit code;
                // report it as a signal death to match the Unix contract
                return Ok(ExitDisposition::Signal(9));
            }
            Ok(ExitDisposition::from_status(status))
        }
    }

    /// Kills the process tree with `taskkill`, independently of the handle
    /// that is waiting on the exit status
    pub struct WindowsProcessKiller {
        pid: Option<ProcessId>,
        terminated: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ProcessKiller for WindowsProcessKiller {
        async fn kill(&self, kill: KillSignal) -> std::io::Result<()> {
            let Some(pid) = self.pid else {
                debug!("process already exited, nothing to kill");
                return Ok(());
            };

            // Mark first so a wait that resolves mid-kill still reports the
            // termination as a signal death
            self.terminated.store(true, Ordering::Release);
            info!(pid, "forcibly terminating process tree (requested {kill:?})");

            let status = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .output()
                .await?;
            if !status.status.success() {
                // Exits non-zero when the process is already gone
                debug!(pid, "taskkill reported {:?}", status.status.code());
            }
            Ok(())
        }
    }

    /// Windows spawner backed by tokio's process support with all three
    /// stdio channels piped
    pub struct WindowsProcessSpawner;

    #[async_trait]
    impl ProcessSpawner for WindowsProcessSpawner {
        async fn spawn(&self, config: &SpawnConfig) -> Result<SpawnedProcess, StreamError> {
            let mut cmd = Command::new(&config.command);
            cmd.args(&config.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            if let Some(dir) = &config.working_directory {
                cmd.current_dir(dir);
            }

            for (key, value) in &config.env {
                cmd.env(key, value);
            }

            let mut child = cmd.spawn().map_err(|source| StreamError::Spawn {
                command: config.command.clone(),
                source,
            })?;

            let pid = child.id();
            if let Some(pid) = pid {
                info!(
                    "spawned windows process: {} (PID: {pid}) with args: {:?}",
                    config.command, config.args
                );
            } else {
                warn!("process for {} exited before startup completed", config.command);
            }

            let input = take_channel(&mut child.stdin, &config.command, "stdin")?;
            let output = take_channel(&mut child.stdout, &config.command, "stdout")?;
            let error_output = take_channel(&mut child.stderr, &config.command, "stderr")?;

            let terminated = Arc::new(AtomicBool::new(false));
            Ok(SpawnedProcess {
                input: Box::new(input),
                output: Box::new(output),
                error_output: Box::new(error_output),
                handle: Box::new(WindowsProcessHandle::new(
                    child,
                    config.command.clone(),
                    Arc::clone(&terminated),
                )),
                killer: Box::new(WindowsProcessKiller { pid, terminated }),
            })
        }
    }

    fn take_channel<T>(slot: &mut Option<T>, command: &str, name: &str) -> Result<T, StreamError> {
        slot.take().ok_or_else(|| StreamError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other(format!("{name} channel was not captured")),
        })
    }

    /// Factory for creating Windows spawner instances
    pub struct WindowsSpawnerFactory;

    impl SpawnerFactory for WindowsSpawnerFactory {
        type Spawner = WindowsProcessSpawner;

        fn create_spawner() -> WindowsProcessSpawner {
            WindowsProcessSpawner
        }

        fn platform_name() -> &'static str {
            "windows"
        }
    }
}

// Re-export the Windows implementation when on Windows systems
#[cfg(windows)]
pub use windows_impl::{
    WindowsProcessHandle, WindowsProcessKiller, WindowsProcessSpawner, WindowsSpawnerFactory,
};

// Provide stub types for non-Windows systems so the crate still compiles
#[cfg(not(windows))]
pub struct WindowsProcessHandle;

#[cfg(not(windows))]
pub struct WindowsProcessSpawner;

#[cfg(not(windows))]
pub struct WindowsSpawnerFactory;
