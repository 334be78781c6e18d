#[cfg(unix)]
mod unix_impl {
    use async_trait::async_trait;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use procpipe_core::{
        ExitDisposition, KillSignal, ProcessHandle, ProcessId, ProcessKiller, ProcessSpawner,
        SpawnConfig, SpawnedProcess, SpawnerFactory, StreamError,
    };
    use std::process::Stdio;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String) -> Self {
            Self { child, command }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn pid(&self) -> Option<ProcessId> {
            self.child.id()
        }

        fn command(&self) -> &str {
            &self.command
        }

        async fn wait(&mut self) -> std::io::Result<ExitDisposition> {
            let status = self.child.wait().await?;
            Ok(ExitDisposition::from_status(status))
        }
    }

    /// Sends signals by pid, independently of the handle that is waiting on
    /// the exit status. A pid whose process has already exited maps to Ok.
    pub struct UnixProcessKiller {
        pid: Option<ProcessId>,
    }

    #[async_trait]
    impl ProcessKiller for UnixProcessKiller {
        async fn kill(&self, kill: KillSignal) -> std::io::Result<()> {
            let Some(pid) = self.pid else {
                debug!("process already exited, nothing to kill");
                return Ok(());
            };

            let nix_pid = NixPid::from_raw(pid as i32);
            let sig = match kill {
                KillSignal::Term => Signal::SIGTERM,
                KillSignal::Kill => Signal::SIGKILL,
            };

            match signal::kill(nix_pid, sig) {
                Ok(()) => {
                    info!("sent {sig} to process {pid}");
                    Ok(())
                }
                Err(nix::errno::Errno::ESRCH) => {
                    debug!("process {pid} not found (already terminated)");
                    Ok(())
                }
                Err(err) => {
                    warn!("failed to send {sig} to process {pid}: {err}");
                    Err(std::io::Error::from_raw_os_error(err as i32))
                }
            }
        }
    }

    /// Unix spawner backed by tokio's process support with all three stdio
    /// channels piped
    pub struct UnixProcessSpawner;

    #[async_trait]
    impl ProcessSpawner for UnixProcessSpawner {
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

            // Own process group so a forwarded signal reaches this process
            // rather than the caller's group
            cmd.process_group(0);

            let mut child = cmd.spawn().map_err(|source| StreamError::Spawn {
                command: config.command.clone(),
                source,
            })?;

            let pid = child.id();
            if let Some(pid) = pid {
                info!(
                    "spawned unix process: {} (PID: {pid}) with args: {:?}",
                    config.command, config.args
                );
            }

            let input = take_channel(&mut child.stdin, &config.command, "stdin")?;
            let output = take_channel(&mut child.stdout, &config.command, "stdout")?;
            let error_output = take_channel(&mut child.stderr, &config.command, "stderr")?;

            Ok(SpawnedProcess {
                input: Box::new(input),
                output: Box::new(output),
                error_output: Box::new(error_output),
                handle: Box::new(UnixProcessHandle::new(child, config.command.clone())),
                killer: Box::new(UnixProcessKiller { pid }),
            })
        }
    }

    fn take_channel<T>(slot: &mut Option<T>, command: &str, name: &str) -> Result<T, StreamError> {
        slot.take().ok_or_else(|| StreamError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other(format!("{name} channel was not captured")),
        })
    }

    /// Factory for creating Unix spawner instances
    pub struct UnixSpawnerFactory;

    impl SpawnerFactory for UnixSpawnerFactory {
        type Spawner = UnixProcessSpawner;

        fn create_spawner() -> UnixProcessSpawner {
            UnixProcessSpawner
        }

        fn platform_name() -> &'static str {
            "unix"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_spawn_and_wait_clean() {
            let spawner = UnixSpawnerFactory::create_spawner();
            let config = SpawnConfig::new("true", Vec::<String>::new());

            let mut spawned = spawner.spawn(&config).await.unwrap();
            assert!(spawned.handle.pid().is_some());
            assert_eq!(spawned.handle.command(), "true");

            let disposition = spawned.handle.wait().await.unwrap();
            assert_eq!(disposition, ExitDisposition::Clean);
        }

        #[tokio::test]
        async fn test_spawn_and_wait_nonzero() {
            let spawner = UnixSpawnerFactory::create_spawner();
            let config = SpawnConfig::new("sh", ["-c", "exit 3"]);

            let mut spawned = spawner.spawn(&config).await.unwrap();
            let disposition = spawned.handle.wait().await.unwrap();
            assert_eq!(disposition, ExitDisposition::Code(3));
        }

        #[tokio::test]
        async fn test_kill_reports_signal_death() {
            let spawner = UnixSpawnerFactory::create_spawner();
            let config = SpawnConfig::new("sleep", ["5"]);

            let mut spawned = spawner.spawn(&config).await.unwrap();
            spawned.killer.kill(KillSignal::Kill).await.unwrap();

            let disposition = spawned.handle.wait().await.unwrap();
            assert_eq!(disposition, ExitDisposition::Signal(9));
        }

        #[tokio::test]
        async fn test_kill_after_exit_is_ok() {
            let spawner = UnixSpawnerFactory::create_spawner();
            let config = SpawnConfig::new("true", Vec::<String>::new());

            let mut spawned = spawner.spawn(&config).await.unwrap();
            spawned.handle.wait().await.unwrap();
            assert!(spawned.killer.kill(KillSignal::Term).await.is_ok());
        }

        #[tokio::test]
        async fn test_spawn_missing_command_fails() {
            let spawner = UnixSpawnerFactory::create_spawner();
            let config = SpawnConfig::new("definitely-not-a-command", Vec::<String>::new());

            let err = spawner.spawn(&config).await.unwrap_err();
            assert!(err.is_bind_error());
        }
    }
}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessKiller, UnixProcessSpawner, UnixSpawnerFactory};

// Provide stub types for non-Unix systems so the crate still compiles
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessSpawner;

#[cfg(not(unix))]
pub struct UnixSpawnerFactory;
