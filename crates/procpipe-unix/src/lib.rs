//! Unix implementation of the procpipe process-execution collaborator

mod unix_spawner;

pub use unix_spawner::{UnixProcessHandle, UnixProcessSpawner, UnixSpawnerFactory};

#[cfg(unix)]
pub use unix_spawner::UnixProcessKiller;
