use procpipe_core::{ProcessSpawner, SpawnerFactory};
use std::sync::Arc;
use tracing::debug;

/// Platform-independent factory that selects the appropriate spawner
/// implementation at compile time
pub struct PlatformSpawnerFactory;

impl SpawnerFactory for PlatformSpawnerFactory {
    #[cfg(unix)]
    type Spawner = procpipe_unix::UnixProcessSpawner;

    #[cfg(windows)]
    type Spawner = procpipe_windows::WindowsProcessSpawner;

    fn create_spawner() -> Self::Spawner {
        #[cfg(unix)]
        return procpipe_unix::UnixSpawnerFactory::create_spawner();

        #[cfg(windows)]
        return procpipe_windows::WindowsSpawnerFactory::create_spawner();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return procpipe_unix::UnixSpawnerFactory::platform_name();

        #[cfg(windows)]
        return procpipe_windows::WindowsSpawnerFactory::platform_name();
    }
}

/// Convenience function to create the platform-appropriate spawner
pub fn default_spawner() -> Arc<dyn ProcessSpawner> {
    debug!(
        "creating {} process spawner",
        PlatformSpawnerFactory::platform_name()
    );
    Arc::new(PlatformSpawnerFactory::create_spawner())
}
