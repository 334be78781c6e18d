use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Buffering configuration for a stream's channels.
///
/// The event channel is bounded and is the backpressure mechanism: the
/// sequencer stops draining process output while the consumer lags
/// `event_capacity` events behind, which in turn lets the OS pipe throttle
/// the process itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Capacity of the bounded lifecycle-event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Read size for output and error-output chunks (in bytes)
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            read_chunk_bytes: default_read_chunk_bytes(),
        }
    }
}

impl ChannelConfig {
    /// Create a new ChannelConfig with sensible defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.event_capacity == 0 {
            return Err(anyhow::anyhow!("event_capacity must be at least 1"));
        }

        if self.read_chunk_bytes == 0 {
            return Err(anyhow::anyhow!("read_chunk_bytes must be at least 1"));
        }

        if self.read_chunk_bytes > 16 * 1024 * 1024 {
            return Err(anyhow::anyhow!("read_chunk_bytes should not exceed 16 MiB"));
        }

        Ok(())
    }
}

/// Configuration for one process spawn
#[derive(Default, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct SpawnConfig {
    pub command: String,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[builder(default)]
    pub channels: ChannelConfig,
}

impl SpawnConfig {
    pub fn builder() -> SpawnConfigBuilder {
        SpawnConfigBuilder::default()
    }

    /// Convenience constructor for the common command-plus-args case
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(
        command: impl Into<String>,
        args: I,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            working_directory: None,
            channels: ChannelConfig::default(),
        }
    }
}

impl SpawnConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

// Default value functions for serde
fn default_event_capacity() -> usize {
    64
}
fn default_read_chunk_bytes() -> usize {
    8 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channel_config() {
        let config = ChannelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.read_chunk_bytes, 8 * 1024);
    }

    #[test]
    fn test_invalid_channel_config() {
        let config = ChannelConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ChannelConfig {
            read_chunk_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ChannelConfig {
            read_chunk_bytes: 32 * 1024 * 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_config_serialization() {
        let config = ChannelConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ChannelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);

        // Omitted fields fall back to defaults
        let deserialized: ChannelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(deserialized, ChannelConfig::default());
    }

    #[test]
    fn test_spawn_config_builder() {
        let config = SpawnConfig::builder()
            .command("identify")
            .args(["-format", "%m", "-"])
            .env("LC_ALL", "C")
            .build()
            .expect("Failed to build SpawnConfig");

        assert_eq!(config.command, "identify");
        assert_eq!(config.args, vec!["-format", "%m", "-"]);
        assert_eq!(config.env.get("LC_ALL").map(String::as_str), Some("C"));
        assert!(config.working_directory.is_none());
    }

    #[test]
    fn test_spawn_config_convenience() {
        let config = SpawnConfig::new("cat", Vec::<String>::new());
        assert_eq!(config.command, "cat");
        assert!(config.args.is_empty());
        assert_eq!(config.channels, ChannelConfig::default());
    }
}
