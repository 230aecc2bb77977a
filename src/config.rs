use crate::format::ByteOrder;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Knobs for the streaming engine. Every field can be changed between frames through the [`Nexus`](crate::Nexus) setters.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Screen-space error (in pixels) below which nodes are not refined.
    pub target_error: f32,
    /// Node requests allowed in flight at once.
    pub max_pending_requests: usize,
    /// Byte budget for resident node payloads.
    pub max_cache_bytes: u64,
    /// Cost budget for one frame's selection, where a node costs `0.8 * vertices + faces`.
    pub draw_budget: f32,
    /// The traversal gives up after this many nodes fail to expand.
    pub max_blocked: usize,
    /// Hard cap on heap pops in one traversal.
    pub max_visits: usize,
    /// Failed fetches of the same node or texture before it is given up on.
    pub max_retries: u32,
    /// Frames to wait after the first failure. Doubles on every further failure.
    pub retry_backoff_frames: u64,
    pub byte_order: ByteOrder,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            target_error: 2.0,
            max_pending_requests: 3,
            max_cache_bytes: 512 << 20,
            draw_budget: (5 << 20) as f32,
            max_blocked: 3,
            max_visits: 1 << 20,
            max_retries: 4,
            retry_backoff_frames: 2,
            byte_order: ByteOrder::Little,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

/// Top-level settings for a host application.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub streaming: StreamingConfig,
    /// Threads in the fetch and decode pool.
    pub fetch_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            fetch_threads: 4,
        }
    }
}

impl Config {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;

        Ok(ron::de::from_str(&text)?)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config =
            ron::de::from_str("(streaming: (target_error: 4.0, byte_order: Big), fetch_threads: 2)").unwrap();
        assert_eq!(config.fetch_threads, 2);
        assert_eq!(config.streaming.target_error, 4.0);
        assert_eq!(config.streaming.byte_order, ByteOrder::Big);
        assert_eq!(config.streaming.max_pending_requests, 3);
        assert_eq!(config.streaming.max_cache_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn round_trips_through_ron() {
        let config = Config::default();
        let text = ron::ser::to_string(&config).unwrap();
        assert_eq!(ron::de::from_str::<Config>(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Config::read_file("/nonexistent/nexus.ron"),
            Err(ConfigError::Io(_))
        ));
    }
}
