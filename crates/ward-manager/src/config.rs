//! Container configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ward_index::DEFAULT_CHUNK_WORKERS;

/// Settings for a [`RegionContainer`](crate::RegionContainer).
///
/// Durations are whole seconds in the JSON form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// How often worlds that failed to load are retried.
    #[serde(with = "secs")]
    pub load_retry_interval: Duration,
    /// How often changed regions are saved.
    #[serde(with = "secs")]
    pub save_interval: Duration,
    /// Cap on the per-world retry delay after repeated failures.
    #[serde(with = "secs")]
    pub max_backoff: Duration,
    /// Worker threads per chunk cache.
    pub chunk_workers: usize,
    pub use_chunk_cache: bool,
    pub use_rtree: bool,
    /// How long shutdown waits for background work.
    #[serde(with = "secs")]
    pub shutdown_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            load_retry_interval: Duration::from_secs(30),
            save_interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            chunk_workers: DEFAULT_CHUNK_WORKERS,
            use_chunk_cache: true,
            use_rtree: true,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ContainerConfig {
    /// Read `WARD_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ContainerConfig::from_env`] with an injected variable
    /// source. Missing or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(default, Duration::from_secs)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(default)
        };

        Self {
            load_retry_interval: secs("WARD_LOAD_RETRY_SECS", defaults.load_retry_interval),
            save_interval: secs("WARD_SAVE_SECS", defaults.save_interval),
            max_backoff: secs("WARD_MAX_BACKOFF_SECS", defaults.max_backoff),
            chunk_workers: lookup("WARD_CHUNK_WORKERS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.chunk_workers),
            use_chunk_cache: flag("WARD_CHUNK_CACHE", defaults.use_chunk_cache),
            use_rtree: flag("WARD_RTREE", defaults.use_rtree),
            shutdown_timeout: secs("WARD_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout),
        }
    }

    /// Parse the JSON form. Absent fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.load_retry_interval, Duration::from_secs(30));
        assert_eq!(config.save_interval, Duration::from_secs(30));
        assert_eq!(config.chunk_workers, DEFAULT_CHUNK_WORKERS);
        assert!(config.use_chunk_cache && config.use_rtree);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("WARD_SAVE_SECS", "5"),
            ("WARD_CHUNK_WORKERS", "2"),
            ("WARD_CHUNK_CACHE", "off"),
            ("WARD_LOAD_RETRY_SECS", "soon"),
            ("WARD_RTREE", "maybe"),
        ]
        .into_iter()
        .collect();
        let config = ContainerConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_owned()));

        assert_eq!(config.save_interval, Duration::from_secs(5));
        assert_eq!(config.chunk_workers, 2);
        assert!(!config.use_chunk_cache);
        assert_eq!(config.load_retry_interval, Duration::from_secs(30));
        assert!(config.use_rtree);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ContainerConfig::from_lookup(|k| (k == "WARD_CHUNK_WORKERS").then(|| "0".to_owned()));
        assert_eq!(config.chunk_workers, DEFAULT_CHUNK_WORKERS);
    }

    #[test]
    fn test_json() {
        let config = ContainerConfig::from_json(r#"{"save_interval": 60, "use_rtree": false}"#).unwrap();
        assert_eq!(config.save_interval, Duration::from_secs(60));
        assert!(!config.use_rtree);
        assert_eq!(config.max_backoff, Duration::from_secs(300));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"save_interval\":60"));
        assert_eq!(ContainerConfig::from_json(&json).unwrap(), config);

        assert!(ContainerConfig::from_json("{\"save_interval\": \"soon\"}").is_err());
    }
}
