//! Cache configuration.
//!
//! Default freshness and refetch policy applied to every read via
//! `cms-cache.toml`.

use std::time::Duration;

use serde::Deserialize;

use super::entry::Staleness;
use super::fetch::FetchOptions;

// Default values for cache configuration
const DEFAULT_REFETCH_ON_FOCUS: bool = true;
const DEFAULT_REFETCH_INTERVAL_MS: u64 = 0;

/// Cache configuration from `cms-cache.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds after which fetched data turns stale. Unset keeps data fresh
    /// until a write invalidates it.
    pub stale_after_secs: Option<u64>,
    /// Refetch stale views when the application regains focus.
    pub refetch_on_focus: bool,
    /// Interval (ms) for background refetching of read views. Zero disables it.
    pub refetch_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: None,
            refetch_on_focus: DEFAULT_REFETCH_ON_FOCUS,
            refetch_interval_ms: DEFAULT_REFETCH_INTERVAL_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            stale_after_secs: settings.stale_after_secs,
            refetch_on_focus: settings.refetch_on_focus,
            refetch_interval_ms: settings.refetch_interval_ms,
        }
    }
}

impl CacheConfig {
    pub fn staleness(&self) -> Staleness {
        match self.stale_after_secs {
            Some(secs) => Staleness::After(Duration::from_secs(secs)),
            None => Staleness::Never,
        }
    }

    /// Returns the refetch interval, or `None` when disabled.
    pub fn refetch_interval(&self) -> Option<Duration> {
        (self.refetch_interval_ms > 0).then(|| Duration::from_millis(self.refetch_interval_ms))
    }

    /// Fetch options every read starts from.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            stale_after: self.staleness(),
            refetch_on_focus: self.refetch_on_focus,
            refetch_interval: self.refetch_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_never_go_stale() {
        let config = CacheConfig::default();
        let options = config.fetch_options();

        assert_eq!(options.stale_after, Staleness::Never);
        assert!(options.refetch_on_focus);
        assert_eq!(options.refetch_interval, None);
    }

    #[test]
    fn configured_windows_become_durations() {
        let config = CacheConfig {
            stale_after_secs: Some(0),
            refetch_on_focus: false,
            refetch_interval_ms: 1500,
        };
        let options = config.fetch_options();

        assert_eq!(options.stale_after, Staleness::After(Duration::ZERO));
        assert_eq!(options.refetch_interval, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn deserializes_with_defaults_for_missing_fields() {
        let config: CacheConfig =
            serde_json::from_value(serde_json::json!({"stale_after_secs": 30})).expect("config");

        assert_eq!(config.stale_after_secs, Some(30));
        assert!(config.refetch_on_focus);
        assert_eq!(config.refetch_interval_ms, 0);
    }
}
