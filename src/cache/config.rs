//! Identity cache configuration.

use serde::Deserialize;

/// Identity cache behaviour, built from the `[cache]` settings section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Remember ids confirmed absent until the next `clear()`.
    ///
    /// A row inserted behind the cache's back during the same request stays
    /// invisible to `lookup` while this is on.
    pub cache_negative_lookups: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_negative_lookups: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            cache_negative_lookups: settings.cache_negative_lookups,
        }
    }
}
