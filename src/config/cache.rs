//! Agent cache configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default number of cached agent ids.
pub const DEFAULT_AGENT_CACHE_CAPACITY: usize = 1000;

/// Sizing of the agent id cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentCacheConfig {
    /// Maximum cached agents. 0 disables caching.
    pub capacity: usize,
    /// Seconds an entry stays valid. Unset means no expiry.
    pub ttl_secs: Option<u64>,
}

impl AgentCacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl Default for AgentCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_AGENT_CACHE_CAPACITY,
            ttl_secs: None,
        }
    }
}
