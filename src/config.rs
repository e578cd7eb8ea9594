//! Cache and dispatcher configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expected number of subscribed tags.
    pub initial_capacity: usize,

    /// Ask the supervision service to refresh producer health before an
    /// explicit refresh.
    pub refresh_supervision_on_refresh: bool,

    /// After leaving history mode, send the current live state to every
    /// listener moved back onto the live cache.
    pub notify_on_live_resume: bool,

    /// Reason attached to tags the server does not know.
    pub unknown_tag_reason: String,

    /// Reason attached to all tags while the broker connection is lost.
    pub broker_down_reason: String,

    /// Reason attached to all tags while the server heartbeat is missing.
    pub heartbeat_expired_reason: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            refresh_supervision_on_refresh: true,
            notify_on_live_resume: true,
            unknown_tag_reason: "Tag is not known by the system".to_string(),
            broker_down_reason: "JMS connection lost.".to_string(),
            heartbeat_expired_reason: "Server heartbeat has expired.".to_string(),
        }
    }
}

impl CacheConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Configuration of the push delivery thread.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Max queued updates before publishers block.
    pub buffer_size: usize,

    /// Name of the delivery thread.
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            thread_name: "tag-push-dispatcher".to_string(),
        }
    }
}
