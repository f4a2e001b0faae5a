//! Store configuration

use serde::{Deserialize, Serialize};

const MEMORY_URL: &str = "memory";

/// Entity store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `memory` for the in-process store, otherwise a SQLite URL
    /// (`sqlite://agora.db`, `sqlite::memory:`)
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum pooled connections (forced to 1 for in-memory SQLite)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Busy timeout for writers waiting on the database lock
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("AGORA_DATABASE_URL").unwrap_or_else(|_| default_url()),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            url: MEMORY_URL.to_string(),
            ..Self::default()
        }
    }

    pub fn sqlite(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_URL
    }

    /// SQLite databases that live only as long as their connection
    pub fn is_ephemeral_sqlite(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

fn default_url() -> String {
    "sqlite://agora.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout() -> u64 {
    5_000
}
