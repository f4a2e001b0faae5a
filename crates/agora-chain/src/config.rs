//! Gateway configuration
//!
//! A backend runs live only when its relay URL, contract address and signer
//! key are all present and the URL is an http(s) endpoint. Anything less
//! resolves to the stub adapter, unless `allow_stub_fallback` is off.

use std::collections::HashMap;

use agora_types::ChainBackend;
use serde::{Deserialize, Serialize};

/// Connection settings for one settlement backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// JSON-RPC relay endpoint
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    #[serde(skip_serializing)]
    pub signer_key: Option<String>,
    #[serde(default = "default_poll_ms")]
    pub confirmation_poll_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_confirmation_polls: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: None,
            signer_key: None,
            confirmation_poll_ms: default_poll_ms(),
            max_confirmation_polls: default_max_polls(),
        }
    }
}

impl BackendConfig {
    /// Read `AGORA_<BACKEND>_RPC_URL`, `AGORA_<BACKEND>_CONTRACT` and
    /// `AGORA_<BACKEND>_SIGNER_KEY`
    pub fn from_env(backend: ChainBackend) -> Self {
        let _ = dotenvy::dotenv();

        let prefix = format!("AGORA_{}", backend.as_str().to_uppercase());
        let var = |suffix: &str| {
            std::env::var(format!("{}_{}", prefix, suffix))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            rpc_url: var("RPC_URL"),
            contract_address: var("CONTRACT"),
            signer_key: var("SIGNER_KEY"),
            confirmation_poll_ms: var("POLL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_poll_ms),
            max_confirmation_polls: default_max_polls(),
        }
    }

    /// Everything a live adapter needs is present and well-formed
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Names of the settings that keep this backend out of live mode
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self
            .rpc_url
            .as_deref()
            .map_or(false, |u| u.starts_with("http://") || u.starts_with("https://"))
        {
            missing.push("rpc_url");
        }
        if self.contract_address.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("contract_address");
        }
        if self.signer_key.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("signer_key");
        }
        missing
    }
}

/// Gateway settings shared by every backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub default_backend: ChainBackend,
    /// Simulated confirmation delay for stub adapters
    #[serde(default = "default_stub_delay")]
    pub stub_delay_ms: u64,
    #[serde(default = "default_true")]
    pub allow_stub_fallback: bool,
    /// Keyed by backend name (`base`, `solana`, ...)
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            default_backend: ChainBackend::default(),
            stub_delay_ms: default_stub_delay(),
            allow_stub_fallback: true,
            backends: HashMap::new(),
        }
    }
}

impl ChainConfig {
    /// Stub everywhere with no simulated delay
    pub fn stub_only() -> Self {
        Self {
            stub_delay_ms: 0,
            ..Self::default()
        }
    }

    /// Configured settings for `backend`, falling back to the environment
    pub fn backend(&self, backend: ChainBackend) -> BackendConfig {
        self.backends
            .get(backend.as_str())
            .cloned()
            .unwrap_or_else(|| BackendConfig::from_env(backend))
    }

    pub fn with_backend(mut self, backend: ChainBackend, config: BackendConfig) -> Self {
        self.backends.insert(backend.as_str().to_string(), config);
        self
    }
}

fn default_poll_ms() -> u64 {
    2_000
}

fn default_max_polls() -> u32 {
    30
}

fn default_stub_delay() -> u64 {
    50
}

fn default_true() -> bool {
    true
}
