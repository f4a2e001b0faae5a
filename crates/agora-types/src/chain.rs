//! Settlement backend types
//!
//! A settlement backend is a blockchain network that can fulfil the escrow,
//! attestation, payment, identity, and scheduling contracts. The core never
//! inspects a transaction reference beyond [`TxRef::is_zero`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{AgoraError, ChainTxId};

/// Supported settlement backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBackend {
    Ethereum,
    Base,
    Polygon,
    Solana,
    Hedera,
}

impl ChainBackend {
    pub const ALL: [ChainBackend; 5] = [
        Self::Ethereum,
        Self::Base,
        Self::Polygon,
        Self::Solana,
        Self::Hedera,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Base => "base",
            Self::Polygon => "polygon",
            Self::Solana => "solana",
            Self::Hedera => "hedera",
        }
    }

    /// EVM backends share the `0x`-prefixed 32-byte hash scheme
    pub fn is_evm(&self) -> bool {
        matches!(self, Self::Ethereum | Self::Base | Self::Polygon)
    }
}

impl Default for ChainBackend {
    fn default() -> Self {
        Self::Base
    }
}

impl fmt::Display for ChainBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainBackend {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "base" => Ok(Self::Base),
            "polygon" | "matic" => Ok(Self::Polygon),
            "solana" | "sol" => Ok(Self::Solana),
            "hedera" | "hbar" => Ok(Self::Hedera),
            other => Err(AgoraError::invalid_input(format!(
                "unknown settlement backend '{}'",
                other
            ))),
        }
    }
}

/// Whether a gateway talks to a real network or simulates it locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    Live,
    Stub,
}

impl fmt::Display for ChainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Stub => f.write_str("stub"),
        }
    }
}

/// A transaction reference returned by a settlement backend.
///
/// The zero reference is the sentinel for "settlement did not happen".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

const ZERO_TX_REF: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

impl TxRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn zero() -> Self {
        Self(ZERO_TX_REF.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_TX_REF || self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of an entry in the chain transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(AgoraError::invalid_input(format!("unknown tx status '{}'", other))),
        }
    }
}

/// Append-only audit record of a gateway call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub id: ChainTxId,
    /// Agent (or other subject) the call was made on behalf of
    pub agent_id: String,
    pub backend: ChainBackend,
    /// Gateway method name, e.g. `lock_funds`
    pub method: String,
    pub tx_ref: Option<TxRef>,
    pub status: TxStatus,
    pub params: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainTransaction {
    pub fn pending(
        agent_id: impl Into<String>,
        backend: ChainBackend,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ChainTxId::new(),
            agent_id: agent_id.into(),
            backend,
            method: method.into(),
            tx_ref: None,
            status: TxStatus::Pending,
            params,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True for failed entries or entries that settled with the zero reference
    pub fn needs_attention(&self) -> bool {
        self.status == TxStatus::Failed || self.tx_ref.as_ref().map_or(false, TxRef::is_zero)
    }
}

/// Filter for transaction log queries
#[derive(Debug, Clone, Default)]
pub struct ChainTxFilter {
    pub agent_id: Option<String>,
    pub status: Option<TxStatus>,
    pub method: Option<String>,
    pub limit: Option<usize>,
}

impl ChainTxFilter {
    pub fn matches(&self, tx: &ChainTransaction) -> bool {
        self.agent_id.as_deref().map_or(true, |a| tx.agent_id == a)
            && self.status.map_or(true, |s| tx.status == s)
            && self.method.as_deref().map_or(true, |m| tx.method == m)
    }
}
