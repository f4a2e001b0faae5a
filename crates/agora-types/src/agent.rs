//! Agent types
//!
//! An agent is a registered economic participant with a capability set,
//! a settlement balance, and a reputation score.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::{AgentId, AgoraError, ChainBackend, TxRef};

/// Score assigned to agents with no attestations
pub const DEFAULT_ATTESTATION_SCORE: f64 = 0.5;

/// Role an agent plays in the marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Routes work to other agents
    Router,
    /// Performs tasks
    Executor,
    /// Handles settlement on behalf of others
    Settler,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Executor => "executor",
            Self::Settler => "settler",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "router" => Ok(Self::Router),
            "executor" => Ok(Self::Executor),
            "settler" => Ok(Self::Settler),
            other => Err(AgoraError::invalid_input(format!("unknown agent role '{}'", other))),
        }
    }
}

/// Operational status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Processing,
    Dormant,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Dormant => "dormant",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "processing" => Ok(Self::Processing),
            "dormant" => Ok(Self::Dormant),
            other => Err(AgoraError::invalid_input(format!("unknown agent status '{}'", other))),
        }
    }
}

/// A registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub capabilities: BTreeSet<String>,
    /// Mean of all attestation scores, in [0, 1]
    pub attestation_score: f64,
    /// Confirmed local ledger balance; may go negative (debit-before-settlement)
    pub settlement_balance: Decimal,
    pub status: AgentStatus,
    pub deployed_chain: ChainBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_signing_key: Option<String>,
    /// Whether the agent is registered on its settlement backend
    pub chain_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_tx_ref: Option<TxRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// True when the agent holds every capability in `required`
    pub fn has_capabilities<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        required.into_iter().all(|c| self.capabilities.contains(c))
    }
}

/// Registration request for a new agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub role: AgentRole,
    pub capabilities: BTreeSet<String>,
    pub deployed_chain: ChainBackend,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub encrypted_signing_key: Option<String>,
}

impl NewAgent {
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            role,
            capabilities: BTreeSet::new(),
            deployed_chain: ChainBackend::default(),
            wallet_address: None,
            encrypted_signing_key: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_chain(mut self, backend: ChainBackend) -> Self {
        self.deployed_chain = backend;
        self
    }

    pub fn with_wallet(mut self, address: impl Into<String>) -> Self {
        self.wallet_address = Some(address.into());
        self
    }

    /// Build the initial agent record: zero balance, neutral score, idle
    pub fn into_agent(self) -> Agent {
        let now = Utc::now();
        Agent {
            id: AgentId::new(),
            name: self.name,
            role: self.role,
            capabilities: self.capabilities,
            attestation_score: DEFAULT_ATTESTATION_SCORE,
            settlement_balance: Decimal::ZERO,
            status: AgentStatus::Idle,
            deployed_chain: self.deployed_chain,
            identity_token: None,
            wallet_address: self.wallet_address,
            encrypted_signing_key: self.encrypted_signing_key,
            chain_registered: false,
            chain_tx_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter for agent discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentQuery {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub role: Option<AgentRole>,
    #[serde(default)]
    pub min_reputation: Option<f64>,
}

impl AgentQuery {
    pub fn matches(&self, agent: &Agent) -> bool {
        agent.has_capabilities(&self.capabilities)
            && self.role.map_or(true, |r| agent.role == r)
            && self
                .min_reputation
                .map_or(true, |min| agent.attestation_score >= min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coder() -> Agent {
        NewAgent::new("coder", AgentRole::Executor)
            .with_capabilities(["rust", "review"])
            .into_agent()
    }

    #[test]
    fn new_agents_start_neutral() {
        let agent = coder();
        assert_eq!(agent.attestation_score, DEFAULT_ATTESTATION_SCORE);
        assert_eq!(agent.settlement_balance, Decimal::ZERO);
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(!agent.chain_registered);
    }

    #[test]
    fn query_requires_every_capability() {
        let agent = coder();
        let query = AgentQuery {
            capabilities: vec!["rust".into()],
            ..Default::default()
        };
        assert!(query.matches(&agent));

        let query = AgentQuery {
            capabilities: vec!["rust".into(), "python".into()],
            ..Default::default()
        };
        assert!(!query.matches(&agent));
    }

    #[test]
    fn query_filters_role_and_reputation() {
        let agent = coder();
        let query = AgentQuery {
            role: Some(AgentRole::Router),
            ..Default::default()
        };
        assert!(!query.matches(&agent));

        let query = AgentQuery {
            min_reputation: Some(0.6),
            ..Default::default()
        };
        assert!(!query.matches(&agent));
    }

    #[test]
    fn signing_key_is_never_serialized() {
        let mut agent = coder();
        agent.encrypted_signing_key = Some("ciphertext".into());
        let json = serde_json::to_string(&agent).unwrap();
        assert!(!json.contains("ciphertext"));
    }
}
