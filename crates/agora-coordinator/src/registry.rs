//! Agent registry
//!
//! Registration persists the agent first. Identity minting, gas funding and
//! backend registration are best-effort: each one that does not go through
//! is reported as a [`Warning`] on the returned outcome.

use std::sync::Arc;

use agora_chain::GatewayRegistry;
use agora_escrow::{EscrowLedger, EscrowManager};
use agora_store::{AgentChainState, EntityStore};
use agora_types::{
    Agent, AgentId, AgentQuery, AgentStatus, AgoraError, NewAgent, Result, Warning,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Native units sent to a new agent's wallet for transaction fees
    #[serde(default = "default_gas_grant")]
    pub gas_grant: Decimal,
}

fn default_gas_grant() -> Decimal {
    Decimal::new(1, 2)
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            gas_grant: default_gas_grant(),
        }
    }
}

/// A registered (or deregistered) agent and the side effects that failed
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub agent: Agent,
    pub warnings: Vec<Warning>,
}

/// Confirmed balance next to what is still tied up in locked escrows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceView {
    pub agent_id: AgentId,
    pub settlement_balance: Decimal,
    pub pending_escrow: Decimal,
}

pub struct AgentRegistry {
    store: Arc<dyn EntityStore>,
    gateways: Arc<GatewayRegistry>,
    escrow: Arc<EscrowLedger>,
    config: RegistrationConfig,
}

impl AgentRegistry {
    pub fn new(
        store: Arc<dyn EntityStore>,
        gateways: Arc<GatewayRegistry>,
        escrow: Arc<EscrowLedger>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            escrow,
            config,
        }
    }

    pub async fn register_agent(&self, request: NewAgent) -> Result<RegistrationOutcome> {
        if request.name.trim().is_empty() {
            return Err(AgoraError::invalid_input("agent name must not be empty"));
        }

        let mut agent = request.into_agent();
        self.store.insert_agent(&agent).await?;

        let gateway = self.gateways.resolve(agent.deployed_chain);
        let mut warnings = Vec::new();

        let metadata = json!({
            "name": agent.name,
            "role": agent.role,
            "capabilities": agent.capabilities,
        });
        let minted = gateway
            .identity()
            .mint_identity_token(&agent.id, &metadata)
            .await;
        let identity_token = if minted.tx_ref.is_zero() {
            warnings.push(Warning::unsettled("mint_identity_token"));
            None
        } else {
            minted.token_id
        };

        if let Some(wallet) = agent.wallet_address.as_deref() {
            if self.config.gas_grant > Decimal::ZERO {
                let tx_ref = gateway.payment().fund_gas(wallet, self.config.gas_grant).await;
                if tx_ref.is_zero() {
                    warnings.push(Warning::unsettled("fund_gas"));
                }
            }
        }

        let registration = gateway.identity().register_agent(&agent).await;
        let state = if registration.is_zero() {
            warnings.push(Warning::unsettled("register_agent"));
            AgentChainState {
                identity_token,
                chain_registered: false,
                chain_tx_ref: None,
            }
        } else {
            AgentChainState {
                identity_token,
                chain_registered: true,
                chain_tx_ref: Some(registration),
            }
        };
        self.store.set_agent_chain_state(&agent.id, state.clone()).await?;
        agent.identity_token = state.identity_token;
        agent.chain_registered = state.chain_registered;
        agent.chain_tx_ref = state.chain_tx_ref;

        if !warnings.is_empty() {
            warn!(
                agent_id = %agent.id,
                failed = warnings.len(),
                "Agent registered with incomplete backend setup"
            );
        }
        info!(
            agent_id = %agent.id,
            name = %agent.name,
            role = %agent.role,
            backend = %agent.deployed_chain,
            mode = %gateway.mode(),
            "Agent registered"
        );
        Ok(RegistrationOutcome { agent, warnings })
    }

    pub async fn get_agent(&self, agent_id: &AgentId) -> Result<Agent> {
        self.store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AgoraError::not_found("agent", agent_id))
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.store.list_agents().await?)
    }

    /// Agents matching `query`, best reputation first
    pub async fn discover_agents(&self, query: &AgentQuery) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| query.matches(a))
            .collect();
        agents.sort_by(|a, b| b.attestation_score.total_cmp(&a.attestation_score));
        Ok(agents)
    }

    pub async fn update_agent_status(&self, agent_id: &AgentId, status: AgentStatus) -> Result<Agent> {
        if !self.store.set_agent_status(agent_id, status).await? {
            return Err(AgoraError::not_found("agent", agent_id));
        }
        info!(agent_id = %agent_id, status = %status, "Agent status updated");
        self.get_agent(agent_id).await
    }

    /// Drop the agent's registration on its backend. The local record stays.
    pub async fn deregister_agent(&self, agent_id: &AgentId) -> Result<RegistrationOutcome> {
        let mut agent = self.get_agent(agent_id).await?;
        let tx_ref = self
            .gateways
            .resolve(agent.deployed_chain)
            .identity()
            .deregister_agent(agent_id)
            .await;

        let mut warnings = Vec::new();
        if tx_ref.is_zero() {
            warnings.push(Warning::unsettled("deregister_agent"));
            return Ok(RegistrationOutcome { agent, warnings });
        }

        let state = AgentChainState {
            identity_token: agent.identity_token.clone(),
            chain_registered: false,
            chain_tx_ref: Some(tx_ref),
        };
        self.store.set_agent_chain_state(agent_id, state.clone()).await?;
        agent.chain_registered = false;
        agent.chain_tx_ref = state.chain_tx_ref;

        info!(agent_id = %agent_id, "Agent deregistered");
        Ok(RegistrationOutcome { agent, warnings })
    }

    /// External top-up of an agent's settlement balance
    pub async fn credit_agent(&self, agent_id: &AgentId, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(AgoraError::invalid_input(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        let balance = self
            .store
            .adjust_balance(agent_id, amount)
            .await?
            .ok_or_else(|| AgoraError::not_found("agent", agent_id))?;
        info!(agent_id = %agent_id, amount = %amount, balance = %balance, "Agent credited");
        Ok(balance)
    }

    pub async fn agent_balance(&self, agent_id: &AgentId) -> Result<BalanceView> {
        let agent = self.get_agent(agent_id).await?;
        Ok(BalanceView {
            agent_id: agent.id,
            settlement_balance: agent.settlement_balance,
            pending_escrow: self.escrow.get_agent_pending_escrows(agent_id).await?,
        })
    }
}
