//! Agora Reputation - Attestation history to trust score
//!
//! An agent's attestation score is the arithmetic mean of every attestation
//! recorded about it, or 0.5 when there are none. It is recomputed and
//! persisted each time an attestation is recorded.

use std::sync::Arc;

use agora_chain::GatewayRegistry;
use agora_store::EntityStore;
use agora_types::{
    mean_score, validate_score, AgentId, AgoraError, Attestation, AttestationId, Reputation,
    Result, TaskId, Warning,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

/// A recorded attestation and the subject's recomputed score
#[derive(Debug, Clone, Serialize)]
pub struct AttestationOutcome {
    pub attestation: Attestation,
    pub score: f64,
    pub warnings: Vec<Warning>,
}

/// Records attestations and keeps each agent's score current.
///
/// The settlement backend is called before an attestation is stored, so the
/// persisted row already holds its reference and is never updated.
pub struct ReputationAggregator {
    store: Arc<dyn EntityStore>,
    gateways: Arc<GatewayRegistry>,
}

impl ReputationAggregator {
    pub fn new(store: Arc<dyn EntityStore>, gateways: Arc<GatewayRegistry>) -> Self {
        Self { store, gateways }
    }

    /// Record an attestation about `agent_id` and refresh its score.
    ///
    /// The backend call happens first so the stored attestation carries its
    /// reference and is never rewritten. A zero reference is reported as a
    /// warning; the attestation counts either way.
    pub async fn record_attestation(
        &self,
        agent_id: &AgentId,
        attester_id: &AgentId,
        score: f64,
        task_id: Option<TaskId>,
        metadata: Option<serde_json::Value>,
    ) -> Result<AttestationOutcome> {
        let score = validate_score(score)?;
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AgoraError::not_found("agent", agent_id))?;

        let tx_ref = self
            .gateways
            .resolve(agent.deployed_chain)
            .attestation()
            .record_attestation(agent_id, attester_id, score, metadata.as_ref())
            .await;

        let mut warnings = Vec::new();
        if tx_ref.is_zero() {
            warn!(agent_id = %agent_id, "Attestation not confirmed on settlement backend");
            warnings.push(Warning::unsettled("record_attestation"));
        }

        let attestation = Attestation {
            id: AttestationId::new(),
            agent_id: *agent_id,
            attester_id: *attester_id,
            task_id,
            score,
            metadata,
            backend: agent.deployed_chain,
            tx_ref,
            created_at: Utc::now(),
        };
        self.store.insert_attestation(&attestation).await?;

        let score = self.recompute_score(agent_id).await?;
        info!(
            agent_id = %agent_id,
            attester_id = %attester_id,
            attestation_score = attestation.score,
            reputation = score,
            "Attestation recorded"
        );

        Ok(AttestationOutcome {
            attestation,
            score,
            warnings,
        })
    }

    pub async fn get_agent_reputation(&self, agent_id: &AgentId) -> Result<Reputation> {
        if self.store.get_agent(agent_id).await?.is_none() {
            return Err(AgoraError::not_found("agent", agent_id));
        }
        let attestations = self.store.list_attestations(agent_id).await?;
        Ok(Reputation {
            agent_id: *agent_id,
            score: mean_score(&attestations),
            attestations,
        })
    }

    /// Recompute and persist the score from the full attestation history
    pub async fn recompute_score(&self, agent_id: &AgentId) -> Result<f64> {
        let attestations = self.store.list_attestations(agent_id).await?;
        let score = mean_score(&attestations);
        if !self.store.set_attestation_score(agent_id, score).await? {
            return Err(AgoraError::not_found("agent", agent_id));
        }
        Ok(score)
    }
}
