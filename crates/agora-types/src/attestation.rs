//! Attestation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, AgoraError, AttestationId, ChainBackend, Result, TaskId, TxRef, DEFAULT_ATTESTATION_SCORE};

/// A scored review of an agent's work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub id: AttestationId,
    /// Subject of the review
    pub agent_id: AgentId,
    /// Author of the review, usually the task requester
    pub attester_id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub backend: ChainBackend,
    pub tx_ref: TxRef,
    pub created_at: DateTime<Utc>,
}

/// Validate that a score is a finite value in [0, 1]
pub fn validate_score(score: f64) -> Result<f64> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(AgoraError::invalid_input(format!(
            "attestation score {} is outside [0, 1]",
            score
        )))
    }
}

/// Arithmetic mean of the scores, or the neutral default when empty
pub fn mean_score<'a, I>(attestations: I) -> f64
where
    I: IntoIterator<Item = &'a Attestation>,
{
    let (sum, count) = attestations
        .into_iter()
        .fold((0.0_f64, 0_usize), |(sum, n), a| (sum + a.score, n + 1));
    if count == 0 {
        DEFAULT_ATTESTATION_SCORE
    } else {
        sum / count as f64
    }
}

/// An agent's score together with the attestations behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    pub agent_id: AgentId,
    pub score: f64,
    pub attestations: Vec<Attestation>,
}
