//! Escrow types
//!
//! An escrow holds a requester's funds against a task until it is released
//! to the assignee or refunded to the payer. It leaves `Locked` exactly once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{AgentId, AgoraError, ChainBackend, EscrowId, TaskId, TxRef};

/// State of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Locked,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Released => "released",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Locked)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locked" => Ok(Self::Locked),
            "released" => Ok(Self::Released),
            "refunded" => Ok(Self::Refunded),
            other => Err(AgoraError::invalid_input(format!("unknown escrow status '{}'", other))),
        }
    }
}

/// Locked-funds ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub task_id: TaskId,
    pub payer_id: AgentId,
    /// Back-filled when the task is dispatched
    pub payee_id: Option<AgentId>,
    pub amount: Decimal,
    pub status: EscrowStatus,
    pub backend: ChainBackend,
    /// Reference returned by the lock call
    pub tx_ref: TxRef,
    /// Reference returned by the release or refund call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_ref: Option<TxRef>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Escrow {
    /// A freshly locked escrow with no chain reference yet
    pub fn locked(
        task_id: TaskId,
        payer_id: AgentId,
        payee_id: Option<AgentId>,
        amount: Decimal,
        backend: ChainBackend,
    ) -> Self {
        Self {
            id: EscrowId::new(),
            task_id,
            payer_id,
            payee_id,
            amount,
            status: EscrowStatus::Locked,
            backend,
            tx_ref: TxRef::zero(),
            settlement_tx_ref: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Agent credited when the escrow resolves to `status`
    pub fn beneficiary(&self, status: EscrowStatus) -> Option<AgentId> {
        match status {
            EscrowStatus::Released => self.payee_id,
            EscrowStatus::Refunded => Some(self.payer_id),
            EscrowStatus::Locked => None,
        }
    }

    pub fn involves(&self, agent: &AgentId) -> bool {
        self.payer_id == *agent || self.payee_id.as_ref() == Some(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn escrow() -> Escrow {
        Escrow {
            id: EscrowId::new(),
            task_id: TaskId::new(),
            payer_id: AgentId::new(),
            payee_id: None,
            amount: dec!(100),
            status: EscrowStatus::Locked,
            backend: ChainBackend::Base,
            tx_ref: TxRef::zero(),
            settlement_tx_ref: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn beneficiary_follows_resolution() {
        let mut e = escrow();
        assert_eq!(e.beneficiary(EscrowStatus::Refunded), Some(e.payer_id));
        assert_eq!(e.beneficiary(EscrowStatus::Released), None);
        let payee = AgentId::new();
        e.payee_id = Some(payee);
        assert_eq!(e.beneficiary(EscrowStatus::Released), Some(payee));
        assert!(e.involves(&payee));
    }
}
