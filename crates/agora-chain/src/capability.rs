//! Capability contracts
//!
//! One trait per capability. Live and stub adapters implement the same
//! traits with the same return shapes, so callers never branch on mode.
//! Write calls cannot fail: an unreachable backend yields
//! [`TxRef::zero`], which callers treat as "settlement did not happen".

use agora_types::{Agent, AgentId, EscrowId, TaskId, TxRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ChainResult;

/// Escrow contract calls
#[async_trait]
pub trait EscrowChain: Send + Sync {
    async fn lock_funds(&self, task_id: &TaskId, payer: &AgentId, amount: Decimal) -> TxRef;

    async fn release_funds(&self, escrow_id: &EscrowId, payee: &AgentId, amount: Decimal) -> TxRef;

    async fn refund_funds(&self, escrow_id: &EscrowId, payer: &AgentId, amount: Decimal) -> TxRef;
}

/// Attestation registry calls
#[async_trait]
pub trait AttestationChain: Send + Sync {
    async fn record_attestation(
        &self,
        agent_id: &AgentId,
        attester_id: &AgentId,
        score: f64,
        metadata: Option<&serde_json::Value>,
    ) -> TxRef;
}

/// Result of a direct payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub tx_ref: TxRef,
    /// Backend-assigned payment id, absent when the payment did not settle
    pub payment_id: Option<String>,
}

/// Payment and gas funding calls
#[async_trait]
pub trait PaymentChain: Send + Sync {
    async fn process_payment(
        &self,
        from: &AgentId,
        to: &AgentId,
        amount: Decimal,
        memo: Option<&str>,
    ) -> PaymentReceipt;

    /// Top up a wallet with native currency for transaction fees
    async fn fund_gas(&self, address: &str, amount: Decimal) -> TxRef;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityVerification {
    pub verified: bool,
    pub identity_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintedIdentity {
    pub token_id: Option<String>,
    pub tx_ref: TxRef,
}

/// Identity token and agent registry calls
#[async_trait]
pub trait IdentityChain: Send + Sync {
    async fn verify_identity(&self, agent_id: &AgentId) -> IdentityVerification;

    async fn mint_identity_token(
        &self,
        agent_id: &AgentId,
        metadata: &serde_json::Value,
    ) -> MintedIdentity;

    async fn register_agent(&self, agent: &Agent) -> TxRef;

    /// Flip the on-chain registration flag off
    async fn deregister_agent(&self, agent_id: &AgentId) -> TxRef;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_id: Option<String>,
    pub tx_ref: TxRef,
}

/// On-chain job scheduler calls
#[async_trait]
pub trait SchedulingChain: Send + Sync {
    async fn schedule_job(
        &self,
        agent_id: &AgentId,
        spec: &serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> ScheduledJob;

    async fn cancel_job(&self, job_id: &str) -> TxRef;
}

/// Agent record as mirrored on a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnchainAgent {
    pub agent_id: AgentId,
    pub registered: bool,
    pub identity_token: Option<String>,
    pub last_tx_ref: Option<TxRef>,
}

/// Contract event as reported by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub method: String,
    pub subject: String,
    pub tx_ref: TxRef,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
    pub subject: Option<String>,
    pub method: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn matches(&self, event: &ChainEvent) -> bool {
        self.subject.as_deref().map_or(true, |s| event.subject == s)
            && self.method.as_deref().map_or(true, |m| event.method == m)
            && self.since.map_or(true, |t| event.at >= t)
    }
}

/// Read-only mirrors of backend state
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_onchain_agent(&self, agent_id: &AgentId) -> ChainResult<Option<OnchainAgent>>;

    async fn get_balance(&self, address: &str) -> ChainResult<Decimal>;

    async fn query_events(&self, query: &EventQuery) -> ChainResult<Vec<ChainEvent>>;
}

/// Every capability, for adapters that implement them all
pub trait ChainAdapter:
    EscrowChain + AttestationChain + PaymentChain + IdentityChain + SchedulingChain + ChainReader
{
}

impl<T> ChainAdapter for T where
    T: EscrowChain + AttestationChain + PaymentChain + IdentityChain + SchedulingChain + ChainReader
{
}
