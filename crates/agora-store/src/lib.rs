//! Agora Entity Store
//!
//! Transactional persistence for agents, tasks, escrows, attestations,
//! connections, the activity log, and the chain transaction log.
//!
//! # Repository contract
//!
//! The coordination core only needs two guarantees from the store:
//!
//! - **Atomic balance mutation**: [`EntityStore::adjust_balance`],
//!   [`EntityStore::open_escrow`] and [`EntityStore::settle_escrow`] apply
//!   their balance deltas as a single atomic increment.
//! - **Conditional transitions**: state changes are written with their
//!   source state as a precondition (`UPDATE ... WHERE status = 'pending'`).
//!   A failed precondition returns `Ok(None)`; it is never an error and never
//!   mutates anything.
//!
//! Two implementations are provided: [`MemoryStore`] for tests and embedded
//! use, and [`SqliteStore`] backed by SQLx.

pub mod config;
pub mod error;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use agora_types::{
    ActivityEvent, Agent, AgentId, AgentStatus, Attestation, ChainTransaction, ChainTxFilter,
    ChainTxId, Connection, Decimal, Escrow, EscrowId, EscrowStatus, Task, TaskId, TaskStatus,
    TxRef, TxStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Chain-side registration state of an agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentChainState {
    pub identity_token: Option<String>,
    pub chain_registered: bool,
    pub chain_tx_ref: Option<TxRef>,
}

/// Entity store used by every coordination component
#[async_trait]
pub trait EntityStore: Send + Sync {
    // =========================================================================
    // Agents
    // =========================================================================

    async fn insert_agent(&self, agent: &Agent) -> StoreResult<()>;

    async fn get_agent(&self, id: &AgentId) -> StoreResult<Option<Agent>>;

    async fn list_agents(&self) -> StoreResult<Vec<Agent>>;

    /// Returns false when the agent does not exist
    async fn set_agent_status(&self, id: &AgentId, status: AgentStatus) -> StoreResult<bool>;

    async fn set_attestation_score(&self, id: &AgentId, score: f64) -> StoreResult<bool>;

    async fn set_agent_chain_state(&self, id: &AgentId, state: AgentChainState) -> StoreResult<bool>;

    /// Atomically add `delta` (possibly negative) to the settlement balance.
    /// Returns the new balance, or `None` when the agent does not exist.
    async fn adjust_balance(&self, id: &AgentId, delta: Decimal) -> StoreResult<Option<Decimal>>;

    // =========================================================================
    // Tasks
    // =========================================================================

    async fn insert_task(&self, task: &Task) -> StoreResult<()>;

    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>>;

    async fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>>;

    /// `pending -> dispatched`, assigning `agent`. `None` if the task is
    /// missing or no longer pending.
    async fn dispatch_task(
        &self,
        id: &TaskId,
        agent: &AgentId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Task>>;

    /// `dispatched -> completed|failed`. `None` if the task is missing or not
    /// dispatched.
    async fn finish_task(
        &self,
        id: &TaskId,
        status: TaskStatus,
        result: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Task>>;

    async fn set_task_settlement_ref(&self, id: &TaskId, tx_ref: &TxRef) -> StoreResult<bool>;

    // =========================================================================
    // Escrows
    // =========================================================================

    /// Insert a locked escrow, debit its payer and record the amount on the
    /// task in one atomic step. Returns the payer's new balance, or `None`
    /// when the payer is missing. A task holds at most one escrow; a second
    /// one is `StoreError::InvalidInput` on every backend.
    async fn open_escrow(&self, escrow: &Escrow) -> StoreResult<Option<Decimal>>;

    async fn get_escrow(&self, id: &EscrowId) -> StoreResult<Option<Escrow>>;

    async fn escrow_for_task(&self, task_id: &TaskId) -> StoreResult<Option<Escrow>>;

    async fn list_escrows_for_agent(&self, agent: &AgentId) -> StoreResult<Vec<Escrow>>;

    /// Back-fill the payee of a locked escrow
    async fn set_escrow_payee(&self, id: &EscrowId, payee: &AgentId) -> StoreResult<Option<Escrow>>;

    async fn set_escrow_lock_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool>;

    /// `locked -> released|refunded`, crediting the beneficiary in the same
    /// atomic step. `None` if the escrow is missing, not locked, or (for a
    /// release) has no payee.
    async fn settle_escrow(
        &self,
        id: &EscrowId,
        to: EscrowStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Escrow>>;

    async fn set_escrow_settlement_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool>;

    // =========================================================================
    // Attestations
    // =========================================================================

    async fn insert_attestation(&self, attestation: &Attestation) -> StoreResult<()>;

    async fn list_attestations(&self, agent: &AgentId) -> StoreResult<Vec<Attestation>>;

    // =========================================================================
    // Connections
    // =========================================================================

    async fn find_connection(&self, a: &AgentId, b: &AgentId) -> StoreResult<Option<Connection>>;

    /// Create the connection for the unordered pair, or bump the existing one
    async fn record_interaction(&self, source: &AgentId, target: &AgentId) -> StoreResult<Connection>;

    async fn list_connections(&self, agent: &AgentId) -> StoreResult<Vec<Connection>>;

    // =========================================================================
    // Activity log
    // =========================================================================

    async fn append_activity(&self, event: &ActivityEvent) -> StoreResult<()>;

    /// Most recent events first
    async fn list_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEvent>>;

    async fn activity_for_task(&self, task_id: &TaskId) -> StoreResult<Vec<ActivityEvent>>;

    // =========================================================================
    // Chain transaction log
    // =========================================================================

    async fn append_chain_tx(&self, tx: &ChainTransaction) -> StoreResult<()>;

    async fn update_chain_tx(
        &self,
        id: &ChainTxId,
        status: TxStatus,
        tx_ref: Option<&TxRef>,
        error: Option<&str>,
    ) -> StoreResult<bool>;

    /// Most recent entries first
    async fn list_chain_txs(&self, filter: &ChainTxFilter) -> StoreResult<Vec<ChainTransaction>>;

    /// Release underlying connections. Further calls may fail.
    async fn close(&self) {}
}

/// Open the store described by `config`. The caller owns its lifecycle.
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn EntityStore>> {
    if config.is_memory() {
        info!("Using in-memory entity store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(config).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}
