//! The wired coordination core
//!
//! `Agora` owns one instance of every component over a single store and
//! gateway registry. The process entry point opens the store and hands it
//! in; closing it is the entry point's job too.

use std::collections::BTreeMap;
use std::sync::Arc;

use agora_activity::ActivityRecorder;
use agora_chain::{
    ChainConfig, ChainEvent, ChainResult, EventQuery, GatewayRegistry, OnchainAgent, TxLog,
};
use agora_escrow::{EscrowLedger, EscrowManager, EscrowOutcome};
use agora_reputation::ReputationAggregator;
use agora_store::EntityStore;
use agora_types::{
    AgentId, ChainBackend, ChainMode, ChainTransaction, ChainTxFilter, Decimal, EscrowId, Result,
    TaskId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{AgentRegistry, RegistrationConfig, TaskCoordinator};

/// Snapshot of the coordination core
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub agent_count: usize,
    pub tasks_by_status: BTreeMap<String, usize>,
    pub backends: Vec<(ChainBackend, ChainMode)>,
    /// Chain log entries that failed or carry the zero reference
    pub unsettled_transactions: usize,
    pub uptime_seconds: i64,
    pub started_at: DateTime<Utc>,
}

pub struct Agora {
    store: Arc<dyn EntityStore>,
    gateways: Arc<GatewayRegistry>,
    tx_log: TxLog,
    escrow: Arc<EscrowLedger>,
    reputation: Arc<ReputationAggregator>,
    activity: Arc<ActivityRecorder>,
    registry: AgentRegistry,
    tasks: TaskCoordinator,
    started_at: DateTime<Utc>,
}

impl Agora {
    /// Wire every component over `store`, with gateways built from `chain`
    pub fn open(
        store: Arc<dyn EntityStore>,
        chain: &ChainConfig,
        registration: RegistrationConfig,
    ) -> Result<Self> {
        let tx_log = TxLog::new(store.clone());
        let gateways = GatewayRegistry::from_config(chain, tx_log.clone())?;
        Ok(Self::with_gateways(store, gateways, tx_log, registration))
    }

    /// Stub gateways for every backend, settling without delay
    pub fn in_process(store: Arc<dyn EntityStore>) -> Self {
        let tx_log = TxLog::new(store.clone());
        let gateways = GatewayRegistry::stub(ChainBackend::default(), 0, tx_log.clone());
        Self::with_gateways(store, gateways, tx_log, RegistrationConfig::default())
    }

    pub fn with_gateways(
        store: Arc<dyn EntityStore>,
        gateways: GatewayRegistry,
        tx_log: TxLog,
        registration: RegistrationConfig,
    ) -> Self {
        let gateways = Arc::new(gateways);
        let escrow = Arc::new(EscrowLedger::new(store.clone(), gateways.clone()));
        let reputation = Arc::new(ReputationAggregator::new(store.clone(), gateways.clone()));
        let activity = Arc::new(ActivityRecorder::new(store.clone()));
        let registry = AgentRegistry::new(
            store.clone(),
            gateways.clone(),
            escrow.clone(),
            registration,
        );
        let tasks = TaskCoordinator::new(
            store.clone(),
            escrow.clone(),
            reputation.clone(),
            activity.clone(),
        );
        Self {
            store,
            gateways,
            tx_log,
            escrow,
            reputation,
            activity,
            registry,
            tasks,
            started_at: Utc::now(),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &TaskCoordinator {
        &self.tasks
    }

    pub fn escrow(&self) -> &EscrowLedger {
        &self.escrow
    }

    pub fn reputation(&self) -> &ReputationAggregator {
        &self.reputation
    }

    pub fn activity(&self) -> &ActivityRecorder {
        &self.activity
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    // ========================================================================
    // Payments boundary
    // ========================================================================

    /// `escrow_payment`: lock funds against an existing task.
    ///
    /// The payer must be the task's requester and the task must not hold an
    /// escrow yet. The locked amount is recorded on the task as well.
    pub async fn escrow_payment(
        &self,
        task_id: &TaskId,
        payer_id: &AgentId,
        amount: Decimal,
        payee_id: Option<AgentId>,
    ) -> Result<EscrowOutcome> {
        self.escrow.create_escrow(task_id, payer_id, amount, payee_id).await
    }

    /// `settle_payment`: release an escrow to its payee
    pub async fn settle_payment(&self, escrow_id: &EscrowId) -> Result<EscrowOutcome> {
        self.escrow.release_escrow(escrow_id).await
    }

    // ========================================================================
    // Read-only chain mirrors
    // ========================================================================

    pub async fn onchain_agent(
        &self,
        backend: ChainBackend,
        agent_id: &AgentId,
    ) -> ChainResult<Option<OnchainAgent>> {
        self.gateways.resolve(backend).reader().get_onchain_agent(agent_id).await
    }

    pub async fn onchain_balance(&self, backend: ChainBackend, address: &str) -> ChainResult<Decimal> {
        self.gateways.resolve(backend).reader().get_balance(address).await
    }

    pub async fn onchain_events(
        &self,
        backend: ChainBackend,
        query: &EventQuery,
    ) -> ChainResult<Vec<ChainEvent>> {
        self.gateways.resolve(backend).reader().query_events(query).await
    }

    // ========================================================================
    // Transaction log
    // ========================================================================

    pub async fn transactions(&self, filter: &ChainTxFilter) -> Result<Vec<ChainTransaction>> {
        Ok(self.tx_log.entries(filter).await?)
    }

    /// Failed or zero-reference settlement calls, for operators to reconcile
    pub async fn unsettled_transactions(&self) -> Result<Vec<ChainTransaction>> {
        Ok(self.tx_log.needing_attention().await?)
    }

    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let agent_count = self.store.list_agents().await?.len();
        let mut tasks_by_status = BTreeMap::new();
        for task in self.store.list_tasks(None).await? {
            *tasks_by_status.entry(task.status.to_string()).or_insert(0) += 1;
        }
        Ok(StatusSummary {
            agent_count,
            tasks_by_status,
            backends: self.gateways.modes(),
            unsettled_transactions: self.tx_log.needing_attention().await?.len(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            started_at: self.started_at,
        })
    }

    /// Close the underlying store
    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_store::MemoryStore;
    use agora_types::{AgentRole, NewAgent, NewTask};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn open_with_unconfigured_chain_uses_stubs() {
        let mut chain = ChainConfig::stub_only();
        for backend in ChainBackend::ALL {
            chain = chain.with_backend(backend, agora_chain::BackendConfig::default());
        }
        let agora = Agora::open(Arc::new(MemoryStore::new()), &chain, RegistrationConfig::default())
            .unwrap();
        assert!(agora.gateways().modes().iter().all(|(_, m)| *m == ChainMode::Stub));
    }

    #[tokio::test]
    async fn status_summary_counts_tasks() {
        let agora = Agora::in_process(Arc::new(MemoryStore::new()));
        let requester = agora
            .registry()
            .register_agent(NewAgent::new("requester", AgentRole::Router))
            .await
            .unwrap()
            .agent;
        for title in ["a", "b"] {
            agora.tasks().create_task(NewTask::new(title, requester.id)).await.unwrap();
        }

        let summary = agora.status_summary().await.unwrap();
        assert_eq!(summary.agent_count, 1);
        assert_eq!(summary.tasks_by_status.get("pending"), Some(&2));
        assert_eq!(summary.unsettled_transactions, 0);
        assert_eq!(summary.backends.len(), ChainBackend::ALL.len());
    }

    #[tokio::test]
    async fn payment_boundary_settles_to_payee() {
        let agora = Agora::in_process(Arc::new(MemoryStore::new()));
        let payer = agora
            .registry()
            .register_agent(NewAgent::new("payer", AgentRole::Router))
            .await
            .unwrap()
            .agent;
        let payee = agora
            .registry()
            .register_agent(NewAgent::new("payee", AgentRole::Executor))
            .await
            .unwrap()
            .agent;
        agora.registry().credit_agent(&payer.id, dec!(10)).await.unwrap();
        let task = agora
            .tasks()
            .create_task(NewTask::new("direct", payer.id))
            .await
            .unwrap()
            .task;

        let not_requester = agora
            .escrow_payment(&task.id, &payee.id, dec!(1), None)
            .await
            .unwrap_err();
        assert_eq!(not_requester.boundary_code(), 400);

        let locked = agora
            .escrow_payment(&task.id, &payer.id, dec!(10), Some(payee.id))
            .await
            .unwrap();
        assert_eq!(
            agora.tasks().get_task(&task.id).await.unwrap().escrow_amount,
            Some(dec!(10))
        );
        assert_eq!(
            agora.registry().agent_balance(&payee.id).await.unwrap().pending_escrow,
            dec!(10)
        );

        let settled = agora.settle_payment(&locked.escrow.id).await.unwrap();
        assert!(settled.is_settled_on_chain());
        assert_eq!(
            agora.registry().agent_balance(&payee.id).await.unwrap().settlement_balance,
            dec!(10)
        );

        let onchain = agora
            .onchain_agent(payee.deployed_chain, &payee.id)
            .await
            .unwrap()
            .unwrap();
        assert!(onchain.registered);
    }
}
