//! Store failures after a task has finished never strand its escrow

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agora_coordinator::Agora;
use agora_store::{AgentChainState, EntityStore, MemoryStore, StoreError, StoreResult};
use agora_types::{
    ActivityEvent, Agent, AgentId, AgentRole, AgentStatus, Attestation, ChainTransaction,
    ChainTxFilter, ChainTxId, Connection, Decimal, Escrow, EscrowId, EscrowStatus, NewAgent,
    NewTask, Task, TaskId, TaskStatus, TxRef, TxStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

/// Memory store whose attestation and activity writes can be switched off
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    attestations_down: AtomicBool,
    activity_down: AtomicBool,
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Connection(format!("{} table unavailable", what))
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn insert_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.inner.insert_agent(agent).await
    }

    async fn get_agent(&self, id: &AgentId) -> StoreResult<Option<Agent>> {
        self.inner.get_agent(id).await
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        self.inner.list_agents().await
    }

    async fn set_agent_status(&self, id: &AgentId, status: AgentStatus) -> StoreResult<bool> {
        self.inner.set_agent_status(id, status).await
    }

    async fn set_attestation_score(&self, id: &AgentId, score: f64) -> StoreResult<bool> {
        self.inner.set_attestation_score(id, score).await
    }

    async fn set_agent_chain_state(&self, id: &AgentId, state: AgentChainState) -> StoreResult<bool> {
        self.inner.set_agent_chain_state(id, state).await
    }

    async fn adjust_balance(&self, id: &AgentId, delta: Decimal) -> StoreResult<Option<Decimal>> {
        self.inner.adjust_balance(id, delta).await
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        self.inner.insert_task(task).await
    }

    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        self.inner.get_task(id).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        self.inner.list_tasks(status).await
    }

    async fn dispatch_task(
        &self,
        id: &TaskId,
        agent: &AgentId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Task>> {
        self.inner.dispatch_task(id, agent, at).await
    }

    async fn finish_task(
        &self,
        id: &TaskId,
        status: TaskStatus,
        result: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Task>> {
        self.inner.finish_task(id, status, result, at).await
    }

    async fn set_task_settlement_ref(&self, id: &TaskId, tx_ref: &TxRef) -> StoreResult<bool> {
        self.inner.set_task_settlement_ref(id, tx_ref).await
    }

    async fn open_escrow(&self, escrow: &Escrow) -> StoreResult<Option<Decimal>> {
        self.inner.open_escrow(escrow).await
    }

    async fn get_escrow(&self, id: &EscrowId) -> StoreResult<Option<Escrow>> {
        self.inner.get_escrow(id).await
    }

    async fn escrow_for_task(&self, task_id: &TaskId) -> StoreResult<Option<Escrow>> {
        self.inner.escrow_for_task(task_id).await
    }

    async fn list_escrows_for_agent(&self, agent: &AgentId) -> StoreResult<Vec<Escrow>> {
        self.inner.list_escrows_for_agent(agent).await
    }

    async fn set_escrow_payee(&self, id: &EscrowId, payee: &AgentId) -> StoreResult<Option<Escrow>> {
        self.inner.set_escrow_payee(id, payee).await
    }

    async fn set_escrow_lock_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool> {
        self.inner.set_escrow_lock_ref(id, tx_ref).await
    }

    async fn settle_escrow(
        &self,
        id: &EscrowId,
        to: EscrowStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Escrow>> {
        self.inner.settle_escrow(id, to, at).await
    }

    async fn set_escrow_settlement_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool> {
        self.inner.set_escrow_settlement_ref(id, tx_ref).await
    }

    async fn insert_attestation(&self, attestation: &Attestation) -> StoreResult<()> {
        if self.attestations_down.load(Ordering::SeqCst) {
            return Err(unavailable("attestations"));
        }
        self.inner.insert_attestation(attestation).await
    }

    async fn list_attestations(&self, agent: &AgentId) -> StoreResult<Vec<Attestation>> {
        self.inner.list_attestations(agent).await
    }

    async fn find_connection(&self, a: &AgentId, b: &AgentId) -> StoreResult<Option<Connection>> {
        self.inner.find_connection(a, b).await
    }

    async fn record_interaction(&self, source: &AgentId, target: &AgentId) -> StoreResult<Connection> {
        self.inner.record_interaction(source, target).await
    }

    async fn list_connections(&self, agent: &AgentId) -> StoreResult<Vec<Connection>> {
        self.inner.list_connections(agent).await
    }

    async fn append_activity(&self, event: &ActivityEvent) -> StoreResult<()> {
        if self.activity_down.load(Ordering::SeqCst) {
            return Err(unavailable("activity"));
        }
        self.inner.append_activity(event).await
    }

    async fn list_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEvent>> {
        self.inner.list_activity(limit).await
    }

    async fn activity_for_task(&self, task_id: &TaskId) -> StoreResult<Vec<ActivityEvent>> {
        self.inner.activity_for_task(task_id).await
    }

    async fn append_chain_tx(&self, tx: &ChainTransaction) -> StoreResult<()> {
        self.inner.append_chain_tx(tx).await
    }

    async fn update_chain_tx(
        &self,
        id: &ChainTxId,
        status: TxStatus,
        tx_ref: Option<&TxRef>,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        self.inner.update_chain_tx(id, status, tx_ref, error).await
    }

    async fn list_chain_txs(&self, filter: &ChainTxFilter) -> StoreResult<Vec<ChainTransaction>> {
        self.inner.list_chain_txs(filter).await
    }
}

struct Fixture {
    agora: Agora,
    store: Arc<FlakyStore>,
    requester: AgentId,
    worker: AgentId,
    task: TaskId,
}

/// A dispatched task carrying a 30 unit escrow
async fn dispatched() -> Fixture {
    let store = Arc::new(FlakyStore::default());
    let agora = Agora::in_process(store.clone());
    let registry = agora.registry();
    let requester = registry
        .register_agent(NewAgent::new("requester", AgentRole::Router))
        .await
        .unwrap()
        .agent
        .id;
    let worker = registry
        .register_agent(NewAgent::new("worker", AgentRole::Executor))
        .await
        .unwrap()
        .agent
        .id;
    registry.credit_agent(&requester, dec!(30)).await.unwrap();

    let task = agora
        .tasks()
        .create_task(NewTask::new("label the images", requester).with_escrow(dec!(30)))
        .await
        .unwrap()
        .task
        .id;
    agora.tasks().dispatch_task(&task, &worker).await.unwrap();

    Fixture {
        agora,
        store,
        requester,
        worker,
        task,
    }
}

#[tokio::test]
async fn failed_attestation_write_still_pays_the_worker() {
    let f = dispatched().await;
    f.store.attestations_down.store(true, Ordering::SeqCst);

    let outcome = f
        .agora
        .tasks()
        .complete_task(&f.task, Some("done".into()), Some(0.8))
        .await
        .unwrap();

    assert_eq!(outcome.task.status, TaskStatus::Completed);
    assert!(outcome.attestation.is_none());
    assert_eq!(outcome.escrow.unwrap().status, EscrowStatus::Released);
    let operations: Vec<&str> = outcome.warnings.iter().map(|w| w.operation.as_str()).collect();
    assert_eq!(operations, vec!["record_attestation"]);

    let worker = f.agora.registry().get_agent(&f.worker).await.unwrap();
    assert_eq!(worker.settlement_balance, dec!(30));
    assert_eq!(worker.status, AgentStatus::Idle);
    assert!((worker.attestation_score - 0.5).abs() < 1e-9);
    assert_eq!(
        f.agora.escrow().escrow_for_task(&f.task).await.unwrap().unwrap().status,
        EscrowStatus::Released
    );
}

#[tokio::test]
async fn failed_activity_writes_still_settle_the_escrow() {
    let f = dispatched().await;
    f.store.activity_down.store(true, Ordering::SeqCst);

    let completed = f
        .agora
        .tasks()
        .complete_task(&f.task, None, Some(1.0))
        .await
        .unwrap();

    assert!(completed.attestation.is_some());
    let operations: Vec<&str> = completed.warnings.iter().map(|w| w.operation.as_str()).collect();
    assert_eq!(operations, vec!["record_activity", "record_activity"]);
    assert!(completed.task.settlement_tx_ref.is_some());

    let worker = f.agora.registry().get_agent(&f.worker).await.unwrap();
    assert_eq!(worker.settlement_balance, dec!(30));
    assert!((worker.attestation_score - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn failed_activity_write_still_refunds_a_failed_task() {
    let f = dispatched().await;
    f.store.activity_down.store(true, Ordering::SeqCst);

    let outcome = f.agora.tasks().fail_task(&f.task, "worker vanished").await.unwrap();

    assert_eq!(outcome.task.status, TaskStatus::Failed);
    assert_eq!(outcome.escrow.unwrap().status, EscrowStatus::Refunded);
    assert_eq!(outcome.warnings.len(), 1);

    let requester = f.agora.registry().get_agent(&f.requester).await.unwrap();
    assert_eq!(requester.settlement_balance, dec!(30));
}
