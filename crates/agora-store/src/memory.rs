//! In-memory entity store
//!
//! All tables sit behind one `RwLock`, so every multi-row operation (escrow
//! lock + payer debit, escrow settle + beneficiary credit) is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use agora_types::{
    ActivityEvent, Agent, AgentId, AgentStatus, Attestation, ChainTransaction, ChainTxFilter,
    ChainTxId, Connection, Decimal, Escrow, EscrowId, EscrowStatus, Task, TaskId, TaskStatus,
    TxRef, TxStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{AgentChainState, EntityStore, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    agents: HashMap<AgentId, Agent>,
    tasks: HashMap<TaskId, Task>,
    escrows: HashMap<EscrowId, Escrow>,
    attestations: Vec<Attestation>,
    connections: Vec<Connection>,
    activity: Vec<ActivityEvent>,
    chain_txs: Vec<ChainTransaction>,
}

impl Tables {
    fn credit(&mut self, id: &AgentId, delta: Decimal) -> Option<Decimal> {
        let agent = self.agents.get_mut(id)?;
        agent.settlement_balance += delta;
        agent.updated_at = Utc::now();
        Some(agent.settlement_balance)
    }
}

/// Thread-safe in-process store
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_agent(&self, agent: &Agent) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.agents.contains_key(&agent.id) {
            return Err(StoreError::InvalidInput(format!("agent {} already exists", agent.id)));
        }
        tables.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &AgentId) -> StoreResult<Option<Agent>> {
        Ok(self.tables.read().await.agents.get(id).cloned())
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let tables = self.tables.read().await;
        let mut agents: Vec<Agent> = tables.agents.values().cloned().collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn set_agent_status(&self, id: &AgentId, status: AgentStatus) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.agents.get_mut(id) {
            Some(agent) => {
                agent.status = status;
                agent.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn set_attestation_score(&self, id: &AgentId, score: f64) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.agents.get_mut(id) {
            Some(agent) => {
                agent.attestation_score = score;
                agent.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn set_agent_chain_state(&self, id: &AgentId, state: AgentChainState) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.agents.get_mut(id) {
            Some(agent) => {
                agent.identity_token = state.identity_token;
                agent.chain_registered = state.chain_registered;
                agent.chain_tx_ref = state.chain_tx_ref;
                agent.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn adjust_balance(&self, id: &AgentId, delta: Decimal) -> StoreResult<Option<Decimal>> {
        let balance = self.tables.write().await.credit(id, delta);
        debug!(agent_id = %id, %delta, ?balance, "Balance adjusted");
        Ok(balance)
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.tasks.contains_key(&task.id) {
            return Err(StoreError::InvalidInput(format!("task {} already exists", task.id)));
        }
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn dispatch_task(
        &self,
        id: &TaskId,
        agent: &AgentId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Task>> {
        let mut tables = self.tables.write().await;
        let Some(task) = tables.tasks.get_mut(id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::Pending {
            return Ok(None);
        }
        task.status = TaskStatus::Dispatched;
        task.assigned_agent_id = Some(*agent);
        task.dispatched_at = Some(at);
        Ok(Some(task.clone()))
    }

    async fn finish_task(
        &self,
        id: &TaskId,
        status: TaskStatus,
        result: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Task>> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidInput(format!("{} is not a terminal task status", status)));
        }
        let mut tables = self.tables.write().await;
        let Some(task) = tables.tasks.get_mut(id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::Dispatched {
            return Ok(None);
        }
        task.status = status;
        task.result = result;
        task.completed_at = Some(at);
        Ok(Some(task.clone()))
    }

    async fn set_task_settlement_ref(&self, id: &TaskId, tx_ref: &TxRef) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.tasks.get_mut(id) {
            Some(task) => {
                task.settlement_tx_ref = Some(tx_ref.clone());
                true
            }
            None => false,
        })
    }

    async fn open_escrow(&self, escrow: &Escrow) -> StoreResult<Option<Decimal>> {
        let mut tables = self.tables.write().await;
        if tables.escrows.values().any(|e| e.task_id == escrow.task_id) {
            return Err(StoreError::InvalidInput(format!(
                "task {} already has an escrow",
                escrow.task_id
            )));
        }
        let Some(balance) = tables.credit(&escrow.payer_id, -escrow.amount) else {
            return Ok(None);
        };
        if let Some(task) = tables.tasks.get_mut(&escrow.task_id) {
            task.escrow_amount = Some(escrow.amount);
        }
        tables.escrows.insert(escrow.id, escrow.clone());
        Ok(Some(balance))
    }

    async fn get_escrow(&self, id: &EscrowId) -> StoreResult<Option<Escrow>> {
        Ok(self.tables.read().await.escrows.get(id).cloned())
    }

    async fn escrow_for_task(&self, task_id: &TaskId) -> StoreResult<Option<Escrow>> {
        let tables = self.tables.read().await;
        Ok(tables.escrows.values().find(|e| e.task_id == *task_id).cloned())
    }

    async fn list_escrows_for_agent(&self, agent: &AgentId) -> StoreResult<Vec<Escrow>> {
        let tables = self.tables.read().await;
        let mut escrows: Vec<Escrow> = tables
            .escrows
            .values()
            .filter(|e| e.involves(agent))
            .cloned()
            .collect();
        escrows.sort_by_key(|e| e.created_at);
        Ok(escrows)
    }

    async fn set_escrow_payee(&self, id: &EscrowId, payee: &AgentId) -> StoreResult<Option<Escrow>> {
        let mut tables = self.tables.write().await;
        let Some(escrow) = tables.escrows.get_mut(id) else {
            return Ok(None);
        };
        if escrow.status != EscrowStatus::Locked {
            return Ok(None);
        }
        escrow.payee_id = Some(*payee);
        Ok(Some(escrow.clone()))
    }

    async fn set_escrow_lock_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.escrows.get_mut(id) {
            Some(escrow) => {
                escrow.tx_ref = tx_ref.clone();
                true
            }
            None => false,
        })
    }

    async fn settle_escrow(
        &self,
        id: &EscrowId,
        to: EscrowStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Escrow>> {
        if !to.is_terminal() {
            return Err(StoreError::InvalidInput("escrow can only settle to released or refunded".into()));
        }
        let mut tables = self.tables.write().await;
        let Some(escrow) = tables.escrows.get(id) else {
            return Ok(None);
        };
        if escrow.status != EscrowStatus::Locked {
            return Ok(None);
        }
        let Some(beneficiary) = escrow.beneficiary(to) else {
            return Ok(None);
        };
        let amount = escrow.amount;
        if tables.credit(&beneficiary, amount).is_none() {
            return Ok(None);
        }
        let escrow = tables
            .escrows
            .get_mut(id)
            .ok_or_else(|| StoreError::corrupt("escrows", "escrow vanished under write lock"))?;
        escrow.status = to;
        escrow.settled_at = Some(at);
        Ok(Some(escrow.clone()))
    }

    async fn set_escrow_settlement_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.escrows.get_mut(id) {
            Some(escrow) => {
                escrow.settlement_tx_ref = Some(tx_ref.clone());
                true
            }
            None => false,
        })
    }

    async fn insert_attestation(&self, attestation: &Attestation) -> StoreResult<()> {
        self.tables.write().await.attestations.push(attestation.clone());
        Ok(())
    }

    async fn list_attestations(&self, agent: &AgentId) -> StoreResult<Vec<Attestation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .attestations
            .iter()
            .filter(|a| a.agent_id == *agent)
            .cloned()
            .collect())
    }

    async fn find_connection(&self, a: &AgentId, b: &AgentId) -> StoreResult<Option<Connection>> {
        let tables = self.tables.read().await;
        Ok(tables.connections.iter().find(|c| c.links(a, b)).cloned())
    }

    async fn record_interaction(&self, source: &AgentId, target: &AgentId) -> StoreResult<Connection> {
        let mut tables = self.tables.write().await;
        if let Some(conn) = tables.connections.iter_mut().find(|c| c.links(source, target)) {
            conn.bump();
            return Ok(conn.clone());
        }
        let conn = Connection::new(*source, *target);
        tables.connections.push(conn.clone());
        Ok(conn)
    }

    async fn list_connections(&self, agent: &AgentId) -> StoreResult<Vec<Connection>> {
        let tables = self.tables.read().await;
        Ok(tables
            .connections
            .iter()
            .filter(|c| c.source_agent_id == *agent || c.target_agent_id == *agent)
            .cloned()
            .collect())
    }

    async fn append_activity(&self, event: &ActivityEvent) -> StoreResult<()> {
        self.tables.write().await.activity.push(event.clone());
        Ok(())
    }

    async fn list_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.activity.iter().rev().take(limit).cloned().collect())
    }

    async fn activity_for_task(&self, task_id: &TaskId) -> StoreResult<Vec<ActivityEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .activity
            .iter()
            .filter(|e| e.task_id.as_ref() == Some(task_id))
            .cloned()
            .collect())
    }

    async fn append_chain_tx(&self, tx: &ChainTransaction) -> StoreResult<()> {
        self.tables.write().await.chain_txs.push(tx.clone());
        Ok(())
    }

    async fn update_chain_tx(
        &self,
        id: &ChainTxId,
        status: TxStatus,
        tx_ref: Option<&TxRef>,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.chain_txs.iter_mut().find(|t| t.id == *id) {
            Some(tx) => {
                tx.status = status;
                if let Some(tx_ref) = tx_ref {
                    tx.tx_ref = Some(tx_ref.clone());
                }
                if let Some(error) = error {
                    tx.error = Some(error.to_string());
                }
                tx.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn list_chain_txs(&self, filter: &ChainTxFilter) -> StoreResult<Vec<ChainTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .chain_txs
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::{AgentRole, ChainBackend, NewAgent, NewTask};
    use rust_decimal_macros::dec;

    async fn seeded() -> (MemoryStore, Agent) {
        let store = MemoryStore::new();
        let agent = NewAgent::new("alice", AgentRole::Router).into_agent();
        store.insert_agent(&agent).await.unwrap();
        (store, agent)
    }

    #[tokio::test]
    async fn duplicate_agent_is_rejected() {
        let (store, agent) = seeded().await;
        assert!(store.insert_agent(&agent).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_adjustments_do_not_lose_updates() {
        let (store, agent) = seeded().await;
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let id = agent.id;
            handles.push(tokio::spawn(async move {
                store.adjust_balance(&id, dec!(2)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let agent = store.get_agent(&agent.id).await.unwrap().unwrap();
        assert_eq!(agent.settlement_balance, dec!(100));
    }

    #[tokio::test]
    async fn settle_credits_beneficiary_once() {
        let (store, payer) = seeded().await;
        let task = NewTask::new("job", payer.id).into_task();
        store.insert_task(&task).await.unwrap();
        let escrow = Escrow::locked(task.id, payer.id, None, dec!(40), ChainBackend::Base);
        assert_eq!(store.open_escrow(&escrow).await.unwrap(), Some(dec!(-40)));

        let first = store.settle_escrow(&escrow.id, EscrowStatus::Refunded, Utc::now()).await.unwrap();
        assert!(first.is_some());
        let second = store.settle_escrow(&escrow.id, EscrowStatus::Refunded, Utc::now()).await.unwrap();
        assert!(second.is_none());

        let payer = store.get_agent(&payer.id).await.unwrap().unwrap();
        assert_eq!(payer.settlement_balance, dec!(0));
    }

    #[tokio::test]
    async fn release_without_payee_is_refused() {
        let (store, payer) = seeded().await;
        let task = NewTask::new("job", payer.id).into_task();
        store.insert_task(&task).await.unwrap();
        let escrow = Escrow::locked(task.id, payer.id, None, dec!(5), ChainBackend::Base);
        store.open_escrow(&escrow).await.unwrap();
        let released = store.settle_escrow(&escrow.id, EscrowStatus::Released, Utc::now()).await.unwrap();
        assert!(released.is_none());
        let stored = store.get_escrow(&escrow.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EscrowStatus::Locked);
    }
}
