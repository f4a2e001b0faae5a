//! Agora Escrow - Locked funds against tasks
//!
//! The local ledger is the system of record. The payer is debited when the
//! escrow is opened, before the settlement backend is called, and the debit
//! is never rolled back. Backend calls are best-effort reconciliation: a
//! zero reference comes back as a [`Warning`] and stays visible in the
//! chain transaction log.
//!
//! An escrow leaves `Locked` exactly once. The status flip and the
//! beneficiary credit are one atomic store write, so a second release or
//! refund is refused without touching any balance.

use std::sync::Arc;

use agora_chain::GatewayRegistry;
use agora_store::EntityStore;
use agora_types::{
    AgentId, AgoraError, Escrow, EscrowId, EscrowStatus, Result, TaskId, TxRef, Warning,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

/// An escrow together with any settlement call that did not go through
#[derive(Debug, Clone, Serialize)]
pub struct EscrowOutcome {
    pub escrow: Escrow,
    pub warnings: Vec<Warning>,
}

impl EscrowOutcome {
    pub fn is_settled_on_chain(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Escrow manager trait
#[async_trait::async_trait]
pub trait EscrowManager: Send + Sync {
    /// Lock `amount` of the payer's balance against a task. The payer must be
    /// the task's requester, and a task holds at most one escrow.
    async fn create_escrow(
        &self,
        task_id: &TaskId,
        payer_id: &AgentId,
        amount: Decimal,
        payee_id: Option<AgentId>,
    ) -> Result<EscrowOutcome>;

    /// Release escrow to payee
    async fn release_escrow(&self, escrow_id: &EscrowId) -> Result<EscrowOutcome>;

    /// Refund escrow to payer
    async fn refund_escrow(&self, escrow_id: &EscrowId) -> Result<EscrowOutcome>;

    /// Sum of locked escrows the agent pays into or is owed from
    async fn get_agent_pending_escrows(&self, agent_id: &AgentId) -> Result<Decimal>;
}

/// Store-backed escrow ledger
pub struct EscrowLedger {
    store: Arc<dyn EntityStore>,
    gateways: Arc<GatewayRegistry>,
}

impl EscrowLedger {
    pub fn new(store: Arc<dyn EntityStore>, gateways: Arc<GatewayRegistry>) -> Self {
        Self { store, gateways }
    }

    pub async fn get_escrow(&self, escrow_id: &EscrowId) -> Result<Escrow> {
        self.store
            .get_escrow(escrow_id)
            .await?
            .ok_or_else(|| AgoraError::not_found("escrow", escrow_id))
    }

    pub async fn escrow_for_task(&self, task_id: &TaskId) -> Result<Option<Escrow>> {
        Ok(self.store.escrow_for_task(task_id).await?)
    }

    /// Back-fill the payee of a locked escrow
    pub async fn assign_payee(&self, escrow_id: &EscrowId, payee_id: &AgentId) -> Result<Escrow> {
        if let Some(escrow) = self.store.set_escrow_payee(escrow_id, payee_id).await? {
            info!(escrow_id = %escrow_id, payee_id = %payee_id, "Escrow payee assigned");
            return Ok(escrow);
        }
        Err(self.rejection(escrow_id).await?)
    }

    /// Why a conditional write on a locked escrow did not apply
    async fn rejection(&self, escrow_id: &EscrowId) -> Result<AgoraError> {
        Ok(match self.store.get_escrow(escrow_id).await? {
            None => AgoraError::not_found("escrow", escrow_id),
            Some(escrow) if escrow.status == EscrowStatus::Locked => {
                AgoraError::invalid_input(format!("escrow {} has no payee", escrow_id))
            }
            Some(escrow) => AgoraError::invalid_transition(
                "escrow",
                escrow_id,
                EscrowStatus::Locked,
                escrow.status,
            ),
        })
    }

    async fn settle(&self, escrow_id: &EscrowId, to: EscrowStatus) -> Result<EscrowOutcome> {
        let Some(mut escrow) = self.store.settle_escrow(escrow_id, to, Utc::now()).await? else {
            return Err(self.rejection(escrow_id).await?);
        };

        let gateway = self.gateways.resolve(escrow.backend);
        let (operation, tx_ref) = match to {
            EscrowStatus::Released => {
                let payee = escrow
                    .payee_id
                    .ok_or_else(|| AgoraError::invalid_input(format!("escrow {} has no payee", escrow_id)))?;
                let tx_ref = gateway
                    .escrow()
                    .release_funds(&escrow.id, &payee, escrow.amount)
                    .await;
                ("release_funds", tx_ref)
            }
            _ => {
                let tx_ref = gateway
                    .escrow()
                    .refund_funds(&escrow.id, &escrow.payer_id, escrow.amount)
                    .await;
                ("refund_funds", tx_ref)
            }
        };

        self.store.set_escrow_settlement_ref(&escrow.id, &tx_ref).await?;
        let warnings = unsettled(operation, &tx_ref, &escrow.id);
        escrow.settlement_tx_ref = Some(tx_ref);

        info!(
            escrow_id = %escrow.id,
            task_id = %escrow.task_id,
            status = %escrow.status,
            amount = %escrow.amount,
            "Escrow settled"
        );
        Ok(EscrowOutcome { escrow, warnings })
    }
}

fn unsettled(operation: &str, tx_ref: &TxRef, escrow_id: &EscrowId) -> Vec<Warning> {
    if tx_ref.is_zero() {
        warn!(escrow_id = %escrow_id, operation, "Settlement backend did not confirm, local ledger kept");
        vec![Warning::unsettled(operation)]
    } else {
        Vec::new()
    }
}

#[async_trait::async_trait]
impl EscrowManager for EscrowLedger {
    async fn create_escrow(
        &self,
        task_id: &TaskId,
        payer_id: &AgentId,
        amount: Decimal,
        payee_id: Option<AgentId>,
    ) -> Result<EscrowOutcome> {
        if amount <= Decimal::ZERO {
            return Err(AgoraError::invalid_input(format!(
                "escrow amount must be positive, got {}",
                amount
            )));
        }

        let payer = self
            .store
            .get_agent(payer_id)
            .await?
            .ok_or_else(|| AgoraError::not_found("agent", payer_id))?;
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AgoraError::not_found("task", task_id))?;
        if task.requester_id != *payer_id {
            return Err(AgoraError::invalid_input(format!(
                "escrow for task {} must be paid by its requester {}",
                task_id, task.requester_id
            )));
        }
        if let Some(existing) = self.store.escrow_for_task(task_id).await? {
            return Err(AgoraError::invalid_input(format!(
                "task {} already has escrow {}",
                task_id, existing.id
            )));
        }

        let mut escrow = Escrow::locked(*task_id, *payer_id, payee_id, amount, payer.deployed_chain);
        let balance = self
            .store
            .open_escrow(&escrow)
            .await?
            .ok_or_else(|| AgoraError::not_found("agent", payer_id))?;

        let tx_ref = self
            .gateways
            .resolve(escrow.backend)
            .escrow()
            .lock_funds(task_id, payer_id, amount)
            .await;
        self.store.set_escrow_lock_ref(&escrow.id, &tx_ref).await?;
        let warnings = unsettled("lock_funds", &tx_ref, &escrow.id);
        escrow.tx_ref = tx_ref;

        info!(
            escrow_id = %escrow.id,
            task_id = %task_id,
            payer_id = %payer_id,
            amount = %amount,
            payer_balance = %balance,
            "Escrow locked"
        );
        Ok(EscrowOutcome { escrow, warnings })
    }

    async fn release_escrow(&self, escrow_id: &EscrowId) -> Result<EscrowOutcome> {
        self.settle(escrow_id, EscrowStatus::Released).await
    }

    async fn refund_escrow(&self, escrow_id: &EscrowId) -> Result<EscrowOutcome> {
        self.settle(escrow_id, EscrowStatus::Refunded).await
    }

    async fn get_agent_pending_escrows(&self, agent_id: &AgentId) -> Result<Decimal> {
        let escrows = self.store.list_escrows_for_agent(agent_id).await?;
        Ok(escrows
            .iter()
            .filter(|e| e.status == EscrowStatus::Locked)
            .map(|e| e.amount)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_chain::{ChainGateway, EscrowChain, TxLog};
    use agora_store::MemoryStore;
    use agora_types::{Agent, AgentRole, ChainBackend, NewAgent, NewTask};
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: EscrowLedger,
        store: Arc<dyn EntityStore>,
        payer: Agent,
        payee: Agent,
        task: TaskId,
    }

    async fn fixture_with(gateways: impl FnOnce(TxLog) -> GatewayRegistry) -> Fixture {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let registry = gateways(TxLog::new(store.clone()));
        let payer = NewAgent::new("payer", AgentRole::Router).into_agent();
        let payee = NewAgent::new("payee", AgentRole::Executor).into_agent();
        store.insert_agent(&payer).await.unwrap();
        store.insert_agent(&payee).await.unwrap();
        store.adjust_balance(&payer.id, dec!(100)).await.unwrap();
        let task = NewTask::new("job", payer.id).into_task();
        store.insert_task(&task).await.unwrap();
        Fixture {
            ledger: EscrowLedger::new(store.clone(), Arc::new(registry)),
            store,
            payer,
            payee,
            task: task.id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(|log| GatewayRegistry::stub(ChainBackend::Base, 0, log)).await
    }

    async fn balance(store: &Arc<dyn EntityStore>, id: &AgentId) -> Decimal {
        store.get_agent(id).await.unwrap().unwrap().settlement_balance
    }

    /// Escrow chain whose backend never confirms anything
    struct Unreachable;

    #[async_trait::async_trait]
    impl EscrowChain for Unreachable {
        async fn lock_funds(&self, _: &TaskId, _: &AgentId, _: Decimal) -> TxRef {
            TxRef::zero()
        }

        async fn release_funds(&self, _: &EscrowId, _: &AgentId, _: Decimal) -> TxRef {
            TxRef::zero()
        }

        async fn refund_funds(&self, _: &EscrowId, _: &AgentId, _: Decimal) -> TxRef {
            TxRef::zero()
        }
    }

    #[tokio::test]
    async fn lock_then_release_conserves_funds() {
        let f = fixture().await;
        let locked = f
            .ledger
            .create_escrow(&f.task, &f.payer.id, dec!(40), None)
            .await
            .unwrap();
        assert!(locked.is_settled_on_chain());
        assert!(!locked.escrow.tx_ref.is_zero());
        assert_eq!(balance(&f.store, &f.payer.id).await, dec!(60));
        assert_eq!(f.ledger.get_agent_pending_escrows(&f.payer.id).await.unwrap(), dec!(40));

        f.ledger.assign_payee(&locked.escrow.id, &f.payee.id).await.unwrap();
        let released = f.ledger.release_escrow(&locked.escrow.id).await.unwrap();
        assert_eq!(released.escrow.status, EscrowStatus::Released);
        assert!(released.escrow.settlement_tx_ref.is_some());

        let payer = balance(&f.store, &f.payer.id).await;
        let payee = balance(&f.store, &f.payee.id).await;
        let pending = f.ledger.get_agent_pending_escrows(&f.payer.id).await.unwrap();
        assert_eq!(payer + payee + pending, dec!(100));
        assert_eq!(payee, dec!(40));
    }

    #[tokio::test]
    async fn second_resolution_is_refused() {
        let f = fixture().await;
        let escrow = f
            .ledger
            .create_escrow(&f.task, &f.payer.id, dec!(25), None)
            .await
            .unwrap()
            .escrow;

        f.ledger.refund_escrow(&escrow.id).await.unwrap();
        let again = f.ledger.refund_escrow(&escrow.id).await.unwrap_err();
        assert!(again.is_rejection());
        let release = f.ledger.release_escrow(&escrow.id).await.unwrap_err();
        assert!(release.is_rejection());

        assert_eq!(balance(&f.store, &f.payer.id).await, dec!(100));
    }

    #[tokio::test]
    async fn release_needs_a_payee() {
        let f = fixture().await;
        let escrow = f
            .ledger
            .create_escrow(&f.task, &f.payer.id, dec!(10), None)
            .await
            .unwrap()
            .escrow;
        let err = f.ledger.release_escrow(&escrow.id).await.unwrap_err();
        assert!(matches!(err, AgoraError::InvalidInput { .. }));
        assert_eq!(f.ledger.get_escrow(&escrow.id).await.unwrap().status, EscrowStatus::Locked);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let f = fixture().await;
        for amount in [dec!(0), dec!(-5)] {
            let err = f
                .ledger
                .create_escrow(&f.task, &f.payer.id, amount, None)
                .await
                .unwrap_err();
            assert!(matches!(err, AgoraError::InvalidInput { .. }));
        }
        assert_eq!(balance(&f.store, &f.payer.id).await, dec!(100));
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let f = fixture().await;
        let missing_payer = f
            .ledger
            .create_escrow(&f.task, &AgentId::new(), dec!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(missing_payer, AgoraError::NotFound { entity: "agent", .. }));

        let missing_escrow = f.ledger.release_escrow(&EscrowId::new()).await.unwrap_err();
        assert!(matches!(missing_escrow, AgoraError::NotFound { entity: "escrow", .. }));
    }

    #[tokio::test]
    async fn only_the_requester_funds_a_task() {
        let f = fixture().await;
        f.store.adjust_balance(&f.payee.id, dec!(5)).await.unwrap();

        let err = f
            .ledger
            .create_escrow(&f.task, &f.payee.id, dec!(5), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgoraError::InvalidInput { .. }));
        assert_eq!(err.boundary_code(), 400);
        assert_eq!(balance(&f.store, &f.payee.id).await, dec!(5));
        assert!(f.ledger.escrow_for_task(&f.task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unconfirmed_settlement_keeps_local_debit() {
        let f = fixture_with(|log| {
            GatewayRegistry::new(
                ChainGateway::stub(ChainBackend::Base, 0, log).with_escrow(Arc::new(Unreachable)),
            )
        })
        .await;

        let locked = f
            .ledger
            .create_escrow(&f.task, &f.payer.id, dec!(30), Some(f.payee.id))
            .await
            .unwrap();
        assert!(locked.escrow.tx_ref.is_zero());
        assert_eq!(locked.warnings, vec![Warning::unsettled("lock_funds")]);
        assert_eq!(balance(&f.store, &f.payer.id).await, dec!(70));

        let released = f.ledger.release_escrow(&locked.escrow.id).await.unwrap();
        assert_eq!(released.warnings, vec![Warning::unsettled("release_funds")]);
        assert_eq!(balance(&f.store, &f.payee.id).await, dec!(30));
    }
}
