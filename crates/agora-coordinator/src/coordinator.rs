//! Task lifecycle
//!
//! ```text
//! pending ──dispatch──> dispatched ──complete──> completed
//!                            └─────────fail────> failed
//! ```
//!
//! Every transition is a conditional store write, so a task that already
//! moved on refuses the call without any side effect. Escrow, reputation
//! and activity effects run only after the transition applied.
//!
//! Once a task is completed or failed it can never be retried, so its escrow
//! is settled first. Reputation and activity effects that fail after that
//! point come back as [`Warning`]s on the outcome.

use std::sync::Arc;

use agora_activity::ActivityRecorder;
use agora_escrow::{EscrowLedger, EscrowManager, EscrowOutcome};
use agora_reputation::ReputationAggregator;
use agora_store::EntityStore;
use agora_types::{
    validate_score, ActivityType, AgentId, AgentStatus, AgoraError, Attestation, Escrow,
    EscrowStatus, NewTask, Result, Task, TaskId, TaskStatus, Warning,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// A task after a transition, with the escrow and attestation it touched
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow: Option<Escrow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
    pub warnings: Vec<Warning>,
}

impl TaskOutcome {
    fn new(task: Task) -> Self {
        Self {
            task,
            escrow: None,
            attestation: None,
            warnings: Vec::new(),
        }
    }

    fn with_escrow(&mut self, outcome: EscrowOutcome) {
        self.warnings.extend(outcome.warnings);
        self.escrow = Some(outcome.escrow);
    }

    fn side_effect_failed(&mut self, operation: &str, error: AgoraError) {
        warn!(
            task_id = %self.task.id,
            operation,
            error = %error,
            "Side effect failed after task transition"
        );
        self.warnings.push(Warning::new(operation, error.to_string()));
    }
}

pub struct TaskCoordinator {
    store: Arc<dyn EntityStore>,
    escrow: Arc<EscrowLedger>,
    reputation: Arc<ReputationAggregator>,
    activity: Arc<ActivityRecorder>,
}

impl TaskCoordinator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        escrow: Arc<EscrowLedger>,
        reputation: Arc<ReputationAggregator>,
        activity: Arc<ActivityRecorder>,
    ) -> Self {
        Self {
            store,
            escrow,
            reputation,
            activity,
        }
    }

    /// Persist a pending task and lock its escrow, if one was requested
    pub async fn create_task(&self, request: NewTask) -> Result<TaskOutcome> {
        if request.title.trim().is_empty() {
            return Err(AgoraError::invalid_input("task title must not be empty"));
        }
        if let Some(amount) = request.escrow_amount {
            if amount < Decimal::ZERO {
                return Err(AgoraError::invalid_input(format!(
                    "escrow amount must not be negative, got {}",
                    amount
                )));
            }
        }
        if self.store.get_agent(&request.requester_id).await?.is_none() {
            return Err(AgoraError::not_found("agent", request.requester_id));
        }

        let task = request.into_task();
        self.store.insert_task(&task).await?;
        info!(
            task_id = %task.id,
            requester_id = %task.requester_id,
            title = %task.title,
            "Task created"
        );

        let mut outcome = TaskOutcome::new(task);
        if let Some(amount) = outcome.task.escrow_amount {
            let escrow = self
                .escrow
                .create_escrow(&outcome.task.id, &outcome.task.requester_id, amount, None)
                .await?;
            outcome.with_escrow(escrow);
        }
        Ok(outcome)
    }

    /// Assign a pending task to `agent_id`
    pub async fn dispatch_task(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<TaskOutcome> {
        let current = self.require_task(task_id).await?;
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AgoraError::not_found("agent", agent_id))?;
        if current.requester_id == *agent_id {
            return Err(AgoraError::invalid_input(format!(
                "agent {} cannot be assigned its own task",
                agent_id
            )));
        }

        let Some(task) = self.store.dispatch_task(task_id, agent_id, Utc::now()).await? else {
            return Err(self.rejection(task_id, TaskStatus::Pending).await?);
        };
        let mut outcome = TaskOutcome::new(task);

        if let Some(escrow) = self.locked_escrow(task_id).await? {
            outcome.escrow = Some(self.escrow.assign_payee(&escrow.id, agent_id).await?);
        }

        self.store.set_agent_status(agent_id, AgentStatus::Processing).await?;
        let connection = self
            .activity
            .create_or_bump_connection(&outcome.task.requester_id, agent_id)
            .await?;
        self.activity
            .record_activity(
                format!("{} hired for \"{}\"", agent.name, outcome.task.title),
                ActivityType::Hired,
                Some(connection.id),
                Some(outcome.task.id),
            )
            .await?;

        info!(
            task_id = %task_id,
            agent_id = %agent_id,
            bandwidth = connection.bandwidth,
            "Task dispatched"
        );
        Ok(outcome)
    }

    /// Complete a dispatched task, attest the assignee and release its escrow
    pub async fn complete_task(
        &self,
        task_id: &TaskId,
        result: Option<String>,
        attestation_score: Option<f64>,
    ) -> Result<TaskOutcome> {
        let attestation_score = attestation_score.map(validate_score).transpose()?;

        let Some(task) = self
            .store
            .finish_task(task_id, TaskStatus::Completed, result, Utc::now())
            .await?
        else {
            return Err(self.rejection(task_id, TaskStatus::Dispatched).await?);
        };
        let mut outcome = TaskOutcome::new(task);

        let released = match self.locked_escrow(task_id).await? {
            Some(escrow) => Some(self.escrow.release_escrow(&escrow.id).await?),
            None => None,
        };
        let assignee = self.release_assignee(&mut outcome).await;

        if let (Some(score), Some(assignee)) = (attestation_score, assignee) {
            match self
                .reputation
                .record_attestation(
                    &assignee,
                    &outcome.task.requester_id,
                    score,
                    Some(outcome.task.id),
                    None,
                )
                .await
            {
                Ok(recorded) => {
                    let message = format!(
                        "Attested {} for \"{}\" (reputation {:.2})",
                        score, outcome.task.title, recorded.score
                    );
                    outcome.warnings.extend(recorded.warnings);
                    outcome.attestation = Some(recorded.attestation);
                    if let Err(e) = self.record_trust(&outcome.task, &assignee, message).await {
                        outcome.side_effect_failed("record_activity", e);
                    }
                }
                Err(e) => outcome.side_effect_failed("record_attestation", e),
            }
        }

        if let Some(released) = released {
            self.record_settlement(&mut outcome, released, "Paid").await;
        }

        info!(
            task_id = %task_id,
            agent_id = ?assignee,
            warnings = outcome.warnings.len(),
            "Task completed"
        );
        Ok(outcome)
    }

    /// Fail a dispatched task and refund its escrow to the requester
    pub async fn fail_task(&self, task_id: &TaskId, reason: impl Into<String>) -> Result<TaskOutcome> {
        let reason = reason.into();
        let Some(task) = self
            .store
            .finish_task(task_id, TaskStatus::Failed, Some(reason.clone()), Utc::now())
            .await?
        else {
            return Err(self.rejection(task_id, TaskStatus::Dispatched).await?);
        };
        let mut outcome = TaskOutcome::new(task);

        let refunded = match self.locked_escrow(task_id).await? {
            Some(escrow) => Some(self.escrow.refund_escrow(&escrow.id).await?),
            None => None,
        };
        self.release_assignee(&mut outcome).await;
        if let Some(refunded) = refunded {
            self.record_settlement(&mut outcome, refunded, "Refunded").await;
        }

        info!(task_id = %task_id, reason = %reason, "Task failed");
        Ok(outcome)
    }

    /// Fail every dispatched task older than `max_age`.
    ///
    /// Tasks that finish while the sweep runs are skipped.
    pub async fn fail_stale_tasks(&self, max_age: Duration) -> Result<Vec<TaskOutcome>> {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<Task> = self
            .store
            .list_tasks(Some(TaskStatus::Dispatched))
            .await?
            .into_iter()
            .filter(|t| t.dispatched_at.map_or(false, |at| at <= cutoff))
            .collect();

        let mut failed = Vec::with_capacity(stale.len());
        for task in stale {
            match self
                .fail_task(&task.id, format!("no result within {}s", max_age.num_seconds()))
                .await
            {
                Ok(outcome) => failed.push(outcome),
                Err(e) if e.is_rejection() => {
                    debug!(task_id = %task.id, error = %e, "Task finished during stale sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.require_task(task_id).await
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        Ok(self.store.list_tasks(status).await?)
    }

    async fn require_task(&self, task_id: &TaskId) -> Result<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AgoraError::not_found("task", task_id))
    }

    /// Why a conditional transition out of `expected` did not apply
    async fn rejection(&self, task_id: &TaskId, expected: TaskStatus) -> Result<AgoraError> {
        Ok(match self.store.get_task(task_id).await? {
            None => AgoraError::not_found("task", task_id),
            Some(task) => AgoraError::invalid_transition("task", task_id, expected, task.status),
        })
    }

    async fn locked_escrow(&self, task_id: &TaskId) -> Result<Option<Escrow>> {
        Ok(self
            .escrow
            .escrow_for_task(task_id)
            .await?
            .filter(|e| e.status == EscrowStatus::Locked))
    }

    /// Put the assignee of a finished task back to idle
    async fn release_assignee(&self, outcome: &mut TaskOutcome) -> Option<AgentId> {
        let assignee = outcome.task.assigned_agent_id?;
        if let Err(e) = self.store.set_agent_status(&assignee, AgentStatus::Idle).await {
            outcome.side_effect_failed("set_agent_status", e.into());
        }
        Some(assignee)
    }

    async fn record_trust(&self, task: &Task, assignee: &AgentId, message: String) -> Result<()> {
        let connection = self.activity.connection_between(&task.requester_id, assignee).await?;
        self.activity
            .record_activity(
                message,
                ActivityType::Trust,
                connection.map(|c| c.id),
                Some(task.id),
            )
            .await?;
        Ok(())
    }

    async fn record_settlement(&self, outcome: &mut TaskOutcome, settled: EscrowOutcome, verb: &str) {
        let escrow = settled.escrow.clone();
        outcome.with_escrow(settled);

        let reference = match &escrow.settlement_tx_ref {
            Some(tx_ref) if !tx_ref.is_zero() => tx_ref.to_string(),
            _ => "unsettled".to_string(),
        };
        let recorded = self
            .activity
            .record_activity(
                format!(
                    "{} {} for \"{}\" (ref {})",
                    verb, escrow.amount, outcome.task.title, reference
                ),
                ActivityType::Payment,
                None,
                Some(outcome.task.id),
            )
            .await;
        if let Err(e) = recorded {
            outcome.side_effect_failed("record_activity", e);
        }

        if let Some(tx_ref) = escrow.settlement_tx_ref {
            match self.store.set_task_settlement_ref(&outcome.task.id, &tx_ref).await {
                Ok(_) => outcome.task.settlement_tx_ref = Some(tx_ref),
                Err(e) => outcome.side_effect_failed("set_task_settlement_ref", e.into()),
            }
        }
    }
}
