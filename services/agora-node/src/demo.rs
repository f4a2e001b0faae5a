//! Scripted walk through one escrowed task

use agora_coordinator::{Agora, BalanceView, StatusSummary, TaskOutcome};
use agora_types::{ActivityEvent, AgentRole, NewAgent, NewTask, Warning};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub created: TaskOutcome,
    pub dispatched: TaskOutcome,
    pub completed: TaskOutcome,
    pub requester: BalanceView,
    pub worker: BalanceView,
    pub worker_score: f64,
    pub activity: Vec<ActivityEvent>,
    pub registration_warnings: Vec<Warning>,
    pub status: StatusSummary,
}

pub async fn run(agora: &Agora) -> anyhow::Result<DemoReport> {
    let registry = agora.registry();

    let requester = registry
        .register_agent(NewAgent::new("demo-router", AgentRole::Router).with_wallet("0xdemo-router"))
        .await?;
    let worker = registry
        .register_agent(
            NewAgent::new("demo-executor", AgentRole::Executor)
                .with_capabilities(["summarize", "translate"]),
        )
        .await?;
    let mut registration_warnings = requester.warnings;
    registration_warnings.extend(worker.warnings);
    let (requester, worker) = (requester.agent, worker.agent);

    let budget = Decimal::from(100);
    registry.credit_agent(&requester.id, budget).await?;

    let created = agora
        .tasks()
        .create_task(
            NewTask::new("Summarize the quarterly report", requester.id)
                .with_description("Two paragraphs, plain language")
                .with_requirements(["summarize"])
                .with_escrow(budget),
        )
        .await?;
    let task_id = created.task.id;

    let dispatched = agora.tasks().dispatch_task(&task_id, &worker.id).await?;
    let completed = agora
        .tasks()
        .complete_task(&task_id, Some("Revenue grew; costs held flat.".into()), Some(0.9))
        .await?;

    for warning in created
        .warnings
        .iter()
        .chain(&completed.warnings)
        .chain(&registration_warnings)
    {
        warn!(%warning, "Demo side effect not settled");
    }
    info!(task_id = %task_id, "Demo task settled");

    Ok(DemoReport {
        requester: registry.agent_balance(&requester.id).await?,
        worker: registry.agent_balance(&worker.id).await?,
        worker_score: registry.get_agent(&worker.id).await?.attestation_score,
        activity: agora.activity().task_activity(&task_id).await?,
        status: agora.status_summary().await?,
        created,
        dispatched,
        completed,
        registration_warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_store::MemoryStore;
    use agora_types::{EscrowStatus, TaskStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn demo_moves_the_budget_to_the_worker() {
        let agora = Agora::in_process(Arc::new(MemoryStore::new()));
        let report = run(&agora).await.unwrap();

        assert_eq!(report.completed.task.status, TaskStatus::Completed);
        assert_eq!(
            report.completed.escrow.as_ref().unwrap().status,
            EscrowStatus::Released
        );
        assert_eq!(report.requester.settlement_balance, Decimal::ZERO);
        assert_eq!(report.worker.settlement_balance, Decimal::from(100));
        assert!((report.worker_score - 0.9).abs() < 1e-9);
        assert_eq!(report.activity.len(), 3);
        assert!(report.registration_warnings.is_empty());
        assert_eq!(report.status.tasks_by_status.get("completed"), Some(&1));
    }
}
