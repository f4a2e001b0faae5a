//! Task types
//!
//! ```text
//! pending ──dispatch──▶ dispatched ──complete──▶ completed
//!                                  └──fail─────▶ failed
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::{AgentId, AgoraError, TaskId, TxRef};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether an assignee must be present in this state
    pub fn requires_assignee(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Dispatched)
                | (Self::Dispatched, Self::Completed)
                | (Self::Dispatched, Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatched" => Ok(Self::Dispatched),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AgoraError::invalid_input(format!("unknown task status '{}'", other))),
        }
    }
}

/// A unit of requested work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub requirements: BTreeSet<String>,
    pub status: TaskStatus,
    pub requester_id: AgentId,
    pub assigned_agent_id: Option<AgentId>,
    pub escrow_amount: Option<Decimal>,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_ref: Option<TxRef>,
}

/// Request to create a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: BTreeSet<String>,
    pub requester_id: AgentId,
    #[serde(default)]
    pub escrow_amount: Option<Decimal>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, requester_id: AgentId) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            requirements: BTreeSet::new(),
            requester_id,
            escrow_amount: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_escrow(mut self, amount: Decimal) -> Self {
        self.escrow_amount = Some(amount);
        self
    }

    pub fn into_task(self) -> Task {
        Task {
            id: TaskId::new(),
            title: self.title,
            description: self.description,
            requirements: self.requirements,
            status: TaskStatus::Pending,
            requester_id: self.requester_id,
            assigned_agent_id: None,
            escrow_amount: self.escrow_amount.filter(|a| *a > Decimal::ZERO),
            result: None,
            created_at: Utc::now(),
            dispatched_at: None,
            completed_at: None,
            settlement_tx_ref: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn only_forward_transitions_are_allowed() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Completed));
        assert!(Dispatched.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Dispatched));
        assert!(!Dispatched.can_transition_to(Pending));
    }

    #[test]
    fn zero_escrow_is_dropped() {
        let task = NewTask::new("t", AgentId::new()).with_escrow(dec!(0)).into_task();
        assert_eq!(task.escrow_amount, None);

        let task = NewTask::new("t", AgentId::new()).with_escrow(dec!(12.5)).into_task();
        assert_eq!(task.escrow_amount, Some(dec!(12.5)));
    }

    #[test]
    fn new_tasks_are_pending_and_unassigned() {
        let task = NewTask::new("t", AgentId::new()).into_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_agent_id.is_none());
        assert!(!task.status.requires_assignee());
    }
}
