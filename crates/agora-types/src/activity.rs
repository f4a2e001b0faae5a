//! Connections and activity events
//!
//! A `Connection` tracks interaction affinity between two agents; an
//! `ActivityEvent` is an append-only entry in the observability log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ActivityId, AgentId, ConnectionId, TaskId};

/// Bandwidth of a freshly created connection
pub const DEFAULT_BANDWIDTH: f64 = 0.5;
/// Bandwidth gained per repeated interaction
pub const BANDWIDTH_INCREMENT: f64 = 0.05;
/// Upper bound for bandwidth
pub const MAX_BANDWIDTH: f64 = 1.0;

/// Observed bandwidth between two agents. At most one per unordered pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source_agent_id: AgentId,
    pub target_agent_id: AgentId,
    pub bandwidth: f64,
    pub last_interaction_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(source: AgentId, target: AgentId) -> Self {
        Self {
            id: ConnectionId::new(),
            source_agent_id: source,
            target_agent_id: target,
            bandwidth: DEFAULT_BANDWIDTH,
            last_interaction_at: Utc::now(),
        }
    }

    /// Whether this connection links `a` and `b` in either direction
    pub fn links(&self, a: &AgentId, b: &AgentId) -> bool {
        (self.source_agent_id == *a && self.target_agent_id == *b)
            || (self.source_agent_id == *b && self.target_agent_id == *a)
    }

    /// Record another interaction
    pub fn bump(&mut self) {
        // Rounded to hundredths so repeated bumps do not accumulate float drift
        let next = ((self.bandwidth + BANDWIDTH_INCREMENT) * 100.0).round() / 100.0;
        self.bandwidth = next.min(MAX_BANDWIDTH);
        self.last_interaction_at = Utc::now();
    }
}

/// Category of an activity event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// An agent was assigned a task
    Hired,
    /// Funds moved (escrow release or refund)
    Payment,
    /// An attestation was recorded
    Trust,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hired => "hired",
            Self::Payment => "payment",
            Self::Trust => "trust",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityType {
    type Err = crate::AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hired" => Ok(Self::Hired),
            "payment" => Ok(Self::Payment),
            "trust" => Ok(Self::Trust),
            other => Err(crate::AgoraError::invalid_input(format!(
                "unknown activity type '{}'",
                other
            ))),
        }
    }
}

/// A single entry in the activity log. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: ActivityId,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl ActivityEvent {
    pub fn new(message: impl Into<String>, kind: ActivityType) -> Self {
        Self {
            id: ActivityId::new(),
            timestamp: Utc::now(),
            message: message.into(),
            kind,
            connection_id: None,
            task_id: None,
        }
    }

    pub fn with_connection(mut self, connection_id: Option<ConnectionId>) -> Self {
        self.connection_id = connection_id;
        self
    }

    pub fn with_task(mut self, task_id: Option<TaskId>) -> Self {
        self.task_id = task_id;
        self
    }
}
