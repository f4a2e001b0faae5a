//! Agora Activity - Event log and agent connections

use std::sync::Arc;

use agora_store::EntityStore;
use agora_types::{
    ActivityEvent, ActivityType, AgentId, AgoraError, Connection, ConnectionId, Result, TaskId,
};
use tracing::debug;

pub struct ActivityRecorder {
    store: Arc<dyn EntityStore>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Create the connection for the unordered pair, or bump its bandwidth
    pub async fn create_or_bump_connection(
        &self,
        source: &AgentId,
        target: &AgentId,
    ) -> Result<Connection> {
        if source == target {
            return Err(AgoraError::invalid_input("an agent cannot connect to itself"));
        }
        let connection = self.store.record_interaction(source, target).await?;
        debug!(
            connection_id = %connection.id,
            bandwidth = connection.bandwidth,
            "Connection recorded"
        );
        Ok(connection)
    }

    pub async fn record_activity(
        &self,
        message: impl Into<String>,
        kind: ActivityType,
        connection_id: Option<ConnectionId>,
        task_id: Option<TaskId>,
    ) -> Result<ActivityEvent> {
        let event = ActivityEvent::new(message, kind)
            .with_connection(connection_id)
            .with_task(task_id);
        self.store.append_activity(&event).await?;
        debug!(event_id = %event.id, kind = %event.kind, "{}", event.message);
        Ok(event)
    }

    /// Most recent events first
    pub async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>> {
        Ok(self.store.list_activity(limit).await?)
    }

    pub async fn task_activity(&self, task_id: &TaskId) -> Result<Vec<ActivityEvent>> {
        Ok(self.store.activity_for_task(task_id).await?)
    }

    pub async fn connection_between(&self, a: &AgentId, b: &AgentId) -> Result<Option<Connection>> {
        Ok(self.store.find_connection(a, b).await?)
    }

    pub async fn connections_of(&self, agent: &AgentId) -> Result<Vec<Connection>> {
        Ok(self.store.list_connections(agent).await?)
    }
}
