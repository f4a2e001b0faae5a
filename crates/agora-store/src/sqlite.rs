//! SQLite entity store
//!
//! State transitions are conditional `UPDATE ... WHERE status = ?` statements
//! whose affected-row count decides the outcome. Balance changes run inside a
//! transaction that writes first, so the database write lock is held before
//! the current balance is read.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use agora_types::{
    ActivityEvent, Agent, AgentId, AgentStatus, Attestation, ChainTransaction, ChainTxFilter,
    ChainTxId, Connection, Decimal, Escrow, EscrowId, EscrowStatus, Task, TaskId, TaskStatus,
    TxRef, TxStatus, BANDWIDTH_INCREMENT, MAX_BANDWIDTH,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use tracing::{debug, info};

use crate::{AgentChainState, EntityStore, StoreConfig, StoreError, StoreResult};

const AGENT_COLUMNS: &str = "id, name, role, capabilities, attestation_score, settlement_balance, \
    status, deployed_chain, identity_token, wallet_address, encrypted_signing_key, \
    chain_registered, chain_tx_ref, created_at, updated_at";

const TASK_COLUMNS: &str = "id, title, description, requirements, status, requester_id, \
    assigned_agent_id, escrow_amount, result, created_at, dispatched_at, completed_at, \
    settlement_tx_ref";

const ESCROW_COLUMNS: &str = "id, task_id, payer_id, payee_id, amount, status, backend, tx_ref, \
    settlement_tx_ref, created_at, settled_at";

const ATTESTATION_COLUMNS: &str =
    "id, agent_id, attester_id, task_id, score, metadata, backend, tx_ref, created_at";

const CONNECTION_COLUMNS: &str =
    "id, source_agent_id, target_agent_id, bandwidth, last_interaction_at";

const ACTIVITY_COLUMNS: &str = "id, timestamp, message, kind, connection_id, task_id";

const CHAIN_TX_COLUMNS: &str =
    "id, agent_id, backend, method, tx_ref, status, params, error, created_at, updated_at";

/// SQLx-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the database named by `config.url`
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        info!(url = %config.url, "Connecting to SQLite");

        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        // An in-memory database lives and dies with its single connection
        let pool_options = if config.is_ephemeral_sqlite() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!("Connected to SQLite");
        Ok(Self { pool })
    }

    /// Run schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Connect to a fresh in-memory database with the schema applied
    pub async fn in_memory() -> StoreResult<Self> {
        let store = Self::connect(&StoreConfig::sqlite("sqlite::memory:")).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Encoding helpers
// =============================================================================

fn ts(at: &DateTime<Utc>) -> String {
    // Fixed-width nanoseconds keep lexical order equal to time order
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse<V>(table: &'static str, raw: &str) -> StoreResult<V>
where
    V: FromStr,
    V::Err: Display,
{
    raw.parse()
        .map_err(|e| StoreError::corrupt(table, format!("'{}': {}", raw, e)))
}

fn parse_opt<V>(table: &'static str, raw: Option<String>) -> StoreResult<Option<V>>
where
    V: FromStr,
    V::Err: Display,
{
    raw.map(|r| parse(table, &r)).transpose()
}

fn parse_ts(table: &'static str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(table, format!("'{}': {}", raw, e)))
}

fn parse_ts_opt(table: &'static str, raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(table, &r)).transpose()
}

fn pair_key(a: &AgentId, b: &AgentId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}|{}", lo, hi)
}

fn agent_from_row(row: &SqliteRow) -> StoreResult<Agent> {
    const T: &str = "agents";
    Ok(Agent {
        id: parse(T, row.try_get("id")?)?,
        name: row.try_get("name")?,
        role: parse(T, row.try_get("role")?)?,
        capabilities: serde_json::from_str(row.try_get("capabilities")?)?,
        attestation_score: row.try_get("attestation_score")?,
        settlement_balance: parse(T, row.try_get("settlement_balance")?)?,
        status: parse(T, row.try_get("status")?)?,
        deployed_chain: parse(T, row.try_get("deployed_chain")?)?,
        identity_token: row.try_get("identity_token")?,
        wallet_address: row.try_get("wallet_address")?,
        encrypted_signing_key: row.try_get("encrypted_signing_key")?,
        chain_registered: row.try_get("chain_registered")?,
        chain_tx_ref: row.try_get::<Option<String>, _>("chain_tx_ref")?.map(TxRef::new),
        created_at: parse_ts(T, row.try_get("created_at")?)?,
        updated_at: parse_ts(T, row.try_get("updated_at")?)?,
    })
}

fn task_from_row(row: &SqliteRow) -> StoreResult<Task> {
    const T: &str = "tasks";
    Ok(Task {
        id: parse(T, row.try_get("id")?)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        requirements: serde_json::from_str(row.try_get("requirements")?)?,
        status: parse(T, row.try_get("status")?)?,
        requester_id: parse(T, row.try_get("requester_id")?)?,
        assigned_agent_id: parse_opt(T, row.try_get("assigned_agent_id")?)?,
        escrow_amount: parse_opt(T, row.try_get("escrow_amount")?)?,
        result: row.try_get("result")?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
        dispatched_at: parse_ts_opt(T, row.try_get("dispatched_at")?)?,
        completed_at: parse_ts_opt(T, row.try_get("completed_at")?)?,
        settlement_tx_ref: row.try_get::<Option<String>, _>("settlement_tx_ref")?.map(TxRef::new),
    })
}

fn escrow_from_row(row: &SqliteRow) -> StoreResult<Escrow> {
    const T: &str = "escrows";
    Ok(Escrow {
        id: parse(T, row.try_get("id")?)?,
        task_id: parse(T, row.try_get("task_id")?)?,
        payer_id: parse(T, row.try_get("payer_id")?)?,
        payee_id: parse_opt(T, row.try_get("payee_id")?)?,
        amount: parse(T, row.try_get("amount")?)?,
        status: parse(T, row.try_get("status")?)?,
        backend: parse(T, row.try_get("backend")?)?,
        tx_ref: TxRef::new(row.try_get::<String, _>("tx_ref")?),
        settlement_tx_ref: row.try_get::<Option<String>, _>("settlement_tx_ref")?.map(TxRef::new),
        created_at: parse_ts(T, row.try_get("created_at")?)?,
        settled_at: parse_ts_opt(T, row.try_get("settled_at")?)?,
    })
}

fn attestation_from_row(row: &SqliteRow) -> StoreResult<Attestation> {
    const T: &str = "attestations";
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Attestation {
        id: parse(T, row.try_get("id")?)?,
        agent_id: parse(T, row.try_get("agent_id")?)?,
        attester_id: parse(T, row.try_get("attester_id")?)?,
        task_id: parse_opt(T, row.try_get("task_id")?)?,
        score: row.try_get("score")?,
        metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
        backend: parse(T, row.try_get("backend")?)?,
        tx_ref: TxRef::new(row.try_get::<String, _>("tx_ref")?),
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn connection_from_row(row: &SqliteRow) -> StoreResult<Connection> {
    const T: &str = "connections";
    Ok(Connection {
        id: parse(T, row.try_get("id")?)?,
        source_agent_id: parse(T, row.try_get("source_agent_id")?)?,
        target_agent_id: parse(T, row.try_get("target_agent_id")?)?,
        bandwidth: row.try_get("bandwidth")?,
        last_interaction_at: parse_ts(T, row.try_get("last_interaction_at")?)?,
    })
}

fn activity_from_row(row: &SqliteRow) -> StoreResult<ActivityEvent> {
    const T: &str = "activity_events";
    Ok(ActivityEvent {
        id: parse(T, row.try_get("id")?)?,
        timestamp: parse_ts(T, row.try_get("timestamp")?)?,
        message: row.try_get("message")?,
        kind: parse(T, row.try_get("kind")?)?,
        connection_id: parse_opt(T, row.try_get("connection_id")?)?,
        task_id: parse_opt(T, row.try_get("task_id")?)?,
    })
}

fn chain_tx_from_row(row: &SqliteRow) -> StoreResult<ChainTransaction> {
    const T: &str = "chain_transactions";
    Ok(ChainTransaction {
        id: parse(T, row.try_get("id")?)?,
        agent_id: row.try_get("agent_id")?,
        backend: parse(T, row.try_get("backend")?)?,
        method: row.try_get("method")?,
        tx_ref: row.try_get::<Option<String>, _>("tx_ref")?.map(TxRef::new),
        status: parse(T, row.try_get("status")?)?,
        params: serde_json::from_str(row.try_get("params")?)?,
        error: row.try_get("error")?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
        updated_at: parse_ts(T, row.try_get("updated_at")?)?,
    })
}

// =============================================================================
// Connection-level helpers (usable inside a transaction)
// =============================================================================

async fn fetch_task(conn: &mut SqliteConnection, id: &TaskId) -> StoreResult<Option<Task>> {
    let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(task_from_row).transpose()
}

async fn fetch_escrow(conn: &mut SqliteConnection, id: &EscrowId) -> StoreResult<Option<Escrow>> {
    let row = sqlx::query(&format!("SELECT {} FROM escrows WHERE id = ?", ESCROW_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(escrow_from_row).transpose()
}

/// Add `delta` to an agent's balance. Must run inside a transaction.
async fn adjust_in_tx(
    conn: &mut SqliteConnection,
    id: &AgentId,
    delta: Decimal,
) -> StoreResult<Option<Decimal>> {
    // Writing first takes the database write lock before the read below
    let touched = sqlx::query("UPDATE agents SET updated_at = ? WHERE id = ?")
        .bind(ts(&Utc::now()))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    if touched.rows_affected() == 0 {
        return Ok(None);
    }

    let current: String = sqlx::query_scalar("SELECT settlement_balance FROM agents WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    let balance = parse::<Decimal>("agents", &current)? + delta;

    sqlx::query("UPDATE agents SET settlement_balance = ? WHERE id = ?")
        .bind(balance.to_string())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(Some(balance))
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_agent(&self, agent: &Agent) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO agents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            AGENT_COLUMNS
        ))
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(agent.role.as_str())
        .bind(serde_json::to_string(&agent.capabilities)?)
        .bind(agent.attestation_score)
        .bind(agent.settlement_balance.to_string())
        .bind(agent.status.as_str())
        .bind(agent.deployed_chain.as_str())
        .bind(&agent.identity_token)
        .bind(&agent.wallet_address)
        .bind(&agent.encrypted_signing_key)
        .bind(agent.chain_registered)
        .bind(agent.chain_tx_ref.as_ref().map(TxRef::as_str))
        .bind(ts(&agent.created_at))
        .bind(ts(&agent.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, id: &AgentId) -> StoreResult<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = ?", AGENT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query(&format!("SELECT {} FROM agents ORDER BY created_at", AGENT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(agent_from_row).collect()
    }

    async fn set_agent_status(&self, id: &AgentId, status: AgentStatus) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE agents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(ts(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn set_attestation_score(&self, id: &AgentId, score: f64) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE agents SET attestation_score = ?, updated_at = ? WHERE id = ?")
            .bind(score)
            .bind(ts(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn set_agent_chain_state(&self, id: &AgentId, state: AgentChainState) -> StoreResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE agents
            SET identity_token = ?, chain_registered = ?, chain_tx_ref = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(state.identity_token)
        .bind(state.chain_registered)
        .bind(state.chain_tx_ref.map(|r| r.0))
        .bind(ts(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn adjust_balance(&self, id: &AgentId, delta: Decimal) -> StoreResult<Option<Decimal>> {
        let mut tx = self.pool.begin().await?;
        let balance = adjust_in_tx(&mut *tx, id, delta).await?;
        if balance.is_some() {
            tx.commit().await?;
        }
        debug!(agent_id = %id, %delta, ?balance, "Balance adjusted");
        Ok(balance)
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TASK_COLUMNS
        ))
        .bind(task.id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(serde_json::to_string(&task.requirements)?)
        .bind(task.status.as_str())
        .bind(task.requester_id.to_string())
        .bind(task.assigned_agent_id.map(|a| a.to_string()))
        .bind(task.escrow_amount.map(|a| a.to_string()))
        .bind(&task.result)
        .bind(ts(&task.created_at))
        .bind(task.dispatched_at.as_ref().map(ts))
        .bind(task.completed_at.as_ref().map(ts))
        .bind(task.settlement_tx_ref.as_ref().map(TxRef::as_str))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        fetch_task(&mut *conn, id).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE (? IS NULL OR status = ?) ORDER BY created_at",
            TASK_COLUMNS
        ))
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn dispatch_task(
        &self,
        id: &TaskId,
        agent: &AgentId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'dispatched', assigned_agent_id = ?, dispatched_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(agent.to_string())
        .bind(ts(&at))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
        if done.rows_affected() == 0 {
            return Ok(None);
        }
        fetch_task(&mut *conn, id).await
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
        let mut conn = self.pool.acquire().await?;
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, result = ?, completed_at = ?
            WHERE id = ? AND status = 'dispatched'
            "#,
        )
        .bind(status.as_str())
        .bind(result)
        .bind(ts(&at))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
        if done.rows_affected() == 0 {
            return Ok(None);
        }
        fetch_task(&mut *conn, id).await
    }

    async fn set_task_settlement_ref(&self, id: &TaskId, tx_ref: &TxRef) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE tasks SET settlement_tx_ref = ? WHERE id = ?")
            .bind(tx_ref.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn open_escrow(&self, escrow: &Escrow) -> StoreResult<Option<Decimal>> {
        let mut tx = self.pool.begin().await?;
        let Some(balance) = adjust_in_tx(&mut *tx, &escrow.payer_id, -escrow.amount).await? else {
            return Ok(None);
        };
        sqlx::query(&format!(
            "INSERT INTO escrows ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ESCROW_COLUMNS
        ))
        .bind(escrow.id.to_string())
        .bind(escrow.task_id.to_string())
        .bind(escrow.payer_id.to_string())
        .bind(escrow.payee_id.map(|p| p.to_string()))
        .bind(escrow.amount.to_string())
        .bind(escrow.status.as_str())
        .bind(escrow.backend.as_str())
        .bind(escrow.tx_ref.as_str())
        .bind(escrow.settlement_tx_ref.as_ref().map(TxRef::as_str))
        .bind(ts(&escrow.created_at))
        .bind(escrow.settled_at.as_ref().map(ts))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::InvalidInput(
                format!("task {} already has an escrow", escrow.task_id),
            ),
            other => StoreError::Query(other),
        })?;
        sqlx::query("UPDATE tasks SET escrow_amount = ? WHERE id = ?")
            .bind(escrow.amount.to_string())
            .bind(escrow.task_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(balance))
    }

    async fn get_escrow(&self, id: &EscrowId) -> StoreResult<Option<Escrow>> {
        let mut conn = self.pool.acquire().await?;
        fetch_escrow(&mut *conn, id).await
    }

    async fn escrow_for_task(&self, task_id: &TaskId) -> StoreResult<Option<Escrow>> {
        let row = sqlx::query(&format!("SELECT {} FROM escrows WHERE task_id = ?", ESCROW_COLUMNS))
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(escrow_from_row).transpose()
    }

    async fn list_escrows_for_agent(&self, agent: &AgentId) -> StoreResult<Vec<Escrow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM escrows WHERE payer_id = ? OR payee_id = ? ORDER BY created_at",
            ESCROW_COLUMNS
        ))
        .bind(agent.to_string())
        .bind(agent.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(escrow_from_row).collect()
    }

    async fn set_escrow_payee(&self, id: &EscrowId, payee: &AgentId) -> StoreResult<Option<Escrow>> {
        let mut conn = self.pool.acquire().await?;
        let done = sqlx::query("UPDATE escrows SET payee_id = ? WHERE id = ? AND status = 'locked'")
            .bind(payee.to_string())
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        if done.rows_affected() == 0 {
            return Ok(None);
        }
        fetch_escrow(&mut *conn, id).await
    }

    async fn set_escrow_lock_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE escrows SET tx_ref = ? WHERE id = ?")
            .bind(tx_ref.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
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
        let mut tx = self.pool.begin().await?;
        let done = sqlx::query(
            r#"
            UPDATE escrows
            SET status = ?, settled_at = ?
            WHERE id = ? AND status = 'locked' AND (? = 'refunded' OR payee_id IS NOT NULL)
            "#,
        )
        .bind(to.as_str())
        .bind(ts(&at))
        .bind(id.to_string())
        .bind(to.as_str())
        .execute(&mut *tx)
        .await?;
        if done.rows_affected() == 0 {
            return Ok(None);
        }

        let escrow = fetch_escrow(&mut *tx, id)
            .await?
            .ok_or_else(|| StoreError::corrupt("escrows", "escrow vanished inside transaction"))?;
        let beneficiary = escrow
            .beneficiary(to)
            .ok_or_else(|| StoreError::corrupt("escrows", "settled escrow has no beneficiary"))?;
        if adjust_in_tx(&mut *tx, &beneficiary, escrow.amount).await?.is_none() {
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(escrow))
    }

    async fn set_escrow_settlement_ref(&self, id: &EscrowId, tx_ref: &TxRef) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE escrows SET settlement_tx_ref = ? WHERE id = ?")
            .bind(tx_ref.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn insert_attestation(&self, attestation: &Attestation) -> StoreResult<()> {
        let metadata = attestation
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(&format!(
            "INSERT INTO attestations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ATTESTATION_COLUMNS
        ))
        .bind(attestation.id.to_string())
        .bind(attestation.agent_id.to_string())
        .bind(attestation.attester_id.to_string())
        .bind(attestation.task_id.map(|t| t.to_string()))
        .bind(attestation.score)
        .bind(metadata)
        .bind(attestation.backend.as_str())
        .bind(attestation.tx_ref.as_str())
        .bind(ts(&attestation.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_attestations(&self, agent: &AgentId) -> StoreResult<Vec<Attestation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attestations WHERE agent_id = ? ORDER BY created_at",
            ATTESTATION_COLUMNS
        ))
        .bind(agent.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attestation_from_row).collect()
    }

    async fn find_connection(&self, a: &AgentId, b: &AgentId) -> StoreResult<Option<Connection>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM connections WHERE pair_key = ?",
            CONNECTION_COLUMNS
        ))
        .bind(pair_key(a, b))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(connection_from_row).transpose()
    }

    async fn record_interaction(&self, source: &AgentId, target: &AgentId) -> StoreResult<Connection> {
        let key = pair_key(source, target);
        let fresh = Connection::new(*source, *target);
        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO connections
                (id, pair_key, source_agent_id, target_agent_id, bandwidth, last_interaction_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(pair_key) DO UPDATE SET
                bandwidth = MIN(?, ROUND(connections.bandwidth + ?, 2)),
                last_interaction_at = excluded.last_interaction_at
            "#,
        )
        .bind(fresh.id.to_string())
        .bind(&key)
        .bind(fresh.source_agent_id.to_string())
        .bind(fresh.target_agent_id.to_string())
        .bind(fresh.bandwidth)
        .bind(ts(&fresh.last_interaction_at))
        .bind(MAX_BANDWIDTH)
        .bind(BANDWIDTH_INCREMENT)
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM connections WHERE pair_key = ?",
            CONNECTION_COLUMNS
        ))
        .bind(&key)
        .fetch_one(&mut *conn)
        .await?;
        connection_from_row(&row)
    }

    async fn list_connections(&self, agent: &AgentId) -> StoreResult<Vec<Connection>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM connections WHERE source_agent_id = ? OR target_agent_id = ?",
            CONNECTION_COLUMNS
        ))
        .bind(agent.to_string())
        .bind(agent.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(connection_from_row).collect()
    }

    async fn append_activity(&self, event: &ActivityEvent) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO activity_events ({}) VALUES (?, ?, ?, ?, ?, ?)",
            ACTIVITY_COLUMNS
        ))
        .bind(event.id.to_string())
        .bind(ts(&event.timestamp))
        .bind(&event.message)
        .bind(event.kind.as_str())
        .bind(event.connection_id.map(|c| c.to_string()))
        .bind(event.task_id.map(|t| t.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM activity_events ORDER BY seq DESC LIMIT ?",
            ACTIVITY_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(activity_from_row).collect()
    }

    async fn activity_for_task(&self, task_id: &TaskId) -> StoreResult<Vec<ActivityEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM activity_events WHERE task_id = ? ORDER BY seq",
            ACTIVITY_COLUMNS
        ))
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(activity_from_row).collect()
    }

    async fn append_chain_tx(&self, tx: &ChainTransaction) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO chain_transactions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CHAIN_TX_COLUMNS
        ))
        .bind(tx.id.to_string())
        .bind(&tx.agent_id)
        .bind(tx.backend.as_str())
        .bind(&tx.method)
        .bind(tx.tx_ref.as_ref().map(TxRef::as_str))
        .bind(tx.status.as_str())
        .bind(serde_json::to_string(&tx.params)?)
        .bind(&tx.error)
        .bind(ts(&tx.created_at))
        .bind(ts(&tx.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_chain_tx(
        &self,
        id: &ChainTxId,
        status: TxStatus,
        tx_ref: Option<&TxRef>,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE chain_transactions
            SET status = ?, tx_ref = COALESCE(?, tx_ref), error = COALESCE(?, error), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(tx_ref.map(TxRef::as_str))
        .bind(error)
        .bind(ts(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn list_chain_txs(&self, filter: &ChainTxFilter) -> StoreResult<Vec<ChainTransaction>> {
        let status = filter.status.map(|s| s.as_str());
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM chain_transactions
            WHERE (? IS NULL OR agent_id = ?)
              AND (? IS NULL OR status = ?)
              AND (? IS NULL OR method = ?)
            ORDER BY seq DESC
            LIMIT ?
            "#,
            CHAIN_TX_COLUMNS
        ))
        .bind(filter.agent_id.as_deref())
        .bind(filter.agent_id.as_deref())
        .bind(status)
        .bind(status)
        .bind(filter.method.as_deref())
        .bind(filter.method.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chain_tx_from_row).collect()
    }
}
