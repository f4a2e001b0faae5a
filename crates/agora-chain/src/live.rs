//! Live adapter
//!
//! Talks JSON-RPC to a settlement relay: `agora_submit` sends a contract
//! call, then `agora_getTransactionStatus` is polled until the relay reports
//! `confirmed` or `failed`. Every step is mirrored in the transaction log.
//! Errors end in the zero reference, never in a returned error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agora_types::{Agent, AgentId, ChainBackend, EscrowId, TaskId, TxRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{
    AttestationChain, BackendConfig, ChainError, ChainEvent, ChainReader, ChainResult,
    EscrowChain, EventQuery, IdentityChain, IdentityVerification, MintedIdentity, OnchainAgent,
    PaymentChain, PaymentReceipt, ScheduledJob, SchedulingChain, TxLog,
};

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct Submitted {
    tx_ref: TxRef,
    /// Method-specific values (payment id, token id, job id)
    #[serde(default)]
    output: Option<Value>,
}

#[derive(Deserialize)]
struct StatusReply {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct IdentityReply {
    verified: bool,
    #[serde(default)]
    identity_ref: Option<String>,
}

#[derive(Deserialize)]
struct AgentReply {
    registered: bool,
    #[serde(default)]
    identity_token: Option<String>,
    #[serde(default)]
    last_tx_ref: Option<TxRef>,
}

fn output_field(output: &Option<Value>, key: &str) -> Option<String> {
    match output.as_ref()?.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Adapter for a configured backend relay
pub struct LiveAdapter {
    backend: ChainBackend,
    rpc_url: String,
    contract: String,
    signer_key: String,
    poll_interval: Duration,
    max_polls: u32,
    client: reqwest::Client,
    next_id: AtomicU64,
    tx_log: TxLog,
}

impl LiveAdapter {
    /// `None` unless `config` carries everything live mode needs
    pub fn new(backend: ChainBackend, config: &BackendConfig, tx_log: TxLog) -> Option<Self> {
        if !config.is_complete() {
            return None;
        }
        Some(Self {
            backend,
            rpc_url: config.rpc_url.clone()?,
            contract: config.contract_address.clone()?,
            signer_key: config.signer_key.clone()?,
            poll_interval: Duration::from_millis(config.confirmation_poll_ms),
            max_polls: config.max_confirmation_polls.max(1),
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            tx_log,
        })
    }

    pub fn backend(&self) -> ChainBackend {
        self.backend
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .bearer_auth(&self.signer_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Network {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Network {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let reply: RpcResponse = response.json().await.map_err(|e| ChainError::InvalidResponse {
            message: e.to_string(),
        })?;

        if let Some(err) = reply.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(reply.result.unwrap_or(Value::Null)).map_err(|e| {
            ChainError::InvalidResponse {
                message: format!("{}: {}", method, e),
            }
        })
    }

    async fn submit_and_confirm(&self, method: &str, args: Value) -> ChainResult<Submitted> {
        let submitted: Submitted = self
            .rpc(
                "agora_submit",
                json!({ "contract": self.contract, "method": method, "args": args }),
            )
            .await?;

        if submitted.tx_ref.is_zero() {
            return Err(ChainError::InvalidResponse {
                message: "relay returned the zero reference".into(),
            });
        }
        debug!(backend = %self.backend, method, tx_ref = %submitted.tx_ref, "Transaction submitted");

        for _ in 0..self.max_polls {
            let reply: StatusReply = self
                .rpc("agora_getTransactionStatus", json!({ "tx_ref": submitted.tx_ref }))
                .await?;
            match reply.status.as_str() {
                "confirmed" => return Ok(submitted),
                "failed" | "reverted" => {
                    return Err(ChainError::Reverted {
                        tx_ref: submitted.tx_ref,
                        reason: reply.reason.unwrap_or_else(|| reply.status.clone()),
                    })
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }

        Err(ChainError::ConfirmationTimeout {
            tx_ref: submitted.tx_ref,
            polls: self.max_polls,
        })
    }

    /// Submit a contract call and wait for it. Returns the zero reference on
    /// any failure.
    async fn submit(&self, subject: &str, method: &str, args: Value) -> (TxRef, Option<Value>) {
        let entry = self
            .tx_log
            .pending(subject, self.backend, method, args.clone())
            .await;

        match self.submit_and_confirm(method, args).await {
            Ok(submitted) => {
                self.tx_log.confirmed(&entry, &submitted.tx_ref).await;
                info!(
                    backend = %self.backend,
                    method,
                    subject,
                    tx_ref = %submitted.tx_ref,
                    "Transaction confirmed"
                );
                (submitted.tx_ref, submitted.output)
            }
            Err(e) => {
                error!(backend = %self.backend, method, subject, error = %e, "Settlement call failed");
                self.tx_log.failed(&entry, &e.to_string()).await;
                (TxRef::zero(), None)
            }
        }
    }
}

#[async_trait]
impl EscrowChain for LiveAdapter {
    async fn lock_funds(&self, task_id: &TaskId, payer: &AgentId, amount: Decimal) -> TxRef {
        let args = json!({ "task_id": task_id.to_string(), "payer": payer.to_string(), "amount": amount.to_string() });
        self.submit(&payer.to_string(), "lock_funds", args).await.0
    }

    async fn release_funds(&self, escrow_id: &EscrowId, payee: &AgentId, amount: Decimal) -> TxRef {
        let args = json!({ "escrow_id": escrow_id.to_string(), "payee": payee.to_string(), "amount": amount.to_string() });
        self.submit(&payee.to_string(), "release_funds", args).await.0
    }

    async fn refund_funds(&self, escrow_id: &EscrowId, payer: &AgentId, amount: Decimal) -> TxRef {
        let args = json!({ "escrow_id": escrow_id.to_string(), "payer": payer.to_string(), "amount": amount.to_string() });
        self.submit(&payer.to_string(), "refund_funds", args).await.0
    }
}

#[async_trait]
impl AttestationChain for LiveAdapter {
    async fn record_attestation(
        &self,
        agent_id: &AgentId,
        attester_id: &AgentId,
        score: f64,
        metadata: Option<&Value>,
    ) -> TxRef {
        let args = json!({
            "agent_id": agent_id.to_string(),
            "attester_id": attester_id.to_string(),
            "score": score,
            "metadata": metadata,
        });
        self.submit(&agent_id.to_string(), "record_attestation", args).await.0
    }
}

#[async_trait]
impl PaymentChain for LiveAdapter {
    async fn process_payment(
        &self,
        from: &AgentId,
        to: &AgentId,
        amount: Decimal,
        memo: Option<&str>,
    ) -> PaymentReceipt {
        let args = json!({
            "from": from.to_string(),
            "to": to.to_string(),
            "amount": amount.to_string(),
            "memo": memo,
        });
        let (tx_ref, output) = self.submit(&from.to_string(), "process_payment", args).await;
        PaymentReceipt {
            payment_id: output_field(&output, "payment_id"),
            tx_ref,
        }
    }

    async fn fund_gas(&self, address: &str, amount: Decimal) -> TxRef {
        let args = json!({ "address": address, "amount": amount.to_string() });
        self.submit(address, "fund_gas", args).await.0
    }
}

#[async_trait]
impl IdentityChain for LiveAdapter {
    async fn verify_identity(&self, agent_id: &AgentId) -> IdentityVerification {
        let params = json!({ "contract": self.contract, "agent_id": agent_id.to_string() });
        match self.rpc::<IdentityReply>("agora_verifyIdentity", params).await {
            Ok(reply) => IdentityVerification {
                verified: reply.verified,
                identity_ref: reply.identity_ref,
            },
            Err(e) => {
                warn!(backend = %self.backend, agent_id = %agent_id, error = %e, "Identity verification failed");
                IdentityVerification {
                    verified: false,
                    identity_ref: None,
                }
            }
        }
    }

    async fn mint_identity_token(&self, agent_id: &AgentId, metadata: &Value) -> MintedIdentity {
        let args = json!({ "agent_id": agent_id.to_string(), "metadata": metadata });
        let (tx_ref, output) = self
            .submit(&agent_id.to_string(), "mint_identity_token", args)
            .await;
        MintedIdentity {
            token_id: output_field(&output, "token_id"),
            tx_ref,
        }
    }

    async fn register_agent(&self, agent: &Agent) -> TxRef {
        let args = json!({
            "agent_id": agent.id.to_string(),
            "name": agent.name,
            "role": agent.role.as_str(),
            "capabilities": agent.capabilities,
            "wallet_address": agent.wallet_address,
        });
        self.submit(&agent.id.to_string(), "register_agent", args).await.0
    }

    async fn deregister_agent(&self, agent_id: &AgentId) -> TxRef {
        let args = json!({ "agent_id": agent_id.to_string() });
        self.submit(&agent_id.to_string(), "deregister_agent", args).await.0
    }
}

#[async_trait]
impl SchedulingChain for LiveAdapter {
    async fn schedule_job(&self, agent_id: &AgentId, spec: &Value, run_at: DateTime<Utc>) -> ScheduledJob {
        let args = json!({
            "agent_id": agent_id.to_string(),
            "spec": spec,
            "run_at": run_at.to_rfc3339(),
        });
        let (tx_ref, output) = self.submit(&agent_id.to_string(), "schedule_job", args).await;
        ScheduledJob {
            job_id: output_field(&output, "job_id"),
            tx_ref,
        }
    }

    async fn cancel_job(&self, job_id: &str) -> TxRef {
        self.submit(job_id, "cancel_job", json!({ "job_id": job_id })).await.0
    }
}

#[async_trait]
impl ChainReader for LiveAdapter {
    async fn get_onchain_agent(&self, agent_id: &AgentId) -> ChainResult<Option<OnchainAgent>> {
        let params = json!({ "contract": self.contract, "agent_id": agent_id.to_string() });
        let reply: Option<AgentReply> = self.rpc("agora_getAgent", params).await?;
        Ok(reply.map(|r| OnchainAgent {
            agent_id: *agent_id,
            registered: r.registered,
            identity_token: r.identity_token,
            last_tx_ref: r.last_tx_ref,
        }))
    }

    async fn get_balance(&self, address: &str) -> ChainResult<Decimal> {
        let raw: String = self
            .rpc("agora_getBalance", json!({ "address": address }))
            .await?;
        raw.parse().map_err(|e| ChainError::InvalidResponse {
            message: format!("balance '{}': {}", raw, e),
        })
    }

    async fn query_events(&self, query: &EventQuery) -> ChainResult<Vec<ChainEvent>> {
        let params = json!({ "contract": self.contract, "query": query });
        self.rpc("agora_queryEvents", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_store::MemoryStore;
    use agora_types::{ChainTxFilter, TxStatus};
    use std::sync::Arc;

    fn unreachable_config() -> BackendConfig {
        BackendConfig {
            // Port 9 (discard) on loopback refuses connections
            rpc_url: Some("http://127.0.0.1:9".into()),
            contract_address: Some("0xc0ffee".into()),
            signer_key: Some("key".into()),
            confirmation_poll_ms: 1,
            max_confirmation_polls: 2,
        }
    }

    #[test]
    fn incomplete_config_builds_nothing() {
        let log = TxLog::new(Arc::new(MemoryStore::new()));
        assert!(LiveAdapter::new(ChainBackend::Base, &BackendConfig::default(), log).is_none());
    }

    #[test]
    fn output_fields_accept_strings_and_numbers() {
        let output = Some(json!({ "token_id": 7, "payment_id": "pay_1", "other": [] }));
        assert_eq!(output_field(&output, "token_id").as_deref(), Some("7"));
        assert_eq!(output_field(&output, "payment_id").as_deref(), Some("pay_1"));
        assert_eq!(output_field(&output, "other"), None);
        assert_eq!(output_field(&None, "token_id"), None);
    }

    #[tokio::test]
    async fn unreachable_relay_yields_zero_ref_and_failed_log() {
        let log = TxLog::new(Arc::new(MemoryStore::new()));
        let adapter = LiveAdapter::new(ChainBackend::Ethereum, &unreachable_config(), log.clone()).unwrap();

        let tx_ref = adapter
            .release_funds(&EscrowId::new(), &AgentId::new(), Decimal::ONE)
            .await;
        assert!(tx_ref.is_zero());

        let entries = log.entries(&ChainTxFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, TxStatus::Failed);
        assert!(entries[0].error.is_some());
    }

    #[tokio::test]
    async fn unreachable_relay_fails_reads() {
        let log = TxLog::new(Arc::new(MemoryStore::new()));
        let adapter = LiveAdapter::new(ChainBackend::Base, &unreachable_config(), log).unwrap();
        assert!(matches!(
            adapter.get_balance("0xabc").await,
            Err(ChainError::Network { .. })
        ));
        assert!(!adapter.verify_identity(&AgentId::new()).await.verified);
    }
}
