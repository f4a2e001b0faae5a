//! Stub adapter
//!
//! Simulates a backend locally: every write waits the configured delay,
//! fabricates a reference in the backend's own format, and is logged as
//! `confirmed`. A small in-process ledger backs the read-only mirrors so
//! that registrations, gas top-ups and events read back consistently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agora_types::{Agent, AgentId, ChainBackend, EscrowId, TaskId, TxRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    AttestationChain, ChainEvent, ChainReader, ChainResult, EscrowChain, EventQuery,
    IdentityChain, IdentityVerification, MintedIdentity, OnchainAgent, PaymentChain,
    PaymentReceipt, ScheduledJob, SchedulingChain, TxLog,
};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Fabricate a syntactically valid, non-zero reference for `backend`
pub fn fabricate_ref(backend: ChainBackend) -> TxRef {
    let mut rng = rand::thread_rng();
    match backend {
        ChainBackend::Ethereum | ChainBackend::Base | ChainBackend::Polygon => {
            let bytes: [u8; 32] = rng.gen();
            TxRef::new(format!("0x{}", hex::encode(bytes)))
        }
        ChainBackend::Solana => {
            // Base58 of a 64-byte signature
            let sig: String = (0..88)
                .map(|_| BASE58_ALPHABET[rng.gen_range(0..BASE58_ALPHABET.len())] as char)
                .collect();
            TxRef::new(sig)
        }
        ChainBackend::Hedera => {
            let now = Utc::now();
            TxRef::new(format!(
                "0.0.{}@{}.{:09}",
                rng.gen_range(1_000..1_000_000),
                now.timestamp(),
                now.timestamp_subsec_nanos()
            ))
        }
    }
}

fn fresh_job_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    format!("job_{}", hex::encode(bytes))
}

#[derive(Default)]
struct StubLedger {
    agents: HashMap<AgentId, OnchainAgent>,
    balances: HashMap<String, Decimal>,
    events: Vec<ChainEvent>,
}

impl StubLedger {
    fn agent(&mut self, agent_id: AgentId) -> &mut OnchainAgent {
        self.agents.entry(agent_id).or_insert_with(|| OnchainAgent {
            agent_id,
            registered: false,
            identity_token: None,
            last_tx_ref: None,
        })
    }
}

/// Local simulation of one settlement backend
pub struct StubAdapter {
    backend: ChainBackend,
    delay: Duration,
    tx_log: TxLog,
    ledger: RwLock<StubLedger>,
    next_token: AtomicU64,
}

impl StubAdapter {
    pub fn new(backend: ChainBackend, delay_ms: u64, tx_log: TxLog) -> Self {
        Self {
            backend,
            delay: Duration::from_millis(delay_ms),
            tx_log,
            ledger: RwLock::new(StubLedger::default()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> ChainBackend {
        self.backend
    }

    async fn settle(&self, subject: &str, method: &str, params: serde_json::Value) -> TxRef {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let tx_ref = fabricate_ref(self.backend);
        self.tx_log
            .record_confirmed(subject, self.backend, method, params, &tx_ref)
            .await;
        self.ledger.write().await.events.push(ChainEvent {
            method: method.to_string(),
            subject: subject.to_string(),
            tx_ref: tx_ref.clone(),
            at: Utc::now(),
        });

        debug!(backend = %self.backend, method, subject, %tx_ref, "Stub transaction confirmed");
        tx_ref
    }
}

#[async_trait]
impl EscrowChain for StubAdapter {
    async fn lock_funds(&self, task_id: &TaskId, payer: &AgentId, amount: Decimal) -> TxRef {
        let params = json!({ "task_id": task_id.to_string(), "amount": amount.to_string() });
        self.settle(&payer.to_string(), "lock_funds", params).await
    }

    async fn release_funds(&self, escrow_id: &EscrowId, payee: &AgentId, amount: Decimal) -> TxRef {
        let params = json!({ "escrow_id": escrow_id.to_string(), "amount": amount.to_string() });
        self.settle(&payee.to_string(), "release_funds", params).await
    }

    async fn refund_funds(&self, escrow_id: &EscrowId, payer: &AgentId, amount: Decimal) -> TxRef {
        let params = json!({ "escrow_id": escrow_id.to_string(), "amount": amount.to_string() });
        self.settle(&payer.to_string(), "refund_funds", params).await
    }
}

#[async_trait]
impl AttestationChain for StubAdapter {
    async fn record_attestation(
        &self,
        agent_id: &AgentId,
        attester_id: &AgentId,
        score: f64,
        metadata: Option<&serde_json::Value>,
    ) -> TxRef {
        let params = json!({
            "attester_id": attester_id.to_string(),
            "score": score,
            "metadata": metadata,
        });
        self.settle(&agent_id.to_string(), "record_attestation", params).await
    }
}

#[async_trait]
impl PaymentChain for StubAdapter {
    async fn process_payment(
        &self,
        from: &AgentId,
        to: &AgentId,
        amount: Decimal,
        memo: Option<&str>,
    ) -> PaymentReceipt {
        let params = json!({ "to": to.to_string(), "amount": amount.to_string(), "memo": memo });
        let tx_ref = self.settle(&from.to_string(), "process_payment", params).await;
        PaymentReceipt {
            tx_ref,
            payment_id: Some(format!("pay_{}", uuid::Uuid::new_v4().simple())),
        }
    }

    async fn fund_gas(&self, address: &str, amount: Decimal) -> TxRef {
        let tx_ref = self
            .settle(address, "fund_gas", json!({ "amount": amount.to_string() }))
            .await;
        *self
            .ledger
            .write()
            .await
            .balances
            .entry(address.to_string())
            .or_insert(Decimal::ZERO) += amount;
        tx_ref
    }
}

#[async_trait]
impl IdentityChain for StubAdapter {
    async fn verify_identity(&self, agent_id: &AgentId) -> IdentityVerification {
        let ledger = self.ledger.read().await;
        let token = ledger.agents.get(agent_id).and_then(|a| a.identity_token.clone());
        IdentityVerification {
            verified: token.is_some(),
            identity_ref: token,
        }
    }

    async fn mint_identity_token(
        &self,
        agent_id: &AgentId,
        metadata: &serde_json::Value,
    ) -> MintedIdentity {
        let token_id = self.next_token.fetch_add(1, Ordering::SeqCst).to_string();
        let params = json!({ "token_id": token_id, "metadata": metadata });
        let tx_ref = self.settle(&agent_id.to_string(), "mint_identity_token", params).await;

        let mut ledger = self.ledger.write().await;
        let entry = ledger.agent(*agent_id);
        entry.identity_token = Some(token_id.clone());
        entry.last_tx_ref = Some(tx_ref.clone());

        MintedIdentity {
            token_id: Some(token_id),
            tx_ref,
        }
    }

    async fn register_agent(&self, agent: &Agent) -> TxRef {
        let params = json!({
            "name": agent.name,
            "role": agent.role.as_str(),
            "capabilities": agent.capabilities,
            "wallet_address": agent.wallet_address,
        });
        let tx_ref = self.settle(&agent.id.to_string(), "register_agent", params).await;

        let mut ledger = self.ledger.write().await;
        let entry = ledger.agent(agent.id);
        entry.registered = true;
        entry.last_tx_ref = Some(tx_ref.clone());
        tx_ref
    }

    async fn deregister_agent(&self, agent_id: &AgentId) -> TxRef {
        let tx_ref = self
            .settle(&agent_id.to_string(), "deregister_agent", json!({}))
            .await;

        let mut ledger = self.ledger.write().await;
        let entry = ledger.agent(*agent_id);
        entry.registered = false;
        entry.last_tx_ref = Some(tx_ref.clone());
        tx_ref
    }
}

#[async_trait]
impl SchedulingChain for StubAdapter {
    async fn schedule_job(
        &self,
        agent_id: &AgentId,
        spec: &serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> ScheduledJob {
        let job_id = fresh_job_id();
        let params = json!({ "job_id": job_id, "spec": spec, "run_at": run_at.to_rfc3339() });
        let tx_ref = self.settle(&agent_id.to_string(), "schedule_job", params).await;
        ScheduledJob {
            job_id: Some(job_id),
            tx_ref,
        }
    }

    async fn cancel_job(&self, job_id: &str) -> TxRef {
        self.settle(job_id, "cancel_job", json!({ "job_id": job_id })).await
    }
}

#[async_trait]
impl ChainReader for StubAdapter {
    async fn get_onchain_agent(&self, agent_id: &AgentId) -> ChainResult<Option<OnchainAgent>> {
        Ok(self.ledger.read().await.agents.get(agent_id).cloned())
    }

    async fn get_balance(&self, address: &str) -> ChainResult<Decimal> {
        Ok(self
            .ledger
            .read()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn query_events(&self, query: &EventQuery) -> ChainResult<Vec<ChainEvent>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .events
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_store::MemoryStore;
    use agora_types::{AgentRole, ChainTxFilter, NewAgent, TxStatus};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn adapter(backend: ChainBackend) -> (StubAdapter, TxLog) {
        let log = TxLog::new(Arc::new(MemoryStore::new()));
        (StubAdapter::new(backend, 0, log.clone()), log)
    }

    #[test]
    fn evm_refs_are_32_byte_hex() {
        for backend in [ChainBackend::Ethereum, ChainBackend::Base, ChainBackend::Polygon] {
            let r = fabricate_ref(backend);
            assert!(r.as_str().starts_with("0x"));
            assert_eq!(r.as_str().len(), 66);
            assert!(hex::decode(&r.as_str()[2..]).is_ok());
            assert!(!r.is_zero());
        }
    }

    #[test]
    fn solana_refs_are_base58_signatures() {
        let r = fabricate_ref(ChainBackend::Solana);
        assert_eq!(r.as_str().len(), 88);
        assert!(r.as_str().bytes().all(|b| BASE58_ALPHABET.contains(&b)));
    }

    #[test]
    fn hedera_refs_use_transaction_id_format() {
        let r = fabricate_ref(ChainBackend::Hedera);
        let (account, valid_start) = r.as_str().split_once('@').unwrap();
        assert!(account.starts_with("0.0."));
        let (secs, nanos) = valid_start.split_once('.').unwrap();
        assert!(secs.parse::<i64>().is_ok());
        assert_eq!(nanos.len(), 9);
    }

    #[tokio::test]
    async fn writes_are_logged_confirmed() {
        let (stub, log) = adapter(ChainBackend::Base);
        let payer = AgentId::new();
        let tx_ref = stub.lock_funds(&TaskId::new(), &payer, dec!(12.5)).await;
        assert!(!tx_ref.is_zero());

        let entries = log.entries(&ChainTxFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, TxStatus::Confirmed);
        assert_eq!(entries[0].method, "lock_funds");
        assert_eq!(entries[0].agent_id, payer.to_string());
        assert_eq!(entries[0].params["amount"], "12.5");
        assert_eq!(entries[0].tx_ref.as_ref(), Some(&tx_ref));
    }

    #[tokio::test]
    async fn identity_reads_back_after_mint_and_register() {
        let (stub, _) = adapter(ChainBackend::Hedera);
        let agent = NewAgent::new("bob", AgentRole::Executor).into_agent();

        assert!(!stub.verify_identity(&agent.id).await.verified);
        let minted = stub.mint_identity_token(&agent.id, &json!({"name": "bob"})).await;
        stub.register_agent(&agent).await;

        let verification = stub.verify_identity(&agent.id).await;
        assert!(verification.verified);
        assert_eq!(verification.identity_ref, minted.token_id);

        let mirrored = stub.get_onchain_agent(&agent.id).await.unwrap().unwrap();
        assert!(mirrored.registered);

        stub.deregister_agent(&agent.id).await;
        let mirrored = stub.get_onchain_agent(&agent.id).await.unwrap().unwrap();
        assert!(!mirrored.registered);
    }

    #[tokio::test]
    async fn gas_funding_accumulates() {
        let (stub, _) = adapter(ChainBackend::Polygon);
        stub.fund_gas("0xwallet", dec!(0.01)).await;
        stub.fund_gas("0xwallet", dec!(0.02)).await;
        assert_eq!(stub.get_balance("0xwallet").await.unwrap(), dec!(0.03));
        assert_eq!(stub.get_balance("0xother").await.unwrap(), Decimal::ZERO);

        let events = stub
            .query_events(&EventQuery {
                method: Some("fund_gas".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied_before_confirming() {
        let log = TxLog::new(Arc::new(MemoryStore::new()));
        let stub = StubAdapter::new(ChainBackend::Base, 50, log);
        let started = tokio::time::Instant::now();
        stub.cancel_job("job_1").await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
