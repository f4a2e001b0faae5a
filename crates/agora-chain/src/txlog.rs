//! Append-only chain transaction log
//!
//! Every gateway call leaves a row here. A failure to write the log never
//! fails the call it describes.

use std::sync::Arc;

use agora_store::{EntityStore, StoreResult};
use agora_types::{ChainBackend, ChainTransaction, ChainTxFilter, ChainTxId, TxRef, TxStatus};
use tracing::warn;

#[derive(Clone)]
pub struct TxLog {
    store: Arc<dyn EntityStore>,
}

impl TxLog {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Record a submitted call as `pending`
    pub async fn pending(
        &self,
        subject: &str,
        backend: ChainBackend,
        method: &str,
        params: serde_json::Value,
    ) -> ChainTxId {
        let entry = ChainTransaction::pending(subject, backend, method, params);
        if let Err(e) = self.store.append_chain_tx(&entry).await {
            warn!(method, subject, error = %e, "Failed to write chain transaction log");
        }
        entry.id
    }

    pub async fn confirmed(&self, id: &ChainTxId, tx_ref: &TxRef) {
        self.update(id, TxStatus::Confirmed, Some(tx_ref), None).await;
    }

    pub async fn failed(&self, id: &ChainTxId, error: &str) {
        self.update(id, TxStatus::Failed, None, Some(error)).await;
    }

    /// Record a call that settled at once (stub adapters)
    pub async fn record_confirmed(
        &self,
        subject: &str,
        backend: ChainBackend,
        method: &str,
        params: serde_json::Value,
        tx_ref: &TxRef,
    ) {
        let mut entry = ChainTransaction::pending(subject, backend, method, params);
        entry.status = TxStatus::Confirmed;
        entry.tx_ref = Some(tx_ref.clone());
        if let Err(e) = self.store.append_chain_tx(&entry).await {
            warn!(method, subject, error = %e, "Failed to write chain transaction log");
        }
    }

    pub async fn entries(&self, filter: &ChainTxFilter) -> StoreResult<Vec<ChainTransaction>> {
        self.store.list_chain_txs(filter).await
    }

    /// Failed calls and calls that settled with the zero reference
    pub async fn needing_attention(&self) -> StoreResult<Vec<ChainTransaction>> {
        let all = self.store.list_chain_txs(&ChainTxFilter::default()).await?;
        Ok(all.into_iter().filter(ChainTransaction::needs_attention).collect())
    }

    async fn update(&self, id: &ChainTxId, status: TxStatus, tx_ref: Option<&TxRef>, error: Option<&str>) {
        match self.store.update_chain_tx(id, status, tx_ref, error).await {
            Ok(true) => {}
            Ok(false) => warn!(tx_id = %id, %status, "Chain transaction log entry missing"),
            Err(e) => warn!(tx_id = %id, %status, error = %e, "Failed to update chain transaction log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_store::MemoryStore;

    #[tokio::test]
    async fn pending_entry_moves_to_failed() {
        let log = TxLog::new(Arc::new(MemoryStore::new()));
        let id = log
            .pending("agent_x", ChainBackend::Base, "lock_funds", serde_json::json!({}))
            .await;
        log.failed(&id, "connection refused").await;

        let entries = log.entries(&ChainTxFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, TxStatus::Failed);
        assert_eq!(entries[0].error.as_deref(), Some("connection refused"));
        assert_eq!(log.needing_attention().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirmed_entries_need_no_attention() {
        let log = TxLog::new(Arc::new(MemoryStore::new()));
        log.record_confirmed(
            "agent_x",
            ChainBackend::Solana,
            "record_attestation",
            serde_json::json!({"score": 0.9}),
            &TxRef::new("5abc"),
        )
        .await;
        assert!(log.needing_attention().await.unwrap().is_empty());
    }
}
