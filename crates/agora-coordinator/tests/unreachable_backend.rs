//! Live backends that cannot be reached: the local ledger still moves and
//! every failed call is surfaced as a warning and in the transaction log.

use std::sync::Arc;

use agora_chain::{BackendConfig, ChainConfig};
use agora_coordinator::{Agora, RegistrationConfig};
use agora_store::MemoryStore;
use agora_types::{AgentRole, ChainMode, EscrowStatus, NewAgent, NewTask, TaskStatus, TxStatus};
use rust_decimal_macros::dec;

fn unreachable_chain() -> ChainConfig {
    let mut config = ChainConfig::stub_only();
    for backend in agora_types::ChainBackend::ALL {
        config = config.with_backend(
            backend,
            BackendConfig {
                rpc_url: Some("http://127.0.0.1:9".into()),
                contract_address: Some("0xc0ffee".into()),
                signer_key: Some("key".into()),
                confirmation_poll_ms: 1,
                max_confirmation_polls: 2,
            },
        );
    }
    config
}

#[tokio::test]
async fn failed_settlement_keeps_local_ledger() {
    let agora = Agora::open(
        Arc::new(MemoryStore::new()),
        &unreachable_chain(),
        RegistrationConfig::default(),
    )
    .unwrap();
    assert!(agora.gateways().modes().iter().all(|(_, m)| *m == ChainMode::Live));

    let registered = agora
        .registry()
        .register_agent(NewAgent::new("payer", AgentRole::Router).with_wallet("0xpayer"))
        .await
        .unwrap();
    let failed: Vec<&str> = registered.warnings.iter().map(|w| w.operation.as_str()).collect();
    assert_eq!(failed, vec!["mint_identity_token", "fund_gas", "register_agent"]);
    assert!(!registered.agent.chain_registered);
    let payer = registered.agent;

    let worker = agora
        .registry()
        .register_agent(NewAgent::new("worker", AgentRole::Executor))
        .await
        .unwrap()
        .agent;
    agora.registry().credit_agent(&payer.id, dec!(40)).await.unwrap();

    let created = agora
        .tasks()
        .create_task(NewTask::new("offline job", payer.id).with_escrow(dec!(40)))
        .await
        .unwrap();
    assert_eq!(created.warnings.len(), 1);
    assert_eq!(created.warnings[0].operation, "lock_funds");
    let escrow = created.escrow.unwrap();
    assert!(escrow.tx_ref.is_zero());
    assert_eq!(
        agora.registry().get_agent(&payer.id).await.unwrap().settlement_balance,
        dec!(0)
    );

    agora.tasks().dispatch_task(&created.task.id, &worker.id).await.unwrap();
    let completed = agora
        .tasks()
        .complete_task(&created.task.id, Some("done".into()), Some(0.7))
        .await
        .unwrap();
    assert_eq!(completed.task.status, TaskStatus::Completed);
    let operations: Vec<&str> = completed.warnings.iter().map(|w| w.operation.as_str()).collect();
    assert_eq!(operations, vec!["record_attestation", "release_funds"]);
    assert_eq!(completed.escrow.unwrap().status, EscrowStatus::Released);
    assert!(completed.attestation.unwrap().tx_ref.is_zero());

    let worker = agora.registry().get_agent(&worker.id).await.unwrap();
    assert_eq!(worker.settlement_balance, dec!(40));
    assert!((worker.attestation_score - 0.7).abs() < 1e-9);

    let unsettled = agora.unsettled_transactions().await.unwrap();
    assert!(!unsettled.is_empty());
    assert!(unsettled.iter().all(|tx| tx.status == TxStatus::Failed));
    assert!(unsettled.iter().any(|tx| tx.method == "release_funds"));
    assert!(unsettled.iter().all(|tx| tx.error.is_some()));
}

#[tokio::test]
async fn stub_fallback_can_be_forbidden() {
    let mut config = ChainConfig::stub_only();
    config.allow_stub_fallback = false;
    for backend in agora_types::ChainBackend::ALL {
        config = config.with_backend(backend, BackendConfig::default());
    }

    let err = Agora::open(Arc::new(MemoryStore::new()), &config, RegistrationConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.boundary_code(), 500);
}
