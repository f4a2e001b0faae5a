//! Live adapter against a scripted JSON-RPC relay

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agora_chain::{
    BackendConfig, ChainConfig, ChainReader, EscrowChain, GatewayFactory, PaymentChain, TxLog,
};
use agora_store::MemoryStore;
use agora_types::{AgentId, ChainBackend, ChainTxFilter, TaskId, TxStatus};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const SUBMITTED_REF: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

/// Answers each request once, closing the connection afterwards
async fn spawn_relay(statuses: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let statuses = Arc::new(Mutex::new(VecDeque::from(statuses)));

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let request = read_request_body(&mut socket).await;
            let id = request["id"].clone();
            let result = match request["method"].as_str().unwrap_or_default() {
                "agora_submit" => json!({
                    "tx_ref": SUBMITTED_REF,
                    "output": { "payment_id": "pay_42" }
                }),
                "agora_getTransactionStatus" => {
                    let status = statuses.lock().unwrap().pop_front().unwrap_or("confirmed");
                    json!({ "status": status, "reason": "out of gas" })
                }
                "agora_getBalance" => json!("1.25"),
                _ => Value::Null,
            };
            let body = json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{}", addr)
}

async fn read_request_body(socket: &mut tokio::net::TcpStream) -> Value {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                let body = &buf[header_end + 4..header_end + 4 + content_length];
                return serde_json::from_slice(body).unwrap_or(Value::Null);
            }
        }
    }
    Value::Null
}

fn config_for(url: String) -> ChainConfig {
    ChainConfig {
        allow_stub_fallback: false,
        ..ChainConfig::stub_only()
    }
    .with_backend(
        ChainBackend::Base,
        BackendConfig {
            rpc_url: Some(url),
            contract_address: Some("0xescrow".into()),
            signer_key: Some("relay-token".into()),
            confirmation_poll_ms: 1,
            max_confirmation_polls: 5,
        },
    )
}

#[tokio::test]
async fn confirmed_submission_returns_relay_reference() {
    let url = spawn_relay(vec!["pending", "confirmed"]).await;
    let log = TxLog::new(Arc::new(MemoryStore::new()));
    let gateway = GatewayFactory::build(ChainBackend::Base, &config_for(url), log.clone()).unwrap();
    assert!(gateway.is_live());

    let receipt = gateway
        .payment()
        .process_payment(&AgentId::new(), &AgentId::new(), dec!(3), Some("tip"))
        .await;
    assert_eq!(receipt.tx_ref.as_str(), SUBMITTED_REF);
    assert_eq!(receipt.payment_id.as_deref(), Some("pay_42"));

    let entries = log.entries(&ChainTxFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, TxStatus::Confirmed);
    assert_eq!(entries[0].method, "process_payment");
    assert_eq!(entries[0].tx_ref.as_ref().map(|r| r.as_str()), Some(SUBMITTED_REF));
}

#[tokio::test]
async fn reverted_submission_returns_zero_reference() {
    let url = spawn_relay(vec!["failed"]).await;
    let log = TxLog::new(Arc::new(MemoryStore::new()));
    let gateway = GatewayFactory::build(ChainBackend::Base, &config_for(url), log.clone()).unwrap();

    let tx_ref = gateway
        .escrow()
        .lock_funds(&TaskId::new(), &AgentId::new(), dec!(10))
        .await;
    assert!(tx_ref.is_zero());

    let attention = log.needing_attention().await.unwrap();
    assert_eq!(attention.len(), 1);
    assert_eq!(attention[0].status, TxStatus::Failed);
    assert!(attention[0].error.as_deref().unwrap_or_default().contains("out of gas"));
}

#[tokio::test]
async fn balance_reads_pass_through() {
    let url = spawn_relay(vec![]).await;
    let log = TxLog::new(Arc::new(MemoryStore::new()));
    let gateway = GatewayFactory::build(ChainBackend::Base, &config_for(url), log).unwrap();
    assert_eq!(gateway.reader().get_balance("0xwallet").await.unwrap(), dec!(1.25));
}
