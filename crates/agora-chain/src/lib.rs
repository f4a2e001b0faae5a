//! Agora Chain Gateway
//!
//! Lets the coordination core settle against any supported backend without
//! knowing which one, or whether it is real.
//!
//! # Modes
//!
//! Each backend is resolved once, at construction, by [`GatewayFactory`]:
//!
//! - **Live**: the backend has a relay URL, contract address and signer key.
//!   Calls go to the relay over JSON-RPC and wait for confirmation.
//! - **Stub**: anything less. Calls are simulated locally after a short delay
//!   and return a reference in the backend's own format.
//!
//! Both modes honour the same contract. A live call that fails returns
//! [`TxRef::zero`](agora_types::TxRef::zero) and is logged as `failed` in the
//! transaction log; it never surfaces as an error.
//!
//! # Example
//!
//! ```ignore
//! use agora_chain::{ChainConfig, GatewayRegistry, TxLog};
//!
//! let registry = GatewayRegistry::from_config(&ChainConfig::default(), TxLog::new(store))?;
//! let gateway = registry.resolve(ChainBackend::Base);
//! let tx_ref = gateway.escrow().lock_funds(&task_id, &payer_id, amount).await;
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod gateway;
pub mod live;
pub mod stub;
pub mod txlog;

pub use capability::*;
pub use config::{BackendConfig, ChainConfig};
pub use error::{ChainError, ChainResult};
pub use gateway::{ChainGateway, GatewayFactory, GatewayRegistry};
pub use live::LiveAdapter;
pub use stub::{fabricate_ref, StubAdapter};
pub use txlog::TxLog;
