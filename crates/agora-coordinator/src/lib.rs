//! Agora Coordinator - Task lifecycle, agent registry and wiring
//!
//! This crate ties the escrow ledger, reputation aggregator and activity
//! recorder together behind the operations external callers use:
//!
//! - [`AgentRegistry`]: registration, discovery, balances
//! - [`TaskCoordinator`]: create, dispatch, complete and fail tasks
//! - [`Agora`]: one instance of everything over a shared store
//!
//! ```text
//! create_task ──> escrow locked (payee unset)
//! dispatch_task ──> payee assigned, connection bumped, "hired"
//! complete_task ──> attestation ("trust"), escrow released ("payment")
//! fail_task ──> escrow refunded ("payment")
//! ```

pub mod agora;
pub mod coordinator;
pub mod registry;

pub use agora::{Agora, StatusSummary};
pub use coordinator::{TaskCoordinator, TaskOutcome};
pub use registry::{AgentRegistry, BalanceView, RegistrationConfig, RegistrationOutcome};
