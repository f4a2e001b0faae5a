//! Agora Types - Canonical domain types for the agent coordination core
//!
//! This crate contains the foundational types shared by every Agora crate
//! with zero dependencies on other agora crates:
//!
//! - Identity types (AgentId, TaskId, EscrowId, ...)
//! - Agents, tasks, escrows, attestations
//! - Connections and activity events
//! - Settlement backend types (ChainBackend, TxRef, ChainTransaction)
//! - The shared error taxonomy
//!
//! # Invariants
//!
//! 1. `Agent::settlement_balance` moves only through confirmed local ledger
//!    operations (escrow lock, release, refund, external credit)
//! 2. A task's status only moves forward: pending, dispatched, terminal
//! 3. An escrow leaves `Locked` exactly once
//! 4. Attestations and activity events are never mutated

pub mod identity;
pub mod agent;
pub mod task;
pub mod escrow;
pub mod attestation;
pub mod activity;
pub mod chain;
pub mod outcome;
pub mod error;

pub use identity::*;
pub use agent::*;
pub use task::*;
pub use escrow::*;
pub use attestation::*;
pub use activity::*;
pub use chain::*;
pub use outcome::*;
pub use error::*;

pub use rust_decimal::Decimal;

/// Version of the Agora types schema
pub const TYPES_VERSION: &str = "0.1.0";
