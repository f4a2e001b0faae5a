//! Chain adapter errors
//!
//! Write calls never return these: a failed submission is logged and turned
//! into [`agora_types::TxRef::zero`]. Only the read-only mirror surface
//! ([`crate::ChainReader`]) propagates them.

use agora_types::TxRef;
use thiserror::Error;

/// Errors raised while talking to a settlement backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Transaction {tx_ref} failed: {reason}")]
    Reverted { tx_ref: TxRef, reason: String },

    #[error("Transaction {tx_ref} not confirmed after {polls} polls")]
    ConfirmationTimeout { tx_ref: TxRef, polls: u32 },
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;
