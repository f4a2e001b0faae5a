//! Error types for Agora
//!
//! Every failure is returned as a value. Not-found and invalid-transition
//! are both "rejections": the operation was a no-op and nothing was mutated.

use thiserror::Error;

/// Result type for Agora operations
pub type Result<T> = std::result::Result<T, AgoraError>;

/// Agora error taxonomy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgoraError {
    /// Referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Entity is not in the state the operation requires
    #[error("{entity} {id} is {actual}, expected {expected}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    /// Caller supplied a value outside the accepted domain
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Backend configuration is unusable and stub fallback is not allowed
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The entity store failed
    #[error("Store error: {message}")]
    Store { message: String },
}

impl AgoraError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        id: impl ToString,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// True when the operation was refused without mutating anything
    /// (missing entity or wrong source state).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidTransition { .. })
    }

    /// Status code for the external API layer. Not-found and
    /// invalid-transition are deliberately indistinguishable here.
    pub fn boundary_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } | Self::InvalidTransition { .. } => 404,
            Self::InvalidInput { .. } => 400,
            Self::Configuration { .. } | Self::Store { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_share_a_boundary_code() {
        let missing = AgoraError::not_found("task", "task_1");
        let wrong_state = AgoraError::invalid_transition("task", "task_1", "pending", "completed");
        assert!(missing.is_rejection());
        assert!(wrong_state.is_rejection());
        assert_eq!(missing.boundary_code(), wrong_state.boundary_code());
    }

    #[test]
    fn store_errors_are_not_rejections() {
        let err = AgoraError::Store {
            message: "disk full".into(),
        };
        assert!(!err.is_rejection());
        assert_eq!(err.boundary_code(), 500);
    }

    #[test]
    fn messages_name_the_entity() {
        let err = AgoraError::invalid_transition("escrow", "escrow_9", "locked", "released");
        assert_eq!(err.to_string(), "escrow escrow_9 is released, expected locked");
    }
}
