//! Identity types for Agora
//!
//! All identity types are strongly typed wrappers around UUIDs so that an
//! agent id can never be passed where a task id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub const PREFIX: &'static str = $prefix;
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(AgentId, "agent", "Unique identifier for a registered agent");
define_id_type!(TaskId, "task", "Unique identifier for a task");
define_id_type!(EscrowId, "escrow", "Unique identifier for an escrow entry");
define_id_type!(AttestationId, "att", "Unique identifier for an attestation");
define_id_type!(ConnectionId, "conn", "Unique identifier for an agent connection");
define_id_type!(ActivityId, "evt", "Unique identifier for an activity event");
define_id_type!(ChainTxId, "chaintx", "Unique identifier for a chain transaction log entry");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        let id = AgentId::new();
        assert!(id.to_string().starts_with("agent_"));
    }

    #[test]
    fn parse_accepts_prefixed_and_bare() {
        let id = TaskId::new();
        assert_eq!(TaskId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(TaskId::parse(&id.0.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(EscrowId::parse("escrow_nope").is_err());
    }
}
