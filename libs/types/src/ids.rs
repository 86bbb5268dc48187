//! Unique identifier types for engine entities
//!
//! All row ids use UUID v7 so that ids sort by creation time, which is the
//! order the execution worker claims pending orders in.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new time-sortable id
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order
    OrderId
);
uuid_id!(
    /// Unique identifier for a trading account
    AccountId
);
uuid_id!(
    /// Owner of an account; the target of notifications
    UserId
);
uuid_id!(
    /// Unique identifier for a position row
    PositionId
);
uuid_id!(
    /// Unique identifier for a ledger entry
    TransactionId
);
uuid_id!(
    /// Unique identifier for a risk alert
    AlertId
);

/// Reference to a tradable instrument (exchange token or symbol key)
///
/// An empty reference is representable so that orders carrying a blank
/// instrument can be detected and cancelled by the execution worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentRef(String);

impl InstrumentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A reference is usable only when it names something
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for InstrumentRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}
