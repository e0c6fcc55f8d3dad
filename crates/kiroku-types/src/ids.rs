//! Typed identifiers for documents, principals, audit items, and sessions.
//!
//! All ID types wrap UUIDv7 (time-ordered, globally unique). They display as
//! standard UUID text for logging. The `short()` form (first 8 hex chars) is
//! for human-facing output only, never used as a lookup key.
//!
//! `PrincipalId` also has a deterministic sentinel via `PrincipalId::server()`,
//! derived from UUIDv5, for items stamped by the audit store itself.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A document identifier (UUIDv7). One lock and one audit log per document.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

/// A principal identifier: the person (or service) acting on a document.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(uuid::Uuid);

/// An audit item identifier, drafted by the client so it can recognise its
/// own item once the server has stamped it.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditItemId(uuid::Uuid);

/// An editing session identifier (one per open document view).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for human display only, not lookup.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens).
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// A nil / zero ID, for sentinel values only.
            pub fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }

            /// Check if this is the nil ID.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(DocumentId, "DocumentId");
impl_typed_id!(PrincipalId, "PrincipalId");
impl_typed_id!(AuditItemId, "AuditItemId");
impl_typed_id!(SessionId, "SessionId");

/// Fixed namespace for deriving deterministic PrincipalIds via UUIDv5.
const KIROKU_PRINCIPAL_NS: uuid::Uuid = uuid::uuid!("3f1c9a52-8d47-4b0e-9e21-6a5d7c0b2e84");

impl PrincipalId {
    /// The well-known "server" principal.
    ///
    /// Used for items the audit store writes on its own behalf (the genesis
    /// item of a freshly registered document).
    pub fn server() -> Self {
        Self(uuid::Uuid::new_v5(&KIROKU_PRINCIPAL_NS, b"server"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unique() {
        assert_ne!(DocumentId::new(), DocumentId::new());
    }

    #[test]
    fn test_short_and_hex_lengths() {
        let id = AuditItemId::new();
        assert_eq!(id.short().len(), 8);
        assert_eq!(id.to_hex().len(), 32);
    }

    #[test]
    fn test_parse_hex_and_hyphenated() {
        let id = DocumentId::new();
        assert_eq!(DocumentId::parse(&id.to_hex()).unwrap(), id);
        assert_eq!(DocumentId::parse(&id.to_string()).unwrap(), id);
        assert!(DocumentId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_server_principal_is_deterministic() {
        assert_eq!(PrincipalId::server(), PrincipalId::server());
        assert!(!PrincipalId::server().is_nil());
    }

    #[test]
    fn test_debug_uses_short_form() {
        let id = SessionId::new();
        assert_eq!(format!("{id:?}"), format!("SessionId({})", id.short()));
    }
}
