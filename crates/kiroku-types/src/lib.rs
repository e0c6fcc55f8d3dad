//! Shared identity, position, and audit types for Kiroku.
//!
//! This crate is the relational foundation: typed IDs, document positions,
//! content and cell-state enums, approval stages, and audit log records. It
//! has **no internal kiroku dependencies**; a pure leaf crate that the
//! document engine and the client build on.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Document (DocumentId)
//!     └── one write Lock held by a Principal (PrincipalId)
//!     └── append-only audit log of AuditLogItem (AuditItemId)
//!             └── latest item projects to DocumentState
//!     └── Stage (approval lifecycle)
//!
//! Session (SessionId) ← one client's open view of a document
//!     └── Selection (anchor, active DocumentPosition)
//!     └── MarkerCounter (resumed from DocumentState)
//! ```
//!
//! # Key Types
//!
//! |---------------------|---------------------------------------------|
//! | Type                | Purpose                                     |
//! |---------------------|---------------------------------------------|
//! | [`DocumentPosition`]| Structured, comparable path into the tree   |
//! | [`Selection`]       | Anchor/active pair, possibly a caret        |
//! | [`ContentType`]     | Semantic class of a run of text             |
//! | [`CellState`]       | Fill state of a form cell                   |
//! | [`Stage`]           | Approval lifecycle stage                    |
//! | [`AuditLogItem`]    | One immutable record of an accepted change  |
//! | [`DocumentState`]   | Projection of the latest audit item         |
//! | [`MarkerCounter`]   | Monotonic per-document marker allocator     |
//! |---------------------|---------------------------------------------|

pub mod audit;
pub mod content;
pub mod ids;
pub mod position;
pub mod stage;

pub use audit::{ActionType, AuditLogItem, DocumentState, MarkerCounter, VerificationFlags};
pub use content::{CellState, ContentType};
pub use ids::{AuditItemId, DocumentId, PrincipalId, SessionId};
pub use position::{DocumentPosition, PositionError, Selection};
pub use stage::{Stage, StageError};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
