//! Error types for document traversal and insertion.

use kiroku_types::DocumentPosition;
use thiserror::Error;

/// Which structural boundary a selection crossed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    #[error("cell")]
    MultiCell,

    #[error("paragraph")]
    MultiParagraph,
}

/// Why a free-cursor position was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorReason {
    InUserContent,
    InSignatureContent,
    InSystemContent,
}

impl CursorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorReason::InUserContent => "in_user_content",
            CursorReason::InSignatureContent => "in_signature_content",
            CursorReason::InSystemContent => "in_system_content",
        }
    }
}

impl std::fmt::Display for CursorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the document engine. None of them leave the document
/// modified or writable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Selection spans more than one cell or paragraph.
    #[error("selection spans more than one {0}")]
    SelectionScope(#[from] ScopeError),

    /// The insertion point falls inside protected content.
    #[error("cannot insert at {position}: {reason}")]
    CursorPosition {
        reason: CursorReason,
        position: DocumentPosition,
    },

    /// Corrections over attachment hyperlinks are structurally disallowed.
    #[error("cannot correct over an attachment link")]
    AttachmentCorrection,

    #[error("no unchecked box in the selected paragraph")]
    NoCheckbox,

    #[error("selection is empty")]
    EmptySelection,

    #[error("nothing to insert")]
    EmptyText,

    #[error("no legal name configured for signing")]
    MissingLegalName,

    #[error("position {0} does not address a paragraph")]
    InvalidPosition(DocumentPosition),

    #[error("offset {offset} out of bounds for paragraph of length {len}")]
    OffsetOutOfBounds { offset: usize, len: usize },

    /// A mutation was attempted without lifting read-only mode.
    #[error("document is read-only")]
    ReadOnly,

    #[error("malformed document snapshot: {0}")]
    Snapshot(String),
}

impl EngineError {
    /// Refusals a user can fix by moving the cursor or re-selecting.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::SelectionScope(_)
                | EngineError::CursorPosition { .. }
                | EngineError::AttachmentCorrection
                | EngineError::NoCheckbox
                | EngineError::EmptySelection
                | EngineError::EmptyText
        )
    }
}
