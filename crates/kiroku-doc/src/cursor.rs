//! Free-cursor position validation for inline entries.
//!
//! A position is insertable when it sits in the protocol's own text, at a
//! fresh start in front of an entry or marker, or just after engine text.
//! Anything that would splice into a person's entry, a signature, or the
//! engine's own output is refused with the reason.
//!
//! Validation only borrows the document, so nothing it does can move the
//! caller's view.

use kiroku_types::{ContentType, DocumentPosition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::FontScheme;
use crate::error::{CursorReason, EngineError};
use crate::model::{FormDocument, ParagraphRef, ParagraphSequence};
use crate::resolve::is_inside_entry;
use crate::Result;

/// How to treat a position exactly on the boundary between an entry and
/// the protocol's own text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Refuse; the position is still touching the entry.
    #[default]
    Reject,
    /// Accept; the position is also touching the protocol's text.
    FavorDocument,
}

/// The rule that accepted a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorVerdict {
    InsideDocument,
    FreshEntryStart,
    AfterSystem,
    EmptyLine,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    kind: ContentType,
    lead: usize,
    clock: bool,
}

fn refusal(kind: ContentType) -> CursorReason {
    match kind {
        ContentType::Signature => CursorReason::InSignatureContent,
        ContentType::System => CursorReason::InSystemContent,
        _ => CursorReason::InUserContent,
    }
}

/// Decide whether an inline entry may be inserted at `position`.
pub fn validate_cursor_position(
    doc: &FormDocument,
    position: &DocumentPosition,
    fonts: &FontScheme,
    policy: BoundaryPolicy,
) -> Result<CursorVerdict> {
    let (at, offset) = doc.locate(position)?;
    let (seq, index) = doc
        .sequence_of(&at)
        .ok_or(EngineError::InvalidPosition(position.clone()))?;
    let paragraph = seq
        .paragraph_at(index)
        .ok_or(EngineError::InvalidPosition(position.clone()))?;

    let spans: Vec<Span> = paragraph
        .spans()
        .into_iter()
        .filter(|s| s.start < s.end)
        .map(|s| Span {
            start: s.start,
            end: s.end,
            kind: s.run.kind(),
            lead: s.run.leading_whitespace(),
            clock: fonts.is_clock_run(s.run),
        })
        .collect();

    let refuse = |reason: CursorReason| -> Result<CursorVerdict> {
        debug!(%position, %reason, "cursor position refused");
        Err(EngineError::CursorPosition {
            reason,
            position: position.clone(),
        })
    };

    // Strictly inside one run.
    if let Some(pos) = spans.iter().position(|s| s.start < offset && offset < s.end) {
        let span = spans[pos];
        return match span.kind {
            ContentType::Document | ContentType::Empty => Ok(CursorVerdict::InsideDocument),
            ContentType::User | ContentType::System if offset == span.start + span.lead => {
                let prev = pos.checked_sub(1).map(|p| spans[p]);
                fresh_start(prev, seq.as_ref(), index).or_else(refuse)
            }
            kind => refuse(refusal(kind)),
        };
    }

    let prev = spans.iter().rev().find(|s| s.end == offset).copied();
    let next = spans.iter().find(|s| s.start == offset).copied();

    // Never split a marker from its clock, nor write after the clock.
    if prev.is_some_and(|p| p.clock) || next.is_some_and(|n| n.clock) {
        return refuse(CursorReason::InSystemContent);
    }

    if let Some(n) = next {
        let opens_entry = matches!(n.kind, ContentType::User | ContentType::System);
        if opens_entry && (n.lead == 0 || prev.is_none()) {
            return fresh_start(prev, seq.as_ref(), index).or_else(refuse);
        }
    }

    let prev_kind = prev.map(|p| p.kind);
    let next_kind = next.map(|n| n.kind);
    match (prev_kind, next_kind) {
        (Some(ContentType::System), Some(ContentType::Signature)) => {
            refuse(CursorReason::InSystemContent)
        }
        (Some(ContentType::System), _) => Ok(CursorVerdict::AfterSystem),
        (Some(ContentType::Document), None | Some(ContentType::Document))
        | (None, Some(ContentType::Document)) => Ok(CursorVerdict::InsideDocument),
        // Before the leading whitespace of an entry that follows document text.
        (Some(ContentType::Document), Some(ContentType::User | ContentType::System)) => {
            Ok(CursorVerdict::InsideDocument)
        }
        (Some(p), Some(ContentType::Document)) if p.is_entry() => match policy {
            BoundaryPolicy::Reject => refuse(refusal(p)),
            BoundaryPolicy::FavorDocument => Ok(CursorVerdict::InsideDocument),
        },
        (Some(ContentType::Document), Some(ContentType::Signature)) => match policy {
            BoundaryPolicy::Reject => refuse(CursorReason::InSignatureContent),
            BoundaryPolicy::FavorDocument => Ok(CursorVerdict::InsideDocument),
        },
        (None, None) => {
            if is_inside_entry(seq.as_ref(), index) {
                refuse(CursorReason::InUserContent)
            } else {
                Ok(CursorVerdict::EmptyLine)
            }
        }
        (Some(p), _) => refuse(refusal(p)),
        (None, Some(n)) => refuse(refusal(n)),
    }
}

/// Accept the start of an entry or marker when nothing of an entry comes
/// right before it. With nothing before it on the line, the paragraphs
/// above decide.
fn fresh_start(
    prev: Option<Span>,
    seq: &dyn ParagraphSequence,
    index: usize,
) -> std::result::Result<CursorVerdict, CursorReason> {
    match prev {
        Some(p) if p.clock => Err(CursorReason::InSystemContent),
        Some(p) => match p.kind {
            ContentType::System | ContentType::Document | ContentType::Empty => {
                Ok(CursorVerdict::FreshEntryStart)
            }
            kind => Err(refusal(kind)),
        },
        None if is_inside_entry(seq, index) => Err(CursorReason::InUserContent),
        None => Ok(CursorVerdict::FreshEntryStart),
    }
}

/// Validate `position` and return its paragraph address and offset.
pub fn validated_insertion(
    doc: &FormDocument,
    position: &DocumentPosition,
    fonts: &FontScheme,
    policy: BoundaryPolicy,
) -> Result<(ParagraphRef, usize)> {
    validate_cursor_position(doc, position, fonts, policy)?;
    doc.locate(position)
}
