//! Form document model and insertion engine for Kiroku.
//!
//! Documents are controlled forms: protocol text written by an author, with
//! tables of cells people fill in, boxes they tick, and lines they sign.
//! Every run of text knows what it is from its typographic tag alone, and
//! the engine uses that to decide where new content may go.
//!
//! # Design Philosophy
//!
//! Content is never overwritten. The engine only ever appends:
//! - Text entries land after any entry that is still open, closed by an
//!   initials/date line
//! - Inline entries, ticks, and attachments carry a compact marker
//! - Corrections strike the old text and bracket the replacement beside it
//!
//! # Content Classes
//!
//! - **User**: a person's entry
//! - **Signature**: a legal-name signature
//! - **System**: markers, date lines, clock glyphs written by the engine
//! - **Document**: the protocol's own text
//! - **Empty**: no text at all
//!
//! # Mutation Discipline
//!
//! A [`FormDocument`] is read-only outside a [`Writable`] guard. Operations
//! validate, then open the guard, mutate, and let it drop.

mod cell;
mod classify;
mod cursor;
mod error;
mod insert;
mod model;
mod resolve;

pub use cell::{
    analyze_cell, count_empty_cells, is_placeholder, toggle_shading_to_filled, ShadingPalette,
    CHECKED_BOX, UNCHECKED_BOX,
};
pub use classify::{
    classify_paragraph_end, FontScheme, CLOCK_GLYPH, DEFAULT_CLOCK_FONT, DEFAULT_INITIALS_FONT,
    DEFAULT_MARKER_FONT, DEFAULT_SIGNATURE_FONT, DEFAULT_USER_FONT,
};
pub use cursor::{validate_cursor_position, validated_insertion, BoundaryPolicy, CursorVerdict};
pub use error::{CursorReason, EngineError, ScopeError};
pub use insert::{
    compact_marker, format_entry_date, format_utc_offset, reference_marker, EntryContext,
    InsertRequest, InsertionEngine, InsertionOutcome,
};
pub use model::{
    Block, BodySequence, Cell, CellRef, CellSequence, DocumentSnapshot, FormDocument, Paragraph,
    ParagraphRef, ParagraphSequence, Probe, Row, Run, RunSpan, Table, Writable,
    PARAGRAPHS_PER_PAGE,
};
pub use resolve::{
    is_inside_entry, resolve_in_sequence, resolve_insertion_point, resolve_selection,
    InsertionMode, InsertionPoint, ResolvedSelection, SelectionTarget,
};

/// Result type for document engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kiroku_types::{DocumentPosition, MarkerCounter, Selection};

    const FORM: &str = r#"{"blocks":[
        {"type":"paragraph","runs":[{"text":"1. Weigh the sample.","font":"Calibri"}]},
        {"type":"table","rows":[{"cells":[
            {"shading":"FFFFFF","paragraphs":[{"runs":[{"text":"Weight","font":"Calibri"}]}]},
            {"shading":"FFF2CC","paragraphs":[{"runs":[]}]}
        ]},{"cells":[
            {"shading":"FFFFFF","paragraphs":[{"runs":[{"text":"Lot","font":"Calibri"}]}]},
            {"shading":"DEEAF6","paragraphs":[{"runs":[{"text":"____","font":"Calibri"}]}]}
        ]}]},
        {"type":"paragraph","runs":[{"text":"2. Sign below.","font":"Calibri"}]}
    ]}"#;

    fn ctx() -> EntryContext {
        EntryContext {
            initials: "AB".into(),
            legal_name: "Alex Brown".into(),
            timestamp: 1_736_933_400_000,
            utc_offset_minutes: 60,
            late_entry: false,
        }
    }

    #[test]
    fn test_fill_form_end_to_end() {
        let engine = InsertionEngine::default();
        let mut doc = FormDocument::load(&DocumentSnapshot::new(FORM), engine.fonts()).unwrap();
        let mut markers = MarkerCounter::default();
        assert_eq!(count_empty_cells(&doc, engine.palette()), 2);

        let weight = Selection::caret(DocumentPosition::new(vec![1, 0, 1, 0, 0]));
        let out = engine
            .apply(
                &mut doc,
                &mut markers,
                &ctx(),
                &InsertRequest::Text {
                    selection: weight,
                    text: "12.5 g".into(),
                },
            )
            .unwrap();
        assert_eq!(out.empty_cell_delta, -1);

        let lot = Selection::caret(DocumentPosition::new(vec![1, 1, 1, 0, 0]));
        let out = engine
            .apply(
                &mut doc,
                &mut markers,
                &ctx(),
                &InsertRequest::Text {
                    selection: lot,
                    text: "L-7".into(),
                },
            )
            .unwrap();
        assert_eq!(out.marker, Some(1));
        assert_eq!(count_empty_cells(&doc, engine.palette()), 0);

        let sign = Selection::caret(DocumentPosition::new(vec![2, 0]));
        let out = engine
            .apply(
                &mut doc,
                &mut markers,
                &ctx(),
                &InsertRequest::Signature {
                    selection: sign,
                    reason: "Performed by".into(),
                    inline: false,
                },
            )
            .unwrap();
        assert_eq!(out.approval_delta, 1);

        let reloaded = FormDocument::load(&doc.snapshot().unwrap(), engine.fonts()).unwrap();
        assert_eq!(reloaded, doc);
        let last = reloaded
            .paragraph(&ParagraphRef::Body { block: 4 })
            .found()
            .unwrap();
        assert_eq!(last.text(), "AB 15-Jan-2025 10:30");
    }
}
