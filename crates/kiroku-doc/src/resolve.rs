//! Selection scope and insertion-point resolution.
//!
//! A selection resolves to exactly one target: a table cell when either
//! end lies inside one, otherwise a body paragraph. From there the resolver
//! walks forward over entries that are still "open" (ending in user or
//! signature content) so a new entry lands after them, never inside.

use kiroku_types::{ContentType, DocumentPosition, Selection};
use tracing::trace;

use crate::classify::classify_paragraph_end;
use crate::error::{EngineError, ScopeError};
use crate::model::{CellRef, FormDocument, ParagraphRef, ParagraphSequence};
use crate::Result;

/// The single structural target of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTarget {
    Cell(CellRef),
    Paragraph(ParagraphRef),
}

/// A selection validated against the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSelection {
    pub target: SelectionTarget,
    pub start: (ParagraphRef, usize),
    pub end: (ParagraphRef, usize),
}

impl ResolvedSelection {
    pub fn is_caret(&self) -> bool {
        self.start == self.end
    }

    /// The one paragraph both ends lie in.
    pub fn single_paragraph(&self) -> Result<(ParagraphRef, usize, usize)> {
        if self.start.0 != self.end.0 {
            return Err(ScopeError::MultiParagraph.into());
        }
        Ok((self.start.0, self.start.1, self.end.1))
    }
}

pub fn resolve_selection(doc: &FormDocument, selection: &Selection) -> Result<ResolvedSelection> {
    let start = doc.locate(selection.start())?;
    let end = doc.locate(selection.end())?;
    let target = match (start.0.cell(), end.0.cell()) {
        (Some(a), Some(b)) if a == b => SelectionTarget::Cell(a),
        (None, None) if start.0 == end.0 => SelectionTarget::Paragraph(start.0),
        (None, None) => return Err(ScopeError::MultiParagraph.into()),
        _ => return Err(ScopeError::MultiCell.into()),
    };
    Ok(ResolvedSelection { target, start, end })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionMode {
    /// Appending to a table cell.
    TableCell,
    /// Appending after an entry in the body.
    Body,
}

/// Where a new entry goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPoint {
    pub paragraph: ParagraphRef,
    pub offset: usize,
    pub mode: InsertionMode,
}

impl InsertionPoint {
    pub fn position(&self) -> DocumentPosition {
        self.paragraph.position(self.offset)
    }
}

/// Resolve a selection to the point a text entry is appended at.
///
/// In a cell this is the end of the cell's last paragraph. In the body the
/// resolver starts at the selected paragraph and advances over open entries.
pub fn resolve_insertion_point(doc: &FormDocument, selection: &Selection) -> Result<InsertionPoint> {
    let resolved = resolve_selection(doc, selection)?;
    match resolved.target {
        SelectionTarget::Cell(at) => {
            let cell = doc
                .cell(&at)
                .ok_or(EngineError::InvalidPosition(selection.start().clone()))?;
            let last = cell
                .paragraphs
                .len()
                .checked_sub(1)
                .ok_or(EngineError::InvalidPosition(selection.start().clone()))?;
            let paragraph = at.paragraph(last);
            Ok(InsertionPoint {
                paragraph,
                offset: cell.paragraphs[last].char_len(),
                mode: InsertionMode::TableCell,
            })
        }
        SelectionTarget::Paragraph(at) => {
            let ParagraphRef::Body { block } = at else {
                return Err(EngineError::InvalidPosition(selection.start().clone()));
            };
            let (seq, index) = doc
                .body_sequence(block)
                .ok_or(EngineError::InvalidPosition(selection.start().clone()))?;
            let target = resolve_in_sequence(&seq, index)?;
            let paragraph = seq.paragraph_ref(target);
            let offset = seq
                .paragraph_at(target)
                .ok_or(EngineError::InvalidPosition(paragraph.position(0)))?
                .char_len();
            Ok(InsertionPoint {
                paragraph,
                offset,
                mode: InsertionMode::Body,
            })
        }
    }
}

/// Index of the paragraph whose end receives the entry, starting the walk
/// at `start`.
pub fn resolve_in_sequence<S: ParagraphSequence + ?Sized>(seq: &S, start: usize) -> Result<usize> {
    let mut index = start;
    loop {
        let paragraph = seq
            .paragraph_at(index)
            .ok_or(EngineError::InvalidPosition(seq.paragraph_ref(index).position(0)))?;
        let end = classify_paragraph_end(paragraph);
        let advance = match end {
            ContentType::System | ContentType::Document => false,
            ContentType::User | ContentType::Signature => true,
            ContentType::Empty => is_inside_entry(seq, index),
        };
        if !advance || index + 1 >= seq.paragraph_count() {
            return Ok(index);
        }
        trace!(index, %end, "advancing past open entry");
        index += 1;
    }
}

/// Whether paragraph `index` sits inside an entry: walking backwards over
/// empty paragraphs, the first non-empty one ends in user or signature
/// content.
pub fn is_inside_entry<S: ParagraphSequence + ?Sized>(seq: &S, index: usize) -> bool {
    for i in (0..index).rev() {
        let Some(paragraph) = seq.paragraph_at(i).found() else {
            return false;
        };
        match classify_paragraph_end(paragraph) {
            ContentType::Empty => continue,
            end => return end.is_entry(),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::{Block, Cell};

    fn sel(segs: &[u32]) -> Selection {
        Selection::caret(DocumentPosition::new(segs.to_vec()))
    }

    #[test]
    fn test_resolver_walks_past_open_entry() {
        // [System][User][User][Empty][System], selected at index 1
        let doc = body(vec![
            para(vec![sys_run("JD 01-Jan-2025 10:00")]),
            para(vec![user_run("first line")]),
            para(vec![user_run("second line")]),
            para(vec![]),
            para(vec![doc_run("Step 2"), sys_run("JD*4")]),
        ]);
        let point = resolve_insertion_point(&doc, &sel(&[1, 0])).unwrap();
        assert_eq!(point.paragraph, ParagraphRef::Body { block: 4 });
        assert_eq!(point.offset, "Step 2JD*4".chars().count());
        assert_eq!(point.mode, InsertionMode::Body);
    }

    #[test]
    fn test_resolver_stops_at_document_or_system() {
        let doc = body(vec![
            para(vec![doc_run("Record the weight.")]),
            para(vec![doc_run("Next step.")]),
        ]);
        let point = resolve_insertion_point(&doc, &sel(&[0, 3])).unwrap();
        assert_eq!(point.paragraph, ParagraphRef::Body { block: 0 });
        assert_eq!(point.offset, 18);
    }

    #[test]
    fn test_empty_paragraph_outside_entry_is_the_target() {
        let doc = body(vec![
            para(vec![doc_run("Heading")]),
            para(vec![]),
            para(vec![user_run("x")]),
        ]);
        let point = resolve_insertion_point(&doc, &sel(&[1, 0])).unwrap();
        assert_eq!(point.paragraph, ParagraphRef::Body { block: 1 });
        assert_eq!(point.offset, 0);
    }

    #[test]
    fn test_resolver_stops_at_container_end() {
        let doc = body(vec![
            para(vec![doc_run("Heading")]),
            para(vec![user_run("open entry")]),
            para(vec![user_run("still open")]),
        ]);
        let point = resolve_insertion_point(&doc, &sel(&[1, 2])).unwrap();
        assert_eq!(point.paragraph, ParagraphRef::Body { block: 2 });
        assert_eq!(point.offset, 10);
    }

    #[test]
    fn test_resolver_does_not_cross_tables() {
        let doc = FormDocument::from_blocks(vec![
            Block::Paragraph(para(vec![user_run("open")])),
            table(vec![Cell::new("FFF2CC", vec![para(vec![])])]),
            Block::Paragraph(para(vec![doc_run("after")])),
        ]);
        let point = resolve_insertion_point(&doc, &sel(&[0, 0])).unwrap();
        assert_eq!(point.paragraph, ParagraphRef::Body { block: 0 });
    }

    #[test]
    fn test_cell_target_is_last_paragraph_end() {
        let doc = FormDocument::from_blocks(vec![table(vec![Cell::new(
            "FFF2CC",
            vec![para(vec![doc_run("Result:")]), para(vec![doc_run("kg")])],
        )])]);
        let point = resolve_insertion_point(&doc, &sel(&[0, 0, 0, 0, 2])).unwrap();
        assert_eq!(
            point.paragraph,
            ParagraphRef::Cell {
                block: 0,
                row: 0,
                cell: 0,
                paragraph: 1
            }
        );
        assert_eq!(point.offset, 2);
        assert_eq!(point.mode, InsertionMode::TableCell);
        assert_eq!(point.position().segments(), &[0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_selection_scope_errors() {
        let doc = FormDocument::from_blocks(vec![
            Block::Paragraph(para(vec![doc_run("one")])),
            Block::Paragraph(para(vec![doc_run("two")])),
            table(vec![
                Cell::new("FFF2CC", vec![para(vec![doc_run("a")])]),
                Cell::new("FFF2CC", vec![para(vec![doc_run("b")])]),
            ]),
        ]);
        let span = |a: &[u32], b: &[u32]| {
            Selection::new(DocumentPosition::new(a.to_vec()), DocumentPosition::new(b.to_vec()))
        };

        let err = resolve_selection(&doc, &span(&[0, 1], &[1, 1])).unwrap_err();
        assert_eq!(err, EngineError::SelectionScope(ScopeError::MultiParagraph));

        let err = resolve_selection(&doc, &span(&[2, 0, 0, 0, 0], &[2, 0, 1, 0, 1])).unwrap_err();
        assert_eq!(err, EngineError::SelectionScope(ScopeError::MultiCell));

        let err = resolve_selection(&doc, &span(&[1, 0], &[2, 0, 0, 0, 1])).unwrap_err();
        assert_eq!(err, EngineError::SelectionScope(ScopeError::MultiCell));

        let ok = resolve_selection(&doc, &span(&[2, 0, 1, 0, 0], &[2, 0, 1, 0, 1])).unwrap();
        assert!(matches!(ok.target, SelectionTarget::Cell(_)));
        assert!(!ok.is_caret());
    }

    #[test]
    fn test_out_of_range_positions() {
        let doc = body(vec![para(vec![doc_run("abc")])]);
        assert!(matches!(
            resolve_selection(&doc, &sel(&[5, 0])),
            Err(EngineError::InvalidPosition(_))
        ));
        assert!(matches!(
            resolve_selection(&doc, &sel(&[0, 4])),
            Err(EngineError::OffsetOutOfBounds { .. })
        ));
    }
}
