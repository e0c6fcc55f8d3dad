//! Structured form document: blocks, tables, paragraphs, and tagged runs.
//!
//! A [`FormDocument`] is a flat list of top-level [`Block`]s. Body
//! paragraphs are addressed as `[block, offset]`; paragraphs inside table
//! cells as `[block, row, cell, paragraph, offset]`. Offsets count chars,
//! not bytes.
//!
//! Documents load read-only. The only way to mutate one is through a
//! [`Writable`] guard, which lifts read-only mode for its lifetime and
//! restores the previous mode when dropped, whatever path the caller leaves
//! by.

use std::ops::{Deref, DerefMut};

use kiroku_types::{ContentType, DocumentPosition};
use serde::{Deserialize, Serialize};

use crate::classify::FontScheme;
use crate::error::EngineError;
use crate::Result;

/// Paragraphs per rendered page, used for page-count estimates.
pub const PARAGRAPHS_PER_PAGE: usize = 45;

// ============================================================================
// Probe
// ============================================================================

/// Outcome of a structural lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<T> {
    NotFound,
    Found(T),
}

impl<T> Probe<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Probe::Found(v) => Some(v),
            Probe::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }

    pub fn ok_or(self, err: EngineError) -> Result<T> {
        match self {
            Probe::Found(v) => Ok(v),
            Probe::NotFound => Err(err),
        }
    }
}

impl<T> From<Option<T>> for Probe<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Probe::Found(v),
            None => Probe::NotFound,
        }
    }
}

// ============================================================================
// Runs and paragraphs
// ============================================================================

/// A maximal span of text sharing one typographic tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    /// Typographic tag (font name) the content type is derived from.
    pub font: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub strike: bool,
    /// Hyperlink target, set on attachment links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip)]
    kind: ContentType,
}

impl Run {
    /// Build a run and classify it against `fonts`.
    pub fn classified(text: impl Into<String>, font: impl Into<String>, fonts: &FontScheme) -> Self {
        let text = text.into();
        let font = font.into();
        let kind = fonts.classify(&text, &font);
        Self {
            text,
            font,
            strike: false,
            link: None,
            kind,
        }
    }

    pub fn with_link(mut self, url: impl Into<String>) -> Self {
        self.link = Some(url.into());
        self
    }

    /// Cached content type.
    pub fn kind(&self) -> ContentType {
        self.kind
    }

    pub(crate) fn reclassify(&mut self, fonts: &FontScheme) {
        self.kind = fonts.classify(&self.text, &self.font);
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn leading_whitespace(&self) -> usize {
        self.text.chars().take_while(|c| c.is_whitespace()).count()
    }

    /// Split at a char offset, keeping the head and returning the tail with
    /// identical formatting.
    fn split_off(&mut self, at: usize) -> Run {
        let byte = char_to_byte(&self.text, at);
        let tail = self.text.split_off(byte);
        Run {
            text: tail,
            font: self.font.clone(),
            strike: self.strike,
            link: self.link.clone(),
            kind: self.kind,
        }
    }
}

/// A run's char extent inside its paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpan<'a> {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub run: &'a Run,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub runs: Vec<Run>,
}

impl Paragraph {
    pub fn new(runs: Vec<Run>) -> Self {
        Self { runs }
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn char_len(&self) -> usize {
        self.runs.iter().map(Run::char_len).sum()
    }

    pub fn is_blank(&self) -> bool {
        self.runs.iter().all(Run::is_blank)
    }

    /// Every run with its char extent, in order. Empty runs are included.
    pub fn spans(&self) -> Vec<RunSpan<'_>> {
        let mut start = 0;
        self.runs
            .iter()
            .enumerate()
            .map(|(index, run)| {
                let end = start + run.char_len();
                let span = RunSpan { index, start, end, run };
                start = end;
                span
            })
            .collect()
    }

    /// The run owning the char at `offset`.
    pub fn run_at(&self, offset: usize) -> Probe<RunSpan<'_>> {
        self.spans()
            .into_iter()
            .find(|s| s.start <= offset && offset < s.end)
            .into()
    }

    /// Ensure a run boundary at `offset` and return the index of the first
    /// run starting there (`runs.len()` at the paragraph end).
    pub(crate) fn split_runs_at(&mut self, offset: usize) -> Result<usize> {
        let len = self.char_len();
        if offset > len {
            return Err(EngineError::OffsetOutOfBounds { offset, len });
        }
        let mut start = 0;
        for index in 0..self.runs.len() {
            let end = start + self.runs[index].char_len();
            if offset == start {
                return Ok(index);
            }
            if offset < end {
                let tail = self.runs[index].split_off(offset - start);
                self.runs.insert(index + 1, tail);
                return Ok(index + 1);
            }
            start = end;
        }
        Ok(self.runs.len())
    }

    /// Insert runs at a char offset. Returns the run index just past them.
    pub(crate) fn insert_runs(&mut self, offset: usize, runs: Vec<Run>) -> Result<usize> {
        let at = self.split_runs_at(offset)?;
        let count = runs.len();
        self.runs.splice(at..at, runs);
        Ok(at + count)
    }

    /// Split the paragraph at `offset`, returning everything after it.
    pub(crate) fn split_off(&mut self, offset: usize) -> Result<Paragraph> {
        let at = self.split_runs_at(offset)?;
        Ok(Paragraph {
            runs: self.runs.split_off(at),
        })
    }
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Background fill as a hex color (e.g. `"FFF2CC"`).
    #[serde(default)]
    pub shading: String,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

impl Cell {
    pub fn new(shading: impl Into<String>, paragraphs: Vec<Paragraph>) -> Self {
        Self {
            shading: shading.into(),
            paragraphs,
        }
    }

    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.paragraphs.iter().flat_map(|p| p.runs.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// A top-level block of the document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

// ============================================================================
// Addressing
// ============================================================================

/// Address of one table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub block: usize,
    pub row: usize,
    pub cell: usize,
}

impl CellRef {
    pub fn paragraph(&self, paragraph: usize) -> ParagraphRef {
        ParagraphRef::Cell {
            block: self.block,
            row: self.row,
            cell: self.cell,
            paragraph,
        }
    }
}

/// Address of one paragraph, in the body or in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParagraphRef {
    Body {
        block: usize,
    },
    Cell {
        block: usize,
        row: usize,
        cell: usize,
        paragraph: usize,
    },
}

impl ParagraphRef {
    pub fn cell(&self) -> Option<CellRef> {
        match *self {
            ParagraphRef::Body { .. } => None,
            ParagraphRef::Cell { block, row, cell, .. } => Some(CellRef { block, row, cell }),
        }
    }

    /// Position of a char offset inside this paragraph.
    pub fn position(&self, offset: usize) -> DocumentPosition {
        let segs: Vec<u32> = match *self {
            ParagraphRef::Body { block } => vec![block as u32, offset as u32],
            ParagraphRef::Cell {
                block,
                row,
                cell,
                paragraph,
            } => vec![
                block as u32,
                row as u32,
                cell as u32,
                paragraph as u32,
                offset as u32,
            ],
        };
        DocumentPosition::new(segs)
    }

    /// Split a position into a paragraph address and a char offset. Only
    /// checks shape, not existence.
    pub fn from_position(pos: &DocumentPosition) -> Result<(ParagraphRef, usize)> {
        let s: Vec<usize> = pos.segments().iter().map(|&v| v as usize).collect();
        match s.as_slice() {
            [block, offset] => Ok((ParagraphRef::Body { block: *block }, *offset)),
            [block, row, cell, paragraph, offset] => Ok((
                ParagraphRef::Cell {
                    block: *block,
                    row: *row,
                    cell: *cell,
                    paragraph: *paragraph,
                },
                *offset,
            )),
            _ => Err(EngineError::InvalidPosition(pos.clone())),
        }
    }
}

// ============================================================================
// Paragraph sequences
// ============================================================================

/// An ordered run of sibling paragraphs the resolver can walk: either a
/// stretch of body paragraphs between tables, or the paragraphs of a cell.
pub trait ParagraphSequence {
    fn paragraph_count(&self) -> usize;
    fn paragraph_at(&self, index: usize) -> Probe<&Paragraph>;
    fn paragraph_ref(&self, index: usize) -> ParagraphRef;
}

/// Consecutive top-level paragraph blocks, bounded by tables or the
/// document edges.
pub struct BodySequence<'a> {
    blocks: &'a [Block],
    first: usize,
}

impl ParagraphSequence for BodySequence<'_> {
    fn paragraph_count(&self) -> usize {
        self.blocks.len()
    }

    fn paragraph_at(&self, index: usize) -> Probe<&Paragraph> {
        match self.blocks.get(index) {
            Some(Block::Paragraph(p)) => Probe::Found(p),
            _ => Probe::NotFound,
        }
    }

    fn paragraph_ref(&self, index: usize) -> ParagraphRef {
        ParagraphRef::Body {
            block: self.first + index,
        }
    }
}

pub struct CellSequence<'a> {
    cell: &'a Cell,
    at: CellRef,
}

impl ParagraphSequence for CellSequence<'_> {
    fn paragraph_count(&self) -> usize {
        self.cell.paragraphs.len()
    }

    fn paragraph_at(&self, index: usize) -> Probe<&Paragraph> {
        self.cell.paragraphs.get(index).into()
    }

    fn paragraph_ref(&self, index: usize) -> ParagraphRef {
        self.at.paragraph(index)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Serialized document content, as exchanged with the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSnapshot(String);

impl DocumentSnapshot {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Check well-formedness before anything is loaded from it.
    pub fn validate(&self) -> Result<()> {
        serde_json::from_str::<serde_json::Value>(&self.0)
            .map(|_| ())
            .map_err(|e| EngineError::Snapshot(e.to_string()))
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    blocks: &'a [Block],
}

#[derive(Deserialize)]
struct SnapshotOwned {
    #[serde(default)]
    blocks: Vec<Block>,
}

// ============================================================================
// FormDocument
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDocument {
    blocks: Vec<Block>,
    read_only: bool,
}

impl FormDocument {
    /// Build a read-only document from blocks whose runs are already
    /// classified.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            read_only: true,
        }
    }

    /// Validate and load a snapshot, classifying every run against `fonts`.
    pub fn load(snapshot: &DocumentSnapshot, fonts: &FontScheme) -> Result<Self> {
        snapshot.validate()?;
        let SnapshotOwned { mut blocks } = serde_json::from_str(snapshot.as_str())
            .map_err(|e| EngineError::Snapshot(e.to_string()))?;
        for block in &mut blocks {
            match block {
                Block::Paragraph(p) => p.runs.iter_mut().for_each(|r| r.reclassify(fonts)),
                Block::Table(t) => t
                    .rows
                    .iter_mut()
                    .flat_map(|r| r.cells.iter_mut())
                    .flat_map(|c| c.paragraphs.iter_mut())
                    .flat_map(|p| p.runs.iter_mut())
                    .for_each(|r| r.reclassify(fonts)),
            }
        }
        tracing::debug!(blocks = blocks.len(), "loaded document snapshot");
        Ok(Self::from_blocks(blocks))
    }

    pub fn snapshot(&self) -> Result<DocumentSnapshot> {
        serde_json::to_string(&SnapshotRef {
            blocks: &self.blocks,
        })
        .map(DocumentSnapshot)
        .map_err(|e| EngineError::Snapshot(e.to_string()))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Lift read-only mode until the returned guard drops.
    pub fn writable(&mut self) -> Writable<'_> {
        let restore = self.read_only;
        self.read_only = false;
        Writable { doc: self, restore }
    }

    /// Rough page count for progress displays.
    pub fn page_count(&self) -> usize {
        let paragraphs: usize = self
            .blocks
            .iter()
            .map(|b| match b {
                Block::Paragraph(_) => 1,
                Block::Table(t) => t
                    .rows
                    .iter()
                    .map(|r| r.cells.iter().map(|c| c.paragraphs.len()).max().unwrap_or(0))
                    .sum(),
            })
            .sum();
        paragraphs.div_ceil(PARAGRAPHS_PER_PAGE).max(1)
    }

    pub fn paragraph(&self, at: &ParagraphRef) -> Probe<&Paragraph> {
        match *at {
            ParagraphRef::Body { block } => match self.blocks.get(block) {
                Some(Block::Paragraph(p)) => Probe::Found(p),
                _ => Probe::NotFound,
            },
            ParagraphRef::Cell { paragraph, .. } => match at.cell().map(|c| self.cell(&c)) {
                Some(Probe::Found(cell)) => cell.paragraphs.get(paragraph).into(),
                _ => Probe::NotFound,
            },
        }
    }

    pub fn cell(&self, at: &CellRef) -> Probe<&Cell> {
        match self.blocks.get(at.block) {
            Some(Block::Table(t)) => t
                .rows
                .get(at.row)
                .and_then(|r| r.cells.get(at.cell))
                .into(),
            _ => Probe::NotFound,
        }
    }

    /// Every cell with its address, in document order.
    pub fn cells(&self) -> Vec<(CellRef, &Cell)> {
        let mut out = Vec::new();
        for (block, b) in self.blocks.iter().enumerate() {
            if let Block::Table(t) = b {
                for (row, r) in t.rows.iter().enumerate() {
                    for (cell, c) in r.cells.iter().enumerate() {
                        out.push((CellRef { block, row, cell }, c));
                    }
                }
            }
        }
        out
    }

    /// Resolve a position to an existing paragraph and an in-bounds offset.
    pub fn locate(&self, pos: &DocumentPosition) -> Result<(ParagraphRef, usize)> {
        let (at, offset) = ParagraphRef::from_position(pos)?;
        let para = self
            .paragraph(&at)
            .ok_or(EngineError::InvalidPosition(pos.clone()))?;
        let len = para.char_len();
        if offset > len {
            return Err(EngineError::OffsetOutOfBounds { offset, len });
        }
        Ok((at, offset))
    }

    /// The body stretch containing top-level block `block`, and the block's
    /// index inside it.
    pub fn body_sequence(&self, block: usize) -> Probe<(BodySequence<'_>, usize)> {
        if !matches!(self.blocks.get(block), Some(Block::Paragraph(_))) {
            return Probe::NotFound;
        }
        let is_para = |b: &Block| matches!(b, Block::Paragraph(_));
        let first = self.blocks[..block]
            .iter()
            .rposition(|b| !is_para(b))
            .map_or(0, |i| i + 1);
        let last = self.blocks[block..]
            .iter()
            .position(|b| !is_para(b))
            .map_or(self.blocks.len(), |i| block + i);
        Probe::Found((
            BodySequence {
                blocks: &self.blocks[first..last],
                first,
            },
            block - first,
        ))
    }

    pub fn cell_sequence(&self, at: &CellRef) -> Probe<CellSequence<'_>> {
        match self.cell(at) {
            Probe::Found(cell) => Probe::Found(CellSequence { cell, at: *at }),
            Probe::NotFound => Probe::NotFound,
        }
    }

    /// The sequence a paragraph belongs to, and its index in it.
    pub fn sequence_of(&self, at: &ParagraphRef) -> Probe<(Box<dyn ParagraphSequence + '_>, usize)> {
        match *at {
            ParagraphRef::Body { block } => match self.body_sequence(block) {
                Probe::Found((seq, idx)) => Probe::Found((Box::new(seq), idx)),
                Probe::NotFound => Probe::NotFound,
            },
            ParagraphRef::Cell { paragraph, .. } => {
                let Some(cell_ref) = at.cell() else {
                    return Probe::NotFound;
                };
                match self.cell_sequence(&cell_ref) {
                    Probe::Found(seq) if paragraph < seq.paragraph_count() => {
                        Probe::Found((Box::new(seq), paragraph))
                    }
                    _ => Probe::NotFound,
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Mutation primitives (refuse while read-only)
    // ------------------------------------------------------------------------

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(EngineError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub(crate) fn paragraph_mut(&mut self, at: &ParagraphRef) -> Result<&mut Paragraph> {
        self.ensure_writable()?;
        let missing = EngineError::InvalidPosition(at.position(0));
        match *at {
            ParagraphRef::Body { block } => match self.blocks.get_mut(block) {
                Some(Block::Paragraph(p)) => Ok(p),
                _ => Err(missing),
            },
            ParagraphRef::Cell { paragraph, .. } => {
                let cell_ref = at.cell().ok_or(missing.clone())?;
                self.cell_mut(&cell_ref)?
                    .paragraphs
                    .get_mut(paragraph)
                    .ok_or(missing)
            }
        }
    }

    pub(crate) fn cell_mut(&mut self, at: &CellRef) -> Result<&mut Cell> {
        self.ensure_writable()?;
        let missing = EngineError::InvalidPosition(at.paragraph(0).position(0));
        match self.blocks.get_mut(at.block) {
            Some(Block::Table(t)) => t
                .rows
                .get_mut(at.row)
                .and_then(|r| r.cells.get_mut(at.cell))
                .ok_or(missing),
            _ => Err(missing),
        }
    }

    /// Insert a new paragraph directly after `at` and return its address.
    pub(crate) fn insert_paragraph_after(
        &mut self,
        at: &ParagraphRef,
        paragraph: Paragraph,
    ) -> Result<ParagraphRef> {
        self.ensure_writable()?;
        match *at {
            ParagraphRef::Body { block } => {
                if block >= self.blocks.len() {
                    return Err(EngineError::InvalidPosition(at.position(0)));
                }
                self.blocks.insert(block + 1, Block::Paragraph(paragraph));
                Ok(ParagraphRef::Body { block: block + 1 })
            }
            ParagraphRef::Cell { paragraph: idx, .. } => {
                let cell_ref = at
                    .cell()
                    .ok_or(EngineError::InvalidPosition(at.position(0)))?;
                let cell = self.cell_mut(&cell_ref)?;
                if idx >= cell.paragraphs.len() {
                    return Err(EngineError::InvalidPosition(at.position(0)));
                }
                cell.paragraphs.insert(idx + 1, paragraph);
                Ok(cell_ref.paragraph(idx + 1))
            }
        }
    }

    /// Replace all content, keeping the current read-only mode.
    pub(crate) fn replace_blocks(&mut self, blocks: Vec<Block>) -> Result<()> {
        self.ensure_writable()?;
        self.blocks = blocks;
        Ok(())
    }
}

/// Scoped write access. Read-only mode comes back when this drops.
pub struct Writable<'a> {
    doc: &'a mut FormDocument,
    restore: bool,
}

impl Writable<'_> {
    /// Swap in the content of a freshly loaded document.
    pub fn reload_from(&mut self, fresh: FormDocument) -> Result<()> {
        self.doc.replace_blocks(fresh.blocks)
    }
}

impl Deref for Writable<'_> {
    type Target = FormDocument;

    fn deref(&self) -> &FormDocument {
        self.doc
    }
}

impl DerefMut for Writable<'_> {
    fn deref_mut(&mut self) -> &mut FormDocument {
        self.doc
    }
}

impl Drop for Writable<'_> {
    fn drop(&mut self) {
        self.doc.read_only = self.restore;
    }
}

fn char_to_byte(s: &str, char_idx: usize) -> usize {
    s.char_indices().nth(char_idx).map_or(s.len(), |(b, _)| b)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_split_runs_at_preserves_formatting() {
        let mut p = para(vec![doc_run("Hello "), user_run("world")]);
        let idx = p.split_runs_at(8).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(p.runs.len(), 3);
        assert_eq!(p.runs[1].text, "wo");
        assert_eq!(p.runs[2].text, "rld");
        assert_eq!(p.runs[2].kind(), ContentType::User);
        assert_eq!(p.text(), "Hello world");

        // Existing boundaries don't split again.
        assert_eq!(p.split_runs_at(6).unwrap(), 1);
        assert_eq!(p.split_runs_at(11).unwrap(), 3);
        assert!(p.split_runs_at(12).is_err());
    }

    #[test]
    fn test_offsets_count_chars() {
        let mut p = para(vec![doc_run("☐ ok")]);
        assert_eq!(p.char_len(), 4);
        p.split_runs_at(1).unwrap();
        assert_eq!(p.runs[0].text, "☐");
    }

    #[test]
    fn test_position_round_trip_shapes() {
        let cell = ParagraphRef::Cell {
            block: 2,
            row: 1,
            cell: 0,
            paragraph: 3,
        };
        let pos = cell.position(7);
        assert_eq!(pos.segments(), &[2, 1, 0, 3, 7]);
        assert_eq!(ParagraphRef::from_position(&pos).unwrap(), (cell, 7));

        let bad = DocumentPosition::new(vec![1, 2, 3]);
        assert!(matches!(
            ParagraphRef::from_position(&bad),
            Err(EngineError::InvalidPosition(_))
        ));
    }

    #[test]
    fn test_read_only_blocks_mutation() {
        let mut doc = body(vec![para(vec![doc_run("x")])]);
        assert!(doc.is_read_only());
        let at = ParagraphRef::Body { block: 0 };
        assert_eq!(doc.paragraph_mut(&at).err(), Some(EngineError::ReadOnly));
        {
            let mut w = doc.writable();
            assert!(!w.is_read_only());
            w.paragraph_mut(&at).unwrap().runs.push(doc_run("y"));
        }
        assert!(doc.is_read_only());
        assert_eq!(doc.paragraph(&at).found().unwrap().text(), "xy");
    }

    #[test]
    fn test_writable_restored_on_error_path() {
        fn failing(doc: &mut FormDocument) -> Result<()> {
            let mut w = doc.writable();
            w.paragraph_mut(&ParagraphRef::Body { block: 9 })?;
            Ok(())
        }
        let mut doc = body(vec![para(vec![doc_run("x")])]);
        assert!(failing(&mut doc).is_err());
        assert!(doc.is_read_only());
    }

    #[test]
    fn test_body_sequence_stops_at_tables() {
        let doc = FormDocument::from_blocks(vec![
            Block::Paragraph(para(vec![doc_run("a")])),
            table(vec![Cell::new("FFFFFF", vec![para(vec![])])]),
            Block::Paragraph(para(vec![doc_run("b")])),
            Block::Paragraph(para(vec![doc_run("c")])),
        ]);
        let (seq, idx) = doc.body_sequence(3).found().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(seq.paragraph_count(), 2);
        assert_eq!(seq.paragraph_ref(0), ParagraphRef::Body { block: 2 });
        assert!(!doc.body_sequence(1).is_found());
    }

    #[test]
    fn test_snapshot_load_classifies_runs() {
        let raw = r#"{"blocks":[
            {"type":"paragraph","runs":[
                {"text":"Step 1 ","font":"Calibri"},
                {"text":"done","font":"courier new"}
            ]},
            {"type":"table","rows":[{"cells":[{"shading":"FFF2CC","paragraphs":[{"runs":[]}]}]}]}
        ]}"#;
        let doc = FormDocument::load(&DocumentSnapshot::new(raw), &fonts()).unwrap();
        let p = doc.paragraph(&ParagraphRef::Body { block: 0 }).found().unwrap();
        assert_eq!(p.runs[0].kind(), ContentType::Document);
        assert_eq!(p.runs[1].kind(), ContentType::User);
        assert_eq!(doc.cells().len(), 1);
        assert_eq!(doc.page_count(), 1);

        let again = FormDocument::load(&doc.snapshot().unwrap(), &fonts()).unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn test_malformed_snapshot_rejected() {
        let err = FormDocument::load(&DocumentSnapshot::new("{\"blocks\": ["), &fonts());
        assert!(matches!(err, Err(EngineError::Snapshot(_))));
    }
}
