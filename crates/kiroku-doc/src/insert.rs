//! The insertion engine: every way content gets into a form.
//!
//! Each operation validates first and only then opens the document for
//! writing, so a refused request leaves the document exactly as it was.
//! Marker numbers are allocated after validation and are never handed
//! back, even if a later step fails.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use kiroku_types::{ActionType, CellState, ContentType, DocumentPosition, MarkerCounter, Selection};
use tracing::debug;

use crate::cell::{
    analyze_cell, is_placeholder, toggle_shading_to_filled, ShadingPalette, CHECKED_BOX,
    UNCHECKED_BOX,
};
use crate::classify::{FontScheme, CLOCK_GLYPH};
use crate::cursor::{validated_insertion, BoundaryPolicy};
use crate::error::{CursorReason, EngineError};
use crate::model::{FormDocument, Paragraph, ParagraphRef, Run};
use crate::resolve::{resolve_insertion_point, resolve_selection, InsertionMode, InsertionPoint};
use crate::Result;

/// Who is writing, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContext {
    pub initials: String,
    pub legal_name: String,
    /// Time of the entry, Unix millis.
    pub timestamp: u64,
    pub utc_offset_minutes: i32,
    /// Recorded after the fact; entries carry the clock glyph.
    pub late_entry: bool,
}

impl EntryContext {
    pub fn date_line(&self) -> String {
        format!(
            "{} {}",
            self.initials,
            format_entry_date(self.timestamp, self.utc_offset_minutes)
        )
    }

    /// Second line of a signature block.
    pub fn signature_line(&self) -> String {
        format!(
            "{}, {}",
            self.initials,
            format_entry_date(self.timestamp, self.utc_offset_minutes)
        )
    }

    pub fn timezone(&self) -> String {
        format_utc_offset(self.utc_offset_minutes)
    }
}

/// One insertion request, as issued by an editing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertRequest {
    /// Free text entry appended after the selection's open entries.
    Text { selection: Selection, text: String },
    /// Inline entry at a free cursor, or into a placeholder.
    Inline { position: DocumentPosition, text: String },
    /// Signature with its reason; inline signatures sit at a free cursor.
    Signature {
        selection: Selection,
        reason: String,
        inline: bool,
    },
    /// Strike the selection and add a bracketed replacement.
    Correction {
        selection: Selection,
        replacement: String,
    },
    /// Tick the first unchecked box in the selection.
    Checkbox { selection: Selection },
    /// Attachment hyperlink entry.
    Attachment {
        selection: Selection,
        name: String,
        url: String,
    },
}

impl InsertRequest {
    pub fn action(&self) -> ActionType {
        match self {
            InsertRequest::Text { .. } => ActionType::Entry,
            InsertRequest::Inline { .. } => ActionType::InlineEntry,
            InsertRequest::Signature { .. } => ActionType::Signature,
            InsertRequest::Correction { .. } => ActionType::Correction,
            InsertRequest::Checkbox { .. } => ActionType::Checkbox,
            InsertRequest::Attachment { .. } => ActionType::Attachment,
        }
    }
}

/// What an accepted insertion did, for the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionOutcome {
    pub action: ActionType,
    pub inserted_text: String,
    pub removed_text: String,
    pub marker: Option<u64>,
    pub empty_cell_delta: i32,
    pub attachment_delta: u32,
    pub approval_delta: u32,
    pub reason: Option<String>,
    /// Caret after the insertion.
    pub caret: DocumentPosition,
}

impl InsertionOutcome {
    fn new(action: ActionType, caret: DocumentPosition) -> Self {
        Self {
            action,
            inserted_text: String::new(),
            removed_text: String::new(),
            marker: None,
            empty_cell_delta: 0,
            attachment_delta: 0,
            approval_delta: 0,
            reason: None,
            caret,
        }
    }
}

/// Reference marker used inside correction brackets.
pub fn reference_marker(number: u64) -> String {
    format!("*{number}")
}

/// Compact marker following inline entries.
pub fn compact_marker(initials: &str, number: u64) -> String {
    format!("{initials}*{number}")
}

/// `DD-Mon-YYYY HH:MM` in the writer's local offset.
pub fn format_entry_date(timestamp_ms: u64, utc_offset_minutes: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    let utc = DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64).unwrap_or_default();
    utc.with_timezone(&offset).format("%d-%b-%Y %H:%M").to_string()
}

/// `+HH:MM` / `-HH:MM`.
pub fn format_utc_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let abs = minutes.unsigned_abs();
    format!("{sign}{:02}:{:02}", abs / 60, abs % 60)
}

pub struct InsertionEngine {
    fonts: FontScheme,
    palette: ShadingPalette,
    policy: BoundaryPolicy,
}

impl InsertionEngine {
    pub fn new(fonts: FontScheme, palette: ShadingPalette, policy: BoundaryPolicy) -> Self {
        Self {
            fonts,
            palette,
            policy,
        }
    }

    pub fn fonts(&self) -> &FontScheme {
        &self.fonts
    }

    pub fn palette(&self) -> &ShadingPalette {
        &self.palette
    }

    /// Apply one request to `doc`.
    pub fn apply(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        request: &InsertRequest,
    ) -> Result<InsertionOutcome> {
        let outcome = transact(doc, |doc| match request {
            InsertRequest::Text { selection, text } => self.insert_text(doc, markers, ctx, selection, text),
            InsertRequest::Inline { position, text } => self.insert_inline(doc, markers, ctx, position, text),
            InsertRequest::Signature {
                selection,
                reason,
                inline,
            } => self.insert_signature(doc, markers, ctx, selection, reason, *inline),
            InsertRequest::Correction {
                selection,
                replacement,
            } => self.correct(doc, markers, ctx, selection, replacement),
            InsertRequest::Checkbox { selection } => self.check_box(doc, markers, ctx, selection),
            InsertRequest::Attachment {
                selection,
                name,
                url,
            } => self.attach_link(doc, markers, ctx, selection, name, url),
        })?;
        debug!(
            action = %outcome.action,
            marker = ?outcome.marker,
            empty_cell_delta = outcome.empty_cell_delta,
            caret = %outcome.caret,
            "insertion applied"
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Free text entry followed by an initials/date line.
    pub fn insert_text(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        selection: &Selection,
        text: &str,
    ) -> Result<InsertionOutcome> {
        if text.trim().is_empty() {
            return Err(EngineError::EmptyText);
        }
        let point = resolve_insertion_point(doc, selection)?;

        if point.mode == InsertionMode::TableCell {
            if let Some(slot) = self.placeholder_in_cell(doc, &point.paragraph) {
                let text = single_line(text);
                return self.fill_placeholder(doc, markers, ctx, slot, &text);
            }
        }

        let mut lines: Vec<Vec<Run>> = text
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .map(|line| {
                if line.is_empty() {
                    Vec::new()
                } else {
                    vec![self.user_run(line)]
                }
            })
            .collect();
        if ctx.late_entry {
            if let Some(last) = lines.iter_mut().rev().find(|l| !l.is_empty()) {
                last.push(self.clock_run());
            }
        }
        lines.push(vec![self.initials_run(&ctx.date_line())]);

        let mut outcome = InsertionOutcome::new(ActionType::Entry, point.position());
        let (caret, delta) = self.append_lines(doc, &point, lines)?;
        outcome.caret = caret;
        outcome.empty_cell_delta = delta;
        outcome.inserted_text = text.to_string();
        Ok(outcome)
    }

    /// Inline entry at a validated free cursor. A placeholder at the cursor
    /// is replaced rather than written next to.
    pub fn insert_inline(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        position: &DocumentPosition,
        text: &str,
    ) -> Result<InsertionOutcome> {
        if text.trim().is_empty() {
            return Err(EngineError::EmptyText);
        }
        let text = single_line(text);
        let (at, offset) = doc.locate(position)?;
        if let Some(run) = self.placeholder_at(doc, &at, offset) {
            return self.fill_placeholder(doc, markers, ctx, (at, run), &text);
        }
        validated_insertion(doc, position, &self.fonts, self.policy)?;

        let number = markers.allocate();
        let mut runs = vec![self.user_run(&text)];
        runs.extend(self.marker_runs(ctx, &compact_marker(&ctx.initials, number)));

        let mut outcome = InsertionOutcome::new(ActionType::InlineEntry, position.clone());
        let (caret, delta) = self.splice_runs(doc, &at, offset, runs)?;
        outcome.caret = caret;
        outcome.empty_cell_delta = delta;
        outcome.inserted_text = text;
        outcome.marker = Some(number);
        Ok(outcome)
    }

    /// Signature: a block (reason, name, then the date line) after the
    /// selection's open entries, or inline at a free cursor.
    pub fn insert_signature(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        selection: &Selection,
        reason: &str,
        inline: bool,
    ) -> Result<InsertionOutcome> {
        if ctx.legal_name.trim().is_empty() {
            return Err(EngineError::MissingLegalName);
        }
        let reason = single_line(reason.trim());

        let mut outcome = if inline {
            let position = selection.start();
            let (at, offset) = validated_insertion(doc, position, &self.fonts, self.policy)?;
            let number = markers.allocate();
            let mut runs = vec![self.signature_run(&ctx.legal_name)];
            runs.extend(self.marker_runs(ctx, &compact_marker(&ctx.initials, number)));

            let mut outcome = InsertionOutcome::new(ActionType::Signature, position.clone());
            let (caret, delta) = self.splice_runs(doc, &at, offset, runs)?;
            outcome.caret = caret;
            outcome.empty_cell_delta = delta;
            outcome.marker = Some(number);
            outcome
        } else {
            let point = resolve_insertion_point(doc, selection)?;
            let mut first = Vec::new();
            if !reason.is_empty() {
                first.push(self.user_run(&format!("{reason} ")));
            }
            first.push(self.signature_run(&ctx.legal_name));
            if ctx.late_entry {
                first.push(self.clock_run());
            }
            let lines = vec![first, vec![self.initials_run(&ctx.signature_line())]];

            let mut outcome = InsertionOutcome::new(ActionType::Signature, point.position());
            let (caret, delta) = self.append_lines(doc, &point, lines)?;
            outcome.caret = caret;
            outcome.empty_cell_delta = delta;
            outcome
        };
        outcome.inserted_text = ctx.legal_name.clone();
        outcome.approval_delta = 1;
        outcome.reason = (!reason.is_empty()).then_some(reason);
        Ok(outcome)
    }

    /// Strike the selected text and follow it with
    /// ` [replacement*N] `.
    pub fn correct(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        selection: &Selection,
        replacement: &str,
    ) -> Result<InsertionOutcome> {
        let resolved = resolve_selection(doc, selection)?;
        let (at, start, end) = resolved.single_paragraph()?;
        if start == end {
            return Err(EngineError::EmptySelection);
        }
        if replacement.trim().is_empty() {
            return Err(EngineError::EmptyText);
        }
        let paragraph = doc
            .paragraph(&at)
            .ok_or(EngineError::InvalidPosition(at.position(start)))?;
        for span in paragraph.spans() {
            if span.end <= start || span.start >= end || span.run.text.is_empty() {
                continue;
            }
            if span.run.link.is_some() {
                return Err(EngineError::AttachmentCorrection);
            }
            if span.run.kind() == ContentType::Signature {
                return Err(EngineError::CursorPosition {
                    reason: CursorReason::InSignatureContent,
                    position: at.position(span.start.max(start)),
                });
            }
        }

        let replacement = single_line(replacement);
        let number = markers.allocate();
        let mut runs = vec![self.system_run(" ["), self.user_run(&replacement)];
        runs.extend(self.marker_runs(ctx, &reference_marker(number)));
        runs.push(self.system_run("] "));

        let mut w = doc.writable();
        let delta = self.toggle_cell(&mut w, &at)?;
        let paragraph = w.paragraph_mut(&at)?;
        let first = paragraph.split_runs_at(start)?;
        let last = paragraph.split_runs_at(end)?;
        let mut removed = String::new();
        for run in &mut paragraph.runs[first..last] {
            run.strike = true;
            removed.push_str(&run.text);
        }
        let after = paragraph.insert_runs(end, runs)?;
        let caret_offset: usize = paragraph.runs[..after].iter().map(Run::char_len).sum();
        drop(w);

        let mut outcome = InsertionOutcome::new(ActionType::Correction, at.position(caret_offset));
        outcome.inserted_text = replacement;
        outcome.removed_text = removed;
        outcome.marker = Some(number);
        outcome.empty_cell_delta = delta;
        Ok(outcome)
    }

    /// Replace the first unchecked box in the selected paragraph (or the
    /// selected range of it) with a checked box and a marker.
    pub fn check_box(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        selection: &Selection,
    ) -> Result<InsertionOutcome> {
        let resolved = resolve_selection(doc, selection)?;
        let (at, start, end) = resolved.single_paragraph()?;
        let paragraph = doc
            .paragraph(&at)
            .ok_or(EngineError::InvalidPosition(at.position(start)))?;
        let (from, to) = if start == end {
            (0, paragraph.char_len())
        } else {
            (start, end)
        };
        // Boxes inside System or Signature runs belong to the protocol.
        let mut protected = None;
        let mut glyph_at = None;
        'spans: for span in paragraph.spans() {
            for (k, c) in span.run.text.chars().enumerate() {
                let i = span.start + k;
                if i < from || i >= to || c != UNCHECKED_BOX {
                    continue;
                }
                match span.run.kind() {
                    ContentType::Document | ContentType::User => {
                        glyph_at = Some(i);
                        break 'spans;
                    }
                    ContentType::Signature => {
                        protected.get_or_insert((CursorReason::InSignatureContent, i));
                    }
                    _ => {
                        protected.get_or_insert((CursorReason::InSystemContent, i));
                    }
                }
            }
        }
        let glyph_at = match (glyph_at, protected) {
            (Some(i), _) => i,
            (None, Some((reason, i))) => {
                return Err(EngineError::CursorPosition {
                    reason,
                    position: at.position(i),
                });
            }
            (None, None) => return Err(EngineError::NoCheckbox),
        };

        let number = markers.allocate();
        let mut runs = vec![self.user_run(&CHECKED_BOX.to_string())];
        runs.extend(self.marker_runs(ctx, &compact_marker(&ctx.initials, number)));

        let mut w = doc.writable();
        let delta = self.toggle_cell(&mut w, &at)?;
        let paragraph = w.paragraph_mut(&at)?;
        let first = paragraph.split_runs_at(glyph_at)?;
        let last = paragraph.split_runs_at(glyph_at + 1)?;
        let count = runs.len();
        paragraph.runs.splice(first..last, runs);
        let caret_offset: usize = paragraph.runs[..first + count].iter().map(Run::char_len).sum();
        drop(w);

        let mut outcome = InsertionOutcome::new(ActionType::Checkbox, at.position(caret_offset));
        outcome.inserted_text = CHECKED_BOX.to_string();
        outcome.removed_text = UNCHECKED_BOX.to_string();
        outcome.marker = Some(number);
        outcome.empty_cell_delta = delta;
        Ok(outcome)
    }

    /// Attachment hyperlink entry, placed like a text entry.
    pub fn attach_link(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        selection: &Selection,
        name: &str,
        url: &str,
    ) -> Result<InsertionOutcome> {
        if name.trim().is_empty() || url.trim().is_empty() {
            return Err(EngineError::EmptyText);
        }
        let point = resolve_insertion_point(doc, selection)?;
        let name = single_line(name);
        let number = markers.allocate();
        let mut line = vec![self.user_run(&name).with_link(url.trim())];
        line.extend(self.marker_runs(ctx, &compact_marker(&ctx.initials, number)));

        let mut outcome = InsertionOutcome::new(ActionType::Attachment, point.position());
        let (caret, delta) = self.append_lines(doc, &point, vec![line])?;
        outcome.caret = caret;
        outcome.empty_cell_delta = delta;
        outcome.inserted_text = name;
        outcome.marker = Some(number);
        outcome.attachment_delta = 1;
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Mutation helpers
    // ------------------------------------------------------------------------

    /// Write `lines` at `point`. A paragraph that already has content before
    /// the point gets the lines on new paragraphs after it; text after the
    /// point moves below them.
    fn append_lines(
        &self,
        doc: &mut FormDocument,
        point: &InsertionPoint,
        lines: Vec<Vec<Run>>,
    ) -> Result<(DocumentPosition, i32)> {
        let mut w = doc.writable();
        let delta = self.toggle_cell(&mut w, &point.paragraph)?;
        let paragraph = w.paragraph_mut(&point.paragraph)?;
        let tail = paragraph.split_off(point.offset)?;
        let head_blank = paragraph.is_blank();

        let mut cursor = point.paragraph;
        let mut lines = lines.into_iter();
        if head_blank {
            if let Some(first) = lines.next() {
                let len = paragraph.char_len();
                paragraph.insert_runs(len, first)?;
            }
        }
        for line in lines {
            cursor = w.insert_paragraph_after(&cursor, Paragraph::new(line))?;
        }
        let caret_offset = w.paragraph_mut(&cursor)?.char_len();
        if !tail.runs.is_empty() {
            w.insert_paragraph_after(&cursor, tail)?;
        }
        Ok((cursor.position(caret_offset), delta))
    }

    fn splice_runs(
        &self,
        doc: &mut FormDocument,
        at: &ParagraphRef,
        offset: usize,
        runs: Vec<Run>,
    ) -> Result<(DocumentPosition, i32)> {
        let mut w = doc.writable();
        let delta = self.toggle_cell(&mut w, at)?;
        let paragraph = w.paragraph_mut(at)?;
        let after = paragraph.insert_runs(offset, runs)?;
        let caret_offset: usize = paragraph.runs[..after].iter().map(Run::char_len).sum();
        Ok((at.position(caret_offset), delta))
    }

    fn fill_placeholder(
        &self,
        doc: &mut FormDocument,
        markers: &mut MarkerCounter,
        ctx: &EntryContext,
        (at, run): (ParagraphRef, usize),
        text: &str,
    ) -> Result<InsertionOutcome> {
        let number = markers.allocate();
        let mut runs = vec![self.user_run(text)];
        runs.extend(self.marker_runs(ctx, &compact_marker(&ctx.initials, number)));
        let count = runs.len();

        let mut w = doc.writable();
        let delta = self.toggle_cell(&mut w, &at)?;
        let paragraph = w.paragraph_mut(&at)?;
        if run >= paragraph.runs.len() {
            return Err(EngineError::InvalidPosition(at.position(0)));
        }
        let removed: Vec<Run> = paragraph.runs.splice(run..=run, runs).collect();
        let caret_offset: usize = paragraph.runs[..run + count].iter().map(Run::char_len).sum();
        drop(w);

        let mut outcome = InsertionOutcome::new(ActionType::InlineEntry, at.position(caret_offset));
        outcome.inserted_text = text.to_string();
        outcome.removed_text = removed.into_iter().map(|r| r.text).collect();
        outcome.marker = Some(number);
        outcome.empty_cell_delta = delta;
        Ok(outcome)
    }

    fn toggle_cell(&self, doc: &mut FormDocument, at: &ParagraphRef) -> Result<i32> {
        match at.cell() {
            Some(cell) => Ok(toggle_shading_to_filled(doc.cell_mut(&cell)?, &self.palette)),
            None => Ok(0),
        }
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// First placeholder run of a placeholder-state cell.
    fn placeholder_in_cell(&self, doc: &FormDocument, at: &ParagraphRef) -> Option<(ParagraphRef, usize)> {
        let cell_ref = at.cell()?;
        let cell = doc.cell(&cell_ref).found()?;
        if analyze_cell(cell, &self.palette) != CellState::Placeholder {
            return None;
        }
        cell.paragraphs.iter().enumerate().find_map(|(p, para)| {
            para.runs
                .iter()
                .position(|r| is_placeholder(&r.text))
                .map(|r| (cell_ref.paragraph(p), r))
        })
    }

    /// Placeholder run touching `offset`, if any.
    fn placeholder_at(&self, doc: &FormDocument, at: &ParagraphRef, offset: usize) -> Option<usize> {
        let paragraph = doc.paragraph(at).found()?;
        [Some(offset), offset.checked_sub(1)]
            .into_iter()
            .flatten()
            .filter_map(|k| paragraph.run_at(k).found())
            .find(|s| s.run.kind() == ContentType::Document && is_placeholder(&s.run.text))
            .map(|s| s.index)
    }

    // ------------------------------------------------------------------------
    // Run builders
    // ------------------------------------------------------------------------

    fn user_run(&self, text: &str) -> Run {
        Run::classified(text, self.fonts.user_font(), &self.fonts)
    }

    fn signature_run(&self, text: &str) -> Run {
        Run::classified(text, self.fonts.signature_font(), &self.fonts)
    }

    fn system_run(&self, text: &str) -> Run {
        Run::classified(text, self.fonts.marker.as_str(), &self.fonts)
    }

    fn initials_run(&self, text: &str) -> Run {
        Run::classified(text, self.fonts.initials.as_str(), &self.fonts)
    }

    fn clock_run(&self) -> Run {
        Run::classified(CLOCK_GLYPH.to_string(), self.fonts.clock.as_str(), &self.fonts)
    }

    /// The marker, then the clock glyph on late entries.
    fn marker_runs(&self, ctx: &EntryContext, marker: &str) -> Vec<Run> {
        let mut runs = vec![self.system_run(marker)];
        if ctx.late_entry {
            runs.push(self.clock_run());
        }
        runs
    }
}

impl Default for InsertionEngine {
    fn default() -> Self {
        Self::new(FontScheme::default(), ShadingPalette::default(), BoundaryPolicy::default())
    }
}

/// Run `op` on `doc`, putting the document back if it fails part way.
fn transact<T>(doc: &mut FormDocument, op: impl FnOnce(&mut FormDocument) -> Result<T>) -> Result<T> {
    let backup = doc.clone();
    let result = op(doc);
    if result.is_err() {
        *doc = backup;
    }
    result
}

fn single_line(text: &str) -> String {
    text.lines().map(str::trim_end).collect::<Vec<_>>().join(" ")
}
