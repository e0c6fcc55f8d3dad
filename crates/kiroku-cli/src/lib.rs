//! Library side of the `kiroku` binary.
//!
//! Each subcommand is a plain function over a loaded document so it can be
//! tested without spawning the binary. Inserts run through a full
//! [`EditSession`](kiroku_client::EditSession) against an in-process audit
//! store seeded from the local log file, so they follow the same
//! lock/append protocol as a networked client.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiroku_client::{ClientConfig, MemoryAuditStore, open_memory_session};
use kiroku_doc::{
    Block, BoundaryPolicy, DocumentSnapshot, FontScheme, FormDocument, InsertRequest,
    InsertionOutcome, Paragraph, ShadingPalette, analyze_cell, classify_paragraph_end,
    count_empty_cells, resolve_insertion_point, validate_cursor_position,
};
use kiroku_types::{AuditLogItem, DocumentPosition, Selection, Stage};
use tracing::info;

pub fn parse_stage(s: &str) -> std::result::Result<Stage, String> {
    Stage::from_str(s).ok_or_else(|| format!("unknown stage '{s}'"))
}

pub fn load_document(path: &Path, fonts: &FontScheme) -> Result<FormDocument> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    FormDocument::load(&DocumentSnapshot::new(raw), fonts)
        .with_context(|| format!("loading snapshot {}", path.display()))
}

// ============================================================================
// Read-only reports
// ============================================================================

fn paragraph_lines(out: &mut Vec<String>, prefix: &str, paragraph: &Paragraph) {
    out.push(format!(
        "{prefix}: paragraph ends {}",
        classify_paragraph_end(paragraph)
    ));
    for span in paragraph.spans() {
        out.push(format!(
            "  {}..{} {} {:?}",
            span.start,
            span.end,
            span.run.kind(),
            span.run.text
        ));
    }
}

/// Content type of every run and state of every cell, one line each.
pub fn classify_report(doc: &FormDocument, palette: &ShadingPalette) -> Vec<String> {
    let mut out = Vec::new();
    for (b, block) in doc.blocks().iter().enumerate() {
        match block {
            Block::Paragraph(p) => paragraph_lines(&mut out, &b.to_string(), p),
            Block::Table(table) => {
                for (r, row) in table.rows.iter().enumerate() {
                    for (c, cell) in row.cells.iter().enumerate() {
                        out.push(format!(
                            "{b};{r};{c}: cell {} (shading {})",
                            analyze_cell(cell, palette),
                            cell.shading
                        ));
                        for (p, paragraph) in cell.paragraphs.iter().enumerate() {
                            paragraph_lines(&mut out, &format!("{b};{r};{c};{p}"), paragraph);
                        }
                    }
                }
            }
        }
    }
    out.push(format!(
        "{} empty cells, {} pages",
        count_empty_cells(doc, palette),
        doc.page_count()
    ));
    out
}

pub fn resolve_report(doc: &FormDocument, selection: &Selection) -> Result<String> {
    let point = resolve_insertion_point(doc, selection)?;
    Ok(format!("{} ({:?})", point.position(), point.mode))
}

pub fn validate_report(
    doc: &FormDocument,
    position: &DocumentPosition,
    fonts: &FontScheme,
    policy: BoundaryPolicy,
) -> Result<String> {
    let verdict = validate_cursor_position(doc, position, fonts, policy)?;
    Ok(format!("{position}: {verdict:?}"))
}

// ============================================================================
// Insert
// ============================================================================

/// Files an insert reads and writes.
#[derive(Debug, Clone)]
pub struct DocumentPaths {
    pub snapshot: PathBuf,
    pub log: PathBuf,
    /// Where to write the new content; the snapshot itself when unset.
    pub out: Option<PathBuf>,
}

impl DocumentPaths {
    pub fn new(snapshot: PathBuf, log: Option<PathBuf>, out: Option<PathBuf>) -> Self {
        let log = log.unwrap_or_else(|| snapshot.with_extension("audit.json"));
        Self { snapshot, log, out }
    }
}

fn read_log(path: &Path) -> Result<Option<Vec<AuditLogItem>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading audit log {}", path.display()))?;
    let log = serde_json::from_str(&raw)
        .with_context(|| format!("parsing audit log {}", path.display()))?;
    Ok(Some(log))
}

/// Apply one insertion and persist the content and the audit log.
///
/// A snapshot without a log is registered fresh in `stage`.
pub async fn run_insert(
    paths: &DocumentPaths,
    config: ClientConfig,
    request: InsertRequest,
    late_at: Option<u64>,
    stage: Stage,
) -> Result<InsertionOutcome> {
    let raw = fs::read_to_string(&paths.snapshot)
        .with_context(|| format!("reading snapshot {}", paths.snapshot.display()))?;
    let snapshot = DocumentSnapshot::new(raw);

    let store = MemoryAuditStore::new();
    let id = match read_log(&paths.log)? {
        Some(log) => store
            .restore(snapshot, log)
            .context("audit log has no items")?,
        None => {
            let doc = FormDocument::load(&snapshot, &config.fonts)?;
            let empty_cells = count_empty_cells(&doc, &config.palette);
            store.register(snapshot, empty_cells, stage)
        }
    };

    let mut session = open_memory_session(&store, id, config).await?;
    let outcome = match late_at {
        Some(at) => session.commit_late(request, at).await?,
        None => session.commit(request).await?,
    };

    let content = store
        .content(id)
        .context("document missing from the audit store")?;
    let out = paths.out.as_ref().unwrap_or(&paths.snapshot);
    fs::write(out, content.as_str()).with_context(|| format!("writing {}", out.display()))?;
    let log = store.log(id);
    fs::write(&paths.log, serde_json::to_string_pretty(&log)?)
        .with_context(|| format!("writing audit log {}", paths.log.display()))?;
    info!("Wrote {} ({} audit items)", out.display(), log.len());
    Ok(outcome)
}
