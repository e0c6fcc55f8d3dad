//! kiroku command-line tool.
//!
//! Usage:
//!   kiroku classify form.json
//!   kiroku resolve form.json --at "1;0;1;0;0"
//!   kiroku validate form.json --at "0;21"
//!   kiroku --initials JD insert form.json inline --at "0;21" "12.5 g"
//!
//! Inserts keep their audit log next to the snapshot (`form.audit.json`)
//! unless `--log` says otherwise.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use kiroku_client::ClientConfig;
use kiroku_doc::InsertRequest;
use kiroku_types::{DocumentPosition, Selection, Stage};

use kiroku_cli::{
    DocumentPaths, classify_report, load_document, parse_stage, resolve_report, run_insert,
    validate_report,
};

/// Inspect and fill kiroku form documents.
#[derive(Parser, Debug)]
#[command(name = "kiroku")]
#[command(about = "Inspect and fill kiroku form documents")]
struct Args {
    /// Client configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Initials for entries, overriding the configuration
    #[arg(long, global = true)]
    initials: Option<String>,

    /// Legal name for signatures, overriding the configuration
    #[arg(long, global = true)]
    legal_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the content type of every run and the state of every cell
    Classify { snapshot: PathBuf },

    /// Show where an entry made at the selection would land
    Resolve {
        snapshot: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Check whether inline content may go at a cursor position
    Validate {
        snapshot: PathBuf,
        #[arg(long, value_parser = DocumentPosition::parse)]
        at: DocumentPosition,
    },

    /// Insert content and record it in the audit log
    Insert {
        snapshot: PathBuf,

        /// Audit log file
        #[arg(long)]
        log: Option<PathBuf>,

        /// Write the new content here instead of over the snapshot
        #[arg(long)]
        out: Option<PathBuf>,

        /// Stage for a document without an audit log yet
        #[arg(long, default_value = "execute", value_parser = parse_stage)]
        stage: Stage,

        /// Record as a late entry made at this time (Unix millis)
        #[arg(long)]
        late_at: Option<u64>,

        #[command(subcommand)]
        entry: Entry,
    },
}

#[derive(ClapArgs, Debug)]
struct SelectionArgs {
    /// Active end of the selection, e.g. "3;0;1;0;12"
    #[arg(long, value_parser = DocumentPosition::parse)]
    at: DocumentPosition,

    /// Anchor end; a caret at --at when omitted
    #[arg(long, value_parser = DocumentPosition::parse)]
    anchor: Option<DocumentPosition>,
}

impl SelectionArgs {
    fn selection(&self) -> Selection {
        match &self.anchor {
            Some(anchor) => Selection::new(anchor.clone(), self.at.clone()),
            None => Selection::caret(self.at.clone()),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Entry {
    /// Free text closed by an initials/date line
    Text {
        #[command(flatten)]
        selection: SelectionArgs,
        text: String,
    },
    /// Inline text with a compact marker
    Inline {
        #[arg(long, value_parser = DocumentPosition::parse)]
        at: DocumentPosition,
        text: String,
    },
    /// Legal-name signature
    Signature {
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long)]
        reason: String,
        /// Sign at the cursor instead of as a block
        #[arg(long)]
        inline: bool,
    },
    /// Strike the selection and bracket a replacement beside it
    Correction {
        #[command(flatten)]
        selection: SelectionArgs,
        replacement: String,
    },
    /// Tick the first unchecked box in the selection
    Checkbox {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Link an attachment
    Attachment {
        #[command(flatten)]
        selection: SelectionArgs,
        name: String,
        url: String,
    },
}

impl Entry {
    fn into_request(self) -> InsertRequest {
        match self {
            Entry::Text { selection, text } => InsertRequest::Text {
                selection: selection.selection(),
                text,
            },
            Entry::Inline { at, text } => InsertRequest::Inline { position: at, text },
            Entry::Signature {
                selection,
                reason,
                inline,
            } => InsertRequest::Signature {
                selection: selection.selection(),
                reason,
                inline,
            },
            Entry::Correction {
                selection,
                replacement,
            } => InsertRequest::Correction {
                selection: selection.selection(),
                replacement,
            },
            Entry::Checkbox { selection } => InsertRequest::Checkbox {
                selection: selection.selection(),
            },
            Entry::Attachment {
                selection,
                name,
                url,
            } => InsertRequest::Attachment {
                selection: selection.selection(),
                name,
                url,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _otel_guard = kiroku_telemetry::init_tracing("kiroku");
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(initials) = args.initials {
        config.identity.initials = initials;
    }
    if let Some(name) = args.legal_name {
        config.identity.legal_name = name;
    }

    match args.command {
        Command::Classify { snapshot } => {
            let doc = load_document(&snapshot, &config.fonts)?;
            for line in classify_report(&doc, &config.palette) {
                println!("{line}");
            }
        }
        Command::Resolve {
            snapshot,
            selection,
        } => {
            let doc = load_document(&snapshot, &config.fonts)?;
            println!("{}", resolve_report(&doc, &selection.selection())?);
        }
        Command::Validate { snapshot, at } => {
            let doc = load_document(&snapshot, &config.fonts)?;
            println!(
                "{}",
                validate_report(&doc, &at, &config.fonts, config.boundary_policy)?
            );
        }
        Command::Insert {
            snapshot,
            log,
            out,
            stage,
            late_at,
            entry,
        } => {
            let paths = DocumentPaths::new(snapshot, log, out);
            let outcome =
                run_insert(&paths, config, entry.into_request(), late_at, stage).await?;
            println!("{} at {}", outcome.action, outcome.caret);
            if let Some(marker) = outcome.marker {
                println!("marker {marker}");
            }
            if !outcome.removed_text.is_empty() {
                println!("removed {:?}", outcome.removed_text);
            }
            if outcome.empty_cell_delta != 0 {
                println!("empty cells {:+}", outcome.empty_cell_delta);
            }
        }
    }
    Ok(())
}
