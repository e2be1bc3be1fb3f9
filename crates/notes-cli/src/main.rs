//! notes: edit a campaign-notes page stored in a JSON file.
//!
//! Runs the same block engine as the editor, against a file-backed store.
//! Each invocation loads the page, applies one operation, waits for every
//! write to land, and prints the resulting outline.

use anyhow::{Context, Result, bail};
use block_sync::{
    BlockBody, BlockId, BlockPatch, EditorConfig, FlushOutcome, PageEditor, SyncStatus,
};
use clap::{Parser, Subcommand};
use notes_cli::{JsonFilePersistence, TraceRenderer, render_outline, resolve_id};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "notes")]
#[command(about = "Edit a block-structured notes page")]
struct Args {
    /// Path to the page file (created on first write)
    #[arg(short, long)]
    file: PathBuf,

    /// Editor configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the page outline
    Show,
    /// Nest a block under its previous sibling
    Indent { id: String },
    /// Move a block up one level, taking its following siblings along
    Outdent { id: String },
    /// Swap a block with its previous sibling
    Up { id: String },
    /// Swap a block with its next sibling
    Down { id: String },
    /// Remove a section, keeping its children in its place
    Unwrap { id: String },
    /// Re-nest sections by level and upgrade legacy headings
    Normalize {
        /// Only normalize below this block
        #[arg(long)]
        scope: Option<String>,
    },
    /// Replace a block's text (a section's title)
    SetText { id: String, text: String },
    /// Add a block
    Add {
        text: String,
        /// Place the new block after this one (default: end of page)
        #[arg(long)]
        after: Option<String>,
        /// Add a section instead of a paragraph
        #[arg(long)]
        section: bool,
        /// Section level (1-3)
        #[arg(long, requires = "section")]
        level: Option<u8>,
    },
    /// Delete a block and everything below it
    Delete { id: String },
}

async fn run(editor: &PageEditor<JsonFilePersistence>, command: Command) -> Result<Option<BlockId>> {
    let blocks = editor.snapshot();
    let resolve = |needle: &str| resolve_id(&blocks, needle);

    let focus = match command {
        Command::Show => None,
        Command::Indent { id } => Some(editor.indent(&resolve(&id)?)),
        Command::Outdent { id } => Some(editor.outdent(&resolve(&id)?)),
        Command::Up { id } => Some(editor.move_up(&resolve(&id)?)),
        Command::Down { id } => Some(editor.move_down(&resolve(&id)?)),
        Command::Unwrap { id } => editor.unwrap_section(&resolve(&id)?),
        Command::Normalize { scope } => {
            let scope = scope.as_deref().map(resolve).transpose()?;
            let plan = editor.normalize_outline(scope.as_ref());
            info!(
                "{} heading(s) upgraded, {} block(s) moved",
                plan.upgrades.len(),
                plan.moves.len()
            );
            scope
        }
        Command::SetText { id, text } => {
            let id = resolve(&id)?;
            let is_section = blocks.iter().any(|b| b.id == id && b.is_section());
            let patch = if is_section {
                BlockPatch::new().with_content("title", json!(text))
            } else {
                BlockPatch::text(text)
            };

            let handle = editor.edit(&id, patch)?;
            editor.save(&id).await;
            match handle.await {
                FlushOutcome::Saved => {}
                FlushOutcome::Vetoed => {
                    bail!("Refusing to save {id}: the new text would erase links or comments")
                }
                FlushOutcome::Failed(e) => bail!("Failed to save {id}: {e}"),
                FlushOutcome::Discarded => bail!("Edit to {id} was discarded"),
            }
            Some(id)
        }
        Command::Add {
            text,
            after,
            section,
            level,
        } => {
            let anchor = after.as_deref().map(resolve).transpose()?;
            let body = if section {
                BlockBody::section(text, level)
            } else {
                BlockBody::paragraph(text)
            };
            let created = editor.insert_after(anchor.as_ref(), body).await?;
            println!("Created {}", created.id);
            Some(created.id)
        }
        Command::Delete { id } => editor.delete_block(&resolve(&id)?),
    };
    Ok(focus)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to warn (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,block_sync=debug,notes_cli=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = EditorConfig::load(&args.config)
        .and_then(EditorConfig::with_env_overrides)
        .context("Failed to load editor configuration")?;
    debug!("Configuration: {:?}", config);

    let api = Arc::new(JsonFilePersistence::new(&args.file));
    let page_id = api
        .page_id()
        .await
        .with_context(|| format!("Failed to open page file {:?}", args.file))?;

    let editor = PageEditor::new(page_id, api, &config).with_renderer(Arc::new(TraceRenderer));
    editor.load().await.context("Failed to load page")?;
    info!("Opened page {} ({} block(s))", editor.page_id(), editor.store().len());

    let focus = run(&editor, args.command).await?;

    if editor.settle().await == SyncStatus::Error {
        bail!("Some changes could not be saved to {:?}", args.file);
    }
    print!("{}", render_outline(&editor.snapshot(), focus.as_ref()));
    Ok(())
}
