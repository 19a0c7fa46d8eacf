use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use taxdoc::config::load_config;
use taxdoc::db::document_repo::DocumentFilter;
use taxdoc::logging::{init_logging, LogFormat};
use taxdoc::{DocumentManager, DocumentStatus, DocumentType, SubmitRequest};

/// Tax form document processing: OCR, AI field extraction and advice.
#[derive(Parser, Debug)]
#[command(name = "taxdoc", version, about)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, env = "TAXDOC_CONFIG", default_value = "taxdoc.json")]
    config: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Owner recorded on submitted documents.
    #[arg(long, env = "TAXDOC_OWNER")]
    owner: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a document and start processing it.
    Submit {
        file: PathBuf,
        /// W-2, 1099, 1040 or Other.
        #[arg(long = "type", default_value = "Other")]
        document_type: String,
        #[arg(long)]
        instruction: Option<String>,
        /// Print the document after processing instead of the submitted snapshot.
        #[arg(long)]
        wait: bool,
    },
    /// Show a document.
    Status { id: String },
    /// Run processing again, optionally with a new instruction.
    Reprocess {
        id: String,
        #[arg(long)]
        instruction: Option<String>,
        #[arg(long)]
        wait: bool,
    },
    /// Correct one extracted field.
    Edit {
        id: String,
        field: String,
        value: String,
    },
    /// Store a custom instruction without reprocessing.
    Instruction { id: String, instruction: String },
    /// List the owner's documents, newest first.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        document_type: Option<DocumentType>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Delete a document and its stored file.
    Purge { id: String },
    /// Generate advice from a JSON file of structured data.
    Advice {
        file: PathBuf,
        #[arg(long)]
        instruction: Option<String>,
    },
    /// Restart documents stuck in processing.
    Recover,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListOutput {
    total: u64,
    documents: Vec<taxdoc::Document>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_owner(owner: Option<&str>) -> Result<&str> {
    owner.context("--owner (or TAXDOC_OWNER) is required for this command")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format).context("failed to initialize logging")?;

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    let manager = DocumentManager::from_config(&config).context("failed to start")?;

    match cli.command {
        Command::Submit {
            file,
            document_type,
            instruction,
            wait,
        } => {
            let owner = require_owner(cli.owner.as_deref())?;
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let original_file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let (document, handle) = manager
                .submit_tracked(SubmitRequest {
                    owner: owner.to_string(),
                    original_file_name,
                    content,
                    document_type,
                    custom_instruction: instruction,
                })
                .await?;

            if wait {
                handle.wait().await;
                print_json(&manager.get_status(&document.id)?)?;
            } else {
                print_json(&document)?;
            }
        }
        Command::Status { id } => print_json(&manager.get_status(&id)?)?,
        Command::Reprocess {
            id,
            instruction,
            wait,
        } => {
            let (document, handle) = manager.reprocess_tracked(&id, instruction)?;
            if wait {
                handle.wait().await;
                print_json(&manager.get_status(&id)?)?;
            } else {
                print_json(&document)?;
            }
        }
        Command::Edit { id, field, value } => {
            print_json(&manager.edit_field(&id, &field, &value)?)?
        }
        Command::Instruction { id, instruction } => {
            print_json(&manager.update_instruction(&id, &instruction)?)?
        }
        Command::List {
            status,
            document_type,
            limit,
            offset,
        } => {
            let owner = require_owner(cli.owner.as_deref())?;
            let status = status
                .map(|s| {
                    DocumentStatus::parse(&s).with_context(|| format!("unknown status '{}'", s))
                })
                .transpose()?;
            let (documents, total) = manager.list(
                owner,
                DocumentFilter {
                    status,
                    document_type,
                    limit: Some(limit),
                    offset: Some(offset),
                    ..Default::default()
                },
            )?;
            print_json(&ListOutput { total, documents })?;
        }
        Command::Purge { id } => {
            manager.purge(&id).await?;
            info!("Purged {}", id);
        }
        Command::Advice { file, instruction } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let data: serde_json::Value =
                serde_json::from_str(&raw).context("advice input is not valid JSON")?;
            let advice = manager.generate_advice(&data, instruction.as_deref()).await?;
            print_json(&advice)?;
        }
        Command::Recover => {
            let restarted = manager.recover_stale()?;
            print_json(&restarted)?;
        }
    }

    // Background passes die with the runtime; let them finish first.
    manager.wait_idle().await;

    Ok(())
}
