//! File commands - upload, download, inspect and delete stored files.
//!
//! # Examples
//!
//! ```bash
//! # Upload from a local file (prompts for alice's password)
//! stash file put reports/q3.pdf --user alice --file q3.pdf --content-type application/pdf
//!
//! # Upload from stdin
//! echo "hello" | stash --password "$PW" file put notes/hello.txt --user alice
//!
//! # Download to stdout
//! stash file get reports/q3.pdf > q3.pdf
//!
//! stash file list --json
//! stash file rm reports/q3.pdf
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{Args as ClapArgs, Subcommand};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use stash_core::{FileMetadata, NewFile};

use crate::app::App;
use crate::auth;
use crate::output::{create_table, format_size};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(ClapArgs, Clone)]
pub struct Args {
    #[command(subcommand)]
    pub command: FileCommand,
}

#[derive(Subcommand, Clone)]
pub enum FileCommand {
    /// Upload a file (reads stdin unless --file is given)
    Put {
        /// Storage path, e.g. `reports/q3.pdf`
        path: String,
        /// Uploading user; their password is checked first
        #[arg(short, long)]
        user: String,
        /// Local file to upload
        #[arg(short, long, value_name = "LOCAL")]
        file: Option<PathBuf>,
        /// MIME type recorded with the file
        #[arg(short = 't', long, default_value = DEFAULT_CONTENT_TYPE)]
        content_type: String,
    },
    /// Download a file (writes stdout unless --output is given)
    Get {
        path: String,
        #[arg(short, long, value_name = "LOCAL")]
        output: Option<PathBuf>,
    },
    /// Show a file's metadata
    Info {
        path: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored files
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a file
    Rm {
        path: String,
    },
}

#[instrument(level = "info", name = "cmd::file", skip_all)]
pub async fn execute(app: &App, args: &Args, password: Option<&str>, quiet: bool) -> Result<()> {
    match &args.command {
        FileCommand::Put {
            path,
            user,
            file,
            content_type,
        } => put(app, path, user, file.as_ref(), content_type, password, quiet).await,
        FileCommand::Get { path, output } => get(app, path, output.as_ref(), quiet).await,
        FileCommand::Info { path, json } => {
            let metadata = app.service.metadata(path).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            } else {
                let mut table = create_table();
                table.set_header(vec!["Property", "Value"]);
                table.add_row(vec!["Path", &metadata.path]);
                table.add_row(vec!["Content Type", &metadata.content_type]);
                table.add_row(vec!["Uploader", &metadata.uploader]);
                table.add_row(vec!["Created", &format_created(&metadata)]);
                println!("{table}");
            }
            Ok(())
        }
        FileCommand::List { json } => {
            let files = app.store.list_files().await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else if files.is_empty() {
                if !quiet {
                    println!("No files");
                }
            } else {
                let mut table = create_table();
                table.set_header(vec!["Path", "Content Type", "Uploader", "Created"]);
                for file in &files {
                    table.add_row(vec![
                        file.path.clone(),
                        file.content_type.clone(),
                        file.uploader.clone(),
                        format_created(file),
                    ]);
                }
                println!("{table}");
            }
            Ok(())
        }
        FileCommand::Rm { path } => {
            let pending = app.service.delete(path).await?;
            pending
                .completion()
                .await
                .with_context(|| format!("Failed to schedule removal of {path}"))?;
            if !quiet {
                println!("Removed {path}");
            }
            Ok(())
        }
    }
}

async fn put(
    app: &App,
    path: &str,
    user: &str,
    source: Option<&PathBuf>,
    content_type: &str,
    password: Option<&str>,
    quiet: bool,
) -> Result<()> {
    auth::authenticate(&app.store, user, password).await?;

    let mut reader: Box<dyn AsyncRead + Unpin + Send> = match source {
        Some(local) => Box::new(
            tokio::fs::File::open(local)
                .await
                .with_context(|| format!("Failed to open {}", local.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let metadata = app
        .service
        .upload(NewFile::new(path, content_type, user), &mut *reader)
        .await?;
    debug!(created = %metadata.created_at, "Upload recorded");

    if !quiet {
        println!("Stored {} ({})", metadata.path, metadata.content_type);
    }
    Ok(())
}

async fn get(app: &App, path: &str, output: Option<&PathBuf>, quiet: bool) -> Result<()> {
    // Don't leave an empty output file behind for a missing path.
    app.service.metadata(path).await?;

    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(local) => Box::new(
            tokio::fs::File::create(local)
                .await
                .with_context(|| format!("Failed to create {}", local.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let (_, copied) = app.service.download(path, &mut *writer).await?;
    writer.flush().await?;

    if let Some(local) = output
        && !quiet
    {
        eprintln!("Wrote {} to {}", format_size(copied), local.display());
    }
    Ok(())
}

fn format_created(file: &FileMetadata) -> String {
    file.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
