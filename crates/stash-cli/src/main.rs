#![deny(unsafe_code)]

mod app;
mod auth;
mod commands;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stash_core::{ConfigError, ServiceError, StashConfig, StorageError, StoreError};

use crate::app::App;
use crate::auth::AuthFailed;
use crate::commands::{file, init, user};

/// Metadata-indexed file store
#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Write a default configuration
    stash --config stash.toml init

    # Create the first user
    stash user add alice

    # Upload and download
    stash file put docs/readme.txt --user alice --file README.txt --content-type text/plain
    stash file get docs/readme.txt

    # Non-interactive password
    STASH_PASSWORD=... stash file put notes.txt --user alice < notes.txt
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file
    #[arg(
        short,
        long,
        env = "STASH_CONFIG",
        default_value = "stash.toml",
        global = true
    )]
    config: PathBuf,

    /// Password for the user named by the command (insecure, prefer STASH_PASSWORD or the prompt)
    #[arg(long, env = "STASH_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with default settings
    Init(init::Args),

    /// Manage users
    User(user::Args),

    /// Upload, download and delete files
    File(file::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let quiet = cli.quiet;

    match run(&cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            if !quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    if let Commands::Init(args) = &cli.command {
        return init::execute(&cli.config, args, cli.quiet);
    }

    let config = StashConfig::load(Some(&cli.config))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let app = App::open(&config).await?;
        let password = cli.password.as_deref();

        let result = match app.admit() {
            Ok(_ticket) => match &cli.command {
                Commands::User(args) => user::execute(&app, args, password, cli.quiet).await,
                Commands::File(args) => file::execute(&app, args, password, cli.quiet).await,
                Commands::Init(_) => Ok(()),
            },
            Err(e) => Err(e),
        };

        app.close().await;
        result
    })
}

fn setup_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map an error to an exit code by walking its cause chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<AuthFailed>().is_some() {
            return exit_code::AUTH_FAILED;
        }

        if let Some(store_err) = cause.downcast_ref::<StoreError>() {
            return store_error_code(store_err);
        }

        // ServiceError is transparent, so its inner error is not a separate link.
        if let Some(service_err) = cause.downcast_ref::<ServiceError>() {
            match service_err {
                ServiceError::Store(store_err) => return store_error_code(store_err),
                ServiceError::Storage(storage_err) => {
                    if let Some(code) = storage_error_code(storage_err) {
                        return code;
                    }
                }
            }
        }

        if let Some(storage_err) = cause.downcast_ref::<StorageError>()
            && let Some(code) = storage_error_code(storage_err)
        {
            return code;
        }

        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::CONFIG_INVALID;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && let Some(code) = io_error_code(io_err)
        {
            return code;
        }
    }

    exit_code::GENERAL_ERROR
}

fn store_error_code(e: &StoreError) -> u8 {
    match e {
        StoreError::NotFound { .. } => exit_code::NOT_FOUND,
        StoreError::AlreadyExists(_) | StoreError::LastUserProtected => exit_code::CONFLICT,
        StoreError::Corrupt(_) | StoreError::PersistFailure(_) | StoreError::Unreadable(_) => {
            exit_code::STORE_FAILED
        }
        StoreError::ShuttingDown => exit_code::SHUTTING_DOWN,
        StoreError::PasswordTooShort { .. } | StoreError::Credential(_) => {
            exit_code::GENERAL_ERROR
        }
    }
}

fn storage_error_code(e: &StorageError) -> Option<u8> {
    match e {
        StorageError::NotFound(_) => Some(exit_code::NOT_FOUND),
        StorageError::InvalidPath(_) => Some(exit_code::GENERAL_ERROR),
        StorageError::Io(io_err) => io_error_code(io_err),
    }
}

fn io_error_code(e: &io::Error) -> Option<u8> {
    match e.kind() {
        io::ErrorKind::PermissionDenied => Some(exit_code::PERMISSION_DENIED),
        io::ErrorKind::NotFound => Some(exit_code::NOT_FOUND),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use stash_core::RecordKind;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bundled_quiet_flag() {
        let cli = Cli::try_parse_from(["stash", "-vq", "user", "list"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::try_parse_from(["stash", "user", "list", "--quiet"]).unwrap();
        assert!(cli.quiet);
    }

    #[test]
    fn test_categorize_store_errors() {
        let missing = anyhow::Error::new(StoreError::NotFound {
            kind: RecordKind::File,
            key: "a.txt".into(),
        });
        assert_eq!(categorize_error(&missing), exit_code::NOT_FOUND);

        let last = anyhow::Error::new(StoreError::LastUserProtected).context("remove failed");
        assert_eq!(categorize_error(&last), exit_code::CONFLICT);

        let closing = anyhow::Error::new(StoreError::ShuttingDown);
        assert_eq!(categorize_error(&closing), exit_code::SHUTTING_DOWN);
    }

    #[test]
    fn test_categorize_wrapped_errors() {
        let auth = anyhow::Error::new(AuthFailed("alice".into()));
        assert_eq!(categorize_error(&auth), exit_code::AUTH_FAILED);

        let service = anyhow::Error::new(ServiceError::Storage(StorageError::NotFound(
            "gone.bin".into(),
        )));
        assert_eq!(categorize_error(&service), exit_code::NOT_FOUND);

        let persist = anyhow::Error::new(ServiceError::Store(StoreError::PersistFailure(
            io::Error::other("disk full"),
        )));
        assert_eq!(categorize_error(&persist), exit_code::STORE_FAILED);

        let denied = anyhow::Error::new(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(categorize_error(&denied), exit_code::PERMISSION_DENIED);

        assert_eq!(
            categorize_error(&anyhow::anyhow!("something else")),
            exit_code::GENERAL_ERROR
        );
    }
}
