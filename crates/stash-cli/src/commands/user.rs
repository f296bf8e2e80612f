//! User commands - manage the accounts allowed to upload files.
//!
//! The global `--password` (or `STASH_PASSWORD`) supplies the password of
//! the user named on the command line; without it the password is prompted.
//!
//! # Examples
//!
//! ```bash
//! stash user add alice
//! STASH_PASSWORD=hunter22 stash user passwd alice
//! stash user list --json
//! ```

use anyhow::Result;
use clap::{Args as ClapArgs, Subcommand};
use tracing::instrument;

use crate::app::App;
use crate::auth;
use crate::output::create_table;

#[derive(ClapArgs, Clone)]
pub struct Args {
    #[command(subcommand)]
    pub command: UserCommand,
}

#[derive(Subcommand, Clone)]
pub enum UserCommand {
    /// Create a user
    Add {
        username: String,
    },
    /// Delete a user (the last remaining user cannot be removed)
    Remove {
        username: String,
    },
    /// Change a user's password
    Passwd {
        username: String,
    },
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify a user's password
    Check {
        username: String,
    },
}

#[instrument(level = "info", name = "cmd::user", skip_all)]
pub async fn execute(app: &App, args: &Args, password: Option<&str>, quiet: bool) -> Result<()> {
    let store = &app.store;
    match &args.command {
        UserCommand::Add { username } => {
            let password = auth::resolve_password(password, &format!("New password for {username}"))?;
            store.add_user(username, &password).await?;
            if !quiet {
                println!("Added user {username}");
            }
        }
        UserCommand::Remove { username } => {
            store.remove_user(username).await?;
            if !quiet {
                println!("Removed user {username}");
            }
        }
        UserCommand::Passwd { username } => {
            let password = auth::resolve_password(password, &format!("New password for {username}"))?;
            store.update_user_password(username, &password).await?;
            if !quiet {
                println!("Password updated for {username}");
            }
        }
        UserCommand::List { json } => {
            let users = store.list_users().await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if users.is_empty() {
                if !quiet {
                    println!("No users");
                }
            } else {
                let mut table = create_table();
                table.set_header(vec!["Username"]);
                for user in &users {
                    table.add_row(vec![user]);
                }
                println!("{table}");
            }
        }
        UserCommand::Check { username } => {
            auth::authenticate(store, username, password).await?;
            if !quiet {
                println!("Password accepted for {username}");
            }
        }
    }
    Ok(())
}
