use anyhow::{Result, bail};
use rpassword::read_password;
use std::io::{self, Write};

use stash_core::RecordStore;

/// The named user does not exist or the password did not match.
#[derive(Debug, thiserror::Error)]
#[error("authentication failed for user '{0}'")]
pub struct AuthFailed(pub String);

/// Prompt for a password without echoing it.
///
/// For non-interactive use, pass `--password` or set `STASH_PASSWORD`.
pub fn prompt_password(prompt: &str) -> Result<String> {
    eprint!("{prompt}: ");
    io::stderr().flush()?;

    let password = read_password()?;

    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    Ok(password)
}

/// `--password` / `STASH_PASSWORD` if given, otherwise an interactive prompt.
pub fn resolve_password(given: Option<&str>, prompt: &str) -> Result<String> {
    match given {
        Some(password) => Ok(password.to_string()),
        None => prompt_password(prompt),
    }
}

pub async fn authenticate(store: &RecordStore, username: &str, given: Option<&str>) -> Result<()> {
    let password = resolve_password(given, &format!("Password for {username}"))?;
    if store.check_password(username, &password).await {
        Ok(())
    } else {
        Err(AuthFailed(username.to_string()).into())
    }
}
