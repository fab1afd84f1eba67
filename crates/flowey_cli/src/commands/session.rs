//! Session command implementations.

use super::DataDir;
use flowey_sync_server::{Authenticator, Credentials, SessionToken};
use std::io::BufRead;

/// Reads a password from `input` and issues a session token for `username`.
pub fn create(
    data_dir: &DataDir,
    username: &str,
    input: &mut impl BufRead,
) -> Result<SessionToken, Box<dyn std::error::Error>> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);

    let authenticator = data_dir.authenticator()?;
    let token = authenticator.create_session(&Credentials::new(username, password))?;
    Ok(token)
}

/// Revokes a session token. Unknown tokens are ignored.
pub fn delete(data_dir: &DataDir, token: &str) -> Result<(), Box<dyn std::error::Error>> {
    let authenticator = data_dir.authenticator()?;
    authenticator.delete_session(token)?;
    Ok(())
}
