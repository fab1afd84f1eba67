//! User command implementations.

use super::DataDir;
use flowey_sync_server::SessionAuthenticator;
use std::io::{self, BufRead, Write};
use tracing::info;

/// Adds an account with a generated password and prints the credentials.
pub fn add(
    data_dir: &DataDir,
    username: &str,
    length: usize,
    skip_confirmation: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !skip_confirmation && !confirm(&mut io::stdin().lock(), &mut io::stdout())? {
        println!("aborted");
        return Ok(());
    }

    let password = register(data_dir, username, length)?;
    println!("username: {}", username);
    println!("password: {}", password);
    Ok(())
}

/// Registers `username` and returns its generated password.
fn register(
    data_dir: &DataDir,
    username: &str,
    length: usize,
) -> Result<String, Box<dyn std::error::Error>> {
    if length == 0 {
        return Err("Password length must be at least 1".into());
    }
    data_dir.create()?;
    let authenticator = data_dir.authenticator()?;
    let password = SessionAuthenticator::generate_password(length);
    let user = authenticator.register_account(username, &password)?;
    info!(user = %user, username, "added user");
    Ok(password)
}

fn confirm(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(output, "Are you sure? (y/n) ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}
