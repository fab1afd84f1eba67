//! Session authentication for the sync server.
//!
//! Accounts are created out of band (see the `flowey user add` command) and
//! exchange their credentials for an opaque session token, which websocket
//! clients present during the handshake.
//!
//! ## Password Format
//!
//! Passwords are stretched with iterated HMAC-SHA256 keyed by a 16-byte random
//! salt:
//! - round 1: `HMAC(salt, password)`
//! - round n: `HMAC(salt, round n-1)`
//!
//! Salt and final digest are stored standard-base64 encoded.
//!
//! ## Token Format
//!
//! 40 random bytes, URL-safe base64 without padding.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use flowey_protocol::UserId;
use flowey_store::{AccountStore, StoreError};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 16;

/// Login credentials.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Plain-text password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An opaque bearer token bound to one user.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Resolves session tokens to users and manages sessions.
pub trait Authenticator: Send + Sync {
    /// Resolves a session token.
    ///
    /// Returns [`ServerError::Unauthorized`] for unknown tokens.
    fn authenticate(&self, token: &str) -> ServerResult<UserId>;

    /// Verifies credentials and issues a new session token.
    fn create_session(&self, credentials: &Credentials) -> ServerResult<SessionToken>;

    /// Revokes a session token. Unknown tokens are not an error.
    fn delete_session(&self, token: &str) -> ServerResult<()>;
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC rounds used to stretch passwords.
    pub hash_rounds: u32,
    /// Random bytes per session token.
    pub token_bytes: usize,
}

impl AuthConfig {
    /// Sets the number of hashing rounds.
    pub fn with_hash_rounds(mut self, rounds: u32) -> Self {
        self.hash_rounds = rounds.max(1);
        self
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hash_rounds: 10_000,
            token_bytes: 40,
        }
    }
}

/// Account-store backed authenticator.
#[derive(Clone)]
pub struct SessionAuthenticator {
    accounts: Arc<AccountStore>,
    config: AuthConfig,
}

impl SessionAuthenticator {
    /// Creates a new authenticator.
    pub fn new(accounts: Arc<AccountStore>) -> Self {
        Self::with_config(accounts, AuthConfig::default())
    }

    /// Creates an authenticator with custom parameters.
    pub fn with_config(accounts: Arc<AccountStore>, config: AuthConfig) -> Self {
        Self { accounts, config }
    }

    /// Returns the underlying account store.
    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    /// Registers an account with the given password.
    pub fn register_account(&self, username: &str, password: &str) -> ServerResult<UserId> {
        if username.trim().is_empty() {
            return Err(ServerError::MalformedInput("empty username".into()));
        }
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let digest = self.stretch(&salt, password)?;

        let user = self
            .accounts
            .add_account(username, STANDARD.encode(salt), STANDARD.encode(digest))?;
        info!(user = %user, username, "registered account");
        Ok(user)
    }

    /// Generates a random password from `len` random bytes.
    pub fn generate_password(len: usize) -> String {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }

    fn new_mac(salt: &[u8]) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(salt).map_err(|e| ServerError::Internal(e.to_string()))
    }

    /// Runs `rounds` chained HMAC rounds.
    fn rounds(&self, salt: &[u8], password: &str, rounds: u32) -> ServerResult<Vec<u8>> {
        let mut mac = Self::new_mac(salt)?;
        mac.update(password.as_bytes());
        let mut digest = mac.finalize().into_bytes().to_vec();
        for _ in 1..rounds {
            let mut mac = Self::new_mac(salt)?;
            mac.update(&digest);
            digest = mac.finalize().into_bytes().to_vec();
        }
        Ok(digest)
    }

    fn stretch(&self, salt: &[u8], password: &str) -> ServerResult<Vec<u8>> {
        self.rounds(salt, password, self.config.hash_rounds)
    }

    fn verify_password(&self, salt: &[u8], password: &str, expected: &[u8]) -> ServerResult<bool> {
        // Recompute all rounds but the last, then let the MAC do the
        // constant-time comparison against the stored digest.
        let rounds = self.config.hash_rounds.max(1);
        let mut mac = Self::new_mac(salt)?;
        if rounds == 1 {
            mac.update(password.as_bytes());
        } else {
            let penultimate = self.rounds(salt, password, rounds - 1)?;
            mac.update(&penultimate);
        }
        Ok(mac.verify_slice(expected).is_ok())
    }

    fn new_token(&self) -> SessionToken {
        let mut bytes = vec![0u8; self.config.token_bytes];
        OsRng.fill_bytes(&mut bytes);
        SessionToken(URL_SAFE_NO_PAD.encode(bytes))
    }
}

fn unauthorized() -> ServerError {
    ServerError::Unauthorized("invalid credentials".into())
}

impl Authenticator for SessionAuthenticator {
    fn authenticate(&self, token: &str) -> ServerResult<UserId> {
        self.accounts
            .session_user(token)?
            .ok_or_else(|| ServerError::Unauthorized("unknown session token".into()))
    }

    fn create_session(&self, credentials: &Credentials) -> ServerResult<SessionToken> {
        let account = self
            .accounts
            .find_account(&credentials.username)?
            .ok_or_else(unauthorized)?;

        let decode = |field: &str| {
            STANDARD
                .decode(field)
                .map_err(|e| StoreError::Corrupted(format!("account {}: {}", account.username, e)))
        };
        let salt = decode(&account.salt)?;
        let digest = decode(&account.password_hash)?;

        if !self.verify_password(&salt, &credentials.password, &digest)? {
            debug!(username = %credentials.username, "rejected credentials");
            return Err(unauthorized());
        }

        let token = self.new_token();
        self.accounts.insert_session(token.as_str(), account.user_id)?;
        info!(user = %account.user_id, "created session");
        Ok(token)
    }

    fn delete_session(&self, token: &str) -> ServerResult<()> {
        if self.accounts.remove_session(token)? {
            info!("deleted session");
        }
        Ok(())
    }
}
