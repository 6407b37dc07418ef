//! Bearer-token sources for the connection handshake.
//!
//! Token acquisition and storage live outside this crate; a session only asks
//! a [`CredentialStore`] for the current token at connect time. `None` is a
//! valid answer: the session logs a warning and connects unauthenticated.

use crate::constants::TOKEN_ENV_VAR;

/// Supplies the bearer token attached to the handshake.
pub trait CredentialStore {
    fn auth_token(&self) -> Option<String>;
}

/// Always unauthenticated.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCredentials;

impl CredentialStore for NoCredentials {
    fn auth_token(&self) -> Option<String> {
        None
    }
}

/// A fixed token, e.g. from a CLI flag.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl CredentialStore for StaticToken {
    fn auth_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the token from an environment variable on every connect, so a
/// refreshed token is picked up by the next reconnect-from-idle.
#[derive(Clone, Debug)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

impl CredentialStore for EnvToken {
    fn auth_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

impl<F> CredentialStore for F
where
    F: Fn() -> Option<String>,
{
    fn auth_token(&self) -> Option<String> {
        self()
    }
}
