//! Identity and attestation token providers.
//!
//! Tokens are fetched once per connection attempt. A provider failure never
//! blocks connecting; the corresponding header is simply omitted.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Token provider failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No token could be obtained right now
    #[error("token unavailable: {0}")]
    Unavailable(String),

    /// The token service refused to issue a token
    #[error("token rejected: {0}")]
    Rejected(String),
}

/// Supplies the signed-in user's identity token
#[async_trait]
pub trait IdentityTokenProvider: Send + Sync {
    /// Current token, or `None` when no user is signed in
    async fn identity_token(&self, force_refresh: bool) -> Result<Option<String>, TokenError>;
}

/// Supplies app attestation tokens
#[async_trait]
pub trait AttestationTokenProvider: Send + Sync {
    /// Attestation token; `limited_use` requests a single-use token
    async fn attestation_token(&self, limited_use: bool) -> Result<String, TokenError>;
}

/// Optional providers consulted when building a connection request
#[derive(Clone, Default)]
pub struct TokenProviders {
    /// Identity token source; adds an `Authorization` header
    pub identity: Option<Arc<dyn IdentityTokenProvider>>,
    /// Attestation token source; adds an `X-Firebase-AppCheck` header
    pub attestation: Option<Arc<dyn AttestationTokenProvider>>,
}

impl fmt::Debug for TokenProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProviders")
            .field("identity", &self.identity.is_some())
            .field("attestation", &self.attestation.is_some())
            .finish()
    }
}

/// Fixed token, or fixed failure, for both provider kinds
#[derive(Clone)]
pub struct StaticToken {
    token: Result<String, TokenError>,
}

impl StaticToken {
    /// Always return `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Ok(token.into()),
        }
    }

    /// Always fail with `error`
    pub fn failing(error: TokenError) -> Self {
        Self { token: Err(error) }
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Ok(_) => f.write_str("StaticToken(<redacted>)"),
            Err(e) => write!(f, "StaticToken(failing: {})", e),
        }
    }
}

#[async_trait]
impl IdentityTokenProvider for StaticToken {
    async fn identity_token(&self, _force_refresh: bool) -> Result<Option<String>, TokenError> {
        self.token.clone().map(Some)
    }
}

#[async_trait]
impl AttestationTokenProvider for StaticToken {
    async fn attestation_token(&self, _limited_use: bool) -> Result<String, TokenError> {
        self.token.clone()
    }
}
