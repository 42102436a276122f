//! Web identity federation settings.
//!
//! Exchanging the token for credentials is delegated to a [`WebIdentityProvider`].

use crate::constants::{ROLE_ARN_ENV, ROLE_SESSION_NAME_ENV, WEB_IDENTITY_TOKEN_FILE_ENV};
use crate::credentials::ProviderFuture;
use crate::env::Env;
use crate::error::CredentialsError;
use std::path::{Path, PathBuf};

const PROVIDER: &str = "web identity";

/// Role assumption parameters for web identity federation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebIdentityConfig {
    token_file: PathBuf,
    role_arn: String,
    session_name: Option<String>,
}

impl WebIdentityConfig {
    /// Creates a configuration from its parts.
    pub fn new(
        token_file: impl Into<PathBuf>,
        role_arn: impl Into<String>,
        session_name: Option<String>,
    ) -> Self {
        Self {
            token_file: token_file.into(),
            role_arn: role_arn.into(),
            session_name,
        }
    }

    /// Reads `AWS_WEB_IDENTITY_TOKEN_FILE`, `AWS_ROLE_ARN` and the optional
    /// `AWS_ROLE_SESSION_NAME`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::NotConfigured`] if the token file or role ARN is unset,
    /// and [`CredentialsError::Environment`] if a variable cannot be read.
    pub fn from_env(env: &dyn Env) -> Result<Self, CredentialsError> {
        let token_file = env
            .get_non_empty(WEB_IDENTITY_TOKEN_FILE_ENV)?
            .ok_or_else(|| missing(WEB_IDENTITY_TOKEN_FILE_ENV))?;
        let role_arn = env
            .get_non_empty(ROLE_ARN_ENV)?
            .ok_or_else(|| missing(ROLE_ARN_ENV))?;
        let session_name = env.get_non_empty(ROLE_SESSION_NAME_ENV)?;

        Ok(Self::new(token_file, role_arn, session_name))
    }

    /// Path of the file holding the identity token.
    pub fn token_file(&self) -> &Path {
        &self.token_file
    }

    /// ARN of the role to assume.
    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    /// Session name, if configured.
    pub fn session_name(&self) -> Option<&str> {
        self.session_name.as_deref()
    }
}

fn missing(key: &str) -> CredentialsError {
    CredentialsError::NotConfigured {
        provider: PROVIDER,
        reason: format!("{key} is not set"),
    }
}

/// Exchanges a web identity token for a credentials provider.
pub trait WebIdentityProvider: Send + Sync + std::fmt::Debug {
    /// Assumes the configured role.
    fn assume_role<'a>(&'a self, config: &'a WebIdentityConfig) -> ProviderFuture<'a>;
}
