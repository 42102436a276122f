//! Credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.

use crate::constants::{AWS_ACCESS_KEY_ID_ENV, AWS_SECRET_ACCESS_KEY_ENV, AWS_SESSION_TOKEN_ENV};
use crate::credentials::Credentials;
use crate::env::Env;
use crate::error::CredentialsError;

const PROVIDER: &str = "environment";

/// Reads static credentials from the environment.
///
/// # Errors
///
/// Returns [`CredentialsError::NotConfigured`] if the access key id or the secret access
/// key is unset or empty, and [`CredentialsError::Environment`] if a variable cannot
/// be read.
pub fn from_env(env: &dyn Env) -> Result<Credentials, CredentialsError> {
    let access_key_id = env
        .get_non_empty(AWS_ACCESS_KEY_ID_ENV)?
        .ok_or_else(|| missing(AWS_ACCESS_KEY_ID_ENV))?;
    let secret_access_key = env
        .get_non_empty(AWS_SECRET_ACCESS_KEY_ENV)?
        .ok_or_else(|| missing(AWS_SECRET_ACCESS_KEY_ENV))?;
    let session_token = env.get_non_empty(AWS_SESSION_TOKEN_ENV)?;

    Ok(Credentials::new(access_key_id, secret_access_key, session_token))
}

fn missing(key: &str) -> CredentialsError {
    CredentialsError::NotConfigured {
        provider: PROVIDER,
        reason: format!("{key} is not set"),
    }
}
