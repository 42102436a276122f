//! Credentials obtained by running a user-supplied command (`credential_process`).
//!
//! The command must print a JSON document to stdout:
//!
//! ```json
//! {
//!   "Version": 1,
//!   "AccessKeyId": "AKID",
//!   "SecretAccessKey": "secret",
//!   "SessionToken": "token",
//!   "Expiration": "2030-01-01T00:00:00Z"
//! }
//! ```
//!
//! `SessionToken` and `Expiration` are optional. Every failure is reported as
//! [`CredentialsError::ProcessCredential`], which stops the fallback chain: a user who
//! configured a process expects its credentials to be used.

use crate::credentials::{Credentials, CredentialsFuture, ProvideCredentials};
use crate::error::CredentialsError;
use crate::prelude::debug;
use arc_swap::ArcSwapOption;
use serde::Deserialize;
use std::fmt::Debug;
use std::process::Stdio;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::process::Command;
use tokio::sync::Mutex;

const SUPPORTED_VERSION: u32 = 1;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessOutput {
    version: u32,
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(default)]
    expiration: Option<String>,
}

struct Issued {
    credentials: Credentials,
    expires_at: Option<OffsetDateTime>,
}

impl Issued {
    fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// Runs a credential process and re-runs it once the credentials it returned expire.
///
/// Credentials without an `Expiration` are kept for the lifetime of the provider.
pub struct ProcessCredentials {
    command: String,
    issued: ArcSwapOption<Issued>,
    refresh_gate: Mutex<()>,
}

impl Debug for ProcessCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCredentials")
            .field("command", &self.command)
            .field("issued", &self.issued.load().is_some())
            .finish_non_exhaustive()
    }
}

impl ProcessCredentials {
    /// Creates a provider for `command`. The command is not run until credentials are
    /// requested.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            issued: ArcSwapOption::empty(),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Creates a provider and runs the command once, failing if it does not produce
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::ProcessCredential`] if the command fails.
    pub async fn spawn(command: impl Into<String>) -> Result<Self, CredentialsError> {
        let provider = Self::new(command);
        provider.refresh().await?;
        Ok(provider)
    }

    /// Returns the configured command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns cached credentials, re-running the command if they have expired.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::ProcessCredential`] if the command has to run and fails.
    pub async fn credentials(&self) -> Result<Credentials, CredentialsError> {
        if let Some(creds) = self.valid_cached() {
            return Ok(creds);
        }

        let _gate = self.refresh_gate.lock().await;
        if let Some(creds) = self.valid_cached() {
            return Ok(creds);
        }
        self.refresh().await
    }

    fn valid_cached(&self) -> Option<Credentials> {
        let issued = self.issued.load();
        issued
            .as_deref()
            .filter(|i| i.is_valid_at(OffsetDateTime::now_utc()))
            .map(|i| i.credentials.clone())
    }

    async fn refresh(&self) -> Result<Credentials, CredentialsError> {
        let stdout = run(&self.command).await?;
        let issued = parse_output(&stdout)?;
        debug!(
            "Credential process returned credentials: expires_at={:?}",
            issued.expires_at
        );
        let creds = issued.credentials.clone();
        self.issued.store(Some(Arc::new(issued)));
        Ok(creds)
    }
}

impl ProvideCredentials for ProcessCredentials {
    fn provide_credentials(&self) -> CredentialsFuture<'_> {
        Box::pin(self.credentials())
    }
}

fn shell(command: &str) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C");
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c");
        cmd
    };
    cmd.arg(command);
    cmd
}

async fn run(command: &str) -> Result<Vec<u8>, CredentialsError> {
    let output = shell(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CredentialsError::ProcessCredential {
            message: "failed to start credential process".to_string(),
            source: Some(Box::new(e)),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CredentialsError::process(format!(
            "credential process exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

fn parse_output(stdout: &[u8]) -> Result<Issued, CredentialsError> {
    let output: ProcessOutput =
        serde_json::from_slice(stdout).map_err(|e| CredentialsError::ProcessCredential {
            message: "credential process returned invalid JSON".to_string(),
            source: Some(Box::new(e)),
        })?;

    if output.version != SUPPORTED_VERSION {
        return Err(CredentialsError::process(format!(
            "unsupported credential process output version {} (expected {SUPPORTED_VERSION})",
            output.version
        )));
    }

    let expires_at = output
        .expiration
        .as_deref()
        .map(|s| OffsetDateTime::parse(s, &Rfc3339))
        .transpose()
        .map_err(|e| CredentialsError::ProcessCredential {
            message: "credential process returned an invalid Expiration".to_string(),
            source: Some(Box::new(e)),
        })?;

    Ok(Issued {
        credentials: Credentials::new(
            output.access_key_id,
            output.secret_access_key,
            output.session_token,
        ),
        expires_at,
    })
}
