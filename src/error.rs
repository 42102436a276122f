//! Error types shared by the instance profile cache, the credential providers and the
//! fallback chain.

use crate::env::EnvError;
use crate::providers::profile::ProfileFileError;
use std::fmt::Write as _;
use thiserror::Error;

/// Boxed error used to carry failures reported by external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while resolving credentials.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialsError {
    /// The instance metadata service is disabled or unavailable.
    #[error("unable to retrieve credentials: instance metadata service is unavailable")]
    ServiceUnavailable,

    /// The metadata service did not advertise any instance role.
    #[error("unable to get instance role from the instance metadata service")]
    NoIdentity,

    /// The advertised role did not resolve to key material.
    #[error("unable to get credentials for role \"{identity}\" from the instance metadata service")]
    NoCredentialData {
        /// The role that was looked up.
        identity: String,
    },

    /// A lower-level I/O or transport failure while fetching credentials.
    #[error("failed to fetch credentials: {0}")]
    Fetch(#[source] BoxError),

    /// A user-supplied credential process failed.
    ///
    /// This error aborts the fallback chain instead of moving on to the next step.
    #[error("credential process failed: {message}")]
    ProcessCredential {
        /// Description of the failure.
        message: String,
        /// Underlying cause, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// The selected profile does not exist in the profile store.
    #[error("unable to find the '{profile}' profile")]
    ProfileNotFound {
        /// The profile name that was looked up.
        profile: String,
    },

    /// The profile exists but cannot produce credentials.
    #[error("profile '{profile}' is invalid: {reason}")]
    InvalidProfile {
        /// The profile name.
        profile: String,
        /// Why the profile was rejected.
        reason: String,
    },

    /// A credential source has no configuration in the current environment.
    #[error("{provider} credentials are not configured: {reason}")]
    NotConfigured {
        /// Name of the credential source.
        provider: &'static str,
        /// What is missing.
        reason: String,
    },

    /// The process environment could not be read.
    #[error(transparent)]
    Environment(#[from] EnvError),

    /// The shared credentials file could not be read or parsed.
    #[error(transparent)]
    ProfileFile(#[from] ProfileFileError),

    /// Every step of the fallback chain failed.
    #[error("{}", format_chain_failures(.errors))]
    NoCredentialsFound {
        /// The recorded failures, in step order.
        errors: Vec<CredentialsError>,
    },

    /// The cache has already been shut down.
    #[error("credential cache has already been shut down")]
    AlreadyShutdown,

    /// The background task did not stop within the shutdown timeout.
    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,

    /// No tokio runtime was available to run the background refresh task.
    #[error("no tokio runtime available to spawn the refresh task")]
    NoRuntime,
}

impl CredentialsError {
    /// Wraps a collaborator failure as [`CredentialsError::Fetch`].
    pub fn fetch<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Fetch(error.into())
    }

    /// Creates a [`CredentialsError::ProcessCredential`] without an underlying cause.
    pub fn process(message: impl Into<String>) -> Self {
        Self::ProcessCredential {
            message: message.into(),
            source: None,
        }
    }

    /// Returns `true` for errors that must stop the fallback chain.
    pub const fn aborts_chain(&self) -> bool {
        matches!(self, Self::ProcessCredential { .. })
    }

    /// Short, stable label for logging and hook consumers.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "service_unavailable",
            Self::NoIdentity => "no_identity",
            Self::NoCredentialData { .. } => "no_credential_data",
            Self::Fetch(_) => "fetch",
            Self::ProcessCredential { .. } => "process_credential",
            Self::ProfileNotFound { .. } => "profile_not_found",
            Self::InvalidProfile { .. } => "invalid_profile",
            Self::NotConfigured { .. } => "not_configured",
            Self::Environment(_) => "environment",
            Self::ProfileFile(_) => "profile_file",
            Self::NoCredentialsFound { .. } => "no_credentials_found",
            Self::AlreadyShutdown => "already_shutdown",
            Self::ShutdownTimeout => "shutdown_timeout",
            Self::NoRuntime => "no_runtime",
        }
    }
}

fn format_chain_failures(errors: &[CredentialsError]) -> String {
    let mut out = String::from("Unable to find credentials\n");
    let total = errors.len();
    for (i, e) in errors.iter().enumerate() {
        let _ = write!(out, "\nError {} of {}:\n{}\n", i + 1, total, e);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_message_lists_failures_in_order() {
        let err = CredentialsError::NoCredentialsFound {
            errors: vec![
                CredentialsError::ProfileNotFound {
                    profile: "default".to_string(),
                },
                CredentialsError::NoIdentity,
            ],
        };
        let msg = err.to_string();

        assert!(msg.starts_with("Unable to find credentials"));
        let first = msg.find("Error 1 of 2:").unwrap();
        let second = msg.find("Error 2 of 2:").unwrap();
        assert!(first < second);
        assert!(msg.contains("unable to find the 'default' profile"));
        assert!(msg.contains("unable to get instance role"));
    }

    #[test]
    fn aggregate_of_no_failures_is_just_the_header() {
        let err = CredentialsError::NoCredentialsFound { errors: vec![] };
        assert_eq!(err.to_string(), "Unable to find credentials\n");
    }

    #[test]
    fn only_process_errors_abort_the_chain() {
        assert!(CredentialsError::process("exit status 1").aborts_chain());
        assert!(!CredentialsError::NoIdentity.aborts_chain());
        assert!(!CredentialsError::fetch("connection reset").aborts_chain());
    }

    #[test]
    fn fetch_preserves_source() {
        use std::error::Error as _;

        let err = CredentialsError::fetch("connection reset");
        assert_eq!(err.source().unwrap().to_string(), "connection reset");
        assert_eq!(err.kind(), "fetch");
    }
}
