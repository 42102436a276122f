//! Credential values and the provider abstraction.

use crate::error::CredentialsError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A set of short-lived access keys.
///
/// Values are immutable and handed to callers as owned copies. The secret key and
/// session token are zeroized on drop and never printed by `Debug`.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    anonymous: bool,
}

impl Credentials {
    /// Creates credentials from their parts.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
            anonymous: false,
        }
    }

    /// Placeholder returned by the fallback chain when anonymous access is allowed and no
    /// source produced credentials. Requests made with it should not be signed.
    pub fn anonymous() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: None,
            anonymous: true,
        }
    }

    /// Returns the access key id.
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Returns the secret access key.
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Returns the session token, if any.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Returns `true` for the anonymous placeholder.
    pub const fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Future returned by [`ProvideCredentials::provide_credentials`].
pub type CredentialsFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Credentials, CredentialsError>> + Send + 'a>>;

/// A source of credentials.
///
/// Implementations are free to cache and refresh credentials internally.
pub trait ProvideCredentials: Send + Sync + fmt::Debug {
    /// Returns the current credentials.
    fn provide_credentials(&self) -> CredentialsFuture<'_>;
}

/// A shareable, type-erased credentials provider.
pub type SharedCredentialsProvider = Arc<dyn ProvideCredentials>;

/// Future resolving to a credentials provider.
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<SharedCredentialsProvider, CredentialsError>> + Send + 'a>>;

impl ProvideCredentials for Credentials {
    fn provide_credentials(&self) -> CredentialsFuture<'_> {
        let creds = self.clone();
        Box::pin(async move { Ok(creds) })
    }
}
