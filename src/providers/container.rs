//! Container credential endpoint selection.
//!
//! The HTTP client that talks to the endpoint is supplied by the caller through
//! [`ContainerCredentialsFactory`].

use crate::constants::{
    CONTAINER_CREDENTIALS_FULL_URI_ENV, CONTAINER_CREDENTIALS_RELATIVE_URI_ENV,
};
use crate::credentials::SharedCredentialsProvider;
use crate::env::{Env, EnvError};
use crate::error::CredentialsError;
use url::Url;

/// Base address for relative container credential URIs.
pub const CONTAINER_CREDENTIALS_HOST: &str = "http://169.254.170.2";

/// HTTP proxy settings handed to container credential providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    uri: Url,
    bypass: Vec<String>,
}

impl ProxyConfig {
    /// Creates a proxy configuration with no bypass entries.
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            bypass: Vec::new(),
        }
    }

    /// Parses a proxy URI.
    ///
    /// # Errors
    ///
    /// Returns the parse error for an invalid URI.
    pub fn parse(uri: &str) -> Result<Self, url::ParseError> {
        Url::parse(uri).map(Self::new)
    }

    /// Sets the hosts that are contacted directly. A leading `.` matches any subdomain.
    #[must_use]
    pub fn with_bypass<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the proxy URI.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Returns the bypass list.
    pub fn bypass(&self) -> &[String] {
        &self.bypass
    }

    /// Returns `true` if requests to `host` should skip the proxy.
    pub fn should_bypass(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.bypass.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            if entry == "*" {
                return true;
            }
            match entry.strip_prefix('.') {
                Some(suffix) => host == suffix || host.ends_with(&entry),
                None => host == entry,
            }
        })
    }
}

/// The container credential endpoint configured in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEndpoint {
    /// A path relative to [`CONTAINER_CREDENTIALS_HOST`].
    Relative(String),
    /// An absolute URI.
    Full(String),
}

impl ContainerEndpoint {
    /// Reads the endpoint from the environment. The relative URI takes precedence; empty
    /// values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError`] if either variable cannot be read.
    pub fn from_env(env: &dyn Env) -> Result<Option<Self>, EnvError> {
        if let Some(relative) = env.get_non_empty(CONTAINER_CREDENTIALS_RELATIVE_URI_ENV)? {
            return Ok(Some(Self::Relative(relative)));
        }
        Ok(env
            .get_non_empty(CONTAINER_CREDENTIALS_FULL_URI_ENV)?
            .map(Self::Full))
    }

    /// Resolves the endpoint to an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns the parse error for an invalid configured value.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        match self {
            Self::Relative(path) => Url::parse(CONTAINER_CREDENTIALS_HOST)?.join(path),
            Self::Full(uri) => Url::parse(uri),
        }
    }
}

/// Builds providers for container credential endpoints.
///
/// Implementations resolve the address with [`ContainerEndpoint::url`] and consult
/// [`ProxyConfig::should_bypass`] with its host before routing through `proxy`.
pub trait ContainerCredentialsFactory: Send + Sync + std::fmt::Debug {
    /// Creates a provider for `endpoint`, routed through `proxy` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be used.
    fn create(
        &self,
        endpoint: &ContainerEndpoint,
        proxy: Option<&ProxyConfig>,
    ) -> Result<SharedCredentialsProvider, CredentialsError>;
}
