//! Access to environment variables.
//!
//! Credential sources read their configuration through the [`Env`] trait so that the
//! process environment can be replaced with a fixed map in tests.

use std::collections::HashMap;
use std::collections::HashSet;
use std::env::VarError;
use thiserror::Error;

/// Failure to read an environment variable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnvError {
    /// The variable exists but its value cannot be read.
    #[error("failed to access environment variable {key}: {reason}")]
    Inaccessible {
        /// The variable name.
        key: String,
        /// Why it could not be read.
        reason: String,
    },
}

/// Source of environment variables.
pub trait Env: Send + Sync + std::fmt::Debug {
    /// Returns the value of `key`, or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Inaccessible`] when the variable is set but cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, EnvError>;

    /// Like [`Env::get`], but treats empty values as unset.
    fn get_non_empty(&self, key: &str) -> Result<Option<String>, EnvError> {
        Ok(self.get(key)?.filter(|v| !v.is_empty()))
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn get(&self, key: &str) -> Result<Option<String>, EnvError> {
        match std::env::var(key) {
            Ok(v) => Ok(Some(v)),
            Err(VarError::NotPresent) => Ok(None),
            Err(e @ VarError::NotUnicode(_)) => Err(EnvError::Inaccessible {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// A fixed set of variables.
///
/// Keys registered with [`StaticEnv::inaccessible`] fail on read, which lets callers
/// exercise the error paths of environment lookups.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    vars: HashMap<String, String>,
    denied: HashSet<String>,
}

impl StaticEnv {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Marks a variable as unreadable.
    #[must_use]
    pub fn inaccessible(mut self, key: impl Into<String>) -> Self {
        self.denied.insert(key.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for StaticEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            denied: HashSet::new(),
        }
    }
}

impl Env for StaticEnv {
    fn get(&self, key: &str) -> Result<Option<String>, EnvError> {
        if self.denied.contains(key) {
            return Err(EnvError::Inaccessible {
                key: key.to_string(),
                reason: "access denied".to_string(),
            });
        }
        Ok(self.vars.get(key).cloned())
    }
}
