//! Named profiles from the shared credentials file.
//!
//! The file uses an INI-like format:
//!
//! ```text
//! # comment
//! [default]
//! aws_access_key_id = AKID
//! aws_secret_access_key = secret
//!
//! [profile tooling]
//! credential_process = /usr/local/bin/issue-credentials --json
//! ```

use crate::constants::SHARED_CREDENTIALS_FILE_ENV;
use crate::credentials::{Credentials, SharedCredentialsProvider};
use crate::env::Env;
use crate::error::CredentialsError;
use crate::prelude::debug;
use crate::providers::process::ProcessCredentials;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const ACCESS_KEY_ID: &str = "aws_access_key_id";
const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const SESSION_TOKEN: &str = "aws_session_token";
const CREDENTIAL_PROCESS: &str = "credential_process";
const ROLE_ARN: &str = "role_arn";

/// Failure to read or parse a profile file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfileFileError {
    /// The file exists but could not be read.
    #[error("failed to read profile file {}: {}", .path.display(), .source)]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is malformed.
    #[error("invalid profile file at line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What is wrong with the line.
        message: String,
    },
}

/// A named set of properties.
#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    name: String,
    properties: HashMap<String, String>,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may be secrets; only the keys are printed.
        let mut keys: Vec<&str> = self.properties.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("keys", &keys)
            .finish()
    }
}

impl Profile {
    /// Creates an empty profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns the profile name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a property value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

/// Lookup of profiles by name.
pub trait ProfileStore: Send + Sync + std::fmt::Debug {
    /// Returns the profile called `name`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn profile(&self, name: &str) -> Result<Option<Profile>, CredentialsError>;
}

/// An in-memory set of profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a profile.
    #[must_use]
    pub fn insert(mut self, profile: Profile) -> Self {
        self.profiles.insert(profile.name.clone(), profile);
        self
    }

    /// Returns the profile names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Parses the contents of a shared credentials file.
    ///
    /// Sections named `[profile NAME]` are registered as `NAME`. Repeated sections are
    /// merged, later keys winning.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileFileError::Parse`] for a property outside of a section, a line
    /// without `=`, or an empty section name.
    pub fn parse(contents: &str) -> Result<Self, ProfileFileError> {
        let mut set = Self::new();
        let mut current: Option<String> = None;

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| parse_error(idx, "unterminated section header"))?
                    .trim();
                let name = name.strip_prefix("profile ").map_or(name, str::trim);
                if name.is_empty() {
                    return Err(parse_error(idx, "empty section name"));
                }
                set.profiles
                    .entry(name.to_string())
                    .or_insert_with(|| Profile::new(name));
                current = Some(name.to_string());
                continue;
            }

            let section = current
                .as_ref()
                .ok_or_else(|| parse_error(idx, "property outside of a section"))?;
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| parse_error(idx, "expected 'key = value'"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_error(idx, "empty property name"));
            }
            if let Some(profile) = set.profiles.get_mut(section) {
                profile
                    .properties
                    .insert(key.to_string(), value.trim().to_string());
            }
        }

        Ok(set)
    }

    /// Reads the shared credentials file named by `AWS_SHARED_CREDENTIALS_FILE`, or
    /// `$HOME/.aws/credentials` when unset.
    ///
    /// A missing file, or no way to locate one, yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Environment`] if a variable cannot be read and
    /// [`CredentialsError::ProfileFile`] if the file cannot be read or parsed.
    pub fn load(env: &dyn Env) -> Result<Self, CredentialsError> {
        let Some(path) = credentials_file_path(env)? else {
            debug!("No shared credentials file location; using no profiles");
            return Ok(Self::new());
        };
        Ok(Self::load_from(&path)?)
    }

    /// Reads and parses the file at `path`. A missing file yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ProfileFileError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Shared credentials file not found: path={}", path.display());
                Ok(Self::new())
            }
            Err(source) => Err(ProfileFileError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl ProfileStore for ProfileSet {
    fn profile(&self, name: &str) -> Result<Option<Profile>, CredentialsError> {
        Ok(self.profiles.get(name).cloned())
    }
}

/// The shared credentials file, re-read on every lookup.
#[derive(Debug)]
pub struct SharedCredentialsFile {
    env: Arc<dyn Env>,
}

impl SharedCredentialsFile {
    /// Creates a store that locates the file through `env`.
    pub fn new(env: Arc<dyn Env>) -> Self {
        Self { env }
    }
}

impl ProfileStore for SharedCredentialsFile {
    fn profile(&self, name: &str) -> Result<Option<Profile>, CredentialsError> {
        ProfileSet::load(self.env.as_ref())?.profile(name)
    }
}

fn credentials_file_path(env: &dyn Env) -> Result<Option<PathBuf>, CredentialsError> {
    if let Some(path) = env.get_non_empty(SHARED_CREDENTIALS_FILE_ENV)? {
        return Ok(Some(PathBuf::from(path)));
    }
    let home = match env.get_non_empty("HOME")? {
        Some(home) => Some(home),
        None => env.get_non_empty("USERPROFILE")?,
    };
    Ok(home.map(|h| Path::new(&h).join(".aws").join("credentials")))
}

fn parse_error(idx: usize, message: &str) -> ProfileFileError {
    ProfileFileError::Parse {
        line: idx + 1,
        message: message.to_string(),
    }
}

/// Turns a profile into a credentials provider.
///
/// A `credential_process` entry takes precedence and is run once here, so a broken
/// process surfaces as [`CredentialsError::ProcessCredential`]. Otherwise the profile
/// must carry static keys.
///
/// # Errors
///
/// Returns [`CredentialsError::ProcessCredential`] if the process fails and
/// [`CredentialsError::InvalidProfile`] if the profile has no usable credentials.
pub async fn resolve_profile(
    profile: &Profile,
) -> Result<SharedCredentialsProvider, CredentialsError> {
    if let Some(command) = profile.get_non_empty(CREDENTIAL_PROCESS) {
        debug!(
            "Resolving profile via credential process: profile={}",
            profile.name()
        );
        let provider = ProcessCredentials::spawn(command).await?;
        return Ok(Arc::new(provider));
    }

    match (
        profile.get_non_empty(ACCESS_KEY_ID),
        profile.get_non_empty(SECRET_ACCESS_KEY),
    ) {
        (Some(key), Some(secret)) => {
            let token = profile.get_non_empty(SESSION_TOKEN).map(str::to_string);
            Ok(Arc::new(Credentials::new(key, secret, token)))
        }
        (Some(_), None) => Err(invalid(profile, format!("missing {SECRET_ACCESS_KEY}"))),
        _ if profile.get_non_empty(ROLE_ARN).is_some() => Err(invalid(
            profile,
            "role assumption from profiles is not supported".to_string(),
        )),
        _ => Err(invalid(
            profile,
            format!("no {ACCESS_KEY_ID} or {CREDENTIAL_PROCESS} configured"),
        )),
    }
}

fn invalid(profile: &Profile, reason: String) -> CredentialsError {
    CredentialsError::InvalidProfile {
        profile: profile.name().to_string(),
        reason,
    }
}
