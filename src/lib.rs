#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Instance metadata credentials with a single-flight, background-refreshing cache, and a
//! fallback chain over the usual credential sources.
//!
//! The primary entry point is [`InstanceProfileCache`]. It keeps the last credentials
//! fetched from a [`metadata::MetadataService`], refreshes them in the background, and
//! guarantees that concurrent callers on a cold cache trigger a single fetch.
//!
//! [`FallbackChain`] tries web identity federation, the shared credentials profile,
//! environment variables, and finally container or instance profile credentials, caching
//! the first source that works.
//!
//! ```no_run
//! use imds_credentials::{InstanceProfileCache, metadata::MetadataService};
//!
//! # async fn example(service: impl MetadataService) -> Result<(), Box<dyn std::error::Error>> {
//! let cache = InstanceProfileCache::new(service)?;
//!
//! let creds = cache.get_credentials().await?;
//! println!("access key: {}", creds.access_key_id());
//!
//! # cache.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`logging`** (default): emit diagnostics through the `log` crate
//! - **`tracing`**: emit diagnostics as `tracing` events instead

pub mod constants;
pub mod credentials;
pub mod env;
pub mod error;
pub mod fallback;
pub mod instance_profile;
pub mod metadata;
pub mod providers;

mod observability;
mod prelude;

pub use credentials::{Credentials, ProvideCredentials, SharedCredentialsProvider};
pub use error::CredentialsError;
pub use fallback::{ChainSources, FallbackChain};
pub use instance_profile::{
    CredentialUpdates, InstanceProfileCache, InstanceProfileCacheBuilder, RefreshConfig,
};
pub use metadata::{CredentialMaterial, MetadataService};
