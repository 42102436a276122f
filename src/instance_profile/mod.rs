//! Instance profile credentials: a single-flight, background-refreshing cache in front of
//! the instance metadata service.
//!
//! [`InstanceProfileCache`] spawns one background task when it is built. The task fetches
//! credentials immediately, then sleeps for the refresh interval (15 minutes by default)
//! after each success and for the error interval (5 seconds) after each failure. It keeps
//! retrying until the cache is shut down.
//!
//! Readers never wait for the background task. A cached value is returned straight away;
//! on a cold cache, concurrent readers collapse into a single fetch.
//!
//! # Example
//!
//! ```no_run
//! # use imds_credentials::metadata::MetadataService;
//! # async fn example(service: impl MetadataService) -> Result<(), imds_credentials::CredentialsError> {
//! use imds_credentials::InstanceProfileCache;
//!
//! let cache = InstanceProfileCache::builder(service)
//!     .before_fetch(|| println!("fetching instance credentials"))
//!     .build()?;
//!
//! let creds = cache.get_credentials().await?;
//! println!("access key: {}", creds.access_key_id());
//!
//! cache.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod cache;
mod supervisor;
mod types;

pub use builder::{InstanceProfileCacheBuilder, RefreshConfig};
pub use cache::{CredentialUpdates, InstanceProfileCache};
pub use types::{BeforeFetchHook, ErrorHook};
