//! An ordered chain of credential sources that caches the first one to succeed.
//!
//! # Example
//!
//! ```no_run
//! # use imds_credentials::metadata::SharedMetadataService;
//! # async fn example(metadata: SharedMetadataService) -> Result<(), imds_credentials::CredentialsError> {
//! use imds_credentials::fallback::{ChainSources, FallbackChain};
//!
//! let chain = FallbackChain::with_defaults(ChainSources::with_shared_instance_profile(metadata));
//! let creds = chain.get_credentials(false).await?;
//! # Ok(())
//! # }
//! ```

mod chain;
mod steps;

pub use chain::{
    generator_fn, global, global_or_init, install_global, CredentialsGenerator, FallbackChain,
    FixedSteps, StepFactory,
};
pub use steps::{ChainSources, DefaultSteps, InstanceProfileAccessor};
