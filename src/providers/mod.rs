//! Credential sources consulted by the fallback chain.

pub mod container;
pub mod environment;
pub mod process;
pub mod profile;
pub mod web_identity;

pub use container::{ContainerCredentialsFactory, ContainerEndpoint, ProxyConfig};
pub use process::ProcessCredentials;
pub use profile::{
    resolve_profile, Profile, ProfileFileError, ProfileSet, ProfileStore, SharedCredentialsFile,
};
pub use web_identity::{WebIdentityConfig, WebIdentityProvider};
