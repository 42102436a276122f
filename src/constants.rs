//! Environment variable names and default timings used across the crate.

use std::time::Duration;

/// How long the background task waits after a successful fetch before refreshing.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How long the background task waits after a failed fetch before retrying.
pub const DEFAULT_ERROR_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound for [`crate::InstanceProfileCache::shutdown_configured`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Selects the profile used by the profile step of the fallback chain.
pub const AWS_PROFILE_ENV: &str = "AWS_PROFILE";

/// Profile used when [`AWS_PROFILE_ENV`] is unset.
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Access key id for environment credentials.
pub const AWS_ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";

/// Secret access key for environment credentials.
pub const AWS_SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Optional session token for environment credentials.
pub const AWS_SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

/// Relative URI of the container credentials endpoint.
pub const CONTAINER_CREDENTIALS_RELATIVE_URI_ENV: &str = "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI";

/// Full URI of the container credentials endpoint.
pub const CONTAINER_CREDENTIALS_FULL_URI_ENV: &str = "AWS_CONTAINER_CREDENTIALS_FULL_URI";

/// Path to the web identity token file.
pub const WEB_IDENTITY_TOKEN_FILE_ENV: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";

/// Role assumed with the web identity token.
pub const ROLE_ARN_ENV: &str = "AWS_ROLE_ARN";

/// Optional session name for the assumed role.
pub const ROLE_SESSION_NAME_ENV: &str = "AWS_ROLE_SESSION_NAME";

/// Overrides the location of the shared credentials file.
pub const SHARED_CREDENTIALS_FILE_ENV: &str = "AWS_SHARED_CREDENTIALS_FILE";
