use super::cache::InstanceProfileCache;
use super::types::{BeforeFetchHook, ErrorHook};
use crate::constants::{DEFAULT_ERROR_INTERVAL, DEFAULT_REFRESH_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::error::CredentialsError;
use crate::metadata::{MetadataService, SharedMetadataService};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Timing of the background refresh loop.
///
/// After a successful fetch the loop sleeps `refresh_interval`; after a failed fetch it
/// sleeps `error_interval` and tries again. Zero durations are raised to one millisecond.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Delay between successful refreshes.
    pub refresh_interval: Duration,
    /// Delay before retrying a failed refresh.
    pub error_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            error_interval: DEFAULT_ERROR_INTERVAL,
        }
    }
}

impl RefreshConfig {
    pub(crate) fn normalize(self) -> Self {
        Self {
            refresh_interval: self.refresh_interval.max(MIN_INTERVAL),
            error_interval: self.error_interval.max(MIN_INTERVAL),
        }
    }
}

/// Builder for [`InstanceProfileCache`].
///
/// # Example
///
/// ```no_run
/// # use imds_credentials::metadata::MetadataService;
/// # async fn example(service: impl MetadataService) -> Result<(), imds_credentials::CredentialsError> {
/// use imds_credentials::InstanceProfileCache;
/// use std::time::Duration;
///
/// let cache = InstanceProfileCache::builder(service)
///     .refresh_interval(Duration::from_secs(600))
///     .on_error(|description, err| eprintln!("{description}: {err}"))
///     .build()?;
///
/// let creds = cache.get_credentials().await?;
/// # Ok(())
/// # }
/// ```
pub struct InstanceProfileCacheBuilder {
    metadata: SharedMetadataService,
    refresh: RefreshConfig,
    before_fetch: Option<BeforeFetchHook>,
    on_error: Option<ErrorHook>,
    shutdown_timeout: Option<Duration>,
    runtime: Option<Handle>,
}

impl Debug for InstanceProfileCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceProfileCacheBuilder")
            .field("metadata", &"<MetadataService>")
            .field("refresh", &self.refresh)
            .field("before_fetch", &self.before_fetch.as_ref().map(|_| "<Fn>"))
            .field("on_error", &self.on_error.as_ref().map(|_| "<Fn>"))
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl InstanceProfileCacheBuilder {
    /// Creates a builder fetching from `metadata`.
    pub fn new<M>(metadata: M) -> Self
    where
        M: MetadataService,
    {
        Self::from_shared(Arc::new(metadata))
    }

    /// Creates a builder from an already shared metadata service.
    pub fn from_shared(metadata: SharedMetadataService) -> Self {
        Self {
            metadata,
            refresh: RefreshConfig::default(),
            before_fetch: None,
            on_error: None,
            shutdown_timeout: Some(DEFAULT_SHUTDOWN_TIMEOUT),
            runtime: None,
        }
    }

    /// Sets how long to wait after a successful fetch before refreshing. Default 15 minutes.
    #[must_use]
    pub const fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh.refresh_interval = interval;
        self
    }

    /// Sets how long to wait after a failed fetch before retrying. Default 5 seconds.
    #[must_use]
    pub const fn error_interval(mut self, interval: Duration) -> Self {
        self.refresh.error_interval = interval;
        self
    }

    /// Sets both intervals at once.
    #[must_use]
    pub const fn refresh_config(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    /// Registers a callback invoked before every fetch attempt.
    #[must_use]
    pub fn before_fetch<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.before_fetch = Some(Arc::new(hook));
        self
    }

    /// Registers a callback invoked whenever a background refresh fails.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &CredentialsError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Sets the timeout used by [`InstanceProfileCache::shutdown_configured`].
    ///
    /// `None` waits indefinitely. Default is 30 seconds.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Runtime used for the background task and for
    /// [`InstanceProfileCache::get_credentials_blocking`].
    ///
    /// Defaults to the runtime that is current when [`Self::build`] is called.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Builds the cache and spawns its background refresh task.
    ///
    /// The first fetch starts immediately in the background; `build` does not wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::NoRuntime`] if no runtime was configured and the
    /// caller is not running inside a tokio runtime.
    pub fn build(self) -> Result<InstanceProfileCache, CredentialsError> {
        let runtime = match self.runtime {
            Some(h) => h,
            None => Handle::try_current().map_err(|_| CredentialsError::NoRuntime)?,
        };

        Ok(InstanceProfileCache::build_with(
            self.metadata,
            self.refresh.normalize(),
            self.before_fetch,
            self.on_error,
            self.shutdown_timeout,
            runtime,
        ))
    }
}
