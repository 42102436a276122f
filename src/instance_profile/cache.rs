use super::builder::{InstanceProfileCacheBuilder, RefreshConfig};
use super::types::{BeforeFetchHook, ErrorHook};
use crate::credentials::{Credentials, CredentialsFuture, ProvideCredentials};
use crate::error::CredentialsError;
use crate::metadata::{fetch_credentials, MetadataService, SharedMetadataService};
use crate::prelude::{error, warn};
use arc_swap::ArcSwapOption;
use once_cell::sync::OnceCell;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

static SHARED: OnceCell<InstanceProfileCache> = OnceCell::new();

/// Handle for receiving notifications when the cached credentials are replaced.
///
/// Each successful fetch, foreground or background, bumps a monotonically increasing
/// sequence number starting at 0. Slow receivers may skip intermediate values.
#[derive(Clone, Debug)]
pub struct CredentialUpdates {
    rx: watch::Receiver<u64>,
}

impl CredentialUpdates {
    /// Waits for the next replacement and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::AlreadyShutdown`] once every handle to the cache has
    /// been dropped.
    pub async fn changed(&mut self) -> Result<u64, CredentialsError> {
        self.rx
            .changed()
            .await
            .map_err(|watch::error::RecvError { .. }| CredentialsError::AlreadyShutdown)?;
        Ok(*self.rx.borrow())
    }

    /// Returns the last sequence number without waiting.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Waits until the sequence number satisfies `f`.
    ///
    /// Returns immediately if the current value already does.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is gone before the predicate holds.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Result<u64, CredentialsError>
    where
        F: FnMut(&u64) -> bool,
    {
        let current = self.last();
        if f(&current) {
            return Ok(current);
        }
        loop {
            let seq = self.changed().await?;
            if f(&seq) {
                return Ok(seq);
            }
        }
    }
}

/// Instance role credentials, cached and refreshed in the background.
///
/// Building the cache spawns a single background task that fetches credentials from the
/// [`MetadataService`] right away and then every refresh interval, retrying after the
/// error interval when a fetch fails. The task never gives up on its own; it stops when
/// [`InstanceProfileCache::shutdown`] is called or the last handle is dropped.
///
/// [`InstanceProfileCache::get_credentials`] returns the cached value without locking
/// when there is one. On a cold cache, concurrent callers are serialized behind a single
/// fetch gate, so only one of them performs the fetch and the rest reuse its result.
///
/// The cached value is served regardless of its age. Freshness relies on the refresh
/// interval being shorter than the lifetime of the issued credentials.
///
/// Handles are cheap to clone and share the same cache.
#[derive(Clone)]
pub struct InstanceProfileCache {
    inner: Arc<Inner>,
    _cancel_on_drop: Arc<DropGuard>,
}

pub(super) struct Inner {
    // Last successfully fetched credentials, replaced as a whole.
    cached: ArcSwapOption<Credentials>,
    // Serializes fetches; held for the duration of a fetch.
    fetch_gate: Mutex<()>,

    metadata: SharedMetadataService,
    refresh: RefreshConfig,
    before_fetch: Option<BeforeFetchHook>,
    on_error: Option<ErrorHook>,
    runtime: Handle,

    // Lifecycle / shutdown.
    closed: AtomicBool,
    cancel: CancellationToken,
    shutdown_timeout: Option<Duration>,

    // Update notifications (monotonic sequence).
    update_seq: AtomicU64,
    update_tx: watch::Sender<u64>,
    update_rx: watch::Receiver<u64>,

    // Supervisor task handle (joined/aborted at shutdown).
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceProfileCache")
            .field("cached", &self.cached.load().is_some())
            .field("metadata", &"<MetadataService>")
            .field("refresh", &self.refresh)
            .field("before_fetch", &self.before_fetch.as_ref().map(|_| "<Fn>"))
            .field("on_error", &self.on_error.as_ref().map(|_| "<Fn>"))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("update_seq", &self.update_seq)
            .finish_non_exhaustive()
    }
}

impl Debug for InstanceProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl Inner {
    pub(super) const fn refresh(&self) -> RefreshConfig {
        self.refresh
    }

    pub(super) fn metadata(&self) -> &dyn MetadataService {
        self.metadata.as_ref()
    }

    pub(super) fn has_credentials(&self) -> bool {
        self.cached.load().is_some()
    }

    pub(super) fn current(&self) -> Option<Credentials> {
        self.cached.load().as_deref().cloned()
    }

    pub(super) fn fetch_gate(&self) -> &Mutex<()> {
        &self.fetch_gate
    }

    pub(super) fn report_error(&self, description: &str, error: &CredentialsError) {
        if let Some(hook) = self.on_error.as_deref() {
            run_hook("on_error", || hook(description, error));
        }
    }

    /// Fetches from the metadata service and stores the result.
    ///
    /// Callers must hold `fetch_gate` while the cache is empty.
    pub(super) async fn fetch_and_store(&self) -> Result<Credentials, CredentialsError> {
        if let Some(hook) = self.before_fetch.as_deref() {
            run_hook("before_fetch", hook);
        }
        let creds = fetch_credentials(self.metadata()).await?;
        self.store(creds.clone());
        Ok(creds)
    }

    fn store(&self, creds: Credentials) {
        self.cached.store(Some(Arc::new(creds)));
        let next = self.update_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _unused: Result<_, _> = self.update_tx.send(next);
    }

    // False once the task has ended, including when its runtime was shut down.
    fn supervisor_running(&self) -> bool {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

// A panicking hook must not unwind through the refresh task and end it.
fn run_hook<F: FnOnce()>(name: &str, hook: F) {
    if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!("Credential cache hook panicked: hook={name}");
    }
}

impl InstanceProfileCache {
    /// Creates a builder for a cache backed by `metadata`.
    pub fn builder<M>(metadata: M) -> InstanceProfileCacheBuilder
    where
        M: MetadataService,
    {
        InstanceProfileCacheBuilder::new(metadata)
    }

    /// Creates a cache with default settings on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::NoRuntime`] outside of a tokio runtime.
    pub fn new<M>(metadata: M) -> Result<Self, CredentialsError>
    where
        M: MetadataService,
    {
        InstanceProfileCacheBuilder::new(metadata).build()
    }

    /// Returns the process-wide cache, creating it with `init` on first use.
    ///
    /// `init` runs at most once per process, even under concurrent first calls. The shared
    /// cache lives until the process exits unless it is shut down explicitly.
    ///
    /// The background task runs on the runtime chosen by `init`. A cache built with
    /// [`InstanceProfileCache::new`] uses whichever runtime is current at first use; if
    /// that runtime is shut down later, the shared cache keeps serving its last
    /// credentials without refreshing and [`InstanceProfileCache::is_healthy`] returns
    /// `false`. Pass a long-lived handle through [`InstanceProfileCacheBuilder::runtime`]
    /// when the first caller may run on a short-lived runtime.
    ///
    /// # Errors
    ///
    /// Propagates the error from `init`; a later call may try again.
    pub fn shared_or_try_init<F>(init: F) -> Result<&'static Self, CredentialsError>
    where
        F: FnOnce() -> Result<Self, CredentialsError>,
    {
        SHARED.get_or_try_init(init)
    }

    /// Returns the process-wide cache if it has been created.
    pub fn shared() -> Option<&'static Self> {
        SHARED.get()
    }

    /// Returns a copy of the cached credentials, fetching them if none are cached yet.
    ///
    /// # Errors
    ///
    /// - [`CredentialsError::AlreadyShutdown`] if the cache was shut down.
    /// - [`CredentialsError::ServiceUnavailable`] if the metadata service is disabled.
    /// - [`CredentialsError::NoIdentity`], [`CredentialsError::NoCredentialData`] or
    ///   [`CredentialsError::Fetch`] if a cold-cache fetch fails.
    pub async fn get_credentials(&self) -> Result<Credentials, CredentialsError> {
        if let Some(creds) = self.fast_path()? {
            return Ok(creds);
        }

        let _gate = self.inner.fetch_gate.lock().await;

        // Another caller or the background task may have filled the slot while we waited.
        if let Some(creds) = self.inner.current() {
            return Ok(creds);
        }

        self.inner.fetch_and_store().await
    }

    /// Blocking form of [`InstanceProfileCache::get_credentials`].
    ///
    /// Returns immediately when credentials are cached. Otherwise blocks on the runtime the
    /// cache was built with.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context while the cache is
    /// cold.
    ///
    /// # Errors
    ///
    /// Same as [`InstanceProfileCache::get_credentials`].
    pub fn get_credentials_blocking(&self) -> Result<Credentials, CredentialsError> {
        if let Some(creds) = self.fast_path()? {
            return Ok(creds);
        }
        self.inner.runtime.block_on(self.get_credentials())
    }

    fn fast_path(&self) -> Result<Option<Credentials>, CredentialsError> {
        self.assert_open()?;
        if !self.inner.metadata.is_enabled() {
            return Err(CredentialsError::ServiceUnavailable);
        }
        Ok(self.inner.current())
    }

    /// Returns the cached credentials without fetching.
    pub fn cached(&self) -> Option<Credentials> {
        self.inner.current()
    }

    /// Returns `true` if the cache holds credentials and its refresh task is running.
    ///
    /// This check is racy and meant for health reporting only.
    pub fn is_healthy(&self) -> bool {
        self.assert_open().is_ok()
            && self.inner.has_credentials()
            && self.inner.supervisor_running()
    }

    /// Returns a handle for observing credential replacements.
    pub fn updated(&self) -> CredentialUpdates {
        CredentialUpdates {
            rx: self.inner.update_rx.clone(),
        }
    }

    /// Stops the background task and waits for it to exit.
    ///
    /// The task is signalled cooperatively: an in-flight fetch runs to completion and
    /// the task exits at its next sleep.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::AlreadyShutdown`] if called more than once.
    pub async fn shutdown(&self) -> Result<(), CredentialsError> {
        self.begin_shutdown()?;

        if let Some(handle) = self.inner.take_supervisor() {
            if let Err(e) = handle.await {
                warn!("Error joining refresh task during shutdown: error={e}");
            }
        }
        Ok(())
    }

    /// Stops the background task, aborting it if it has not exited after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::AlreadyShutdown`] if called more than once, or
    /// [`CredentialsError::ShutdownTimeout`] if the task had to be aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), CredentialsError> {
        self.begin_shutdown()?;

        let Some(mut handle) = self.inner.take_supervisor() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Error joining refresh task during shutdown: error={e}");
                Ok(())
            }
            Err(_) => {
                warn!("Shutdown timeout exceeded; aborting refresh task");
                handle.abort();
                let _unused: Result<_, _> = handle.await;
                Err(CredentialsError::ShutdownTimeout)
            }
        }
    }

    /// Stops the background task using the timeout configured on the builder.
    ///
    /// # Errors
    ///
    /// See [`InstanceProfileCache::shutdown_with_timeout`].
    pub async fn shutdown_configured(&self) -> Result<(), CredentialsError> {
        match self.inner.shutdown_timeout {
            Some(timeout) => self.shutdown_with_timeout(timeout).await,
            None => self.shutdown().await,
        }
    }

    fn begin_shutdown(&self) -> Result<(), CredentialsError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(CredentialsError::AlreadyShutdown);
        }
        self.inner.cancel.cancel();
        Ok(())
    }

    fn assert_open(&self) -> Result<(), CredentialsError> {
        if self.inner.closed.load(Ordering::Acquire) || self.inner.cancel.is_cancelled() {
            return Err(CredentialsError::AlreadyShutdown);
        }
        Ok(())
    }
}

impl InstanceProfileCache {
    pub(super) fn build_with(
        metadata: SharedMetadataService,
        refresh: RefreshConfig,
        before_fetch: Option<BeforeFetchHook>,
        on_error: Option<ErrorHook>,
        shutdown_timeout: Option<Duration>,
        runtime: Handle,
    ) -> Self {
        let (update_tx, update_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();

        let inner = Arc::new(Inner {
            cached: ArcSwapOption::empty(),
            fetch_gate: Mutex::new(()),
            metadata,
            refresh,
            before_fetch,
            on_error,
            runtime,
            closed: AtomicBool::new(false),
            cancel,
            shutdown_timeout,
            update_seq: AtomicU64::new(0),
            update_tx,
            update_rx,
            supervisor: std::sync::Mutex::new(None),
        });

        // The task holds its own reference to `Inner`; only user handles carry the guard,
        // so dropping the last handle cancels the task.
        let task_inner = Arc::clone(&inner);
        let token = inner.cancel.clone();
        let handle = inner.runtime.spawn(async move {
            task_inner.run_refresh_supervisor(token).await;
        });
        *inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        let guard = inner.cancel.clone().drop_guard();
        Self {
            inner,
            _cancel_on_drop: Arc::new(guard),
        }
    }
}

impl ProvideCredentials for InstanceProfileCache {
    fn provide_credentials(&self) -> CredentialsFuture<'_> {
        Box::pin(self.get_credentials())
    }
}
