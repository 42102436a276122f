use super::steps::{ChainSources, DefaultSteps};
use crate::credentials::{Credentials, ProviderFuture, SharedCredentialsProvider};
use crate::error::CredentialsError;
use crate::prelude::{debug, info, warn};
use crate::providers::container::ProxyConfig;
use arc_swap::{ArcSwap, ArcSwapOption};
use once_cell::sync::OnceCell;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

static GLOBAL: OnceCell<FallbackChain> = OnceCell::new();

/// One step of the chain: produces a credentials provider or fails.
pub type CredentialsGenerator = Arc<dyn Fn() -> ProviderFuture<'static> + Send + Sync>;

/// Wraps an async closure as a [`CredentialsGenerator`].
pub fn generator_fn<F, Fut>(f: F) -> CredentialsGenerator
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SharedCredentialsProvider, CredentialsError>> + Send + 'static,
{
    Arc::new(move || -> ProviderFuture<'static> { Box::pin(f()) })
}

/// Produces the ordered generator list of a [`FallbackChain`].
///
/// Called once at construction and again on every [`FallbackChain::reset`].
pub trait StepFactory: Send + Sync + Debug {
    /// Builds the generators, routing container traffic through `proxy` when given.
    fn build_steps(&self, proxy: Option<&ProxyConfig>) -> Vec<CredentialsGenerator>;
}

/// A fixed generator list that ignores the proxy configuration.
#[derive(Clone)]
pub struct FixedSteps(Vec<CredentialsGenerator>);

impl FixedSteps {
    /// Wraps `generators`.
    pub fn new(generators: Vec<CredentialsGenerator>) -> Self {
        Self(generators)
    }
}

impl Debug for FixedSteps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedSteps")
            .field("len", &self.0.len())
            .finish()
    }
}

impl StepFactory for FixedSteps {
    fn build_steps(&self, _proxy: Option<&ProxyConfig>) -> Vec<CredentialsGenerator> {
        self.0.clone()
    }
}

/// Tries credential sources in order and remembers the first one that works.
///
/// Once a step succeeds its provider is cached and returned by every later call, without
/// consulting any step again, until [`FallbackChain::reset`] or
/// [`FallbackChain::set_generators`] clears it.
///
/// A step failing with [`CredentialsError::ProcessCredential`] stops the chain: the error
/// is returned as is and the remaining steps are skipped. Other failures are collected
/// and the next step runs.
///
/// Handles are cheap to clone and share the same state.
#[derive(Clone)]
pub struct FallbackChain {
    inner: Arc<ChainInner>,
}

struct ChainInner {
    factory: Arc<dyn StepFactory>,
    generators: ArcSwap<Vec<CredentialsGenerator>>,
    cached: ArcSwapOption<SharedCredentialsProvider>,
}

impl Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("factory", &self.inner.factory)
            .field("steps", &self.inner.generators.load().len())
            .field("cached", &self.inner.cached.load().is_some())
            .finish()
    }
}

impl FallbackChain {
    /// Creates a chain whose steps come from `factory`, built without a proxy.
    pub fn new<F>(factory: F) -> Self
    where
        F: StepFactory + 'static,
    {
        let factory: Arc<dyn StepFactory> = Arc::new(factory);
        let generators = factory.build_steps(None);
        Self {
            inner: Arc::new(ChainInner {
                factory,
                generators: ArcSwap::from_pointee(generators),
                cached: ArcSwapOption::empty(),
            }),
        }
    }

    /// Creates a chain with the standard steps: web identity, profile, environment,
    /// then container or instance profile credentials.
    pub fn with_defaults(sources: ChainSources) -> Self {
        Self::new(DefaultSteps::new(sources))
    }

    /// Creates a chain over a fixed list of generators.
    pub fn with_steps(generators: Vec<CredentialsGenerator>) -> Self {
        Self::new(FixedSteps::new(generators))
    }

    /// Rebuilds the steps with `proxy` and forgets the cached provider.
    pub fn reset(&self, proxy: Option<ProxyConfig>) {
        let generators = self.inner.factory.build_steps(proxy.as_ref());
        debug!(
            "Resetting credentials chain: steps={}, proxy={}",
            generators.len(),
            proxy.as_ref().map_or("none", |p| p.uri().as_str())
        );
        self.inner.generators.store(Arc::new(generators));
        self.inner.cached.store(None);
    }

    /// Replaces the steps and forgets the cached provider.
    ///
    /// A later [`FallbackChain::reset`] rebuilds the steps from the chain's factory.
    pub fn set_generators(&self, generators: Vec<CredentialsGenerator>) {
        self.inner.generators.store(Arc::new(generators));
        self.inner.cached.store(None);
    }

    /// Returns the cached provider without running any step.
    pub fn cached_provider(&self) -> Option<SharedCredentialsProvider> {
        self.inner.cached.load().as_deref().cloned()
    }

    /// Returns the cached provider, or runs the steps until one succeeds.
    ///
    /// With `fallback_to_anonymous`, a chain in which every step failed yields an
    /// anonymous provider instead of an error. The anonymous provider is not cached.
    ///
    /// # Errors
    ///
    /// - [`CredentialsError::ProcessCredential`] as soon as a step reports it.
    /// - [`CredentialsError::NoCredentialsFound`] listing each step's failure in order
    ///   when all steps failed and anonymous access was not requested.
    pub async fn credentials_provider(
        &self,
        fallback_to_anonymous: bool,
    ) -> Result<SharedCredentialsProvider, CredentialsError> {
        if let Some(provider) = self.cached_provider() {
            return Ok(provider);
        }

        let generators = self.inner.generators.load_full();
        let mut errors = Vec::with_capacity(generators.len());

        for (step, generator) in generators.iter().enumerate() {
            match generator().await {
                Ok(provider) => {
                    debug!("Credential source selected: step={step}, provider={provider:?}");
                    self.inner
                        .cached
                        .store(Some(Arc::new(Arc::clone(&provider))));
                    return Ok(provider);
                }
                Err(e) if e.aborts_chain() => {
                    warn!("Credential source failed; stopping chain: step={step}, error={e}");
                    return Err(e);
                }
                Err(e) => {
                    debug!("Credential source failed; trying next: step={step}, error={e}");
                    errors.push(e);
                }
            }
        }

        if fallback_to_anonymous {
            info!(
                "No credential source succeeded; using anonymous credentials: failures={}",
                errors.len()
            );
            return Ok(Arc::new(Credentials::anonymous()));
        }

        Err(CredentialsError::NoCredentialsFound { errors })
    }

    /// Resolves a provider with [`FallbackChain::credentials_provider`] and asks it for
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns the chain's error, or the selected provider's.
    pub async fn get_credentials(
        &self,
        fallback_to_anonymous: bool,
    ) -> Result<Credentials, CredentialsError> {
        let provider = self.credentials_provider(fallback_to_anonymous).await?;
        provider.provide_credentials().await
    }
}

/// Installs the process-wide chain.
///
/// # Errors
///
/// Hands `chain` back if a global chain is already installed.
pub fn install_global(chain: FallbackChain) -> Result<(), FallbackChain> {
    GLOBAL.set(chain)
}

/// Returns the process-wide chain, if one has been installed.
pub fn global() -> Option<&'static FallbackChain> {
    GLOBAL.get()
}

/// Returns the process-wide chain, installing the one built by `init` on first use.
pub fn global_or_init<F>(init: F) -> &'static FallbackChain
where
    F: FnOnce() -> FallbackChain,
{
    GLOBAL.get_or_init(init)
}
