use super::chain::{CredentialsGenerator, StepFactory};
use crate::constants::{AWS_PROFILE_ENV, DEFAULT_PROFILE_NAME};
use crate::credentials::{ProviderFuture, SharedCredentialsProvider};
use crate::env::{Env, ProcessEnv};
use crate::error::CredentialsError;
use crate::instance_profile::{InstanceProfileCache, InstanceProfileCacheBuilder};
use crate::metadata::SharedMetadataService;
use crate::prelude::{debug, error};
use crate::providers::container::{ContainerCredentialsFactory, ContainerEndpoint, ProxyConfig};
use crate::providers::environment;
use crate::providers::profile::{resolve_profile, ProfileStore, SharedCredentialsFile};
use crate::providers::web_identity::{WebIdentityConfig, WebIdentityProvider};
use std::fmt::Debug;
use std::sync::Arc;

/// Returns the instance profile cache handed out by the last step of the default chain.
pub type InstanceProfileAccessor =
    Arc<dyn Fn() -> Result<InstanceProfileCache, CredentialsError> + Send + Sync>;

/// Collaborators consulted by the default chain.
#[derive(Clone)]
pub struct ChainSources {
    env: Arc<dyn Env>,
    profiles: Option<Arc<dyn ProfileStore>>,
    web_identity: Option<Arc<dyn WebIdentityProvider>>,
    container: Option<Arc<dyn ContainerCredentialsFactory>>,
    instance_profile: InstanceProfileAccessor,
}

impl Debug for ChainSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSources")
            .field("env", &self.env)
            .field("profiles", &self.profiles)
            .field("web_identity", &self.web_identity)
            .field("container", &self.container)
            .field("instance_profile", &"<Fn>")
            .finish()
    }
}

impl ChainSources {
    /// Creates sources reading the process environment and the shared credentials file,
    /// with `instance_profile` supplying the last-resort cache.
    ///
    /// No web identity provider or container factory is installed; the corresponding
    /// steps report [`CredentialsError::NotConfigured`] until one is set.
    pub fn new<F>(instance_profile: F) -> Self
    where
        F: Fn() -> Result<InstanceProfileCache, CredentialsError> + Send + Sync + 'static,
    {
        Self {
            env: Arc::new(ProcessEnv),
            profiles: None,
            web_identity: None,
            container: None,
            instance_profile: Arc::new(instance_profile),
        }
    }

    /// Creates sources whose last step uses the process-wide [`InstanceProfileCache`],
    /// creating it over `metadata` on first use.
    pub fn with_shared_instance_profile(metadata: SharedMetadataService) -> Self {
        Self::new(move || {
            InstanceProfileCache::shared_or_try_init(|| {
                InstanceProfileCacheBuilder::from_shared(Arc::clone(&metadata)).build()
            })
            .cloned()
        })
    }

    /// Replaces the environment.
    ///
    /// Unless a profile store was set explicitly, the shared credentials file is located
    /// through this environment.
    #[must_use]
    pub fn env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }

    /// Sets the profile store.
    #[must_use]
    pub fn profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Installs the web identity provider.
    #[must_use]
    pub fn web_identity(mut self, provider: Arc<dyn WebIdentityProvider>) -> Self {
        self.web_identity = Some(provider);
        self
    }

    /// Installs the container credentials factory.
    #[must_use]
    pub fn container(mut self, factory: Arc<dyn ContainerCredentialsFactory>) -> Self {
        self.container = Some(factory);
        self
    }

    fn profile_store(&self) -> Arc<dyn ProfileStore> {
        match &self.profiles {
            Some(store) => Arc::clone(store),
            None => Arc::new(SharedCredentialsFile::new(Arc::clone(&self.env))),
        }
    }
}

/// The standard step order:
///
/// 1. web identity federation configured in the environment;
/// 2. the profile named by `AWS_PROFILE`, or `default`;
/// 3. static credentials in the environment;
/// 4. container credentials when an endpoint is configured, otherwise the instance
///    profile cache.
#[derive(Debug, Clone)]
pub struct DefaultSteps {
    sources: ChainSources,
}

impl DefaultSteps {
    /// Creates the standard steps over `sources`.
    pub fn new(sources: ChainSources) -> Self {
        Self { sources }
    }
}

impl StepFactory for DefaultSteps {
    fn build_steps(&self, proxy: Option<&ProxyConfig>) -> Vec<CredentialsGenerator> {
        let proxy = proxy.cloned();
        vec![
            step(&self.sources, |s| -> ProviderFuture<'static> {
                Box::pin(async move { web_identity(&s).await })
            }),
            step(&self.sources, |s| -> ProviderFuture<'static> {
                Box::pin(async move { profile(&s).await })
            }),
            step(&self.sources, |s| -> ProviderFuture<'static> {
                Box::pin(async move { from_environment(&s) })
            }),
            step(&self.sources, move |s| -> ProviderFuture<'static> {
                let proxy = proxy.clone();
                Box::pin(async move { container_or_instance(&s, proxy.as_ref()) })
            }),
        ]
    }
}

fn step<F>(sources: &ChainSources, f: F) -> CredentialsGenerator
where
    F: Fn(ChainSources) -> ProviderFuture<'static> + Send + Sync + 'static,
{
    let sources = sources.clone();
    Arc::new(move || f(sources.clone()))
}

async fn web_identity(
    sources: &ChainSources,
) -> Result<SharedCredentialsProvider, CredentialsError> {
    let config = WebIdentityConfig::from_env(sources.env.as_ref())?;
    let Some(provider) = &sources.web_identity else {
        return Err(CredentialsError::NotConfigured {
            provider: "web identity",
            reason: "no web identity provider installed".to_string(),
        });
    };
    debug!(
        "Assuming role with web identity: role_arn={}",
        config.role_arn()
    );
    provider.assume_role(&config).await
}

async fn profile(sources: &ChainSources) -> Result<SharedCredentialsProvider, CredentialsError> {
    let name = sources
        .env
        .get_non_empty(AWS_PROFILE_ENV)?
        .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string());

    match sources.profile_store().profile(&name)? {
        Some(profile) => resolve_profile(&profile).await,
        None => Err(CredentialsError::ProfileNotFound { profile: name }),
    }
}

fn from_environment(sources: &ChainSources) -> Result<SharedCredentialsProvider, CredentialsError> {
    Ok(Arc::new(environment::from_env(sources.env.as_ref())?))
}

fn container_or_instance(
    sources: &ChainSources,
    proxy: Option<&ProxyConfig>,
) -> Result<SharedCredentialsProvider, CredentialsError> {
    match ContainerEndpoint::from_env(sources.env.as_ref()) {
        Ok(Some(endpoint)) => {
            let factory = sources
                .container
                .as_ref()
                .ok_or_else(|| CredentialsError::NotConfigured {
                    provider: "container",
                    reason: "a container credentials endpoint is set but no factory is installed"
                        .to_string(),
                })?;
            debug!("Using container credentials: endpoint={endpoint:?}");
            return factory.create(&endpoint, proxy);
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to read container credentials settings; using instance profile: error={e}");
        }
    }

    let cache = (sources.instance_profile)()?;
    Ok(Arc::new(cache))
}
