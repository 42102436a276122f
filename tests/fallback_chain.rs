//! Integration tests for `FallbackChain`.
//!
//! The tests cover:
//! - Step ordering, caching and reset
//! - Credential process failures stopping the chain
//! - Anonymous fallback and the aggregated error
//! - The default steps over a fixed environment

use imds_credentials::credentials::ProviderFuture;
use imds_credentials::env::StaticEnv;
use imds_credentials::fallback::{generator_fn, ChainSources, CredentialsGenerator, FallbackChain};
use imds_credentials::metadata::{IdentitiesFuture, MaterialFuture};
use imds_credentials::providers::{
    ContainerCredentialsFactory, ContainerEndpoint, Profile, ProfileSet, ProxyConfig,
    WebIdentityConfig, WebIdentityProvider,
};
use imds_credentials::{
    CredentialMaterial, Credentials, CredentialsError, InstanceProfileCache, MetadataService,
    SharedCredentialsProvider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn static_provider(key: &str) -> SharedCredentialsProvider {
    Arc::new(Credentials::new(key, "secret", None))
}

/// Generator that counts its invocations and returns `outcome`.
fn counted<F>(calls: &Arc<AtomicUsize>, outcome: F) -> CredentialsGenerator
where
    F: Fn() -> Result<SharedCredentialsProvider, CredentialsError> + Send + Sync + 'static,
{
    let calls = Arc::clone(calls);
    let outcome = Arc::new(outcome);
    generator_fn(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let outcome = Arc::clone(&outcome);
        async move { (*outcome)() }
    })
}

fn not_configured(reason: &str) -> CredentialsError {
    CredentialsError::NotConfigured {
        provider: "test",
        reason: reason.to_string(),
    }
}

#[tokio::test]
async fn first_success_is_cached_until_reset() {
    let calls: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let chain = FallbackChain::with_steps(vec![
        counted(&calls[0], || Err(not_configured("first"))),
        counted(&calls[1], || Err(not_configured("second"))),
        counted(&calls[2], || Ok(static_provider("X"))),
    ]);

    let creds = chain.get_credentials(false).await.unwrap();
    assert_eq!(creds.access_key_id(), "X");

    let again = chain.get_credentials(false).await.unwrap();
    assert_eq!(again, creds);
    let counts = || calls.iter().map(|c| c.load(Ordering::SeqCst)).collect::<Vec<_>>();
    assert_eq!(counts(), [1, 1, 1]);

    chain.reset(None);
    assert!(chain.cached_provider().is_none());
    chain.get_credentials(false).await.unwrap();
    assert_eq!(counts(), [2, 2, 2]);
}

#[tokio::test]
async fn process_failure_stops_the_chain() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let chain = FallbackChain::with_steps(vec![
        counted(&first, || Err(CredentialsError::process("exit status 1"))),
        counted(&second, || Ok(static_provider("Y"))),
    ]);

    let err = chain.get_credentials(true).await.unwrap_err();
    assert!(
        matches!(err, CredentialsError::ProcessCredential { ref message, .. } if message == "exit status 1"),
        "{err}"
    );
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert!(chain.cached_provider().is_none());
}

#[tokio::test]
async fn exhausted_chain_falls_back_to_anonymous_when_allowed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = FallbackChain::with_steps(vec![
        counted(&calls, || Err(not_configured("first"))),
        counted(&calls, || Err(CredentialsError::NoIdentity)),
    ]);

    let creds = chain.get_credentials(true).await.unwrap();
    assert!(creds.is_anonymous());

    match chain.get_credentials(false).await {
        Err(CredentialsError::NoCredentialsFound { errors }) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].kind(), "not_configured");
            assert_eq!(errors[1].kind(), "no_identity");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn aggregate_error_lists_failures_in_step_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = FallbackChain::with_steps(vec![
        counted(&calls, || Err(not_configured("alpha"))),
        counted(&calls, || Err(not_configured("beta"))),
    ]);

    let msg = chain.get_credentials(false).await.unwrap_err().to_string();
    assert!(msg.starts_with("Unable to find credentials"));
    let alpha = msg.find("Error 1 of 2:\ntest credentials are not configured: alpha");
    let beta = msg.find("Error 2 of 2:\ntest credentials are not configured: beta");
    assert!(alpha.unwrap() < beta.unwrap(), "{msg}");
}

// Default steps.

#[derive(Clone, Default)]
struct FakeImds;

impl MetadataService for FakeImds {
    fn is_enabled(&self) -> bool {
        true
    }

    fn list_security_credential_identities(&self) -> IdentitiesFuture<'_> {
        Box::pin(async { Ok(vec!["instance-role".to_string()]) })
    }

    fn get_credential_material<'a>(&'a self, _identity: &'a str) -> MaterialFuture<'a> {
        Box::pin(async {
            Ok(Some(CredentialMaterial {
                access_key_id: "INSTANCE".to_string(),
                secret_access_key: "secret".to_string(),
                token: None,
            }))
        })
    }
}

/// Records the resolved endpoint URL and the proxy it would route through.
#[derive(Debug, Default)]
struct RecordingContainerFactory {
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ContainerCredentialsFactory for RecordingContainerFactory {
    fn create(
        &self,
        endpoint: &ContainerEndpoint,
        proxy: Option<&ProxyConfig>,
    ) -> Result<SharedCredentialsProvider, CredentialsError> {
        let url = endpoint.url().map_err(|e| CredentialsError::NotConfigured {
            provider: "container",
            reason: e.to_string(),
        })?;
        let host = url.host_str().unwrap_or_default();
        let proxy = proxy.filter(|p| !p.should_bypass(host));
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), proxy.map(|p| p.uri().to_string())));
        Ok(static_provider("CONTAINER"))
    }
}

#[derive(Debug)]
struct FakeWebIdentity;

impl WebIdentityProvider for FakeWebIdentity {
    fn assume_role<'a>(&'a self, config: &'a WebIdentityConfig) -> ProviderFuture<'a> {
        Box::pin(async move {
            Ok(static_provider(&format!(
                "WEB:{}",
                config.session_name().unwrap_or("anonymous-session")
            )))
        })
    }
}

fn unavailable_instance_profile() -> Result<InstanceProfileCache, CredentialsError> {
    Err(CredentialsError::ServiceUnavailable)
}

fn sources(env: StaticEnv) -> ChainSources {
    ChainSources::new(unavailable_instance_profile)
        .env(Arc::new(env))
        .profiles(Arc::new(ProfileSet::new()))
}

#[tokio::test]
async fn default_steps_use_environment_credentials() {
    let env = StaticEnv::new()
        .with("AWS_ACCESS_KEY_ID", "ENV")
        .with("AWS_SECRET_ACCESS_KEY", "secret")
        .with("AWS_SESSION_TOKEN", "token");
    let chain = FallbackChain::with_defaults(sources(env));

    let creds = chain.get_credentials(false).await.unwrap();
    assert_eq!(creds.access_key_id(), "ENV");
    assert_eq!(creds.session_token(), Some("token"));
}

#[tokio::test]
async fn default_steps_prefer_web_identity() {
    let env = StaticEnv::new()
        .with("AWS_WEB_IDENTITY_TOKEN_FILE", "/var/run/token")
        .with("AWS_ROLE_ARN", "arn:aws:iam::123456789012:role/app")
        .with("AWS_ROLE_SESSION_NAME", "session")
        .with("AWS_ACCESS_KEY_ID", "ENV")
        .with("AWS_SECRET_ACCESS_KEY", "secret");
    let chain = FallbackChain::with_defaults(sources(env).web_identity(Arc::new(FakeWebIdentity)));

    let creds = chain.get_credentials(false).await.unwrap();
    assert_eq!(creds.access_key_id(), "WEB:session");
}

#[tokio::test]
async fn default_steps_select_the_named_profile() {
    let env = StaticEnv::new()
        .with("AWS_PROFILE", "ci")
        .with("AWS_ACCESS_KEY_ID", "ENV")
        .with("AWS_SECRET_ACCESS_KEY", "secret");
    let profiles = ProfileSet::new().insert(
        Profile::new("ci")
            .with("aws_access_key_id", "PROFILE")
            .with("aws_secret_access_key", "secret"),
    );
    let chain = FallbackChain::with_defaults(sources(env).profiles(Arc::new(profiles)));

    let creds = chain.get_credentials(false).await.unwrap();
    assert_eq!(creds.access_key_id(), "PROFILE");
}

#[tokio::test]
async fn empty_profile_variable_selects_the_default_profile() {
    let env = StaticEnv::new().with("AWS_PROFILE", "");
    let profiles = ProfileSet::new().insert(
        Profile::new("default")
            .with("aws_access_key_id", "DEFAULT")
            .with("aws_secret_access_key", "secret"),
    );
    let chain = FallbackChain::with_defaults(sources(env).profiles(Arc::new(profiles)));

    let creds = chain.get_credentials(false).await.unwrap();
    assert_eq!(creds.access_key_id(), "DEFAULT");
}

#[tokio::test]
async fn default_steps_use_the_container_endpoint_with_proxy() {
    let env = StaticEnv::new().with("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/creds");
    let factory = Arc::new(RecordingContainerFactory::default());
    let chain = FallbackChain::with_defaults(sources(env).container(factory.clone()));

    assert_eq!(
        chain.get_credentials(false).await.unwrap().access_key_id(),
        "CONTAINER"
    );

    chain.reset(Some(ProxyConfig::parse("http://proxy.internal:3128").unwrap()));
    chain.get_credentials(false).await.unwrap();

    chain.reset(Some(
        ProxyConfig::parse("http://proxy.internal:3128")
            .unwrap()
            .with_bypass(["169.254.170.2"]),
    ));
    chain.get_credentials(false).await.unwrap();

    let calls = factory.calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].0, "http://169.254.170.2/v2/creds");
    assert_eq!(calls[0].1, None);
    assert_eq!(calls[1].1.as_deref(), Some("http://proxy.internal:3128/"));
    assert_eq!(calls[2].1, None);
}

#[tokio::test]
async fn container_endpoint_without_factory_is_an_error() {
    let env = StaticEnv::new().with("AWS_CONTAINER_CREDENTIALS_FULL_URI", "http://localhost/creds");
    let chain = FallbackChain::with_defaults(sources(env));

    match chain.get_credentials(false).await {
        Err(CredentialsError::NoCredentialsFound { errors }) => {
            assert!(matches!(
                errors.last(),
                Some(CredentialsError::NotConfigured { provider: "container", .. })
            ));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_container_settings_fall_through_to_instance_profile() {
    let cache = InstanceProfileCache::new(FakeImds).unwrap();
    let env = StaticEnv::new().inaccessible("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI");

    let handed_out = cache.clone();
    let sources = ChainSources::new(move || Ok(handed_out.clone()))
        .env(Arc::new(env))
        .profiles(Arc::new(ProfileSet::new()))
        .container(Arc::new(RecordingContainerFactory::default()));
    let chain = FallbackChain::with_defaults(sources);

    let creds = chain.get_credentials(false).await.unwrap();
    assert_eq!(creds.access_key_id(), "INSTANCE");

    cache.shutdown().await.unwrap();
}

#[tokio::test]
async fn default_steps_record_every_failure() {
    let chain = FallbackChain::with_defaults(sources(StaticEnv::new()));

    match chain.get_credentials(false).await {
        Err(CredentialsError::NoCredentialsFound { errors }) => {
            let kinds: Vec<_> = errors.iter().map(CredentialsError::kind).collect();
            assert_eq!(
                kinds,
                [
                    "not_configured",
                    "profile_not_found",
                    "not_configured",
                    "service_unavailable"
                ]
            );
            assert!(matches!(
                &errors[1],
                CredentialsError::ProfileNotFound { profile } if profile == "default"
            ));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(chain.get_credentials(true).await.unwrap().is_anonymous());
}

#[tokio::test]
async fn shared_instance_profile_is_created_on_first_use() {
    assert!(InstanceProfileCache::shared().is_none());

    let sources = ChainSources::with_shared_instance_profile(Arc::new(FakeImds))
        .env(Arc::new(StaticEnv::new()))
        .profiles(Arc::new(ProfileSet::new()));
    let chain = FallbackChain::with_defaults(sources);
    assert!(InstanceProfileCache::shared().is_none());

    let creds = chain.get_credentials(false).await.unwrap();
    assert_eq!(creds.access_key_id(), "INSTANCE");
    let shared = InstanceProfileCache::shared().unwrap();

    // A rebuilt chain hands out the same cache.
    chain.reset(None);
    chain.get_credentials(false).await.unwrap();
    assert!(std::ptr::eq(InstanceProfileCache::shared().unwrap(), shared));
}
