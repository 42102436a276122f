use crate::error::CredentialsError;
use std::sync::Arc;

/// Called immediately before every fetch attempt.
pub type BeforeFetchHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Called with a description and the cause whenever a background refresh fails.
pub type ErrorHook = Arc<dyn Fn(&str, &CredentialsError) + Send + Sync + 'static>;
