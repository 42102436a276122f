//! The instance metadata service capability consumed by [`crate::InstanceProfileCache`].
//!
//! This crate does not speak any metadata wire protocol. Callers plug in a
//! [`MetadataService`] that performs the actual requests.

use crate::credentials::Credentials;
use crate::error::CredentialsError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key material published by the metadata service for one instance role.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct CredentialMaterial {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub token: Option<String>,
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl From<&CredentialMaterial> for Credentials {
    fn from(m: &CredentialMaterial) -> Self {
        Credentials::new(
            m.access_key_id.clone(),
            m.secret_access_key.clone(),
            m.token.clone(),
        )
    }
}

/// Future returned by [`MetadataService::list_security_credential_identities`].
pub type IdentitiesFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<String>, CredentialsError>> + Send + 'a>>;

/// Future returned by [`MetadataService::get_credential_material`].
pub type MaterialFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<CredentialMaterial>, CredentialsError>> + Send + 'a>>;

/// Instance metadata service operations needed to fetch instance role credentials.
pub trait MetadataService: Send + Sync + 'static {
    /// Returns `false` when the metadata service has been disabled for this process.
    fn is_enabled(&self) -> bool;

    /// Lists the instance roles with credentials, in the order the service reports them.
    ///
    /// An empty list means no role is attached.
    fn list_security_credential_identities(&self) -> IdentitiesFuture<'_>;

    /// Fetches key material for `identity`, or `None` when the role has none.
    fn get_credential_material<'a>(&'a self, identity: &'a str) -> MaterialFuture<'a>;
}

/// A shareable metadata service.
pub type SharedMetadataService = Arc<dyn MetadataService>;

/// Performs one fetch against the metadata service: picks the first advertised role and
/// resolves it to credentials.
pub(crate) async fn fetch_credentials(
    service: &dyn MetadataService,
) -> Result<Credentials, CredentialsError> {
    let identities = service.list_security_credential_identities().await?;

    let identity = match identities.into_iter().next() {
        Some(id) if !id.is_empty() => id,
        _ => return Err(CredentialsError::NoIdentity),
    };

    match service.get_credential_material(&identity).await? {
        Some(material) => Ok(Credentials::from(&material)),
        None => Err(CredentialsError::NoCredentialData { identity }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedService {
        roles: Vec<String>,
        material: HashMap<String, CredentialMaterial>,
    }

    impl MetadataService for FixedService {
        fn is_enabled(&self) -> bool {
            true
        }

        fn list_security_credential_identities(&self) -> IdentitiesFuture<'_> {
            let roles = self.roles.clone();
            Box::pin(async move { Ok(roles) })
        }

        fn get_credential_material<'a>(&'a self, identity: &'a str) -> MaterialFuture<'a> {
            Box::pin(async move { Ok(self.material.get(identity).cloned()) })
        }
    }

    fn material(akid: &str) -> CredentialMaterial {
        CredentialMaterial {
            access_key_id: akid.to_string(),
            secret_access_key: "secret".to_string(),
            token: Some("token".to_string()),
        }
    }

    #[tokio::test]
    async fn picks_first_identity() {
        let service = FixedService {
            roles: vec!["first".to_string(), "second".to_string()],
            material: HashMap::from([
                ("first".to_string(), material("AKID1")),
                ("second".to_string(), material("AKID2")),
            ]),
        };

        let creds = fetch_credentials(&service).await.unwrap();
        assert_eq!(creds.access_key_id(), "AKID1");
        assert_eq!(creds.session_token(), Some("token"));
    }

    #[tokio::test]
    async fn no_identity() {
        let service = FixedService {
            roles: vec![],
            material: HashMap::new(),
        };
        assert!(matches!(
            fetch_credentials(&service).await,
            Err(CredentialsError::NoIdentity)
        ));

        let service = FixedService {
            roles: vec![String::new()],
            material: HashMap::new(),
        };
        assert!(matches!(
            fetch_credentials(&service).await,
            Err(CredentialsError::NoIdentity)
        ));
    }

    #[tokio::test]
    async fn identity_without_material() {
        let service = FixedService {
            roles: vec!["role".to_string()],
            material: HashMap::new(),
        };
        match fetch_credentials(&service).await {
            Err(CredentialsError::NoCredentialData { identity }) => assert_eq!(identity, "role"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
