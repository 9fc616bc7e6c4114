//! Firebase Admin token services.
//!
//! A [`FirebaseApp`] holds the credential, project id, transports and key
//! caches shared by the services it hands out:
//!
//! * [`FirebaseApp::auth`] mints custom tokens and verifies ID tokens and
//!   session cookies, optionally scoped to a tenant.
//! * [`FirebaseApp::app_check`] mints and verifies App Check tokens.

#[cfg(feature = "app_check")]
pub mod app_check;
#[cfg(feature = "auth")]
pub mod auth;
pub mod core;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "app_check")]
use app_check::{AppCheckContext, FirebaseAppCheck};
#[cfg(feature = "auth")]
use auth::{AuthContext, FirebaseAuth};
use crate::core::clock::{Clock, SystemClock};
use crate::core::http::build_client;
use crate::core::middleware::{AccessTokenProvider, AuthMiddleware, ServiceAccountTokenProvider};
use crate::token::keys::{HttpPublicKeySource, APP_CHECK_JWKS_URL, ID_TOKEN_CERT_URL, SESSION_COOKIE_CERT_URL};
use crate::token::signer::{CryptoSigner, IamSigner, ServiceAccountId, ServiceAccountSigner};
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use yup_oauth2::ServiceAccountKey;

pub use crate::core::error::{ErrorCode, ErrorKind, FirebaseError};
pub use crate::core::http::HttpOptions;

const PROJECT_ID_ENV_VARS: &[&str] = &["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];

/// How the app authenticates to Google APIs.
#[derive(Clone)]
pub enum Credential {
    /// A service-account key. Tokens are signed locally with its private key.
    ServiceAccount(ServiceAccountKey),
    /// Any other source of OAuth2 access tokens. Tokens are signed through IAM.
    AccessToken(Arc<dyn AccessTokenProvider>),
}

#[derive(Clone)]
pub struct AppOptions {
    pub credential: Credential,
    pub project_id: Option<String>,
    /// Account used for IAM signing when the credential has no private key.
    /// Discovered from the metadata server when unset.
    pub service_account_id: Option<String>,
    pub http: HttpOptions,
}

impl AppOptions {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            project_id: None,
            service_account_id: None,
            http: HttpOptions::default(),
        }
    }
}

/// Explicit option, then the service-account key, then the environment.
fn resolve_project_id<F>(options: &AppOptions, env: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let from_key = match &options.credential {
        Credential::ServiceAccount(key) => key.project_id.clone(),
        Credential::AccessToken(_) => None,
    };
    options
        .project_id
        .clone()
        .or(from_key)
        .or_else(|| PROJECT_ID_ENV_VARS.iter().find_map(|name| env(name)))
        .filter(|id| !id.is_empty())
}

struct KeySources {
    id_token: Arc<HttpPublicKeySource>,
    session_cookie: Arc<HttpPublicKeySource>,
    app_check: Arc<HttpPublicKeySource>,
}

impl KeySources {
    fn new(client: &ClientWithMiddleware, clock: &Arc<dyn Clock>) -> Self {
        let source = |url: &str| Arc::new(HttpPublicKeySource::new(client.clone(), url, clock.clone()));
        Self {
            id_token: source(ID_TOKEN_CERT_URL),
            session_cookie: source(SESSION_COOKIE_CERT_URL),
            app_check: source(APP_CHECK_JWKS_URL),
        }
    }
}

pub struct FirebaseApp {
    project_id: Option<String>,
    client: ClientWithMiddleware,
    public_client: ClientWithMiddleware,
    signer: Arc<dyn CryptoSigner>,
    clock: Arc<dyn Clock>,
    keys: KeySources,
}

impl FirebaseApp {
    pub fn new(service_account_key: ServiceAccountKey) -> Result<Self, FirebaseError> {
        Self::with_options(AppOptions::new(Credential::ServiceAccount(service_account_key)))
    }

    /// Validates the credential and builds transports. Performs no I/O.
    pub fn with_options(options: AppOptions) -> Result<Self, FirebaseError> {
        let project_id = resolve_project_id(&options, |name| std::env::var(name).ok());

        let provider: Arc<dyn AccessTokenProvider> = match &options.credential {
            Credential::ServiceAccount(key) => Arc::new(ServiceAccountTokenProvider::new(key.clone())),
            Credential::AccessToken(provider) => provider.clone(),
        };
        let client = build_client(&options.http, Some(AuthMiddleware::new(provider)))?;
        let public_client = build_client(&options.http, None)?;

        let signer: Arc<dyn CryptoSigner> = match &options.credential {
            Credential::ServiceAccount(key) => Arc::new(ServiceAccountSigner::new(key)?),
            Credential::AccessToken(_) => {
                let account = match options.service_account_id.clone() {
                    Some(id) if id.is_empty() => {
                        return Err(FirebaseError::configuration(
                            ErrorKind::InvalidCredential,
                            "service_account_id must be a non-empty string",
                        ));
                    }
                    Some(id) => ServiceAccountId::Fixed(id),
                    None => ServiceAccountId::Discover,
                };
                Arc::new(IamSigner::new(client.clone(), public_client.clone(), account))
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        tracing::debug!(project_id = ?project_id, "initialized Firebase app");
        Ok(Self {
            project_id,
            keys: KeySources::new(&public_client, &clock),
            client,
            public_client,
            signer,
            clock,
        })
    }

    /// Replaces the clock used for token timestamps and key expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.keys = KeySources::new(&self.public_client, &clock);
        self.clock = clock;
        self
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn signer(&self) -> &Arc<dyn CryptoSigner> {
        &self.signer
    }

    fn require_project_id(&self, service: &str) -> Result<String, FirebaseError> {
        self.project_id.clone().ok_or_else(|| {
            FirebaseError::configuration(
                ErrorKind::MissingProjectId,
                format!(
                    "Failed to determine project ID for {}. Initialize the SDK with service account \
                     credentials or set project ID as an app option. Alternatively set the \
                     GOOGLE_CLOUD_PROJECT environment variable.",
                    service
                ),
            )
        })
    }

    #[cfg(feature = "auth")]
    pub fn auth(&self) -> Result<FirebaseAuth, FirebaseError> {
        FirebaseAuth::new(AuthContext {
            client: self.client.clone(),
            project_id: self.require_project_id("Auth")?,
            signer: self.signer.clone(),
            clock: self.clock.clone(),
            id_token_keys: self.keys.id_token.clone(),
            session_cookie_keys: self.keys.session_cookie.clone(),
        })
    }

    #[cfg(feature = "app_check")]
    pub fn app_check(&self) -> Result<FirebaseAppCheck, FirebaseError> {
        FirebaseAppCheck::new(AppCheckContext {
            client: self.client.clone(),
            project_id: self.require_project_id("App Check")?,
            signer: self.signer.clone(),
            clock: self.clock.clone(),
            keys: self.keys.app_check.clone(),
        })
    }
}
