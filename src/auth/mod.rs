//! Firebase Authentication token services.
//!
//! [`FirebaseAuth`] mints custom tokens, verifies ID tokens and session
//! cookies, and exchanges ID tokens for session cookies. [`TenantAwareAuth`]
//! does the same within a single Identity Platform tenant.

use crate::core::cancel::run_cancellable;
use crate::core::clock::Clock;
use crate::core::error::{ErrorCode, ErrorKind, FirebaseError};
use crate::core::{encode_path_segment, parse_error_response, FirebaseErrorResponse};
use crate::token::factory::{validate_tenant_id, CustomClaims, TokenFactory};
use crate::token::keys::PublicKeySource;
use crate::token::signer::CryptoSigner;
use crate::token::verifier::{TokenClaims, TokenVerifier, VerifierConfig};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;


const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

pub const MIN_SESSION_COOKIE_DURATION: Duration = Duration::from_secs(5 * 60);
pub const MAX_SESSION_COOKIE_DURATION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Verified ID token claims.
pub type DecodedIdToken = TokenClaims;

/// Everything a [`FirebaseAuth`] needs, assembled by [`crate::FirebaseApp`].
#[derive(Clone)]
pub struct AuthContext {
    pub client: ClientWithMiddleware,
    pub project_id: String,
    pub signer: Arc<dyn CryptoSigner>,
    pub clock: Arc<dyn Clock>,
    pub id_token_keys: Arc<dyn PublicKeySource>,
    pub session_cookie_keys: Arc<dyn PublicKeySource>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionCookieRequest<'a> {
    id_token: &'a str,
    valid_duration: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionCookieResponse {
    session_cookie: Option<String>,
}

/// Maps an Identity Toolkit server error code to a domain kind.
fn kind_for_server_code(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "INVALID_ID_TOKEN" => ErrorKind::InvalidIdToken,
        "TOKEN_EXPIRED" => ErrorKind::ExpiredIdToken,
        "USER_NOT_FOUND" => ErrorKind::UserNotFound,
        "USER_DISABLED" => ErrorKind::UserDisabled,
        "TENANT_NOT_FOUND" => ErrorKind::TenantNotFound,
        "TENANT_ID_MISMATCH" => ErrorKind::TenantIdMismatch,
        "INVALID_TENANT_ID" => ErrorKind::InvalidTenantId,
        "INVALID_SESSION_COOKIE_DURATION" => ErrorKind::InvalidSessionCookieDuration,
        "PROJECT_NOT_FOUND" | "CONFIGURATION_NOT_FOUND" => ErrorKind::ProjectNotFound,
        _ => return None,
    };
    Some(kind)
}

/// Attaches the Identity Toolkit error kind carried in the response body, if any.
fn with_server_kind(err: FirebaseError) -> FirebaseError {
    let kind = err
        .http_response()
        .and_then(|resp| serde_json::from_str::<FirebaseErrorResponse>(&resp.body).ok())
        .and_then(|body| kind_for_server_code(body.server_code()));
    match kind {
        Some(kind) => err.kind(kind),
        None => err,
    }
}

#[derive(Clone)]
pub struct FirebaseAuth {
    client: ClientWithMiddleware,
    base_url: String,
    tenant_id: Option<String>,
    factory: Arc<TokenFactory>,
    id_token_verifier: Arc<TokenVerifier>,
    session_cookie_verifier: Arc<TokenVerifier>,
    context: AuthContext,
}

impl FirebaseAuth {
    pub fn new(context: AuthContext) -> Result<Self, FirebaseError> {
        let base_url = format!("{}/projects/{}", IDENTITY_TOOLKIT_URL, context.project_id);
        Self::new_with_url(context, base_url)
    }

    /// Like [`new`](Self::new) but with an explicit Identity Toolkit project URL,
    /// e.g. a mock server.
    pub fn new_with_url(context: AuthContext, base_url: impl Into<String>) -> Result<Self, FirebaseError> {
        Self::build(context, base_url.into(), None)
    }

    fn build(context: AuthContext, base_url: String, tenant_id: Option<String>) -> Result<Self, FirebaseError> {
        let factory = TokenFactory::new(context.signer.clone(), context.clock.clone(), tenant_id.clone())?;
        let id_token_verifier = TokenVerifier::new(
            VerifierConfig::id_token(&context.project_id),
            context.id_token_keys.clone(),
            context.clock.clone(),
        )?;
        let session_cookie_verifier = TokenVerifier::new(
            VerifierConfig::session_cookie(&context.project_id),
            context.session_cookie_keys.clone(),
            context.clock.clone(),
        )?;

        Ok(Self {
            client: context.client.clone(),
            base_url,
            tenant_id,
            factory: Arc::new(factory),
            id_token_verifier: Arc::new(id_token_verifier),
            session_cookie_verifier: Arc::new(session_cookie_verifier),
            context,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.context.project_id
    }

    /// Scopes token operations to one tenant.
    ///
    /// Key caches are shared with this instance.
    pub fn for_tenant(&self, tenant_id: &str) -> Result<TenantAwareAuth, FirebaseError> {
        validate_tenant_id(Some(tenant_id))?;
        let auth = Self::build(self.context.clone(), self.base_url.clone(), Some(tenant_id.to_string()))?;
        Ok(TenantAwareAuth { auth })
    }

    /// Mints a custom token for `uid`, optionally carrying developer claims.
    pub async fn create_custom_token(
        &self,
        uid: &str,
        claims: Option<&CustomClaims>,
    ) -> Result<String, FirebaseError> {
        self.factory.create_custom_token(uid, claims).await
    }

    pub async fn verify_id_token(&self, id_token: &str) -> Result<DecodedIdToken, FirebaseError> {
        let claims = self.id_token_verifier.verify(id_token).await?;
        self.check_tenant(claims)
    }

    pub async fn verify_id_token_with_cancellation(
        &self,
        id_token: &str,
        cancel: &CancellationToken,
    ) -> Result<DecodedIdToken, FirebaseError> {
        run_cancellable(cancel, self.verify_id_token(id_token)).await
    }

    pub async fn verify_session_cookie(&self, session_cookie: &str) -> Result<DecodedIdToken, FirebaseError> {
        let claims = self.session_cookie_verifier.verify(session_cookie).await?;
        self.check_tenant(claims)
    }

    pub async fn verify_session_cookie_with_cancellation(
        &self,
        session_cookie: &str,
        cancel: &CancellationToken,
    ) -> Result<DecodedIdToken, FirebaseError> {
        run_cancellable(cancel, self.verify_session_cookie(session_cookie)).await
    }

    /// Exchanges an ID token for a session cookie valid for `expires_in`,
    /// between 5 minutes and 14 days.
    #[tracing::instrument(skip(self, id_token), fields(tenant_id = ?self.tenant_id))]
    pub async fn create_session_cookie(
        &self,
        id_token: &str,
        expires_in: Duration,
    ) -> Result<String, FirebaseError> {
        if id_token.is_empty() {
            return Err(FirebaseError::invalid_argument(
                ErrorKind::InvalidIdToken,
                "The provided ID token must be a non-empty string.",
            ));
        }
        if !(MIN_SESSION_COOKIE_DURATION..=MAX_SESSION_COOKIE_DURATION).contains(&expires_in) {
            return Err(FirebaseError::invalid_argument(
                ErrorKind::InvalidSessionCookieDuration,
                "The session cookie duration must be between 5 minutes and 14 days.",
            ));
        }
        if self.tenant_id.is_some() {
            // Fails fast on tokens of another tenant.
            self.verify_id_token(id_token).await?;
        }

        let url = format!("{}:createSessionCookie", self.scoped_url());
        let request = CreateSessionCookieRequest {
            id_token,
            valid_duration: expires_in.as_secs(),
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = with_server_kind(parse_error_response(response, "Failed to create session cookie").await);
            tracing::warn!(error = %err, "createSessionCookie failed");
            return Err(err);
        }

        let body: CreateSessionCookieResponse = response.json().await?;
        match body.session_cookie {
            Some(cookie) if !cookie.is_empty() => Ok(cookie),
            _ => Err(FirebaseError::new(
                ErrorCode::Internal,
                "Failed to create session cookie: response is missing \"sessionCookie\"",
            )),
        }
    }

    fn scoped_url(&self) -> String {
        match &self.tenant_id {
            Some(tenant_id) => format!("{}/tenants/{}", self.base_url, encode_path_segment(tenant_id)),
            None => self.base_url.clone(),
        }
    }

    fn check_tenant(&self, claims: TokenClaims) -> Result<TokenClaims, FirebaseError> {
        if let Some(expected) = &self.tenant_id {
            if claims.tenant() != Some(expected.as_str()) {
                return Err(FirebaseError::with_kind(
                    ErrorCode::InvalidArgument,
                    ErrorKind::TenantIdMismatch,
                    "The provided token does not match the tenant ID.",
                ));
            }
        }
        Ok(claims)
    }
}

/// [`FirebaseAuth`] restricted to one tenant.
///
/// Minted tokens carry `tenant_id`, and verified tokens must have been issued
/// for the same tenant (`firebase.tenant`).
#[derive(Clone)]
pub struct TenantAwareAuth {
    auth: FirebaseAuth,
}

impl TenantAwareAuth {
    pub fn tenant_id(&self) -> &str {
        self.auth.tenant_id.as_deref().unwrap_or_default()
    }

    pub async fn create_custom_token(
        &self,
        uid: &str,
        claims: Option<&CustomClaims>,
    ) -> Result<String, FirebaseError> {
        self.auth.create_custom_token(uid, claims).await
    }

    pub async fn verify_id_token(&self, id_token: &str) -> Result<DecodedIdToken, FirebaseError> {
        self.auth.verify_id_token(id_token).await
    }

    pub async fn verify_id_token_with_cancellation(
        &self,
        id_token: &str,
        cancel: &CancellationToken,
    ) -> Result<DecodedIdToken, FirebaseError> {
        self.auth.verify_id_token_with_cancellation(id_token, cancel).await
    }

    pub async fn verify_session_cookie(&self, session_cookie: &str) -> Result<DecodedIdToken, FirebaseError> {
        self.auth.verify_session_cookie(session_cookie).await
    }

    pub async fn verify_session_cookie_with_cancellation(
        &self,
        session_cookie: &str,
        cancel: &CancellationToken,
    ) -> Result<DecodedIdToken, FirebaseError> {
        self.auth
            .verify_session_cookie_with_cancellation(session_cookie, cancel)
            .await
    }

    pub async fn create_session_cookie(
        &self,
        id_token: &str,
        expires_in: Duration,
    ) -> Result<String, FirebaseError> {
        self.auth.create_session_cookie(id_token, expires_in).await
    }
}
