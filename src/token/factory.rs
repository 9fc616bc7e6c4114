//! Minting of signed custom tokens.
//!
//! Custom tokens are short-lived RS256 JWTs signed by the app's service
//! account. Clients exchange them with Firebase Authentication (user custom
//! tokens) or App Check (App Check custom tokens) for real credentials.

use crate::core::clock::Clock;
use crate::core::error::{ErrorCode, ErrorKind, FirebaseError};
use crate::token::codec;
use crate::token::signer::CryptoSigner;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Audience of user custom tokens: the Identity Toolkit token exchange.
pub const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

/// Audience of App Check custom tokens: the App Check token exchange.
pub const APP_CHECK_AUDIENCE: &str =
    "https://firebaseappcheck.googleapis.com/google.firebase.appcheck.v1.TokenExchangeService";

/// Claims that Firebase sets itself and callers may not override.
pub const RESERVED_CLAIMS: &[&str] = &[
    "acr", "amr", "at_hash", "aud", "auth_time", "azp", "cnf", "c_hash", "exp", "firebase",
    "iat", "iss", "jti", "nbf", "nonce", "sub",
];

pub const MAX_UID_LENGTH: usize = 128;
const CUSTOM_TOKEN_LIFETIME_SECONDS: i64 = 60 * 60;
const APP_CHECK_CUSTOM_TOKEN_LIFETIME_SECONDS: i64 = 5 * 60;
pub const APP_CHECK_MIN_TTL_MILLIS: u64 = 30 * 60 * 1000;
pub const APP_CHECK_MAX_TTL_MILLIS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Developer claims attached to a custom token.
pub type CustomClaims = Map<String, Value>;

#[derive(Serialize)]
struct JwtHeader {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Serialize)]
struct CustomTokenPayload<'a> {
    aud: &'static str,
    iat: i64,
    exp: i64,
    iss: &'a str,
    sub: &'a str,
    uid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<&'a CustomClaims>,
}

#[derive(Serialize)]
struct AppCheckTokenPayload<'a> {
    iss: &'a str,
    sub: &'a str,
    app_id: &'a str,
    aud: &'static str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
}

/// Options for [`TokenFactory::create_app_check_custom_token`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppCheckTokenOptions {
    /// Lifetime of the App Check token the custom token is exchanged for,
    /// between 30 minutes and 7 days.
    pub ttl_millis: Option<u64>,
}

pub(crate) fn validate_uid(uid: &str) -> Result<(), FirebaseError> {
    if uid.is_empty() {
        return Err(FirebaseError::invalid_argument(
            ErrorKind::InvalidUid,
            "`uid` argument must be a non-empty string uid.",
        ));
    }
    if uid.chars().count() > MAX_UID_LENGTH {
        return Err(FirebaseError::invalid_argument(
            ErrorKind::InvalidUid,
            format!("`uid` argument must be a uid with less than or equal to {} characters.", MAX_UID_LENGTH),
        ));
    }
    Ok(())
}

pub(crate) fn validate_claims(claims: &CustomClaims) -> Result<(), FirebaseError> {
    if let Some(reserved) = claims.keys().find(|key| RESERVED_CLAIMS.contains(&key.as_str())) {
        return Err(FirebaseError::invalid_argument(
            ErrorKind::ReservedClaim,
            format!("Developer claim \"{}\" is reserved and cannot be specified.", reserved),
        ));
    }
    Ok(())
}

pub(crate) fn validate_tenant_id(tenant_id: Option<&str>) -> Result<(), FirebaseError> {
    if tenant_id == Some("") {
        return Err(FirebaseError::configuration(
            ErrorKind::InvalidTenantId,
            "`tenantId` argument must be a non-empty string.",
        ));
    }
    Ok(())
}

fn validate_app_check_options(app_id: &str, options: &AppCheckTokenOptions) -> Result<(), FirebaseError> {
    if app_id.is_empty() {
        return Err(FirebaseError::invalid_argument(
            ErrorKind::InvalidAppId,
            "`appId` must be a non-empty string.",
        ));
    }
    if let Some(ttl) = options.ttl_millis {
        if !(APP_CHECK_MIN_TTL_MILLIS..=APP_CHECK_MAX_TTL_MILLIS).contains(&ttl) {
            return Err(FirebaseError::invalid_argument(
                ErrorKind::InvalidTtl,
                "ttlMillis must be a duration in milliseconds between 30 minutes and 7 days (inclusive).",
            ));
        }
    }
    Ok(())
}

/// Builds and signs custom tokens with one signer.
pub struct TokenFactory {
    signer: Arc<dyn CryptoSigner>,
    clock: Arc<dyn Clock>,
    tenant_id: Option<String>,
}

impl TokenFactory {
    /// Fails when `tenant_id` is `Some("")`; `None` means the top-level project.
    pub fn new(
        signer: Arc<dyn CryptoSigner>,
        clock: Arc<dyn Clock>,
        tenant_id: Option<String>,
    ) -> Result<Self, FirebaseError> {
        validate_tenant_id(tenant_id.as_deref())?;
        Ok(Self {
            signer,
            clock,
            tenant_id,
        })
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn signer(&self) -> &Arc<dyn CryptoSigner> {
        &self.signer
    }

    /// Mints a token that signs a client in as `uid`.
    ///
    /// `claims` become the `claims` object of the token and later appear in
    /// the ID tokens of the user; empty claims are omitted.
    pub async fn create_custom_token(
        &self,
        uid: &str,
        claims: Option<&CustomClaims>,
    ) -> Result<String, FirebaseError> {
        validate_uid(uid)?;
        if let Some(claims) = claims {
            validate_claims(claims)?;
        }

        let account = self.signer.key_id().await?;
        let iat = self.clock.now_seconds();
        let payload = CustomTokenPayload {
            aud: CUSTOM_TOKEN_AUDIENCE,
            iat,
            exp: iat + CUSTOM_TOKEN_LIFETIME_SECONDS,
            iss: &account,
            sub: &account,
            uid,
            tenant_id: self.tenant_id.as_deref(),
            claims: claims.filter(|c| !c.is_empty()),
        };

        self.sign_jwt(&payload).await
    }

    /// Mints a token that a client exchanges for an App Check token of `app_id`.
    pub async fn create_app_check_custom_token(
        &self,
        app_id: &str,
        options: &AppCheckTokenOptions,
    ) -> Result<String, FirebaseError> {
        validate_app_check_options(app_id, options)?;

        let account = self.signer.key_id().await?;
        let iat = self.clock.now_seconds();
        let ttl_seconds = options.ttl_millis.map(|ms| (ms / 1000) as i64);
        let payload = AppCheckTokenPayload {
            iss: &account,
            sub: &account,
            app_id,
            aud: APP_CHECK_AUDIENCE,
            iat,
            exp: iat + ttl_seconds.unwrap_or(APP_CHECK_CUSTOM_TOKEN_LIFETIME_SECONDS),
            ttl: ttl_seconds.map(|s| format!("{}s", s)),
        };

        self.sign_jwt(&payload).await
    }

    async fn sign_jwt<P: Serialize>(&self, payload: &P) -> Result<String, FirebaseError> {
        let header = JwtHeader {
            alg: self.signer.algorithm(),
            typ: "JWT",
        };
        let input = codec::signing_input(&header, payload).map_err(|e| {
            FirebaseError::new(ErrorCode::Internal, format!("Failed to encode token: {}", e)).source_error(e)
        })?;

        let signature = self.signer.sign(input.as_bytes()).await.map_err(|e| {
            tracing::warn!(error = %e, "custom token signing failed");
            e
        })?;
        Ok(codec::assemble(&input, &signature))
    }
}
