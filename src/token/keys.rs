//! Public keys used to verify Google-signed tokens.
//!
//! Keys are published at well-known URLs, either as a map of key id to PEM
//! certificate or as a JWK set, and rotate regularly. [`HttpPublicKeySource`]
//! fetches them on demand and keeps them for the lifetime announced by the
//! response's `Cache-Control: max-age`, minus a clock-skew allowance.

use crate::core::cache::{Freshness, RefreshingCell};
use crate::core::clock::Clock;
use crate::core::error::{ErrorCode, ErrorKind, FirebaseError};
use crate::core::parse_error_response;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::header::{HeaderMap, CACHE_CONTROL};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const ID_TOKEN_CERT_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";
pub const SESSION_COOKIE_CERT_URL: &str =
    "https://www.googleapis.com/identitytoolkit/v3/relyingparty/publicKeys";
pub const APP_CHECK_JWKS_URL: &str = "https://firebaseappcheck.googleapis.com/v1/jwks";

/// Subtracted from the published cache lifetime so keys are refreshed before
/// the issuer stops trusting them.
const CLOCK_SKEW_ALLOWANCE_SECONDS: i64 = 300;

/// An RSA verification key and the `kid` it is published under.
#[derive(Clone)]
pub struct PublicKey {
    pub id: String,
    key: DecodingKey,
}

impl PublicKey {
    /// Parses a PEM X.509 certificate or SubjectPublicKeyInfo public key.
    pub fn from_pem(id: impl Into<String>, pem: &str) -> Result<Self, FirebaseError> {
        let id = id.into();
        let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            FirebaseError::with_kind(
                ErrorCode::Internal,
                ErrorKind::CertificateFetchFailed,
                format!("Failed to parse public key \"{}\": {}", id, e),
            )
            .source_error(e)
        })?;
        Ok(Self { id, key })
    }

    /// Builds a key from base64url-encoded JWK modulus and exponent.
    pub fn from_rsa_components(id: impl Into<String>, n: &str, e: &str) -> Result<Self, FirebaseError> {
        let id = id.into();
        let key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
            FirebaseError::with_kind(
                ErrorCode::Internal,
                ErrorKind::CertificateFetchFailed,
                format!("Failed to parse JWK \"{}\": {}", id, err),
            )
            .source_error(err)
        })?;
        Ok(Self { id, key })
    }

    /// Checks an RS256 signature (base64url, as it appears in the token) over `message`.
    pub fn verify_rs256(&self, message: &[u8], signature: &str) -> bool {
        jsonwebtoken::crypto::verify(signature, message, &self.key, Algorithm::RS256).unwrap_or(false)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Anything that can hand out the current set of verification keys.
#[async_trait]
pub trait PublicKeySource: Send + Sync {
    async fn public_keys(&self) -> Result<Arc<Vec<PublicKey>>, FirebaseError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyDocument {
    JwkSet { keys: Vec<Jwk> },
    Pem(BTreeMap<String, String>),
}

#[derive(Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

fn parse_key_document(body: &str) -> Result<Vec<PublicKey>, FirebaseError> {
    let document: KeyDocument = serde_json::from_str(body).map_err(|e| {
        FirebaseError::with_kind(
            ErrorCode::Internal,
            ErrorKind::CertificateFetchFailed,
            format!("Malformed public key document: {}", e),
        )
        .source_error(e)
    })?;

    match document {
        KeyDocument::Pem(certs) => certs
            .iter()
            .map(|(kid, pem)| PublicKey::from_pem(kid.as_str(), pem))
            .collect(),
        KeyDocument::JwkSet { keys } => keys
            .into_iter()
            .filter(|jwk| jwk.kty == "RSA")
            .filter_map(|jwk| match (jwk.kid, jwk.n, jwk.e) {
                (Some(kid), Some(n), Some(e)) => Some(PublicKey::from_rsa_components(kid, &n, &e)),
                _ => None,
            })
            .collect(),
    }
}

fn parse_max_age(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CACHE_CONTROL)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| {
            s.split(',').find_map(|part| {
                part.trim()
                    .strip_prefix("max-age=")
                    .and_then(|age| age.trim().parse::<u64>().ok())
            })
        })
}

/// Keys expire `max_age` seconds from `now`, less the skew allowance.
/// Lifetimes past what a timestamp can hold count as absent.
fn expiry_after(now: DateTime<Utc>, max_age: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(max_age).ok()?;
    let lifetime = Duration::try_seconds(seconds - CLOCK_SKEW_ALLOWANCE_SECONDS)?;
    now.checked_add_signed(lifetime)
}

/// Fetches keys over HTTP and caches them per URL.
pub struct HttpPublicKeySource {
    client: ClientWithMiddleware,
    url: String,
    clock: Arc<dyn Clock>,
    cache: RefreshingCell<Vec<PublicKey>>,
}

impl HttpPublicKeySource {
    /// `client` should not carry OAuth2 credentials; key endpoints are public.
    pub fn new(client: ClientWithMiddleware, url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            url: url.into(),
            clock,
            cache: RefreshingCell::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<(Vec<PublicKey>, Freshness), FirebaseError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(parse_error_response(response, "Key endpoint returned an error").await);
        }

        let max_age = parse_max_age(response.headers());
        let body = response.text().await?;
        let keys = parse_key_document(&body)?;
        if keys.is_empty() {
            return Err(FirebaseError::new(
                ErrorCode::Internal,
                "Key endpoint returned no public keys",
            ));
        }

        let freshness = match max_age.and_then(|seconds| expiry_after(self.clock.now(), seconds)) {
            Some(expires_at) => Freshness::Until(expires_at),
            None => Freshness::KeepPrevious,
        };

        tracing::debug!(count = keys.len(), ?max_age, "fetched public keys");
        Ok((keys, freshness))
    }
}

#[async_trait]
impl PublicKeySource for HttpPublicKeySource {
    async fn public_keys(&self) -> Result<Arc<Vec<PublicKey>>, FirebaseError> {
        let now = self.clock.now();
        if let Some(keys) = self.cache.get_fresh(now) {
            tracing::debug!(url = %self.url, "public key cache hit");
            return Ok(keys);
        }

        self.cache
            .get_or_refresh(now, || async {
                self.fetch().await.map_err(|e| {
                    tracing::warn!(url = %self.url, error = %e, "public key refresh failed");
                    e.context("Failed to retrieve latest public keys")
                        .kind(ErrorKind::CertificateFetchFailed)
                })
            })
            .await
    }
}

/// A fixed key set, for callers that manage keys themselves.
pub struct StaticPublicKeySource {
    keys: Arc<Vec<PublicKey>>,
}

impl StaticPublicKeySource {
    pub fn new(keys: Vec<PublicKey>) -> Self {
        Self { keys: Arc::new(keys) }
    }
}

#[async_trait]
impl PublicKeySource for StaticPublicKeySource {
    async fn public_keys(&self) -> Result<Arc<Vec<PublicKey>>, FirebaseError> {
        Ok(Arc::clone(&self.keys))
    }
}
