//! Signing backends for minted tokens.
//!
//! A [`CryptoSigner`] is picked once, when a service is created, from the
//! credential the app was initialized with:
//!
//! * [`ServiceAccountSigner`] signs locally with the private key of a
//!   service-account credential.
//! * [`IamSigner`] delegates to the IAM Credentials `signBlob` API, using
//!   either a configured service-account id or one discovered from the
//!   metadata server.

use crate::core::cache::{Freshness, RefreshingCell};
use crate::core::error::{ErrorCode, ErrorKind, FirebaseError};
use crate::core::{encode_path_segment, parse_error_response};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use yup_oauth2::ServiceAccountKey;

const IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com/v1";
const METADATA_SERVICE_ACCOUNT_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/email";

/// Produces RS256 signatures and names the account that produced them.
#[async_trait]
pub trait CryptoSigner: Send + Sync {
    /// The JWS `alg` of signatures produced by this signer.
    fn algorithm(&self) -> &'static str {
        "RS256"
    }

    /// The identity of the signer, used as `iss` and `sub` of minted tokens.
    async fn key_id(&self) -> Result<String, FirebaseError>;

    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, FirebaseError>;
}

/// Signs with a service-account private key held in memory.
///
/// The key material is zeroed when the signer is dropped.
pub struct ServiceAccountSigner {
    client_email: String,
    key: SigningKey<Sha256>,
}

impl ServiceAccountSigner {
    pub fn new(key: &ServiceAccountKey) -> Result<Self, FirebaseError> {
        Self::from_pem(&key.client_email, &key.private_key)
    }

    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
    pub fn from_pem(client_email: &str, pem: &str) -> Result<Self, FirebaseError> {
        if client_email.is_empty() {
            return Err(FirebaseError::configuration(
                ErrorKind::InvalidCredential,
                "Service account key must contain a \"client_email\" field",
            ));
        }

        let private_key = match RsaPrivateKey::from_pkcs8_pem(pem) {
            Ok(key) => key,
            Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(pem).map_err(|_| {
                FirebaseError::configuration(
                    ErrorKind::InvalidCredential,
                    format!("Failed to parse service account private key: {}", pkcs8_err),
                )
                .source_error(pkcs8_err)
            })?,
        };

        Ok(Self {
            client_email: client_email.to_string(),
            key: SigningKey::<Sha256>::new(private_key),
        })
    }
}

impl fmt::Debug for ServiceAccountSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountSigner")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CryptoSigner for ServiceAccountSigner {
    async fn key_id(&self) -> Result<String, FirebaseError> {
        Ok(self.client_email.clone())
    }

    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, FirebaseError> {
        let signature = self.key.try_sign(data).map_err(|e| {
            FirebaseError::with_kind(
                ErrorCode::Internal,
                ErrorKind::SigningFailed,
                format!("Failed to sign data with the service account key: {}", e),
            )
            .source_error(e)
        })?;
        Ok(signature.to_vec())
    }
}

/// Which service account the IAM signer acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAccountId {
    Fixed(String),
    /// Ask the metadata server once and remember the answer, or the failure.
    Discover,
}

#[derive(Serialize)]
struct SignBlobRequest {
    payload: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

/// Signs through the IAM Credentials `signBlob` endpoint.
pub struct IamSigner {
    client: ClientWithMiddleware,
    metadata_client: ClientWithMiddleware,
    service_account: ServiceAccountId,
    iam_base_url: String,
    metadata_url: String,
    /// The first discovery outcome, failures included, is final.
    discovered: RefreshingCell<Result<String, FirebaseError>>,
}

impl IamSigner {
    /// `client` must carry OAuth2 credentials; `metadata_client` must not.
    pub fn new(
        client: ClientWithMiddleware,
        metadata_client: ClientWithMiddleware,
        service_account: ServiceAccountId,
    ) -> Self {
        Self::new_with_urls(
            client,
            metadata_client,
            service_account,
            IAM_CREDENTIALS_URL.to_string(),
            METADATA_SERVICE_ACCOUNT_URL.to_string(),
        )
    }

    pub(crate) fn new_with_urls(
        client: ClientWithMiddleware,
        metadata_client: ClientWithMiddleware,
        service_account: ServiceAccountId,
        iam_base_url: String,
        metadata_url: String,
    ) -> Self {
        Self {
            client,
            metadata_client,
            service_account,
            iam_base_url,
            metadata_url,
            discovered: RefreshingCell::new(),
        }
    }

    fn sign_blob_url(&self, account: &str) -> String {
        format!(
            "{}/projects/-/serviceAccounts/{}:signBlob",
            self.iam_base_url,
            encode_path_segment(account)
        )
    }

    #[tracing::instrument(skip(self))]
    async fn discover_service_account(&self) -> Result<String, FirebaseError> {
        let response = self
            .metadata_client
            .get(&self.metadata_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(parse_error_response(response, "Metadata server request failed").await);
        }

        let email = response.text().await?.trim().to_string();
        if email.is_empty() {
            return Err(FirebaseError::new(
                ErrorCode::Internal,
                "Metadata server returned an empty service account",
            ));
        }

        tracing::debug!(service_account = %email, "discovered service account");
        Ok(email)
    }
}

#[async_trait]
impl CryptoSigner for IamSigner {
    async fn key_id(&self) -> Result<String, FirebaseError> {
        match &self.service_account {
            ServiceAccountId::Fixed(id) => Ok(id.clone()),
            ServiceAccountId::Discover => {
                let outcome = self
                    .discovered
                    .get_or_refresh(Utc::now(), || async {
                        let outcome = self.discover_service_account().await.map_err(|e| {
                            tracing::warn!(error = %e, "service account discovery failed");
                            FirebaseError::configuration(
                                ErrorKind::InvalidCredential,
                                format!(
                                    "Failed to determine service account. Make sure to initialize the SDK \
                                     with a service account credential. Alternatively specify a service \
                                     account with iam.serviceAccounts.signBlob permission. Original error: {}",
                                    e
                                ),
                            )
                            .source_error(e)
                        });
                        Ok((outcome, Freshness::Forever))
                    })
                    .await?;
                (*outcome).clone()
            }
        }
    }

    #[tracing::instrument(skip(self, data), fields(len = data.len()))]
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, FirebaseError> {
        let account = self.key_id().await?;
        let url = self.sign_blob_url(&account);
        let request = SignBlobRequest {
            payload: STANDARD.encode(data),
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await
            .map_err(|e| FirebaseError::from(e).kind(ErrorKind::SigningFailed))?;

        if !response.status().is_success() {
            let err = parse_error_response(response, "Failed to sign data using IAM").await;
            tracing::warn!(error = %err, "signBlob request failed");
            return Err(err.kind(ErrorKind::SigningFailed));
        }

        let body: SignBlobResponse = response
            .json()
            .await
            .map_err(|e| FirebaseError::from(e).kind(ErrorKind::SigningFailed))?;

        STANDARD.decode(body.signed_blob.as_bytes()).map_err(|e| {
            FirebaseError::with_kind(
                ErrorCode::Internal,
                ErrorKind::SigningFailed,
                format!("signBlob returned a malformed signature: {}", e),
            )
            .source_error(e)
        })
    }
}
