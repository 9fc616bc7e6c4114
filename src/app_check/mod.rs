//! Firebase App Check: minting App Check tokens for custom attestation
//! providers and verifying tokens presented by client apps.

use crate::core::cancel::run_cancellable;
use crate::core::clock::Clock;
use crate::core::error::{ErrorCode, FirebaseError};
use crate::core::parse_error_response;
use crate::token::factory::{AppCheckTokenOptions, TokenFactory};
use crate::token::keys::PublicKeySource;
use crate::token::signer::CryptoSigner;
use crate::token::verifier::{TokenClaims, TokenVerifier, VerifierConfig};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;

const APP_CHECK_URL: &str = "https://firebaseappcheck.googleapis.com/v1";

/// Everything a [`FirebaseAppCheck`] needs, assembled by [`crate::FirebaseApp`].
#[derive(Clone)]
pub struct AppCheckContext {
    pub client: ClientWithMiddleware,
    pub project_id: String,
    pub signer: Arc<dyn CryptoSigner>,
    pub clock: Arc<dyn Clock>,
    pub keys: Arc<dyn PublicKeySource>,
}

/// An App Check token and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCheckToken {
    pub token: String,
    pub ttl_millis: u64,
}

/// A verified App Check token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedAppCheckToken {
    /// The app the token was issued to (its `sub` claim).
    pub app_id: String,
    pub token: TokenClaims,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeCustomTokenRequest<'a> {
    custom_token: &'a str,
}

#[derive(Deserialize)]
struct ExchangeCustomTokenResponse {
    token: String,
    ttl: String,
}

/// Parses a protobuf duration string such as `"3600s"` or `"1.5s"`.
fn duration_string_to_millis(duration: &str) -> Result<u64, FirebaseError> {
    let invalid = || {
        FirebaseError::new(
            ErrorCode::Internal,
            format!("`ttl` must be a valid duration string with the suffix `s`, got \"{}\"", duration),
        )
    };
    let seconds: f64 = duration
        .strip_suffix('s')
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid());
    }
    Ok((seconds * 1000.0).round() as u64)
}

pub struct FirebaseAppCheck {
    client: ClientWithMiddleware,
    base_url: String,
    factory: TokenFactory,
    verifier: TokenVerifier,
}

impl FirebaseAppCheck {
    pub fn new(context: AppCheckContext) -> Result<Self, FirebaseError> {
        let base_url = format!("{}/projects/{}", APP_CHECK_URL, context.project_id);
        Self::new_with_url(context, base_url)
    }

    pub fn new_with_url(context: AppCheckContext, base_url: impl Into<String>) -> Result<Self, FirebaseError> {
        let factory = TokenFactory::new(context.signer, context.clock.clone(), None)?;
        let verifier = TokenVerifier::new(
            VerifierConfig::app_check(&context.project_id),
            context.keys,
            context.clock,
        )?;
        Ok(Self {
            client: context.client,
            base_url: base_url.into(),
            factory,
            verifier,
        })
    }

    /// Mints an App Check token for `app_id`.
    ///
    /// A signed custom token is exchanged with the App Check backend, which
    /// returns the real token.
    #[tracing::instrument(skip(self, options))]
    pub async fn create_token(
        &self,
        app_id: &str,
        options: &AppCheckTokenOptions,
    ) -> Result<AppCheckToken, FirebaseError> {
        let custom_token = self.factory.create_app_check_custom_token(app_id, options).await?;

        let url = format!("{}/apps/{}:exchangeCustomToken", self.base_url, app_id);
        let request = ExchangeCustomTokenRequest {
            custom_token: &custom_token,
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = parse_error_response(response, "Failed to exchange App Check custom token").await;
            tracing::warn!(error = %err, "exchangeCustomToken failed");
            return Err(err);
        }

        let body: ExchangeCustomTokenResponse = response.json().await?;
        let ttl_millis = duration_string_to_millis(&body.ttl)?;
        Ok(AppCheckToken {
            token: body.token,
            ttl_millis,
        })
    }

    /// Verifies an App Check token issued to any app of this project.
    pub async fn verify_token(&self, app_check_token: &str) -> Result<VerifiedAppCheckToken, FirebaseError> {
        let token = self.verifier.verify(app_check_token).await?;
        Ok(VerifiedAppCheckToken {
            app_id: token.subject.clone(),
            token,
        })
    }

    pub async fn verify_token_with_cancellation(
        &self,
        app_check_token: &str,
        cancel: &CancellationToken,
    ) -> Result<VerifiedAppCheckToken, FirebaseError> {
        run_cancellable(cancel, self.verify_token(app_check_token)).await
    }
}
