//! Verification of Google-signed JWTs.
//!
//! ID tokens, session cookies and App Check tokens share one pipeline:
//! structural decoding, claim checks in a fixed order, then an RS256
//! signature check against the currently published keys. The flavors differ
//! only in their [`VerifierConfig`].

use crate::core::cancel::run_cancellable;
use crate::core::clock::Clock;
use crate::core::error::{ErrorCode, ErrorKind, FirebaseError};
use crate::token::codec;
use crate::token::factory::{APP_CHECK_AUDIENCE, CUSTOM_TOKEN_AUDIENCE};
use crate::token::keys::PublicKeySource;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tolerance applied to `iat` and `exp` checks.
pub const CLOCK_SKEW_SECONDS: i64 = 300;

const ALGORITHM_RS256: &str = "RS256";
const MAX_SUBJECT_LENGTH: usize = 128;

/// Claims removed from the payload before it is exposed as custom claims.
const STANDARD_CLAIMS: &[&str] = &["iss", "aud", "exp", "iat", "sub", "uid"];

const ID_TOKEN_ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const SESSION_COOKIE_ISSUER_PREFIX: &str = "https://session.firebase.google.com/";
const APP_CHECK_ISSUER_PREFIX: &str = "https://firebaseappcheck.googleapis.com/";

/// Wording and error kinds used when reporting on one token type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// e.g. `Firebase ID token`
    pub name: &'static str,
    /// e.g. `ID token`
    pub short_name: &'static str,
    pub article: &'static str,
    /// e.g. `verifyIdToken()`
    pub operation: &'static str,
    pub docs_url: &'static str,
    pub invalid_kind: ErrorKind,
    pub expired_kind: ErrorKind,
}

/// How the `iss` claim is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuerRule {
    Exact(String),
    Prefix(String),
}

impl IssuerRule {
    fn matches(&self, issuer: &str) -> bool {
        match self {
            IssuerRule::Exact(expected) => issuer == expected,
            IssuerRule::Prefix(prefix) => issuer.starts_with(prefix.as_str()),
        }
    }

    fn expected(&self) -> &str {
        match self {
            IssuerRule::Exact(expected) | IssuerRule::Prefix(expected) => expected,
        }
    }
}

/// How the `aud` claim is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceRule {
    /// `aud` must be exactly this string.
    Exact(String),
    /// `aud` must be a string or array containing this value.
    Contains(String),
}

impl AudienceRule {
    fn matches(&self, audience: Option<&Value>) -> bool {
        match (self, audience) {
            (AudienceRule::Exact(expected), Some(Value::String(aud))) => aud == expected,
            (AudienceRule::Contains(expected), Some(aud)) => string_list(Some(aud)).contains(expected),
            _ => false,
        }
    }

    fn expected(&self) -> &str {
        match self {
            AudienceRule::Exact(expected) | AudienceRule::Contains(expected) => expected,
        }
    }
}

/// Everything that distinguishes one verifier flavor from another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    pub project_id: String,
    pub token_info: TokenInfo,
    pub issuer: IssuerRule,
    pub audience: AudienceRule,
    /// Audience of the custom tokens callers sometimes pass by mistake.
    pub custom_token_audience: &'static str,
}

impl VerifierConfig {
    pub fn id_token(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            token_info: TokenInfo {
                name: "Firebase ID token",
                short_name: "ID token",
                article: "an",
                operation: "verifyIdToken()",
                docs_url: "https://firebase.google.com/docs/auth/admin/verify-id-tokens",
                invalid_kind: ErrorKind::InvalidIdToken,
                expired_kind: ErrorKind::ExpiredIdToken,
            },
            issuer: IssuerRule::Exact(format!("{}{}", ID_TOKEN_ISSUER_PREFIX, project_id)),
            audience: AudienceRule::Exact(project_id.to_string()),
            custom_token_audience: CUSTOM_TOKEN_AUDIENCE,
        }
    }

    pub fn session_cookie(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            token_info: TokenInfo {
                name: "Firebase session cookie",
                short_name: "session cookie",
                article: "a",
                operation: "verifySessionCookie()",
                docs_url: "https://firebase.google.com/docs/auth/admin/manage-cookies",
                invalid_kind: ErrorKind::InvalidSessionCookie,
                expired_kind: ErrorKind::ExpiredSessionCookie,
            },
            issuer: IssuerRule::Exact(format!("{}{}", SESSION_COOKIE_ISSUER_PREFIX, project_id)),
            audience: AudienceRule::Exact(project_id.to_string()),
            custom_token_audience: CUSTOM_TOKEN_AUDIENCE,
        }
    }

    pub fn app_check(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            token_info: TokenInfo {
                name: "App Check token",
                short_name: "App Check token",
                article: "an",
                operation: "verifyToken()",
                docs_url: "https://firebase.google.com/docs/app-check/custom-resource-backend",
                invalid_kind: ErrorKind::InvalidAppCheckToken,
                expired_kind: ErrorKind::ExpiredAppCheckToken,
            },
            issuer: IssuerRule::Prefix(APP_CHECK_ISSUER_PREFIX.to_string()),
            audience: AudienceRule::Contains(format!("projects/{}", project_id)),
            custom_token_audience: APP_CHECK_AUDIENCE,
        }
    }
}

/// A verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub issuer: String,
    pub audience: Vec<String>,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub key_id: String,
    pub algorithm: String,
    /// Every payload claim except `iss`, `aud`, `exp`, `iat`, `sub` and `uid`.
    pub custom_claims: Map<String, Value>,
}

impl TokenClaims {
    /// The user id (or App Check app id): the `sub` claim.
    pub fn uid(&self) -> &str {
        &self.subject
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.custom_claims.get(name)
    }

    /// `firebase.tenant`, set on tokens of tenant users.
    pub fn tenant(&self) -> Option<&str> {
        self.firebase_claim("tenant")
    }

    /// `firebase.sign_in_provider`, e.g. `password` or `custom`.
    pub fn sign_in_provider(&self) -> Option<&str> {
        self.firebase_claim("sign_in_provider")
    }

    pub fn auth_time(&self) -> Option<DateTime<Utc>> {
        self.custom_claims
            .get("auth_time")
            .and_then(numeric)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    fn firebase_claim(&self, name: &str) -> Option<&str> {
        self.custom_claims
            .get("firebase")
            .and_then(|firebase| firebase.get(name))
            .and_then(Value::as_str)
    }
}

#[derive(Deserialize)]
struct JwtHeader {
    alg: Option<String>,
    kid: Option<String>,
}

fn numeric(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f.floor() as i64))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Verifies one kind of token against one project.
pub struct TokenVerifier {
    config: VerifierConfig,
    key_source: Arc<dyn PublicKeySource>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(
        config: VerifierConfig,
        key_source: Arc<dyn PublicKeySource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FirebaseError> {
        if config.project_id.is_empty() {
            return Err(FirebaseError::configuration(
                ErrorKind::MissingProjectId,
                format!(
                    "Must initialize app with a project id to call {}.",
                    config.token_info.operation
                ),
            ));
        }
        Ok(Self {
            config,
            key_source,
            clock,
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verifies `token` and returns its claims.
    #[tracing::instrument(skip(self, token), fields(token_type = self.config.token_info.short_name))]
    pub async fn verify(&self, token: &str) -> Result<TokenClaims, FirebaseError> {
        let info = &self.config.token_info;
        if token.is_empty() {
            return Err(FirebaseError::invalid_argument(
                info.invalid_kind,
                format!("First argument to {} must be a non-empty string.", info.operation),
            ));
        }

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(self.invalid(format!(
                "{} has incorrect number of segments. Make sure you passed the entire string JWT \
                 which represents {} {}.",
                info.name, info.article, info.short_name
            )));
        }

        let header: JwtHeader = codec::decode_segment(segments[0])
            .map_err(|e| self.decoding_failed(e))?;
        let payload: Map<String, Value> = codec::decode_segment(segments[1])
            .map_err(|e| self.decoding_failed(e))?;

        let (kid, claims) = self.check_claims(&header, payload)?;
        self.check_signature(&kid, segments[0], segments[1], segments[2])
            .await?;

        tracing::debug!(kid = %kid, "token verified");
        Ok(claims)
    }

    /// [`verify`](Self::verify), abandoned as soon as `cancel` fires.
    pub async fn verify_with_cancellation(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenClaims, FirebaseError> {
        run_cancellable(cancel, self.verify(token)).await
    }

    fn check_claims(
        &self,
        header: &JwtHeader,
        mut payload: Map<String, Value>,
    ) -> Result<(String, TokenClaims), FirebaseError> {
        let info = &self.config.token_info;
        let now = self.clock.now_seconds();
        let alg = header.alg.as_deref().unwrap_or_default();
        let kid = header.kid.as_deref().unwrap_or_default();

        if kid.is_empty() {
            let given_custom_token = string_list(payload.get("aud"))
                .iter()
                .any(|aud| aud == self.config.custom_token_audience);
            let message = if given_custom_token {
                format!(
                    "{} expects {} {}, but was given a custom token.",
                    info.operation, info.article, info.short_name
                )
            } else if alg == "HS256" {
                format!(
                    "{} expects {} {}, but was given a legacy custom token.",
                    info.operation, info.article, info.short_name
                )
            } else {
                format!("{} has no \"kid\" claim.", info.name)
            };
            return Err(self.invalid(message));
        }

        if alg != ALGORITHM_RS256 {
            return Err(self.invalid(format!(
                "{} has incorrect algorithm. Expected \"{}\" but got \"{}\".",
                info.name, ALGORITHM_RS256, alg
            )));
        }

        if !self.config.audience.matches(payload.get("aud")) {
            return Err(self.invalid(format!(
                "{} has incorrect \"aud\" (audience) claim. Expected \"{}\" but got \"{}\". Make sure \
                 the {} comes from the same Firebase project as the service account used to \
                 authenticate this SDK.",
                info.name,
                self.config.audience.expected(),
                describe(payload.get("aud")),
                info.short_name
            )));
        }

        let issuer = payload.get("iss").and_then(Value::as_str).unwrap_or_default().to_string();
        if !self.config.issuer.matches(&issuer) {
            return Err(self.invalid(format!(
                "{} has incorrect \"iss\" (issuer) claim. Expected \"{}\" but got \"{}\".",
                info.name,
                self.config.issuer.expected(),
                issuer
            )));
        }

        let iat = payload.get("iat").and_then(numeric).ok_or_else(|| {
            self.invalid(format!("{} has no \"iat\" (issued at) claim.", info.name))
        })?;
        let issued_at = DateTime::from_timestamp(iat, 0).ok_or_else(|| {
            self.invalid(format!("{} has an out of range \"iat\" (issued at) claim.", info.name))
        })?;
        if iat > now + CLOCK_SKEW_SECONDS {
            return Err(self.invalid(format!(
                "{} has \"iat\" (issued at) claim in the future.",
                info.name
            )));
        }

        let exp = payload.get("exp").and_then(numeric).ok_or_else(|| {
            self.invalid(format!("{} has no \"exp\" (expiration) claim.", info.name))
        })?;
        let expires_at = DateTime::from_timestamp(exp, 0).ok_or_else(|| {
            self.invalid(format!("{} has an out of range \"exp\" (expiration) claim.", info.name))
        })?;
        if exp < now - CLOCK_SKEW_SECONDS {
            return Err(FirebaseError::with_kind(
                ErrorCode::Unauthenticated,
                info.expired_kind,
                format!(
                    "{} has expired. Get a fresh {} from your client app and try again ({}). {}",
                    info.name,
                    info.short_name,
                    info.expired_kind,
                    self.docs_message()
                ),
            ));
        }

        let subject = match payload.get("sub") {
            Some(Value::String(sub)) => sub.clone(),
            _ => {
                return Err(self.invalid(format!("{} has no \"sub\" (subject) claim.", info.name)));
            }
        };
        if subject.is_empty() {
            return Err(self.invalid(format!(
                "{} has an empty string \"sub\" (subject) claim.",
                info.name
            )));
        }
        if subject.chars().count() > MAX_SUBJECT_LENGTH {
            return Err(self.invalid(format!(
                "{} has \"sub\" (subject) claim longer than {} characters.",
                info.name, MAX_SUBJECT_LENGTH
            )));
        }

        let audience = string_list(payload.get("aud"));
        for claim in STANDARD_CLAIMS {
            payload.remove(*claim);
        }

        let claims = TokenClaims {
            issuer,
            audience,
            subject,
            issued_at,
            expires_at,
            key_id: kid.to_string(),
            algorithm: alg.to_string(),
            custom_claims: payload,
        };
        Ok((kid.to_string(), claims))
    }

    async fn check_signature(
        &self,
        kid: &str,
        header_segment: &str,
        payload_segment: &str,
        signature_segment: &str,
    ) -> Result<(), FirebaseError> {
        let info = &self.config.token_info;
        let keys = self.key_source.public_keys().await?;
        let message = format!("{}.{}", header_segment, payload_segment);

        let mut candidates = keys.iter().filter(|key| key.id == kid).peekable();
        if candidates.peek().is_none() {
            return Err(self.invalid(format!(
                "{} has \"kid\" claim which does not correspond to a known public key. Most likely \
                 the {} is expired, so get a fresh token from your client app and try again.",
                info.name, info.short_name
            )));
        }

        if candidates.any(|key| key.verify_rs256(message.as_bytes(), signature_segment)) {
            Ok(())
        } else {
            Err(self.invalid(format!("{} has invalid signature.", info.name)))
        }
    }

    fn docs_message(&self) -> String {
        let info = &self.config.token_info;
        format!(
            "See {} for details on how to retrieve {} {}.",
            info.docs_url, info.article, info.short_name
        )
    }

    fn invalid(&self, detail: String) -> FirebaseError {
        FirebaseError::with_kind(
            ErrorCode::Unauthenticated,
            self.config.token_info.invalid_kind,
            format!("{} {}", detail, self.docs_message()),
        )
    }

    fn decoding_failed(&self, err: codec::CodecError) -> FirebaseError {
        let info = &self.config.token_info;
        self.invalid(format!(
            "Decoding {} failed ({}). Make sure you passed the entire string JWT which represents \
             {} {}.",
            info.name, err, info.article, info.short_name
        ))
        .source_error(err)
    }
}
