//! Error taxonomy shared by every service in the crate.
//!
//! A [`FirebaseError`] carries a coarse, transport-style [`ErrorCode`], an
//! optional service-specific [`ErrorKind`], a message, and optionally the
//! low-level error and HTTP response that caused it.

use reqwest_retry::RetryError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Coarse error categories, modelled on the canonical Google API status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    FailedPrecondition,
    OutOfRange,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Conflict,
    Aborted,
    AlreadyExists,
    ResourceExhausted,
    Cancelled,
    DataLoss,
    Unknown,
    Internal,
    Unavailable,
    DeadlineExceeded,
}

impl ErrorCode {
    /// Maps an HTTP status code to the closest platform error code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ErrorCode::InvalidArgument,
            401 => ErrorCode::Unauthenticated,
            403 => ErrorCode::PermissionDenied,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            412 => ErrorCode::FailedPrecondition,
            416 => ErrorCode::OutOfRange,
            429 => ErrorCode::ResourceExhausted,
            499 => ErrorCode::Cancelled,
            500 => ErrorCode::Internal,
            503 => ErrorCode::Unavailable,
            504 => ErrorCode::DeadlineExceeded,
            _ => ErrorCode::Unknown,
        }
    }

    /// Maps the `status` string of a Google API error body (e.g. `"NOT_FOUND"`).
    pub fn from_status_str(status: &str) -> Option<Self> {
        let code = match status {
            "INVALID_ARGUMENT" => ErrorCode::InvalidArgument,
            "FAILED_PRECONDITION" => ErrorCode::FailedPrecondition,
            "OUT_OF_RANGE" => ErrorCode::OutOfRange,
            "UNAUTHENTICATED" => ErrorCode::Unauthenticated,
            "PERMISSION_DENIED" => ErrorCode::PermissionDenied,
            "NOT_FOUND" => ErrorCode::NotFound,
            "CONFLICT" => ErrorCode::Conflict,
            "ABORTED" => ErrorCode::Aborted,
            "ALREADY_EXISTS" => ErrorCode::AlreadyExists,
            "RESOURCE_EXHAUSTED" => ErrorCode::ResourceExhausted,
            "CANCELLED" => ErrorCode::Cancelled,
            "DATA_LOSS" => ErrorCode::DataLoss,
            "UNKNOWN" => ErrorCode::Unknown,
            "INTERNAL" => ErrorCode::Internal,
            "UNAVAILABLE" => ErrorCode::Unavailable,
            "DEADLINE_EXCEEDED" => ErrorCode::DeadlineExceeded,
            _ => return None,
        };
        Some(code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::DataLoss => "DATA_LOSS",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained, service-specific error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration
    InvalidCredential,
    MissingProjectId,
    InvalidTenantId,

    // Argument validation
    InvalidArgument,
    InvalidUid,
    ReservedClaim,
    InvalidSessionCookieDuration,
    InvalidAppId,
    InvalidTtl,

    // Token verification
    InvalidIdToken,
    ExpiredIdToken,
    InvalidSessionCookie,
    ExpiredSessionCookie,
    InvalidAppCheckToken,
    ExpiredAppCheckToken,
    TenantIdMismatch,
    CertificateFetchFailed,

    // Signing
    SigningFailed,

    // Backend
    UserNotFound,
    TenantNotFound,
    UserDisabled,
    ProjectNotFound,
}

impl ErrorKind {
    /// The public, service-prefixed code string (e.g. `auth/id-token-expired`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCredential => "app/invalid-credential",
            ErrorKind::MissingProjectId => "app/no-project-id",
            ErrorKind::InvalidTenantId => "auth/invalid-tenant-id",
            ErrorKind::InvalidArgument => "auth/argument-error",
            ErrorKind::InvalidUid => "auth/invalid-uid",
            ErrorKind::ReservedClaim => "auth/reserved-claim",
            ErrorKind::InvalidSessionCookieDuration => "auth/invalid-session-cookie-duration",
            ErrorKind::InvalidAppId => "app-check/invalid-app-id",
            ErrorKind::InvalidTtl => "app-check/invalid-ttl",
            ErrorKind::InvalidIdToken => "auth/invalid-id-token",
            ErrorKind::ExpiredIdToken => "auth/id-token-expired",
            ErrorKind::InvalidSessionCookie => "auth/invalid-session-cookie",
            ErrorKind::ExpiredSessionCookie => "auth/session-cookie-expired",
            ErrorKind::InvalidAppCheckToken => "app-check/invalid-token",
            ErrorKind::ExpiredAppCheckToken => "app-check/app-check-token-expired",
            ErrorKind::TenantIdMismatch => "auth/mismatching-tenant-id",
            ErrorKind::CertificateFetchFailed => "auth/certificate-fetch-failed",
            ErrorKind::SigningFailed => "auth/signing-failed",
            ErrorKind::UserNotFound => "auth/user-not-found",
            ErrorKind::TenantNotFound => "auth/tenant-not-found",
            ErrorKind::UserDisabled => "auth/user-disabled",
            ErrorKind::ProjectNotFound => "auth/project-not-found",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and body of a failed HTTP exchange, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseInfo {
    pub status: u16,
    pub body: String,
}

/// The error type returned by every fallible operation in this crate.
///
/// Cloneable so that one failed key refresh can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FirebaseError {
    code: ErrorCode,
    kind: Option<ErrorKind>,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    response: Option<HttpResponseInfo>,
}

impl FirebaseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: None,
            message: message.into(),
            source: None,
            response: None,
        }
    }

    pub fn with_kind(code: ErrorCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(code, message).kind(kind)
    }

    /// Builder-style setter for the domain kind.
    pub fn kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn source_error<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn response(mut self, response: HttpResponseInfo) -> Self {
        self.response = Some(response);
        self
    }

    /// Prefixes the message with context while keeping code, kind and source.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn invalid_argument(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::with_kind(ErrorCode::InvalidArgument, kind, message)
    }

    pub fn configuration(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::with_kind(ErrorCode::InvalidArgument, kind, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "The operation was cancelled")
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_response(&self) -> Option<&HttpResponseInfo> {
        self.response.as_ref()
    }

    /// True for failures a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Unavailable | ErrorCode::DeadlineExceeded | ErrorCode::Internal
        )
    }
}

/// Maps a low-level transport failure to a platform error code.
pub fn code_for_transport_error(err: &reqwest::Error) -> ErrorCode {
    if err.is_timeout() {
        ErrorCode::DeadlineExceeded
    } else if err.is_connect() {
        ErrorCode::Unavailable
    } else if let Some(status) = err.status() {
        ErrorCode::from_http_status(status.as_u16())
    } else {
        ErrorCode::Unknown
    }
}

impl From<reqwest::Error> for FirebaseError {
    fn from(err: reqwest::Error) -> Self {
        let code = code_for_transport_error(&err);
        FirebaseError::new(code, format!("HTTP request failed: {}", err)).source_error(err)
    }
}

/// Finds the transport failure behind a middleware error. The retry layer
/// wraps every failure it gives up on, even when no retry was attempted.
fn middleware_transport_code(err: &reqwest_middleware::Error) -> ErrorCode {
    match err {
        reqwest_middleware::Error::Reqwest(err) => code_for_transport_error(err),
        reqwest_middleware::Error::Middleware(err) => {
            if let Some(retry) = err.downcast_ref::<RetryError>() {
                let inner = match retry {
                    RetryError::WithRetries { err, .. } => err,
                    RetryError::Error(err) => err,
                };
                return middleware_transport_code(inner);
            }
            err.chain()
                .find_map(|cause| cause.downcast_ref::<reqwest::Error>())
                .map(code_for_transport_error)
                .unwrap_or(ErrorCode::Unknown)
        }
    }
}

impl From<reqwest_middleware::Error> for FirebaseError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            err => {
                let code = middleware_transport_code(&err);
                FirebaseError::new(code, format!("HTTP request failed: {}", err)).source_error(err)
            }
        }
    }
}

impl From<serde_json::Error> for FirebaseError {
    fn from(err: serde_json::Error) -> Self {
        FirebaseError::new(ErrorCode::Internal, format!("JSON serialization failed: {}", err))
            .source_error(err)
    }
}
