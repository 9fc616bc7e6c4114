pub mod cache;
pub mod cancel;
pub mod clock;
pub mod error;
pub mod http;
pub mod middleware;


use crate::core::error::{ErrorCode, FirebaseError, HttpResponseInfo};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
    pub errors: Option<Vec<FirebaseSubError>>,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseSubError {
    pub message: String,
    pub domain: Option<String>,
    pub reason: Option<String>,
}

impl FirebaseErrorResponse {
    pub fn display_message(&self) -> String {
        format!("{} (code: {})", self.error.message, self.error.code)
    }

    /// The server-side error code at the start of the message, e.g.
    /// `USER_NOT_FOUND` in `"USER_NOT_FOUND : no user record"`.
    pub fn server_code(&self) -> &str {
        self.error
            .message
            .split(|c: char| c == ' ' || c == ':')
            .next()
            .unwrap_or_default()
    }
}

/// Turns a non-2xx response into a [`FirebaseError`].
///
/// The Google error envelope is used when the body carries one; otherwise the
/// HTTP status decides the code and `default_msg` the message.
pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> FirebaseError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error_from_body(status.as_u16(), body, default_msg)
}

pub(crate) fn error_from_body(status: u16, body: String, default_msg: &str) -> FirebaseError {
    let info = HttpResponseInfo {
        status,
        body: body.clone(),
    };

    match serde_json::from_str::<FirebaseErrorResponse>(&body) {
        Ok(error_resp) => {
            let code = error_resp
                .error
                .status
                .as_deref()
                .and_then(ErrorCode::from_status_str)
                .unwrap_or_else(|| ErrorCode::from_http_status(status));
            FirebaseError::new(code, format!("{}: {}", default_msg, error_resp.display_message()))
                .response(info)
        }
        Err(_) => FirebaseError::new(
            ErrorCode::from_http_status(status),
            format!("{}: HTTP {}", default_msg, status),
        )
        .response(info),
    }
}

/// Percent-encodes one URL path segment.
pub(crate) fn encode_path_segment(segment: &str) -> String {
    // form encoding writes spaces as '+' and escapes a literal '+'.
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
