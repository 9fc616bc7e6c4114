//! Construction of the HTTP transports used by every service.

use crate::core::error::{ErrorKind, FirebaseError};
use crate::core::middleware::AuthMiddleware;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

/// Transport settings shared by all outgoing calls.
///
/// Retries apply to transient transport failures and 5xx/429 responses only;
/// the token logic itself never retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-request timeout. `None` leaves requests bounded only by the caller.
    pub timeout: Option<Duration>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            timeout: None,
        }
    }
}

impl HttpOptions {
    pub fn without_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), FirebaseError> {
        if self.min_backoff > self.max_backoff {
            return Err(FirebaseError::configuration(
                ErrorKind::InvalidArgument,
                "min_backoff must not be greater than max_backoff",
            ));
        }
        Ok(())
    }
}

/// Builds a retrying client, optionally attaching OAuth2 credentials.
pub fn build_client(
    options: &HttpOptions,
    middleware: Option<AuthMiddleware>,
) -> Result<ClientWithMiddleware, FirebaseError> {
    options.validate()?;

    let mut builder = Client::builder();
    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }
    let client = builder.build()?;

    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(options.min_backoff, options.max_backoff)
        .build_with_max_retries(options.max_retries);

    let mut client = ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy));
    if let Some(middleware) = middleware {
        client = client.with(middleware);
    }

    Ok(client.build())
}
