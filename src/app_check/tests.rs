use super::*;
use crate::core::clock::FixedClock;
use crate::core::error::ErrorKind;
use crate::testing::{self, plain_client, sign_jwt, KEY_ID, PRIVATE_KEY, PROJECT_ID, PUBLIC_KEY};
use crate::token::keys::{PublicKey, StaticPublicKeySource};
use crate::token::signer::ServiceAccountSigner;
use httpmock::prelude::*;
use serde_json::json;

const NOW: i64 = 1_700_000_000;
const APP_ID: &str = "1:123456:web:abcdef";

fn app_check(server: &MockServer) -> FirebaseAppCheck {
    let context = AppCheckContext {
        client: plain_client(),
        project_id: PROJECT_ID.to_string(),
        signer: Arc::new(ServiceAccountSigner::new(&testing::service_account_key()).unwrap()),
        clock: Arc::new(FixedClock::at_seconds(NOW)),
        keys: Arc::new(StaticPublicKeySource::new(vec![
            PublicKey::from_pem(KEY_ID, PUBLIC_KEY).unwrap(),
        ])),
    };
    FirebaseAppCheck::new_with_url(context, server.url("/v1/projects/test-project")).unwrap()
}

#[tokio::test]
async fn test_create_token_exchanges_custom_token() {
    let server = MockServer::start();
    let app_check = app_check(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/apps/1:123456:web:abcdef:exchangeCustomToken")
            .header("content-type", "application/json");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"token": "app-check-token", "ttl": "3600s"}));
    });

    let options = AppCheckTokenOptions {
        ttl_millis: Some(3_600_000),
    };
    let token = app_check.create_token(APP_ID, &options).await.unwrap();
    assert_eq!(
        token,
        AppCheckToken {
            token: "app-check-token".to_string(),
            ttl_millis: 3_600_000,
        }
    );
    mock.assert();
}

#[tokio::test]
async fn test_create_token_validates_before_exchange() {
    let server = MockServer::start();
    let app_check = app_check(&server);
    let mock = server.mock(|when, then| {
        when.method(POST);
        then.status(200).json_body(json!({"token": "t", "ttl": "1s"}));
    });

    let err = app_check
        .create_token("", &AppCheckTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.error_kind(), Some(ErrorKind::InvalidAppId));

    let options = AppCheckTokenOptions {
        ttl_millis: Some(60_000),
    };
    let err = app_check.create_token(APP_ID, &options).await.unwrap_err();
    assert_eq!(err.error_kind(), Some(ErrorKind::InvalidTtl));

    mock.assert_calls(0);
}

#[tokio::test]
async fn test_create_token_exchange_error() {
    let server = MockServer::start();
    let app_check = app_check(&server);
    server.mock(|when, then| {
        when.method(POST);
        then.status(403)
            .header("content-type", "application/json")
            .json_body(json!({
                "error": {"code": 403, "message": "App Check API disabled", "status": "PERMISSION_DENIED"}
            }));
    });

    let err = app_check
        .create_token(APP_ID, &AppCheckTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    assert!(err.message().contains("App Check API disabled"));
}

#[tokio::test]
async fn test_verify_token() {
    let server = MockServer::start();
    let app_check = app_check(&server);
    let token = sign_jwt(
        &json!({"alg": "RS256", "kid": KEY_ID, "typ": "JWT"}),
        &json!({
            "iss": "https://firebaseappcheck.googleapis.com/123456",
            "aud": ["projects/123456", "projects/test-project"],
            "sub": APP_ID,
            "iat": NOW - 60,
            "exp": NOW + 3540
        }),
        PRIVATE_KEY,
    );

    let verified = app_check.verify_token(&token).await.unwrap();
    assert_eq!(verified.app_id, APP_ID);
    assert_eq!(verified.token.subject, APP_ID);

    let err = app_check.verify_token("not-a-token").await.unwrap_err();
    assert_eq!(err.error_kind(), Some(ErrorKind::InvalidAppCheckToken));
}

#[tokio::test]
async fn test_verify_token_with_cancelled_token() {
    let server = MockServer::start();
    let app_check = app_check(&server);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = app_check
        .verify_token_with_cancellation("a.b.c", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
}

#[test]
fn test_exchange_request_body() {
    let request = ExchangeCustomTokenRequest {
        custom_token: "a.b.c",
    };
    assert_eq!(serde_json::to_value(&request).unwrap(), json!({"customToken": "a.b.c"}));
}

#[test]
fn test_duration_string_to_millis() {
    assert_eq!(duration_string_to_millis("3600s").unwrap(), 3_600_000);
    assert_eq!(duration_string_to_millis("1.5s").unwrap(), 1_500);
    assert_eq!(duration_string_to_millis("0s").unwrap(), 0);
    for bad in ["3600", "s", "-1s", "abcs", ""] {
        assert!(duration_string_to_millis(bad).is_err(), "{}", bad);
    }
}
