use crate::core::error::FirebaseError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Runs `fut` until it completes or `cancel` fires, whichever comes first.
///
/// On cancellation the future is dropped in place, which aborts any in-flight
/// HTTP request and releases every lock guard it holds.
pub async fn run_cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, FirebaseError>
where
    F: Future<Output = Result<T, FirebaseError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("operation cancelled by caller");
            Err(FirebaseError::cancelled())
        }
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorCode;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let value = run_cancellable(&cancel, async { Ok::<_, FirebaseError>(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_cancelled_before_completion() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = run_cancellable(&cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, FirebaseError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }
}
