//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::VoiceError;

/// Wrap a future with a timeout.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, VoiceError>>,
) -> Result<T, VoiceError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(VoiceError::Timeout(duration.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_future_maps_to_timeout_error() {
        let result = with_timeout(Duration::from_millis(250), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, VoiceError>(())
        })
        .await;
        assert!(matches!(result, Err(VoiceError::Timeout(250))));
    }

    #[tokio::test]
    async fn inner_result_passes_through() {
        let value = with_timeout(Duration::from_secs(1), async { Ok::<_, VoiceError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
