//! Bounded wait for the confirmation of an already submitted call
//!
//! Outbound calls are submitted to the transport together with a one-shot
//! reply sender. The caller then awaits the receiving half here. When the
//! wait times out the receiver is dropped, so a confirmation arriving later
//! fails its `send` and is discarded without touching any caller state.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::domain::{OcppError, OcppResult};

pub async fn wait_with_timeout<T>(
    submitted: OcppResult<()>,
    reply: oneshot::Receiver<OcppResult<T>>,
    timeout: Duration,
) -> OcppResult<T> {
    submitted?;

    match tokio::time::timeout(timeout, reply).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(OcppError::InvalidResponse("Channel closed".to_string())),
        Err(_) => Err(OcppError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_result() {
        let (tx, rx) = oneshot::channel();
        tx.send(Ok(7)).unwrap();
        let res = wait_with_timeout(Ok(()), rx, Duration::from_millis(50)).await;
        assert_eq!(res, Ok(7));
    }

    #[tokio::test]
    async fn submission_error_skips_wait() {
        let (_tx, rx) = oneshot::channel::<OcppResult<()>>();
        let started = std::time::Instant::now();
        let res = wait_with_timeout(
            Err(OcppError::NotConnected("cp".into())),
            rx,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(res, Err(OcppError::NotConnected("cp".into())));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn late_reply_after_timeout_is_discarded() {
        let (tx, rx) = oneshot::channel::<OcppResult<u32>>();
        let res = wait_with_timeout(Ok(()), rx, Duration::from_millis(20)).await;
        assert_eq!(res, Err(OcppError::Timeout));

        // the callback fires after the caller gave up
        let late = tokio::spawn(async move { tx.send(Ok(1)).is_err() });
        assert!(late.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_sender_is_invalid_response() {
        let (tx, rx) = oneshot::channel::<OcppResult<u32>>();
        drop(tx);
        let res = wait_with_timeout(Ok(()), rx, Duration::from_millis(50)).await;
        assert!(matches!(res, Err(OcppError::InvalidResponse(_))));
    }
}
