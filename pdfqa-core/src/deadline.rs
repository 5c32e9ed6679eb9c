//! Bounding capability calls by a cancellation token and a timeout.

use crate::error::{QaError, Result, Stage};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run `call` for `stage`, giving up with `Cancelled` as soon as `cancel`
/// fires or with `Timeout` once `timeout` elapses.
///
/// A token that is already cancelled wins without polling `call` at all.
pub(crate) async fn bounded<T, F>(
    stage: Stage,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(QaError::Cancelled { stage });
    }

    let timed = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(QaError::Timeout {
                    stage,
                    timeout_secs: limit.as_secs(),
                })),
            None => call.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QaError::Cancelled { stage }),
        result = timed => result,
    }
}

/// `Some(secs)` as a duration, treating 0 as unbounded.
pub(crate) fn from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
