//! Caller-side connection retry.
//!
//! [`Session::connect`] makes exactly one attempt. Callers that want to ride
//! out transient network failures wrap it with [`connect_with_retry`], which
//! uses exponential backoff with jitter:
//!
//! - **Initial delay**: `min_delay` (see [`resolve_retry_delay`](super::config::resolve_retry_delay))
//! - **Maximum delay**: capped at [`MAX_RETRY_DELAY`]
//! - **Maximum retries**: `max_retries` on top of the first attempt
//!
//! Only errors for which [`SshError::is_retryable`] holds are retried.
//! Authentication and host key rejections fail on the first attempt so a
//! server's lockout counters are not driven up.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, RetryableWithContext};
use tracing::{error, info, warn};

use super::config::MAX_RETRY_DELAY;
use super::error::SshError;
use super::session::Session;

fn backoff(max_retries: u32, min_delay: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(min_delay)
        .with_max_delay(MAX_RETRY_DELAY.max(min_delay))
        .with_max_times(max_retries as usize)
        .with_jitter()
}

fn should_retry(label: &str, e: &SshError) -> bool {
    let retryable = e.is_retryable();
    if !retryable {
        warn!("{} failed with non-retryable error: {}", label, e);
    }
    retryable
}

/// Connect `session`, retrying transient failures.
///
/// Returns the connected session and the number of retries that were needed.
/// On failure the last error is returned and the session is dropped.
pub async fn connect_with_retry(
    session: Session,
    max_retries: u32,
    min_delay: Duration,
) -> Result<(Session, u32), SshError> {
    let label = format!("SSH connection to {}", session.identity());

    let (session, result) = retry_with_context(
        session,
        &label,
        max_retries,
        min_delay,
        |mut session: Session| async move {
            let result = session.connect().await;
            (session, result)
        },
    )
    .await;

    result.map(|((), retries)| (session, retries))
}

/// Run `operation` on an owned context until it succeeds, fails with a
/// non-retryable error, or runs out of retries. The context is handed back
/// either way.
async fn retry_with_context<C, T, F, Fut>(
    context: C,
    label: &str,
    max_retries: u32,
    min_delay: Duration,
    mut operation: F,
) -> (C, Result<(T, u32), SshError>)
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = (C, Result<T, SshError>)>,
{
    let attempt_counter = AtomicU32::new(0);
    let counter = &attempt_counter;

    let (context, result) = (move |context: C| {
        let current_attempt = counter.fetch_add(1, Ordering::SeqCst);
        if current_attempt > 0 {
            warn!("{} retry attempt {}", label, current_attempt);
        }
        operation(context)
    })
    .retry(backoff(max_retries, min_delay))
    .context(context)
    .when(|e| should_retry(label, e))
    .notify(|err, dur| {
        warn!("{} failed: {}. Retrying in {:?}", label, err, dur);
    })
    .await;

    (context, report(label, &attempt_counter, result))
}

fn report<T>(
    label: &str,
    attempt_counter: &AtomicU32,
    result: Result<T, SshError>,
) -> Result<(T, u32), SshError> {
    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    let retry_count = total_attempts.saturating_sub(1);

    match result {
        Ok(value) => {
            if retry_count > 0 {
                info!("{} succeeded after {} retry attempt(s)", label, retry_count);
            }
            Ok((value, retry_count))
        }
        Err(e) => {
            error!(
                "{} failed after {} attempt(s). Last error: {}",
                label, total_attempts, e
            );
            Err(e)
        }
    }
}
