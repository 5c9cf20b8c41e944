//! Structural wait: poll a predicate until it holds or a bound expires.
//!
//! Pages render asynchronously, so readiness is a condition on the
//! rendered markup rather than a fixed delay.

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::infrastructure::substrate::{BrowserSubstrate, SubstrateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self { timeout, poll_interval }
    }
}

#[derive(Error, Debug)]
pub enum PollError<E> {
    #[error("condition not met within {waited:?}")]
    TimedOut { waited: Duration },

    #[error(transparent)]
    Failed(E),
}

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("structural condition not met within {waited:?}")]
    TimedOut {
        waited: Duration,
        /// Markup seen when the bound expired, if it could be read
        last_content: Option<String>,
    },

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

/// Runs `check` until it yields a value, fails, or `policy.timeout` elapses.
///
/// `check` always runs at least once; sleeps never overshoot the bound.
pub async fn poll_until<T, E, F, Fut>(policy: WaitPolicy, mut check: F) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = check().await.map_err(PollError::Failed)? {
            return Ok(value);
        }
        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(PollError::TimedOut { waited });
        }
        tokio::time::sleep(policy.poll_interval.min(policy.timeout - waited)).await;
    }
}

/// Polls the context's rendered content until `probe` recognizes it.
pub async fn wait_for<S, T, P>(substrate: &S, ctx: &S::Context, policy: WaitPolicy, probe: P) -> Result<T, WaitError>
where
    S: BrowserSubstrate + ?Sized,
    T: Send,
    P: Fn(&str) -> Option<T> + Sync,
{
    let probe = &probe;
    let outcome = poll_until(policy, move || async move {
        let content = substrate.read_content(ctx).await?;
        Ok::<_, SubstrateError>(probe(&content))
    })
    .await;

    match outcome {
        Ok(value) => Ok(value),
        Err(PollError::Failed(source)) => Err(WaitError::Substrate(source)),
        Err(PollError::TimedOut { waited }) => Err(WaitError::TimedOut {
            waited,
            last_content: substrate.read_content(ctx).await.ok(),
        }),
    }
}
