// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded retries with exponential backoff, for things that may simply not be up yet.

use std::future::Future;
use std::io;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Includes the first try.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Overall time budget across all attempts, if any.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            deadline: Some(Duration::from_secs(10)),
        }
    }
}

impl RetryPolicy {
    /// How long to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Could not connect to {addr} after {attempts} attempt(s): {source}")]
    Exhausted {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("Still not ready after {attempts} attempt(s): {message}")]
    NotReady { attempts: u32, message: String },
}

/// Opens a TCP connection to `addr`, retrying refused or failed attempts according to `policy`.
pub async fn connect_with_retry(
    addr: &str,
    policy: &RetryPolicy,
) -> Result<TcpStream, TransportError> {
    let outcome = with_backoff(
        policy,
        &format!("connect to {addr}"),
        || TcpStream::connect(addr),
        || io::Error::new(io::ErrorKind::TimedOut, "connection deadline passed"),
    )
    .await;

    outcome.map_err(|(attempts, source)| {
        error!("Giving up on connecting to {addr} after {attempts} attempt(s): {source}");
        TransportError::Exhausted {
            addr: addr.to_string(),
            attempts,
            source,
        }
    })
}

/// Polls `probe` until it succeeds, the attempts run out, or the deadline passes.
pub async fn wait_until_ready<F, Fut>(probe: F, policy: &RetryPolicy) -> Result<(), TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    with_backoff(policy, "reach the editor", probe, || {
        anyhow::anyhow!("readiness deadline passed")
    })
    .await
    .map_err(|(attempts, err)| TransportError::NotReady {
        attempts,
        message: format!("{err:#}"),
    })
}

async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut attempt: F,
    deadline_error: impl Fn() -> E,
) -> Result<T, (u32, E)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let remaining = policy
            .deadline
            .map(|deadline| deadline.saturating_sub(started.elapsed()));

        let result = match remaining {
            Some(remaining) => timeout(remaining, attempt())
                .await
                .unwrap_or_else(|_| Err(deadline_error())),
            None => attempt().await,
        };

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    info!("Managed to {what} on attempt {attempts}");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let delay = policy.backoff(attempts);
        let out_of_time = policy
            .deadline
            .is_some_and(|deadline| started.elapsed() + delay >= deadline);
        if attempts >= max_attempts || out_of_time {
            return Err((attempts, err));
        }

        if attempts == 1 {
            info!("Could not {what} ({err}), will keep trying...");
        } else {
            debug!("Attempt {attempts} to {what} failed: {err}");
        }
        sleep(delay).await;
    }
}
